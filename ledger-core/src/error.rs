//! Error types for the ledger

use std::fmt;
use thiserror::Error;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Stable error tag surfaced to the host in the response message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Argument count mismatch
    WrongArity,
    /// Parse failure or empty required string
    BadArgument,
    /// Referenced key absent
    NotFound,
    /// Duplicate refID/accountID
    AlreadyExists,
    /// Caller principal does not match required identity
    Unauthorized,
    /// Account paused or transaction frozen by an active cycle
    Frozen,
    /// Operation currency does not match account currency
    CurrencyMismatch,
    /// Debit would drive balance negative
    Insufficient,
    /// New cycle attempted while previous is ACHIEVED/INVALID
    CycleUnsettled,
    /// Join attempted after timeout
    CycleExpired,
    /// Supplied cycleID does not match current
    CycleMismatch,
    /// Underlying state-store failure
    Host,
}

impl ErrorKind {
    /// Tag as rendered in host responses
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::WrongArity => "WrongArity",
            ErrorKind::BadArgument => "BadArgument",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::AlreadyExists => "AlreadyExists",
            ErrorKind::Unauthorized => "Unauthorized",
            ErrorKind::Frozen => "Frozen",
            ErrorKind::CurrencyMismatch => "CurrencyMismatch",
            ErrorKind::Insufficient => "Insufficient",
            ErrorKind::CycleUnsettled => "CycleUnsettled",
            ErrorKind::CycleExpired => "CycleExpired",
            ErrorKind::CycleMismatch => "CycleMismatch",
            ErrorKind::Host => "Host",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Storage error (RocksDB, store adapter)
    #[error("Storage error: {0}")]
    Storage(String),

    /// Serialization error (JSON codec, bincode history records)
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid argument or malformed document
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Key not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Key already present
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// Caller is not allowed to perform the operation
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Account paused or queued transaction frozen
    #[error("Frozen: {0}")]
    Frozen(String),

    /// Currency does not match the account
    #[error("Currency mismatch: account {account} uses {expected}, got {actual}")]
    CurrencyMismatch {
        /// Account ID
        account: String,
        /// Currency set on the account
        expected: String,
        /// Currency supplied by the operation
        actual: String,
    },

    /// Debit larger than balance
    #[error("Insufficient funds: account {account} holds {balance}, requested {requested}")]
    Insufficient {
        /// Account ID
        account: String,
        /// Current balance
        balance: rust_decimal::Decimal,
        /// Requested debit
        requested: rust_decimal::Decimal,
    },

    /// Concurrency error (actor mailbox closed, etc.)
    #[error("Concurrency error: {0}")]
    Concurrency(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map to the stable host-facing tag
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::InvalidArgument(_) => ErrorKind::BadArgument,
            Error::NotFound(_) => ErrorKind::NotFound,
            Error::AlreadyExists(_) => ErrorKind::AlreadyExists,
            Error::Unauthorized(_) => ErrorKind::Unauthorized,
            Error::Frozen(_) => ErrorKind::Frozen,
            Error::CurrencyMismatch { .. } => ErrorKind::CurrencyMismatch,
            Error::Insufficient { .. } => ErrorKind::Insufficient,
            Error::Storage(_)
            | Error::Serialization(_)
            | Error::Concurrency(_)
            | Error::Config(_)
            | Error::Io(_) => ErrorKind::Host,
        }
    }
}

impl From<rocksdb::Error> for Error {
    fn from(err: rocksdb::Error) -> Self {
        Error::Storage(err.to_string())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal::Decimal;

    #[test]
    fn test_kind_mapping() {
        let err = Error::Insufficient {
            account: "A".to_string(),
            balance: Decimal::from(10),
            requested: Decimal::from(25),
        };
        assert_eq!(err.kind(), ErrorKind::Insufficient);
        assert_eq!(Error::Storage("disk".into()).kind(), ErrorKind::Host);
        assert_eq!(ErrorKind::CycleExpired.to_string(), "CycleExpired");
    }
}
