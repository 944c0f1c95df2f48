//! Error types for the settlement chaincode

use ledger_core::ErrorKind;
use thiserror::Error;

/// Result type for settlement operations
pub type Result<T> = std::result::Result<T, Error>;

/// Settlement errors
#[derive(Error, Debug)]
pub enum Error {
    /// Ledger error
    #[error("{0}")]
    Ledger(#[from] ledger_core::Error),

    /// Argument count does not match the function
    #[error("{function} expects {expected} arguments, got {actual}")]
    WrongArity {
        /// Function name
        function: String,
        /// Expected argument count (or range)
        expected: String,
        /// Supplied argument count
        actual: usize,
    },

    /// Unknown function or unparsable argument
    #[error("{0}")]
    BadArgument(String),

    /// Previous cycle is still ACHIEVED or INVALID
    #[error("netting cycle {cycle_id} is {status}, settle or reset it first")]
    CycleUnsettled {
        /// Current cycle
        cycle_id: u64,
        /// Current status
        status: ledger_core::CycleStatus,
    },

    /// Cycle timed out
    #[error("netting cycle {0} has expired")]
    CycleExpired(u64),

    /// Supplied cycle does not match current
    #[error("{0}")]
    CycleMismatch(String),

    /// A chaincode on another channel rejected the call
    #[error("cross-channel call failed: {0}")]
    CrossChannel(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Map to the stable host-facing tag
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Ledger(e) => e.kind(),
            Error::WrongArity { .. } => ErrorKind::WrongArity,
            Error::BadArgument(_) => ErrorKind::BadArgument,
            Error::CycleUnsettled { .. } => ErrorKind::CycleUnsettled,
            Error::CycleExpired(_) => ErrorKind::CycleExpired,
            Error::CycleMismatch(_) => ErrorKind::CycleMismatch,
            Error::CrossChannel(_) | Error::Config(_) | Error::Io(_) => ErrorKind::Host,
        }
    }

    /// Shorthand for a ledger `NotFound`
    pub fn not_found(what: impl Into<String>) -> Self {
        Error::Ledger(ledger_core::Error::NotFound(what.into()))
    }

    /// Shorthand for a ledger `Unauthorized`
    pub fn unauthorized(what: impl Into<String>) -> Self {
        Error::Ledger(ledger_core::Error::Unauthorized(what.into()))
    }

    /// Shorthand for a ledger `AlreadyExists`
    pub fn already_exists(what: impl Into<String>) -> Self {
        Error::Ledger(ledger_core::Error::AlreadyExists(what.into()))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::BadArgument(format!("invalid JSON: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds() {
        assert_eq!(Error::CycleExpired(3).kind(), ErrorKind::CycleExpired);
        assert_eq!(
            Error::from(ledger_core::Error::Frozen("x".into())).kind(),
            ErrorKind::Frozen
        );
        assert_eq!(Error::unauthorized("bob").kind(), ErrorKind::Unauthorized);
        let err = Error::WrongArity {
            function: "getAccount".into(),
            expected: "1".into(),
            actual: 0,
        };
        assert_eq!(err.to_string(), "getAccount expects 1 arguments, got 0");
    }
}
