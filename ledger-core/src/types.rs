//! Core types for the ledger
//!
//! All stored entities are designed for:
//! - Deterministic JSON serialization (fixed field order, ordered maps)
//! - Exact arithmetic (Decimal for money)
//! - Validation at the boundary (typed identifiers)

use crate::{Error, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;

/// Current schema version written by this crate
pub const SCHEMA_VERSION: u32 = 1;

fn schema_v1() -> u32 {
    SCHEMA_VERSION
}

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Create without validation (trusted sources only)
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Parse untrusted input: non-empty, no NUL bytes
            pub fn parse(id: &str) -> Result<Self> {
                if id.is_empty() {
                    return Err(Error::InvalidArgument(format!(
                        "{} must be a non-empty string",
                        $label
                    )));
                }
                if id.contains('\u{0}') {
                    return Err(Error::InvalidArgument(format!(
                        "{} must not contain NUL characters",
                        $label
                    )));
                }
                Ok(Self(id.to_string()))
            }

            /// Get as string
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// Participant account identifier (also the participant's principal name)
    AccountId,
    "AccountID"
);

string_id!(
    /// Reference of a queued/completed transaction or fund record
    RefId,
    "RefID"
);

string_id!(
    /// Logical channel name
    Channel,
    "Channel"
);

string_id!(
    /// Canonical principal (certificate common name) of the invoker
    Principal,
    "Principal"
);

/// Banks taking part in netting cycles are plain accounts
pub type BankId = AccountId;

impl RefId {
    /// Derive a reference as the lowercase hex SHA-256 of the concatenated parts
    pub fn derive(parts: &[&str]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            hasher.update(part.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }
}

impl Principal {
    /// True if this principal is the owner of the account
    pub fn is_account(&self, account: &AccountId) -> bool {
        self.0 == account.0
    }
}

/// Render a timestamp the way it is mixed into derived references
pub fn timestamp_token(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

/// Currency code, uppercased at the boundary
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Currency(String);

impl Currency {
    /// Parse and uppercase a currency code
    pub fn parse(code: &str) -> Result<Self> {
        let code = code.trim();
        if code.is_empty() {
            return Err(Error::InvalidArgument(
                "Currency must be a non-empty string".to_string(),
            ));
        }
        if !code.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(Error::InvalidArgument(format!(
                "Currency must be alphanumeric: {}",
                code
            )));
        }
        Ok(Self(code.to_ascii_uppercase()))
    }

    /// ISO 4217 style code
    pub fn code(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `a + b`, rejected when the result leaves the `Decimal` range
pub fn checked_add(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_add(b)
        .ok_or_else(|| Error::InvalidArgument(format!("amount overflow: {} + {}", a, b)))
}

/// `a - b`, rejected when the result leaves the `Decimal` range
pub fn checked_sub(a: Decimal, b: Decimal) -> Result<Decimal> {
    a.checked_sub(b)
        .ok_or_else(|| Error::InvalidArgument(format!("amount overflow: {} - {}", a, b)))
}

/// Sum of amounts, rejected on overflow
pub fn checked_sum(amounts: impl IntoIterator<Item = Decimal>) -> Result<Decimal> {
    amounts
        .into_iter()
        .try_fold(Decimal::ZERO, checked_add)
}

/// Document discriminator stored in every entity's `docType`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocType {
    /// Participant account
    Account,
    /// Queued transaction
    Queue,
    /// Completed transaction
    CompletedTx,
    /// Regulator credit
    PledgeFund,
    /// Regulator debit
    RedeemFund,
    /// Multilateral netting credit
    NettingAdd,
    /// Multilateral netting debit
    NettingSubtract,
    /// Cross-channel record on the source channel
    MoveOutFund,
    /// Cross-channel record on the destination channel
    MoveInFund,
    /// Cross-channel record on the intermediary channel
    TransientFund,
    /// Bank request inside a netting cycle
    BankRequest,
    /// Netting cycle singleton
    NettingCycle,
}

impl DocType {
    /// Wire name
    pub fn as_str(&self) -> &'static str {
        match self {
            DocType::Account => "account",
            DocType::Queue => "queue",
            DocType::CompletedTx => "completedtx",
            DocType::PledgeFund => "pledgefund",
            DocType::RedeemFund => "redeemfund",
            DocType::NettingAdd => "nettingadd",
            DocType::NettingSubtract => "nettingsubtract",
            DocType::MoveOutFund => "moveoutfund",
            DocType::MoveInFund => "moveinfund",
            DocType::TransientFund => "transientfund",
            DocType::BankRequest => "bankrequest",
            DocType::NettingCycle => "nettingcycle",
        }
    }
}

impl fmt::Display for DocType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Account lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AccountStatus {
    /// Balance may move
    Normal,
    /// Balance is locked
    Paused,
}

impl AccountStatus {
    /// Parse case-insensitively
    pub fn parse(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "NORMAL" => Ok(AccountStatus::Normal),
            "PAUSED" => Ok(AccountStatus::Paused),
            other => Err(Error::InvalidArgument(format!(
                "Status must be NORMAL or PAUSED, got {}",
                other
            ))),
        }
    }
}

/// Funded position of a participant in one channel
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct Account {
    /// Always `account`
    pub doc_type: DocType,
    /// Schema version
    #[serde(default = "schema_v1")]
    pub schema_version: u32,
    /// Account ID
    #[serde(rename = "accountID")]
    pub account_id: AccountId,
    /// Immutable currency
    pub currency: Currency,
    /// Balance, never negative
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    /// Lifecycle status
    pub status: AccountStatus,
}

impl Account {
    /// Build a fresh account record
    pub fn new(
        account_id: AccountId,
        currency: Currency,
        amount: Decimal,
        status: AccountStatus,
    ) -> Self {
        Self {
            doc_type: DocType::Account,
            schema_version: SCHEMA_VERSION,
            account_id,
            currency,
            amount,
            status,
        }
    }
}

/// Status of an entry still in the queue
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum QueueStatus {
    /// Waiting for liquidity or netting
    Active,
}

/// Terminal status of a completed transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CompletionStatus {
    /// Funds moved (directly or through netting)
    Settled,
    /// Withdrawn by the sender
    Cancelled,
}

/// Pending transfer not yet settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct QueuedTransaction {
    /// Always `queue`
    pub doc_type: DocType,
    /// Schema version
    #[serde(default = "schema_v1")]
    pub schema_version: u32,
    /// H(sender ∥ receiver ∥ timestamp)
    #[serde(rename = "refID")]
    pub ref_id: RefId,
    /// Paying account
    pub sender: AccountId,
    /// Receiving account
    pub receiver: AccountId,
    /// Higher settles first
    pub priority: i64,
    /// Eligible for multilateral netting
    pub nettable: bool,
    /// Fixed once created
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    /// Currency of both accounts
    pub currency: Currency,
    /// Queue status
    pub status: QueueStatus,
    /// Held by an active netting cycle
    pub is_frozen: bool,
    /// Creation timestamp
    pub create_time: DateTime<Utc>,
    /// Last priority/freeze change
    pub update_time: DateTime<Utc>,
}

impl QueuedTransaction {
    /// Settle or cancel this entry into an immutable record
    pub fn into_completed(self, status: CompletionStatus, now: DateTime<Utc>) -> CompletedTransaction {
        CompletedTransaction {
            doc_type: DocType::CompletedTx,
            schema_version: SCHEMA_VERSION,
            ref_id: self.ref_id,
            sender: self.sender,
            receiver: self.receiver,
            priority: self.priority,
            amount: self.amount,
            currency: self.currency,
            status,
            create_time: self.create_time,
            update_time: now,
        }
    }

    /// Entry touches the account as sender or receiver
    pub fn involves(&self, account: &AccountId) -> bool {
        &self.sender == account || &self.receiver == account
    }
}

/// Immutable record of a settled or cancelled transfer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CompletedTransaction {
    /// Always `completedtx`
    pub doc_type: DocType,
    /// Schema version
    #[serde(default = "schema_v1")]
    pub schema_version: u32,
    /// Same reference as the queued entry
    #[serde(rename = "refID")]
    pub ref_id: RefId,
    /// Paying account
    pub sender: AccountId,
    /// Receiving account
    pub receiver: AccountId,
    /// Priority at completion
    pub priority: i64,
    /// Transfer amount
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    /// Currency
    pub currency: Currency,
    /// Terminal status
    pub status: CompletionStatus,
    /// Creation timestamp of the original transfer
    pub create_time: DateTime<Utc>,
    /// Completion timestamp
    pub update_time: DateTime<Utc>,
}

/// Kind of regulator-authored balance adjustment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FundKind {
    /// Liquidity injection
    Pledge,
    /// Liquidity withdrawal
    Redeem,
    /// Multilateral net receiver posting
    NettingAdd,
    /// Multilateral net payer posting
    NettingSubtract,
}

impl FundKind {
    /// Document type the adjustment is stored under
    pub fn doc_type(&self) -> DocType {
        match self {
            FundKind::Pledge => DocType::PledgeFund,
            FundKind::Redeem => DocType::RedeemFund,
            FundKind::NettingAdd => DocType::NettingAdd,
            FundKind::NettingSubtract => DocType::NettingSubtract,
        }
    }

    /// True for kinds that credit the account
    pub fn is_credit(&self) -> bool {
        matches!(self, FundKind::Pledge | FundKind::NettingAdd)
    }
}

/// Out-of-band balance adjustment authorized by the regulator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PledgeRedeemFund {
    /// `pledgefund`, `redeemfund`, `nettingadd` or `nettingsubtract`
    pub doc_type: DocType,
    /// Schema version
    #[serde(default = "schema_v1")]
    pub schema_version: u32,
    /// H(accountID ∥ timestamp)
    #[serde(rename = "refID")]
    pub ref_id: RefId,
    /// Adjusted account
    #[serde(rename = "accountID")]
    pub account_id: AccountId,
    /// Adjustment, always positive
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    /// Currency
    pub currency: Currency,
    /// Creation timestamp
    pub create_time: DateTime<Utc>,
}

/// Cross-channel handoff record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct MoveOutInFund {
    /// `moveoutfund`, `moveinfund` or `transientfund`
    pub doc_type: DocType,
    /// Schema version
    #[serde(default = "schema_v1")]
    pub schema_version: u32,
    /// H(channelFrom ∥ channelTo ∥ timestamp), shared by all three records
    #[serde(rename = "refID")]
    pub ref_id: RefId,
    /// Owner of the funds
    #[serde(rename = "accountID")]
    pub account_id: AccountId,
    /// Source channel
    pub channel_from: Channel,
    /// Destination channel
    pub channel_to: Channel,
    /// Moved amount
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
    /// Currency
    pub currency: Currency,
    /// Creation timestamp on the channel holding this record
    pub create_time: DateTime<Utc>,
}

/// One participant's submission to a multilateral netting cycle
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct BankRequest {
    /// Always `bankrequest`
    pub doc_type: DocType,
    /// cycleID ∥ bankID
    #[serde(rename = "bankRequestID")]
    pub bank_request_id: String,
    /// Submitting bank
    #[serde(rename = "bankID")]
    pub bank_id: BankId,
    /// Claimed net position for the cycle
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub net_value: Decimal,
    /// Queued references proposed for multilateral netting
    pub nettable_list: Vec<RefId>,
    /// Queued references excluded by the bank
    pub non_nettable_list: Vec<RefId>,
}

/// Multilateral netting cycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CycleStatus {
    /// No cycle running
    Settled,
    /// Collecting bank requests
    Ongoing,
    /// Timed out before consensus
    Expired,
    /// Balanced, awaiting settlement
    Achieved,
    /// Paired but not balanced
    Invalid,
}

impl fmt::Display for CycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CycleStatus::Settled => "SETTLED",
            CycleStatus::Ongoing => "ONGOING",
            CycleStatus::Expired => "EXPIRED",
            CycleStatus::Achieved => "ACHIEVED",
            CycleStatus::Invalid => "INVALID",
        };
        f.write_str(s)
    }
}

/// Process-wide state of the current multilateral netting round
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct NettingCycle {
    /// Always `nettingcycle`
    pub doc_type: DocType,
    /// Schema version
    #[serde(default = "schema_v1")]
    pub schema_version: u32,
    /// Cycle number
    #[serde(rename = "cycleID")]
    pub cycle_id: u64,
    /// Current status
    pub status: CycleStatus,
    /// Cycle start
    pub created: DateTime<Utc>,
    /// Last change
    pub updated: DateTime<Utc>,
    /// Requests keyed by bank
    pub bank_requests: BTreeMap<BankId, BankRequest>,
}

impl Default for NettingCycle {
    fn default() -> Self {
        Self {
            doc_type: DocType::NettingCycle,
            schema_version: SCHEMA_VERSION,
            cycle_id: 0,
            status: CycleStatus::Settled,
            created: DateTime::<Utc>::default(),
            updated: DateTime::<Utc>::default(),
            bank_requests: BTreeMap::new(),
        }
    }
}

impl NettingCycle {
    /// Either bank has a request in a running or achieved cycle
    pub fn is_participating(&self, bank1: &BankId, bank2: &BankId) -> bool {
        matches!(self.status, CycleStatus::Ongoing | CycleStatus::Achieved)
            && (self.bank_requests.contains_key(bank1) || self.bank_requests.contains_key(bank2))
    }
}
