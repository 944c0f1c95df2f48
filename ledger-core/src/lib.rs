//! Ledger core for the RTGS settlement chaincode
//!
//! Typed entities, the canonical JSON codec and the state-store side of the
//! settlement system: accounts, the transaction queue, rich queries and a
//! local host runtime that executes chaincode invocations atomically.
//!
//! # Architecture
//!
//! - **Per-invocation write sets**: chaincodes read and write through a
//!   [`StateTx`]; the host commits it only if the invocation succeeds
//! - **Single Writer**: the [`Network`] executes one invocation at a time,
//!   optionally fronted by the peer actor
//! - **Canonical JSON**: every stored entity goes through [`codec`]
//!
//! # Invariants
//!
//! - Account balances are never negative and currencies never change
//! - A refID is in the queue or in the completed log, never both
//! - Completed transactions are never modified or deleted

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod accounts;
pub mod actor;
pub mod codec;
pub mod config;
pub mod error;
pub mod host;
pub mod keys;
pub mod metrics;
pub mod query;
pub mod queue;
pub mod state;
pub mod storage;
pub mod types;

// Re-exports
pub use accounts::BalanceChange;
pub use actor::{spawn_peer_actor, PeerHandle};
pub use config::{Config, StoreBackend};
pub use error::{Error, ErrorKind, Result};
pub use host::{Chaincode, ContractEvent, InvocationResult, Network, Proposal, Response, Status, Stub};
pub use query::Selector;
pub use state::StateTx;
pub use storage::{HistoryEntry, MemoryStore, RocksStore, StateStore};
pub use types::{
    Account, AccountId, AccountStatus, BankId, BankRequest, Channel, CompletedTransaction,
    CompletionStatus, Currency, CycleStatus, DocType, FundKind, MoveOutInFund, NettingCycle,
    PledgeRedeemFund, Principal, QueueStatus, QueuedTransaction, RefId,
};
