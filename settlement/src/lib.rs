//! RTGS settlement chaincode
//!
//! Real-time gross settlement with liquidity-saving mechanisms, running as a
//! chaincode on the local host runtime of [`ledger_core`].
//!
//! # Architecture
//!
//! Every invocation is a pure function of (arguments, state snapshot, caller,
//! timestamp):
//!
//! 1. **Dispatch**: `(function, args)` is parsed into a [`Command`]
//! 2. **Context**: a [`ServiceContext`] wraps the host stub and the
//!    chaincode [`Config`]
//! 3. **Execution**: the engine, the cycle controller, the fund ledger or
//!    the cross-channel handlers read and write through the context
//! 4. **Commit**: the host commits the write set only on success
//!
//! # Liquidity-saving mechanisms
//!
//! - **Bilateral netting**: a new transfer is offset against the receiver's
//!   queued transfers back to the sender, settling all of them with at most
//!   one balance move
//! - **Multilateral netting**: banks submit nettable sets and net positions
//!   to a cycle; once every nettable transfer is claimed by both of its banks
//!   and positions sum to zero, the regulator settles the whole set at once
//!
//! # Example
//!
//! ```no_run
//! use ledger_core::{Channel, MemoryStore, Network, Principal, Proposal};
//! use settlement::{Config, SettlementContract};
//! use std::sync::Arc;
//!
//! fn main() -> anyhow::Result<()> {
//!     let network = Network::new()?;
//!     let channel = Channel::new("bilateralchannel");
//!     network.add_channel(channel.clone(), Arc::new(MemoryStore::new()))?;
//!     network.install(&channel, "bilateralchannel_cc", Arc::new(SettlementContract::new(Config::default())?))?;
//!
//!     let result = network.submit(Proposal::new(
//!         channel,
//!         "bilateralchannel_cc",
//!         Principal::new("regulator"),
//!         "initLedger",
//!         vec![],
//!     ))?;
//!     assert!(result.response.is_ok());
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod command;
pub mod config;
pub mod context;
pub mod contract;
pub mod cycle;
pub mod engine;
pub mod error;
pub mod funding;
pub mod funds;
pub mod netting;
pub mod queries;
pub mod transfer;
pub mod types;

// Re-exports
pub use command::{BankRequestInput, Command};
pub use config::Config;
pub use context::ServiceContext;
pub use contract::SettlementContract;
pub use cycle::CycleController;
pub use engine::SettlementEngine;
pub use error::{Error, Result};
pub use funding::FundingContract;
pub use netting::NettingEngine;
pub use types::*;
