//! Per-invocation service context
//!
//! Built fresh for every invocation from the host stub and the chaincode
//! configuration; nothing survives between calls.

use crate::{config::Config, Error, Result};
use chrono::{DateTime, Utc};
use ledger_core::{AccountId, Channel, Principal, Response, StateTx, Stub};
use serde::Serialize;

/// Identity, clock, state and configuration of one invocation
pub struct ServiceContext<'s, 'a> {
    stub: &'s mut Stub<'a>,
    config: &'s Config,
}

impl std::fmt::Debug for ServiceContext<'_, '_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceContext")
            .field("stub", &self.stub)
            .finish()
    }
}

impl<'s, 'a> ServiceContext<'s, 'a> {
    /// Wrap a host stub
    pub fn new(stub: &'s mut Stub<'a>, config: &'s Config) -> Self {
        Self { stub, config }
    }

    /// Invoking principal
    pub fn caller(&self) -> &Principal {
        self.stub.caller()
    }

    /// Current channel
    pub fn channel(&self) -> &Channel {
        self.stub.channel()
    }

    /// Transaction timestamp
    pub fn now(&self) -> DateTime<Utc> {
        self.stub.now()
    }

    /// Chaincode configuration
    pub fn config(&self) -> &Config {
        self.config
    }

    /// Read view
    pub fn tx(&self) -> &StateTx<'a> {
        self.stub.state()
    }

    /// Read-write view
    pub fn tx_mut(&mut self) -> &mut StateTx<'a> {
        self.stub.state_mut()
    }

    /// Caller must own the account
    pub fn require_caller(&self, account: &AccountId) -> Result<()> {
        if self.caller().is_account(account) {
            Ok(())
        } else {
            Err(Error::unauthorized(format!(
                "{} cannot act for account {}",
                self.caller(),
                account
            )))
        }
    }

    /// Caller must be the regulator
    pub fn require_regulator(&self) -> Result<()> {
        if self.caller().as_str() == self.config.regulator_principal {
            Ok(())
        } else {
            Err(Error::unauthorized(format!(
                "{} is not the regulator",
                self.caller()
            )))
        }
    }

    /// Call a chaincode on another channel
    pub fn invoke_chaincode(
        &mut self,
        channel: &Channel,
        chaincode: &str,
        function: &str,
        args: &[String],
    ) -> Result<Response> {
        Ok(self.stub.invoke_chaincode(channel, chaincode, function, args)?)
    }

    /// Emit the invocation's event
    pub fn emit<T: Serialize>(&mut self, name: &str, payload: &T) -> Result<()> {
        let bytes = serde_json::to_vec(payload).map_err(ledger_core::Error::from)?;
        self.stub.set_event(name, bytes);
        Ok(())
    }
}
