//! Shared test network: two settlement channels and the funding channel

#![allow(dead_code)]

use chrono::{DateTime, Duration, TimeZone, Utc};
use ledger_core::{
    Account, Channel, InvocationResult, MemoryStore, Network, Principal, Proposal, QueuedTransaction,
};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use settlement::{Config, FundingContract, Receipt, SettlementContract};
use std::cell::Cell;
use std::fmt::Display;
use std::sync::Arc;

pub const C1: &str = "bilateralchannel";
pub const C2: &str = "bilateralchannel2";
pub const FUNDING: &str = "fundingchannel";
pub const REGULATOR: &str = "regulator";

pub struct TestNetwork {
    pub network: Network,
    pub config: Config,
    clock: Cell<DateTime<Utc>>,
}

impl TestNetwork {
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> Self {
        let network = Network::new().unwrap();
        let settlement = Arc::new(SettlementContract::new(config.clone()).unwrap());
        for name in [C1, C2] {
            let channel = Channel::new(name);
            network
                .add_channel(channel.clone(), Arc::new(MemoryStore::new()))
                .unwrap();
            network
                .install(&channel, config.bilateral_chaincode_name.clone(), settlement.clone())
                .unwrap();
        }
        let funding = Channel::new(FUNDING);
        network
            .add_channel(funding.clone(), Arc::new(MemoryStore::new()))
            .unwrap();
        network
            .install(
                &funding,
                config.funding_chaincode_name.clone(),
                Arc::new(FundingContract::new(config.clone())),
            )
            .unwrap();

        let t = Self {
            network,
            config,
            clock: Cell::new(Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap()),
        };
        t.ok(C1, REGULATOR, "initLedger", &[]);
        t.ok(C2, REGULATOR, "initLedger", &[]);
        t
    }

    /// Current clock
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.get()
    }

    /// Move the clock forward
    pub fn advance(&self, by: Duration) {
        self.clock.set(self.clock.get() + by);
    }

    /// Submit with a fresh timestamp (one second after the previous call)
    pub fn call(&self, channel: &str, caller: &str, function: &str, args: &[&str]) -> InvocationResult {
        self.advance(Duration::seconds(1));
        self.call_on(channel, &self.config.bilateral_chaincode_name, caller, function, args)
    }

    pub fn call_on(
        &self,
        channel: &str,
        chaincode: &str,
        caller: &str,
        function: &str,
        args: &[&str],
    ) -> InvocationResult {
        let proposal = Proposal::new(
            Channel::new(channel),
            chaincode,
            Principal::new(caller),
            function,
            args.iter().map(|s| s.to_string()).collect(),
        )
        .at(self.now());
        self.network.submit(proposal).unwrap()
    }

    /// Submit and decode a successful JSON payload
    pub fn ok<T: DeserializeOwned>(&self, channel: &str, caller: &str, function: &str, args: &[&str]) -> T {
        let result = self.call(channel, caller, function, args);
        assert!(
            result.response.is_ok(),
            "{} failed: {}",
            function,
            result.response.message
        );
        result.response.json().unwrap()
    }

    /// Submit and return the error kind
    pub fn err(&self, channel: &str, caller: &str, function: &str, args: &[&str]) -> String {
        let result = self.call(channel, caller, function, args);
        assert!(!result.response.is_ok(), "{} unexpectedly succeeded", function);
        result.response.kind().unwrap_or_default().to_string()
    }

    pub fn open(&self, channel: &str, id: &str, currency: &str, amount: impl Display) {
        let _: Account = self.ok(
            channel,
            REGULATOR,
            "initAccount",
            &[id, currency, &amount.to_string(), "NORMAL"],
        );
    }

    pub fn balance(&self, channel: &str, id: &str) -> Decimal {
        let account: Account = self.ok(channel, id, "getAccount", &[id]);
        account.amount
    }

    pub fn transfer(
        &self,
        sender: &str,
        receiver: &str,
        priority: i64,
        amount: impl Display,
        queue: bool,
    ) -> Receipt {
        self.ok(
            C1,
            sender,
            "fundTransfer",
            &[
                sender,
                receiver,
                &priority.to_string(),
                &amount.to_string(),
                "USD",
                if queue { "true" } else { "false" },
            ],
        )
    }

    pub fn queue(&self) -> Vec<QueuedTransaction> {
        self.ok(C1, REGULATOR, "getSortedQueues", &[])
    }

    pub fn history_len(&self, channel: &str, key: &str) -> usize {
        let history: Vec<serde_json::Value> = self.ok(channel, REGULATOR, "getHistoryForKey", &[key]);
        history.len()
    }
}
