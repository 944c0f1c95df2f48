//! Core types for the settlement chaincode

use crate::Result;
use ledger_core::{
    types::{checked_add, checked_sub},
    AccountId, BankId, CompletedTransaction, Currency, MoveOutInFund, PledgeRedeemFund, RefId,
};
use std::collections::BTreeMap;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Which path a transfer took through the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementPath {
    /// Offset against the counterparty's queued transfers
    BilateralNetting,
    /// Debited and credited straight away
    Immediate,
    /// Queued for later settlement
    Queued,
    /// Queued and held by a running netting cycle
    QueuedFrozen,
}

impl SettlementPath {
    /// Message returned to the caller
    pub fn message(&self) -> &'static str {
        match self {
            SettlementPath::BilateralNetting => "Success: Bilateral netting is completed",
            SettlementPath::Immediate => "Success: Transaction is completed",
            SettlementPath::Queued => "Success: Transaction is queued",
            SettlementPath::QueuedFrozen => "Success: Transaction is queued and frozen",
        }
    }
}

/// Validated `fundTransfer` input
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    /// Paying account
    pub sender: AccountId,
    /// Receiving account
    pub receiver: AccountId,
    /// Queue priority
    pub priority: i64,
    /// Positive amount
    pub amount: Decimal,
    /// Currency of both accounts
    pub currency: Currency,
    /// Skip immediate settlement
    pub put_to_queue: bool,
}

/// Payload of a state-changing call that produced a reference
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Receipt {
    /// Outcome message
    pub msg: String,
    /// Reference created or consumed
    #[serde(rename = "refID")]
    pub ref_id: RefId,
}

/// Result of `fundTransfer`
#[derive(Debug, Clone, PartialEq)]
pub struct TransferOutcome {
    /// Path taken
    pub path: SettlementPath,
    /// Reference of the new transfer
    pub ref_id: RefId,
    /// Entries settled along the way (bilateral netting only)
    pub settled: Vec<RefId>,
}

impl TransferOutcome {
    /// Caller-facing receipt
    pub fn receipt(&self) -> Receipt {
        Receipt {
            msg: self.path.message().to_string(),
            ref_id: self.ref_id.clone(),
        }
    }
}

/// Net position of one participant over a set of transfers
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankPosition {
    /// Bank ID
    pub bank_id: BankId,
    /// Currency
    pub currency: Currency,
    /// Total paid out
    pub total_payable: Decimal,
    /// Total received
    pub total_receivable: Decimal,
    /// Receivable minus payable
    pub net_position: Decimal,
}

impl BankPosition {
    /// Create new position
    pub fn new(bank_id: BankId, currency: Currency) -> Self {
        Self {
            bank_id,
            currency,
            total_payable: Decimal::ZERO,
            total_receivable: Decimal::ZERO,
            net_position: Decimal::ZERO,
        }
    }

    /// Add an obligation. Totals past the `Decimal` range are rejected.
    pub fn add_obligation(&mut self, amount: Decimal, is_debtor: bool) -> Result<()> {
        if is_debtor {
            self.total_payable = checked_add(self.total_payable, amount)?;
        } else {
            self.total_receivable = checked_add(self.total_receivable, amount)?;
        }
        self.net_position = checked_sub(self.total_receivable, self.total_payable)?;
        Ok(())
    }

    /// Is net payer
    pub fn is_net_payer(&self) -> bool {
        self.net_position < Decimal::ZERO
    }

    /// Is net receiver
    pub fn is_net_receiver(&self) -> bool {
        self.net_position > Decimal::ZERO
    }
}

/// One participant's posting when a multilateral cycle settles
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetPosting {
    /// Participant
    #[serde(rename = "accountID")]
    pub account_id: AccountId,
    /// Currency
    pub currency: Currency,
    /// Receivable minus payable
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub net_value: Decimal,
}

/// Payload of `settleMLNetting`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CycleSettlement {
    /// Cycle that settled
    #[serde(rename = "cycleID")]
    pub cycle_id: u64,
    /// References moved to the completed log, sorted
    pub settled: Vec<RefId>,
    /// Non-zero positions posted as netting adjustments
    pub postings: Vec<NetPosting>,
}

/// Balance total of one currency
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiquidityEntry {
    /// Currency
    pub currency: Currency,
    /// Sum of balances
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    pub amount: Decimal,
}

impl LiquidityEntry {
    /// Flatten per-currency totals
    pub fn from_totals(totals: BTreeMap<Currency, Decimal>) -> Vec<Self> {
        totals
            .into_iter()
            .map(|(currency, amount)| Self { currency, amount })
            .collect()
    }
}

/// Event emitted by a state-changing invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChaincodeEvent {
    /// Function that ran
    pub op: String,
    /// Reference touched, if any
    #[serde(rename = "refID", skip_serializing_if = "Option::is_none")]
    pub ref_id: Option<RefId>,
    /// Account touched, if any
    #[serde(rename = "accountID", skip_serializing_if = "Option::is_none")]
    pub account_id: Option<AccountId>,
}

/// Everything recorded against one account
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionHistory {
    /// Settled or cancelled transfers sent or received
    pub completed: Vec<CompletedTransaction>,
    /// Pledge, redeem and netting postings
    pub funds: Vec<PledgeRedeemFund>,
    /// Cross-channel records
    pub moves: Vec<MoveOutInFund>,
}

/// One entry of the `getHistoryForKey` payload
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct KeyModification {
    /// Host transaction
    pub tx_id: String,
    /// Value as JSON when it parses, else as a string
    pub value: serde_json::Value,
    /// Deleted in this version
    pub is_delete: bool,
    /// RFC-3339 timestamp
    pub timestamp: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bank_position() {
        let mut pos = BankPosition::new(BankId::new("BANKA"), Currency::parse("USD").unwrap());

        pos.add_obligation(Decimal::new(10000, 2), true).unwrap(); // Owes $100
        assert_eq!(pos.net_position, Decimal::new(-10000, 2));
        assert!(pos.is_net_payer());

        pos.add_obligation(Decimal::new(15000, 2), false).unwrap(); // Receives $150
        assert_eq!(pos.net_position, Decimal::new(5000, 2));
        assert!(pos.is_net_receiver());

        pos.add_obligation(Decimal::MAX, true).unwrap();
        assert!(pos.add_obligation(Decimal::MAX, true).is_err());
    }

    #[test]
    fn test_receipt_shape() {
        let outcome = TransferOutcome {
            path: SettlementPath::Immediate,
            ref_id: RefId::new("abc"),
            settled: vec![],
        };
        let json = serde_json::to_value(outcome.receipt()).unwrap();
        assert_eq!(json["refID"], "abc");
        assert_eq!(json["msg"], "Success: Transaction is completed");
    }
}
