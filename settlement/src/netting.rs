//! Netting algorithms
//!
//! Pure functions over already-sorted queue entries; the engine and the
//! cycle controller apply the resulting plans to the state.
//!
//! # Bilateral netting
//!
//! Sender S submits a transfer to receiver R. The S→R entries (the new
//! transfer included) are offset against the R→S entries, taken in queue
//! order while R can still cover them from its balance plus what it receives
//! from S:
//!
//! ```text
//! R.amount + outSum - accumulated >= next.amount
//! ```
//!
//! The residual `outSum - accumulated` is then paid by S (positive) or by R
//! (negative) as a single balance move:
//!
//! ```text
//! S=50, R=0, S→R [40], R→S [10]
//!   accumulated = 10, residual = +30
//!   S pays R 30, both entries settle
//! ```
//!
//! # Multilateral positions
//!
//! A set of entries settled together changes each participant's balance by
//! its receivable minus its payable. Positions sum to zero per currency.

use crate::types::BankPosition;
use crate::Result;
use ledger_core::{
    types::{checked_add, checked_sum},
    AccountId, Currency, QueuedTransaction, RefId,
};
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Balance move left after offsetting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResidualMove {
    /// Entries cancel exactly
    None,
    /// Sender pays the receiver
    SenderPays(Decimal),
    /// Receiver pays the sender
    ReceiverPays(Decimal),
}

/// Entries to settle and the single balance move that replaces them
#[derive(Debug, Clone, PartialEq)]
pub struct BilateralPlan {
    /// R→S entries consumed, in queue order
    pub incoming: Vec<QueuedTransaction>,
    /// S→R entries consumed
    pub outgoing: Vec<QueuedTransaction>,
    /// Net move
    pub residual: ResidualMove,
}

impl BilateralPlan {
    /// References settled by this plan
    pub fn settled_refs(&self) -> Vec<RefId> {
        self.incoming
            .iter()
            .chain(self.outgoing.iter())
            .map(|e| e.ref_id.clone())
            .collect()
    }
}

/// Netting engine
#[derive(Debug, Clone)]
pub struct NettingEngine {
    /// Enable bilateral netting
    enable_bilateral: bool,
}

impl NettingEngine {
    /// Create new netting engine
    pub fn new(enable_bilateral: bool) -> Self {
        Self { enable_bilateral }
    }

    /// Whether bilateral netting is attempted at all
    pub fn bilateral_enabled(&self) -> bool {
        self.enable_bilateral
    }

    /// Plan a bilateral offset. `outgoing` holds every S→R entry to settle,
    /// `incoming` the R→S entries in queue order. `None` means no netting.
    pub fn plan_bilateral(
        &self,
        sender_balance: Decimal,
        receiver_balance: Decimal,
        outgoing: Vec<QueuedTransaction>,
        incoming: &[QueuedTransaction],
    ) -> Option<BilateralPlan> {
        if !self.enable_bilateral || outgoing.is_empty() || incoming.is_empty() {
            return None;
        }

        // Sums past the Decimal range are not netted
        let out_sum = checked_sum(outgoing.iter().map(|e| e.amount)).ok()?;

        // Budget R can spend on its own entries
        let mut budget = receiver_balance.checked_add(out_sum).unwrap_or(Decimal::MAX);
        let mut accumulated = Decimal::ZERO;
        let mut consumed = Vec::new();
        for entry in incoming {
            if budget < entry.amount {
                break;
            }
            budget -= entry.amount;
            accumulated += entry.amount;
            consumed.push(entry.clone());
        }

        if consumed.is_empty() {
            return None;
        }

        let residual = out_sum - accumulated;
        let residual = if residual.is_zero() {
            ResidualMove::None
        } else if residual > Decimal::ZERO {
            if residual > sender_balance {
                return None;
            }
            ResidualMove::SenderPays(residual)
        } else {
            let owed = -residual;
            if owed > receiver_balance {
                return None;
            }
            ResidualMove::ReceiverPays(owed)
        };

        Some(BilateralPlan {
            incoming: consumed,
            outgoing,
            residual,
        })
    }

    /// Per-account positions if every entry settled at once, ordered by account
    pub fn net_positions<'a>(
        &self,
        entries: impl IntoIterator<Item = &'a QueuedTransaction>,
    ) -> Result<BTreeMap<AccountId, BankPosition>> {
        let mut positions: BTreeMap<AccountId, BankPosition> = BTreeMap::new();

        for entry in entries {
            positions
                .entry(entry.sender.clone())
                .or_insert_with(|| BankPosition::new(entry.sender.clone(), entry.currency.clone()))
                .add_obligation(entry.amount, true)?;

            positions
                .entry(entry.receiver.clone())
                .or_insert_with(|| {
                    BankPosition::new(entry.receiver.clone(), entry.currency.clone())
                })
                .add_obligation(entry.amount, false)?;
        }

        Ok(positions)
    }

    /// Sum of net positions per currency, zero for a consistent set
    pub fn imbalance(
        &self,
        positions: &BTreeMap<AccountId, BankPosition>,
    ) -> Result<BTreeMap<Currency, Decimal>> {
        let mut totals = BTreeMap::new();
        for position in positions.values() {
            let total = totals
                .entry(position.currency.clone())
                .or_insert(Decimal::ZERO);
            *total = checked_add(*total, position.net_position)?;
        }
        Ok(totals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use ledger_core::{types::SCHEMA_VERSION, DocType, QueueStatus};

    fn entry(id: &str, sender: &str, receiver: &str, amount: i64) -> QueuedTransaction {
        let t = Utc.timestamp_opt(1, 0).unwrap();
        QueuedTransaction {
            doc_type: DocType::Queue,
            schema_version: SCHEMA_VERSION,
            ref_id: RefId::new(id),
            sender: AccountId::new(sender),
            receiver: AccountId::new(receiver),
            priority: 1,
            nettable: true,
            amount: Decimal::from(amount),
            currency: Currency::parse("USD").unwrap(),
            status: QueueStatus::Active,
            is_frozen: false,
            create_time: t,
            update_time: t,
        }
    }

    fn engine() -> NettingEngine {
        NettingEngine::new(true)
    }

    #[test]
    fn test_exact_offset() {
        let plan = engine()
            .plan_bilateral(
                Decimal::ZERO,
                Decimal::ZERO,
                vec![entry("o1", "A", "B", 30)],
                &[entry("i1", "B", "A", 30)],
            )
            .unwrap();
        assert_eq!(plan.residual, ResidualMove::None);
        assert_eq!(plan.settled_refs(), vec![RefId::new("i1"), RefId::new("o1")]);
    }

    #[test]
    fn test_sender_pays_residual() {
        let plan = engine()
            .plan_bilateral(
                Decimal::from(50),
                Decimal::ZERO,
                vec![entry("o1", "A", "B", 40)],
                &[entry("i1", "B", "A", 10)],
            )
            .unwrap();
        assert_eq!(plan.residual, ResidualMove::SenderPays(Decimal::from(30)));
    }

    #[test]
    fn test_sender_cannot_cover_residual() {
        let plan = engine().plan_bilateral(
            Decimal::from(10),
            Decimal::ZERO,
            vec![entry("o1", "A", "B", 40)],
            &[entry("i1", "B", "A", 10)],
        );
        assert!(plan.is_none());
    }

    #[test]
    fn test_receiver_pays_and_prefix_stops() {
        let plan = engine()
            .plan_bilateral(
                Decimal::ZERO,
                Decimal::from(100),
                vec![entry("o1", "A", "B", 10)],
                &[entry("i1", "B", "A", 50), entry("i2", "B", "A", 80)],
            )
            .unwrap();
        assert_eq!(plan.incoming.len(), 1);
        assert_eq!(plan.residual, ResidualMove::ReceiverPays(Decimal::from(40)));
    }

    #[test]
    fn test_no_prefix_no_plan() {
        let plan = engine().plan_bilateral(
            Decimal::from(1000),
            Decimal::ZERO,
            vec![entry("o1", "A", "B", 10)],
            &[entry("i1", "B", "A", 20)],
        );
        assert!(plan.is_none());
        assert!(NettingEngine::new(false)
            .plan_bilateral(
                Decimal::ZERO,
                Decimal::ZERO,
                vec![entry("o1", "A", "B", 30)],
                &[entry("i1", "B", "A", 30)],
            )
            .is_none());
    }

    #[test]
    fn test_cyclic_positions_balance() {
        // A owes B 100, B owes C 80, C owes A 50
        let entries = vec![
            entry("1", "A", "B", 100),
            entry("2", "B", "C", 80),
            entry("3", "C", "A", 50),
        ];
        let engine = engine();
        let positions = engine.net_positions(&entries).unwrap();

        assert_eq!(positions[&AccountId::new("A")].net_position, Decimal::from(-50));
        assert_eq!(positions[&AccountId::new("B")].net_position, Decimal::from(20));
        assert_eq!(positions[&AccountId::new("C")].net_position, Decimal::from(30));
        assert!(engine.imbalance(&positions).unwrap().values().all(|v| v.is_zero()));
    }

    #[test]
    fn test_oversized_sums() {
        let mut huge = entry("o1", "A", "B", 0);
        huge.amount = Decimal::MAX;
        let mut more = entry("o2", "A", "B", 0);
        more.amount = Decimal::MAX;

        // Outgoing sum overflows: no plan
        assert!(engine()
            .plan_bilateral(
                Decimal::MAX,
                Decimal::ZERO,
                vec![huge.clone(), more.clone()],
                &[entry("i1", "B", "A", 10)],
            )
            .is_none());

        // Receiver budget saturates instead of overflowing
        let plan = engine()
            .plan_bilateral(
                Decimal::MAX,
                Decimal::MAX,
                vec![huge.clone()],
                &[entry("i1", "B", "A", 10)],
            )
            .unwrap();
        assert_eq!(plan.residual, ResidualMove::SenderPays(Decimal::MAX - Decimal::from(10)));

        assert!(engine().net_positions(&[huge, more]).is_err());
    }
}
