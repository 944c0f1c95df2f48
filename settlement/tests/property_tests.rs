//! Property-based tests for settlement invariants
//!
//! Random transfer, cancel and replay sequences must:
//! - Conserve total liquidity on the channel
//! - Never drive a balance negative
//! - Keep a refID in the queue or the completed log, never both

mod common;

use common::{TestNetwork, C1};
use ledger_core::{CompletedTransaction, QueuedTransaction};
use proptest::prelude::*;
use rust_decimal::Decimal;
use std::collections::BTreeSet;

const BANKS: [&str; 3] = ["A", "B", "C"];

#[derive(Debug, Clone)]
enum Op {
    Transfer {
        sender: usize,
        receiver: usize,
        priority: i64,
        amount: Decimal,
        queue: bool,
    },
    Cancel(usize),
    Replay(usize),
}

/// Positive amounts with up to nine decimal places
fn amount_strategy() -> impl Strategy<Value = Decimal> {
    (1i64..60_000_000_000, 0u32..=9).prop_map(|(mantissa, scale)| Decimal::new(mantissa, scale))
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0usize..3, 1usize..3, 0i64..3, amount_strategy(), any::<bool>()).prop_map(
            |(sender, offset, priority, amount, queue)| Op::Transfer {
                sender,
                receiver: (sender + offset) % 3,
                priority,
                amount,
                queue,
            }
        ),
        1 => (0usize..8).prop_map(Op::Cancel),
        1 => (0usize..8).prop_map(Op::Replay),
    ]
}

fn apply(t: &TestNetwork, op: &Op) {
    match op {
        Op::Transfer {
            sender,
            receiver,
            priority,
            amount,
            queue,
        } => {
            t.transfer(BANKS[*sender], BANKS[*receiver], *priority, amount, *queue);
        }
        Op::Cancel(i) | Op::Replay(i) => {
            let queue = t.queue();
            if queue.is_empty() {
                return;
            }
            let entry = &queue[i % queue.len()];
            let function = if matches!(op, Op::Cancel(_)) {
                "cancelQueue"
            } else {
                "settleQueuedTx"
            };
            // Rejections (insufficient, blocked) leave state untouched
            t.call(C1, entry.sender.as_str(), function, &[entry.ref_id.as_str()]);
        }
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(24))]

    #[test]
    fn prop_liquidity_conserved(ops in prop::collection::vec(op_strategy(), 1..20)) {
        let t = TestNetwork::new();
        let start = Decimal::new(50_123_456_789, 9);
        for bank in BANKS {
            t.open(C1, bank, "USD", start);
        }

        for op in &ops {
            apply(&t, op);
        }

        let balances: Vec<Decimal> = BANKS.iter().map(|b| t.balance(C1, b)).collect();
        prop_assert!(balances.iter().all(|b| *b >= Decimal::ZERO));
        prop_assert_eq!(balances.iter().sum::<Decimal>(), start * Decimal::from(3));

        let queued: BTreeSet<_> = t.queue().into_iter().map(|e: QueuedTransaction| e.ref_id).collect();
        let done: Vec<CompletedTransaction> = t.ok(C1, "A", "getCompletedTx", &[]);
        let completed: BTreeSet<_> = done.into_iter().map(|d| d.ref_id).collect();
        prop_assert!(queued.is_disjoint(&completed));
    }
}
