//! Queue manager
//!
//! Deferred transfers live under the `queue` index until they are settled or
//! cancelled, at which point they move to the append-only `completedtx`
//! index. Every listing is returned in [`queue_order`].

use crate::keys::{completed_key, index_prefix, queue_key, COMPLETED_INDEX, QUEUE_INDEX};
use crate::query::Selector;
use crate::state::StateTx;
use crate::types::{
    AccountId, CompletedTransaction, CompletionStatus, DocType, QueuedTransaction, RefId,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::cmp::Ordering;

/// Settlement order: priority descending, then creation time ascending, then refID
pub fn queue_order(a: &QueuedTransaction, b: &QueuedTransaction) -> Ordering {
    b.priority
        .cmp(&a.priority)
        .then_with(|| a.create_time.cmp(&b.create_time))
        .then_with(|| a.ref_id.cmp(&b.ref_id))
}

/// Sort entries in place by [`queue_order`]
pub fn sort_queue(entries: &mut [QueuedTransaction]) {
    entries.sort_by(queue_order);
}

/// Which side of the queue to list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueFilter {
    /// Every entry
    All,
    /// Entries paid by the account, optionally at or above a priority
    Outgoing {
        /// Paying account
        sender: AccountId,
        /// Lowest priority included
        min_priority: Option<i64>,
    },
    /// Entries paid to the account
    Incoming {
        /// Receiving account
        receiver: AccountId,
    },
}

impl QueueFilter {
    /// Selector equivalent of this filter
    pub fn selector(&self) -> Selector {
        let base = Selector::doc_type(DocType::Queue.as_str());
        match self {
            QueueFilter::All => base,
            QueueFilter::Outgoing {
                sender,
                min_priority,
            } => {
                let s = base.eq("sender", sender.as_str());
                match min_priority {
                    Some(p) => s.gte("priority", *p),
                    None => s,
                }
            }
            QueueFilter::Incoming { receiver } => base.eq("receiver", receiver.as_str()),
        }
    }
}

/// Insert a new entry. The refID must be unused in both queue and completed log.
pub fn enqueue(tx: &mut StateTx<'_>, entry: &QueuedTransaction) -> Result<()> {
    if entry.sender == entry.receiver {
        return Err(Error::InvalidArgument(
            "sender and receiver must differ".to_string(),
        ));
    }
    if entry.amount <= Decimal::ZERO {
        return Err(Error::InvalidArgument(format!(
            "queued amount must be positive, got {}",
            entry.amount
        )));
    }
    ensure_ref_unused(tx, &entry.ref_id)?;

    tx.put_doc(&queue_key(&entry.ref_id), entry)?;

    tracing::debug!(ref_id = %entry.ref_id, frozen = entry.is_frozen, "Transaction queued");
    Ok(())
}

/// Fail with `AlreadyExists` if the refID is queued or completed
pub fn ensure_ref_unused(tx: &StateTx<'_>, ref_id: &RefId) -> Result<()> {
    if tx.get(&queue_key(ref_id))?.is_some() || tx.get(&completed_key(ref_id))?.is_some() {
        return Err(Error::AlreadyExists(format!("transaction {}", ref_id)));
    }
    Ok(())
}

/// Load a queued entry, `NotFound` if absent
pub fn get(tx: &StateTx<'_>, ref_id: &RefId) -> Result<QueuedTransaction> {
    try_get(tx, ref_id)?.ok_or_else(|| Error::NotFound(format!("queued transaction {}", ref_id)))
}

/// Load a queued entry if present
pub fn try_get(tx: &StateTx<'_>, ref_id: &RefId) -> Result<Option<QueuedTransaction>> {
    tx.get_doc(&queue_key(ref_id))
}

/// Write back an entry. Only status, freeze flag, priority and update time may change.
pub fn update(tx: &mut StateTx<'_>, entry: &QueuedTransaction) -> Result<()> {
    let stored = get(tx, &entry.ref_id)?;
    if stored.sender != entry.sender
        || stored.receiver != entry.receiver
        || stored.amount != entry.amount
        || stored.currency != entry.currency
        || stored.nettable != entry.nettable
        || stored.create_time != entry.create_time
    {
        return Err(Error::InvalidArgument(format!(
            "immutable fields of {} cannot change",
            entry.ref_id
        )));
    }
    tx.put_doc(&queue_key(&entry.ref_id), entry)
}

/// Change priority, bumping the update time
pub fn set_priority(
    tx: &mut StateTx<'_>,
    ref_id: &RefId,
    priority: i64,
    now: DateTime<Utc>,
) -> Result<QueuedTransaction> {
    let mut entry = get(tx, ref_id)?;
    if entry.priority != priority {
        entry.priority = priority;
        entry.update_time = now;
        update(tx, &entry)?;
    }
    Ok(entry)
}

/// Freeze or unfreeze an entry. No write when the flag already matches.
pub fn set_frozen(
    tx: &mut StateTx<'_>,
    ref_id: &RefId,
    frozen: bool,
    now: DateTime<Utc>,
) -> Result<QueuedTransaction> {
    let mut entry = get(tx, ref_id)?;
    if entry.is_frozen != frozen {
        entry.is_frozen = frozen;
        entry.update_time = now;
        update(tx, &entry)?;
    }
    Ok(entry)
}

/// Move an entry to the completed log and remove it from the queue
pub fn complete(
    tx: &mut StateTx<'_>,
    entry: QueuedTransaction,
    status: CompletionStatus,
    now: DateTime<Utc>,
) -> Result<CompletedTransaction> {
    let completed_key = completed_key(&entry.ref_id);
    if tx.get(&completed_key)?.is_some() {
        return Err(Error::AlreadyExists(format!(
            "completed transaction {}",
            entry.ref_id
        )));
    }
    tx.delete(&queue_key(&entry.ref_id))?;
    let completed = entry.into_completed(status, now);
    tx.put_doc(&completed_key, &completed)?;
    Ok(completed)
}

/// Record a transfer that settled without ever being queued
pub fn record_completed(tx: &mut StateTx<'_>, completed: &CompletedTransaction) -> Result<()> {
    ensure_ref_unused(tx, &completed.ref_id)?;
    tx.put_doc(&completed_key(&completed.ref_id), completed)
}

/// Entries matching the filter, in queue order
pub fn list(tx: &StateTx<'_>, filter: &QueueFilter) -> Result<Vec<QueuedTransaction>> {
    list_matching(tx, &filter.selector())
}

/// Entries matching an arbitrary selector, in queue order
pub fn list_matching(tx: &StateTx<'_>, selector: &Selector) -> Result<Vec<QueuedTransaction>> {
    let selector = Selector::doc_type(DocType::Queue.as_str()).and(selector.clone());
    let mut entries = tx.query_docs(&index_prefix(QUEUE_INDEX), &selector)?;
    sort_queue(&mut entries);
    Ok(entries)
}

/// Outgoing entries of `sender`
pub fn list_outgoing(
    tx: &StateTx<'_>,
    sender: &AccountId,
    min_priority: Option<i64>,
) -> Result<Vec<QueuedTransaction>> {
    list(
        tx,
        &QueueFilter::Outgoing {
            sender: sender.clone(),
            min_priority,
        },
    )
}

/// Incoming entries of `receiver`
pub fn list_incoming(tx: &StateTx<'_>, receiver: &AccountId) -> Result<Vec<QueuedTransaction>> {
    list(
        tx,
        &QueueFilter::Incoming {
            receiver: receiver.clone(),
        },
    )
}

/// Every queued entry
pub fn list_all(tx: &StateTx<'_>) -> Result<Vec<QueuedTransaction>> {
    list(tx, &QueueFilter::All)
}

/// Load a completed transaction if present
pub fn get_completed(tx: &StateTx<'_>, ref_id: &RefId) -> Result<Option<CompletedTransaction>> {
    tx.get_doc(&completed_key(ref_id))
}

/// Completed transactions matching the selector, ordered by completion then refID
pub fn list_completed(
    tx: &StateTx<'_>,
    selector: &Selector,
) -> Result<Vec<CompletedTransaction>> {
    let selector = Selector::doc_type(DocType::CompletedTx.as_str()).and(selector.clone());
    let mut done: Vec<CompletedTransaction> =
        tx.query_docs(&index_prefix(COMPLETED_INDEX), &selector)?;
    done.sort_by(|a, b| {
        a.update_time
            .cmp(&b.update_time)
            .then_with(|| a.ref_id.cmp(&b.ref_id))
    });
    Ok(done)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use crate::types::{Currency, QueueStatus, SCHEMA_VERSION};
    use chrono::TimeZone;

    fn entry(id: &str, sender: &str, receiver: &str, priority: i64, secs: i64) -> QueuedTransaction {
        let t = Utc.timestamp_opt(secs, 0).unwrap();
        QueuedTransaction {
            doc_type: DocType::Queue,
            schema_version: SCHEMA_VERSION,
            ref_id: RefId::new(id),
            sender: AccountId::new(sender),
            receiver: AccountId::new(receiver),
            priority,
            nettable: true,
            amount: Decimal::from(10),
            currency: Currency::parse("USD").unwrap(),
            status: QueueStatus::Active,
            is_frozen: false,
            create_time: t,
            update_time: t,
        }
    }

    #[test]
    fn test_order_priority_then_time_then_ref() {
        let mut entries = vec![
            entry("c", "A", "B", 1, 5),
            entry("b", "A", "B", 2, 9),
            entry("a", "A", "B", 1, 5),
            entry("d", "A", "B", 1, 1),
        ];
        sort_queue(&mut entries);
        let ids: Vec<_> = entries.iter().map(|e| e.ref_id.as_str()).collect();
        assert_eq!(ids, vec!["b", "d", "a", "c"]);
    }

    #[test]
    fn test_filters() {
        let store = MemoryStore::new();
        let mut tx = StateTx::new(&store);
        enqueue(&mut tx, &entry("1", "A", "B", 1, 1)).unwrap();
        enqueue(&mut tx, &entry("2", "A", "C", 3, 2)).unwrap();
        enqueue(&mut tx, &entry("3", "B", "A", 1, 3)).unwrap();

        assert_eq!(list_all(&tx).unwrap().len(), 3);
        assert_eq!(list_outgoing(&tx, &AccountId::new("A"), None).unwrap().len(), 2);
        let high = list_outgoing(&tx, &AccountId::new("A"), Some(2)).unwrap();
        assert_eq!(high.len(), 1);
        assert_eq!(high[0].ref_id, RefId::new("2"));
        let incoming = list_incoming(&tx, &AccountId::new("A")).unwrap();
        assert_eq!(incoming[0].ref_id, RefId::new("3"));
    }

    #[test]
    fn test_enqueue_rejects_duplicate_and_self_transfer() {
        let store = MemoryStore::new();
        let mut tx = StateTx::new(&store);
        enqueue(&mut tx, &entry("1", "A", "B", 1, 1)).unwrap();
        assert!(matches!(
            enqueue(&mut tx, &entry("1", "A", "B", 1, 1)),
            Err(Error::AlreadyExists(_))
        ));
        assert!(enqueue(&mut tx, &entry("2", "A", "A", 1, 1)).is_err());
    }

    #[test]
    fn test_complete_moves_entry() {
        let store = MemoryStore::new();
        let mut tx = StateTx::new(&store);
        let e = entry("1", "A", "B", 1, 1);
        enqueue(&mut tx, &e).unwrap();
        let now = Utc.timestamp_opt(50, 0).unwrap();
        let done = complete(&mut tx, e.clone(), CompletionStatus::Cancelled, now).unwrap();

        assert_eq!(done.status, CompletionStatus::Cancelled);
        assert!(try_get(&tx, &e.ref_id).unwrap().is_none());
        assert_eq!(get_completed(&tx, &e.ref_id).unwrap(), Some(done));
        // A completed refID can never be queued again
        assert!(enqueue(&mut tx, &e).is_err());
    }

    #[test]
    fn test_update_guards_immutable_fields() {
        let store = MemoryStore::new();
        let mut tx = StateTx::new(&store);
        let mut e = entry("1", "A", "B", 1, 1);
        enqueue(&mut tx, &e).unwrap();
        e.amount = Decimal::from(11);
        assert!(update(&mut tx, &e).is_err());

        let now = Utc.timestamp_opt(9, 0).unwrap();
        let bumped = set_priority(&mut tx, &RefId::new("1"), 7, now).unwrap();
        assert_eq!(bumped.priority, 7);
        assert_eq!(bumped.update_time, now);
        let frozen = set_frozen(&mut tx, &RefId::new("1"), true, now).unwrap();
        assert!(frozen.is_frozen);
    }
}
