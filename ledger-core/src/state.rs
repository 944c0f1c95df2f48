//! Per-invocation transactional view over a [`StateStore`]
//!
//! Reads see the invocation's own pending writes. Nothing reaches the store
//! until the host commits [`StateTx::into_write_set`]; dropping the view
//! discards every write, which is how a failed invocation aborts.

use crate::codec::{self, Document};
use crate::query::Selector;
use crate::storage::{HistoryEntry, StateStore, WriteSet};
use crate::Result;
use serde_json::Value;
use std::collections::BTreeMap;

/// Read-your-writes overlay of one invocation
pub struct StateTx<'a> {
    store: &'a dyn StateStore,
    writes: WriteSet,
}

impl std::fmt::Debug for StateTx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateTx")
            .field("pending", &self.writes.len())
            .finish()
    }
}

impl<'a> StateTx<'a> {
    /// Open a view with no pending writes
    pub fn new(store: &'a dyn StateStore) -> Self {
        Self {
            store,
            writes: WriteSet::new(),
        }
    }

    /// Resume a view with writes staged earlier in the same transaction
    pub fn with_writes(store: &'a dyn StateStore, writes: WriteSet) -> Self {
        Self { store, writes }
    }

    /// Current value, pending writes first
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        match self.writes.get(key) {
            Some(pending) => Ok(pending.clone()),
            None => self.store.get(key),
        }
    }

    /// Stage a write. Writing the bytes already visible is a no-op, so it
    /// leaves no history entry.
    pub fn put(&mut self, key: &str, value: Vec<u8>) -> Result<()> {
        if self.get(key)?.as_deref() == Some(value.as_slice()) {
            return Ok(());
        }
        match self.store.get(key)? {
            // Reverting to committed bytes drops the pending write
            Some(committed) if committed == value => {
                self.writes.remove(key);
            }
            _ => {
                self.writes.insert(key.to_string(), Some(value));
            }
        }
        Ok(())
    }

    /// Stage a delete
    pub fn delete(&mut self, key: &str) -> Result<()> {
        if self.store.get(key)?.is_none() {
            self.writes.remove(key);
        } else {
            self.writes.insert(key.to_string(), None);
        }
        Ok(())
    }

    /// Live keys with the prefix, pending writes merged in, key-ordered
    pub fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut merged: BTreeMap<String, Vec<u8>> =
            self.store.scan_prefix(prefix)?.into_iter().collect();

        for (key, value) in self
            .writes
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
        {
            match value {
                Some(bytes) => {
                    merged.insert(key.clone(), bytes.clone());
                }
                None => {
                    merged.remove(key);
                }
            }
        }

        Ok(merged.into_iter().collect())
    }

    /// Every JSON document matching the selector, key-ordered
    pub fn rich_query(&self, selector: &Selector) -> Result<Vec<(String, Value)>> {
        let mut out = Vec::new();
        for (key, bytes) in self.scan_prefix("")? {
            // Non-JSON values never match a selector
            let Ok(doc) = serde_json::from_slice::<Value>(&bytes) else {
                continue;
            };
            if selector.matches(&doc) {
                out.push((key, doc));
            }
        }
        Ok(out)
    }

    /// Committed versions of a key. Pending writes are not history yet.
    pub fn history(&self, key: &str) -> Result<Vec<HistoryEntry>> {
        self.store.history(key)
    }

    /// Read and decode a document
    pub fn get_doc<T: Document>(&self, key: &str) -> Result<Option<T>> {
        self.get(key)?.map(|bytes| codec::decode(&bytes)).transpose()
    }

    /// Encode and stage a document
    pub fn put_doc<T: Document>(&mut self, key: &str, doc: &T) -> Result<()> {
        let bytes = codec::encode(doc)?;
        self.put(key, bytes)
    }

    /// Decode every document under a prefix that matches the selector
    pub fn query_docs<T: Document>(&self, prefix: &str, selector: &Selector) -> Result<Vec<T>> {
        let mut out = Vec::new();
        for (_, bytes) in self.scan_prefix(prefix)? {
            let value: Value = serde_json::from_slice(&bytes)?;
            if selector.matches(&value) {
                out.push(codec::decode(&bytes)?);
            }
        }
        Ok(out)
    }

    /// Pending writes
    pub fn write_set(&self) -> &WriteSet {
        &self.writes
    }

    /// Consume the view, yielding the writes to commit
    pub fn into_write_set(self) -> WriteSet {
        self.writes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use chrono::Utc;

    fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let mut ws = WriteSet::new();
        ws.insert("k1".to_string(), Some(br#"{"docType":"x","n":1}"#.to_vec()));
        ws.insert("k2".to_string(), Some(br#"{"docType":"y","n":2}"#.to_vec()));
        store.commit("seed", Utc::now(), &ws).unwrap();
        store
    }

    #[test]
    fn test_reads_see_own_writes() {
        let store = seeded();
        let mut tx = StateTx::new(&store);
        tx.put("k3", b"v3".to_vec()).unwrap();
        tx.delete("k1").unwrap();

        assert_eq!(tx.get("k3").unwrap(), Some(b"v3".to_vec()));
        assert_eq!(tx.get("k1").unwrap(), None);
        let keys: Vec<_> = tx.scan_prefix("k").unwrap().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["k2".to_string(), "k3".to_string()]);

        // Store untouched until commit
        assert!(store.get("k3").unwrap().is_none());
    }

    #[test]
    fn test_identical_put_is_noop() {
        let store = seeded();
        let mut tx = StateTx::new(&store);
        tx.put("k1", br#"{"docType":"x","n":1}"#.to_vec()).unwrap();
        assert!(tx.write_set().is_empty());

        tx.put("k1", b"changed".to_vec()).unwrap();
        tx.put("k1", br#"{"docType":"x","n":1}"#.to_vec()).unwrap();
        assert!(tx.write_set().is_empty());
    }

    #[test]
    fn test_delete_of_pending_insert_cancels() {
        let store = seeded();
        let mut tx = StateTx::new(&store);
        tx.put("new", b"v".to_vec()).unwrap();
        tx.delete("new").unwrap();
        assert!(tx.write_set().is_empty());
    }

    #[test]
    fn test_rich_query() {
        let store = seeded();
        let tx = StateTx::new(&store);
        let hits = tx.rich_query(&Selector::doc_type("y")).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].0, "k2");
    }
}
