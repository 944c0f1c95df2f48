//! Versioned key-value state store
//!
//! The host commits one write set per successful invocation. Every committed
//! write also appends a [`HistoryEntry`] for the key, so `history(key)`
//! returns the full version list in commit order.
//!
//! # Backends
//!
//! - [`MemoryStore`] - ordered maps behind a `RwLock` (tests, ephemeral peers)
//! - [`RocksStore`] - RocksDB with two column families:
//!   - `state` - current value per key
//!   - `history` - `key || 0xFF || seq (u64 BE)` → bincode [`HistoryEntry`]

use crate::{
    config::{Config, StoreBackend},
    error::{Error, Result},
    types::Channel,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Direction, IteratorMode, Options, WriteBatch, DB};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Pending writes of one invocation: `None` marks a delete
pub type WriteSet = BTreeMap<String, Option<Vec<u8>>>;

/// One committed version of a key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryEntry {
    /// Host transaction that wrote this version
    pub tx_id: String,
    /// Value written, `None` on delete
    pub value: Option<Vec<u8>>,
    /// Whether this version is a delete
    pub is_delete: bool,
    /// Transaction timestamp
    pub timestamp: DateTime<Utc>,
}

/// Committed state of one channel
pub trait StateStore: Send + Sync {
    /// Current value of a key
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// All live keys starting with `prefix`, in key order
    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    /// All committed versions of a key, oldest first
    fn history(&self, key: &str) -> Result<Vec<HistoryEntry>>;

    /// Apply a write set atomically
    fn commit(&self, tx_id: &str, timestamp: DateTime<Utc>, writes: &WriteSet) -> Result<()>;
}

/// Open the configured backend for one channel
pub fn open_store(config: &Config, channel: &Channel) -> Result<Arc<dyn StateStore>> {
    match config.store {
        StoreBackend::Memory => Ok(Arc::new(MemoryStore::new())),
        StoreBackend::RocksDb => {
            let path = config.data_dir.join(channel.as_str());
            Ok(Arc::new(RocksStore::open(path, config)?))
        }
    }
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: RwLock<BTreeMap<String, Vec<u8>>>,
    history: RwLock<BTreeMap<String, Vec<HistoryEntry>>>,
}

impl MemoryStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }
}

impl StateStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.state.read().get(key).cloned())
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let state = self.state.read();
        Ok(state
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect())
    }

    fn history(&self, key: &str) -> Result<Vec<HistoryEntry>> {
        Ok(self.history.read().get(key).cloned().unwrap_or_default())
    }

    fn commit(&self, tx_id: &str, timestamp: DateTime<Utc>, writes: &WriteSet) -> Result<()> {
        let mut state = self.state.write();
        let mut history = self.history.write();

        for (key, value) in writes {
            match value {
                Some(bytes) => {
                    state.insert(key.clone(), bytes.clone());
                }
                None => {
                    state.remove(key);
                }
            }
            history.entry(key.clone()).or_default().push(HistoryEntry {
                tx_id: tx_id.to_string(),
                value: value.clone(),
                is_delete: value.is_none(),
                timestamp,
            });
        }

        tracing::debug!(tx_id, writes = writes.len(), "Write set committed");
        Ok(())
    }
}

/// Column family names
const CF_STATE: &str = "state";
const CF_HISTORY: &str = "history";

/// RocksDB-backed store
pub struct RocksStore {
    db: Arc<DB>,
}

impl std::fmt::Debug for RocksStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RocksStore")
            .field("path", &self.db.path())
            .finish()
    }
}

impl RocksStore {
    /// Open or create database
    pub fn open(path: impl AsRef<Path>, config: &Config) -> Result<Self> {
        let path = path.as_ref();

        // Create directory if not exists
        std::fs::create_dir_all(path)?;

        let mut db_opts = Options::default();
        db_opts.create_if_missing(true);
        db_opts.create_missing_column_families(true);

        // Tuning from config
        db_opts.set_write_buffer_size(config.rocksdb.write_buffer_size_mb * 1024 * 1024);
        db_opts.set_max_write_buffer_number(config.rocksdb.max_write_buffer_number);
        db_opts.set_max_background_jobs(config.rocksdb.max_background_jobs);

        if config.rocksdb.enable_statistics {
            db_opts.enable_statistics();
        }

        let cf_descriptors = vec![
            ColumnFamilyDescriptor::new(CF_STATE, Self::cf_options_state()),
            ColumnFamilyDescriptor::new(CF_HISTORY, Self::cf_options_history()),
        ];

        let db = DB::open_cf_descriptors(&db_opts, path, cf_descriptors)?;

        tracing::info!("Opened RocksDB state store at {:?}", path);

        Ok(Self { db: Arc::new(db) })
    }

    fn cf_options_state() -> Options {
        let mut opts = Options::default();
        // State is frequently read, use LZ4 for speed
        opts.set_compression_type(rocksdb::DBCompressionType::Lz4);
        opts
    }

    fn cf_options_history() -> Options {
        let mut opts = Options::default();
        opts.set_compression_type(rocksdb::DBCompressionType::Zstd);
        opts
    }

    fn cf_handle(&self, name: &str) -> Result<&ColumnFamily> {
        self.db
            .cf_handle(name)
            .ok_or_else(|| Error::Storage(format!("Column family {} not found", name)))
    }

    fn history_prefix(key: &str) -> Vec<u8> {
        let mut prefix = key.as_bytes().to_vec();
        prefix.push(0xFF);
        prefix
    }

    fn prefixed(&self, cf: &ColumnFamily, prefix: &[u8]) -> Result<Vec<(Box<[u8]>, Box<[u8]>)>> {
        let mut out = Vec::new();
        for item in self
            .db
            .iterator_cf(cf, IteratorMode::From(prefix, Direction::Forward))
        {
            let (k, v) = item?;
            if !k.starts_with(prefix) {
                break;
            }
            out.push((k, v));
        }
        Ok(out)
    }
}

impl StateStore for RocksStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let cf = self.cf_handle(CF_STATE)?;
        Ok(self.db.get_cf(cf, key.as_bytes())?)
    }

    fn scan_prefix(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let cf = self.cf_handle(CF_STATE)?;
        self.prefixed(cf, prefix.as_bytes())?
            .into_iter()
            .map(|(k, v)| {
                let key = String::from_utf8(k.into_vec())
                    .map_err(|e| Error::Storage(format!("non UTF-8 key: {}", e)))?;
                Ok((key, v.into_vec()))
            })
            .collect()
    }

    fn history(&self, key: &str) -> Result<Vec<HistoryEntry>> {
        let cf = self.cf_handle(CF_HISTORY)?;
        let prefix = Self::history_prefix(key);
        self.prefixed(cf, &prefix)?
            .into_iter()
            .map(|(_, v)| Ok(bincode::deserialize(&v)?))
            .collect()
    }

    fn commit(&self, tx_id: &str, timestamp: DateTime<Utc>, writes: &WriteSet) -> Result<()> {
        let cf_state = self.cf_handle(CF_STATE)?;
        let cf_history = self.cf_handle(CF_HISTORY)?;
        let mut batch = WriteBatch::default();

        for (key, value) in writes {
            match value {
                Some(bytes) => batch.put_cf(cf_state, key.as_bytes(), bytes),
                None => batch.delete_cf(cf_state, key.as_bytes()),
            }

            let prefix = Self::history_prefix(key);
            let seq = self
                .prefixed(cf_history, &prefix)?
                .len() as u64;
            let mut history_key = prefix;
            history_key.extend_from_slice(&seq.to_be_bytes());

            let entry = HistoryEntry {
                tx_id: tx_id.to_string(),
                value: value.clone(),
                is_delete: value.is_none(),
                timestamp,
            };
            batch.put_cf(cf_history, history_key, bincode::serialize(&entry)?);
        }

        self.db.write(batch)?;

        tracing::debug!(tx_id, writes = writes.len(), "Write set committed to RocksDB");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ts(secs: i64) -> DateTime<Utc> {
        DateTime::from_timestamp(secs, 0).unwrap()
    }

    fn exercise(store: &dyn StateStore) {
        let mut ws = WriteSet::new();
        ws.insert("a1".to_string(), Some(b"one".to_vec()));
        ws.insert("a2".to_string(), Some(b"two".to_vec()));
        ws.insert("b1".to_string(), Some(b"three".to_vec()));
        store.commit("tx1", ts(1), &ws).unwrap();

        let mut ws = WriteSet::new();
        ws.insert("a1".to_string(), None);
        store.commit("tx2", ts(2), &ws).unwrap();

        assert_eq!(store.get("a1").unwrap(), None);
        assert_eq!(store.get("a2").unwrap(), Some(b"two".to_vec()));

        let scanned = store.scan_prefix("a").unwrap();
        assert_eq!(scanned, vec![("a2".to_string(), b"two".to_vec())]);

        let history = store.history("a1").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].tx_id, "tx1");
        assert!(!history[0].is_delete);
        assert!(history[1].is_delete);
        assert_eq!(history[1].timestamp, ts(2));
    }

    #[test]
    fn test_memory_store() {
        exercise(&MemoryStore::new());
    }

    #[test]
    fn test_rocks_store() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(temp_dir.path(), &Config::default()).unwrap();
        exercise(&store);
    }

    #[test]
    fn test_rocks_history_does_not_leak_across_keys() {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = RocksStore::open(temp_dir.path(), &Config::default()).unwrap();
        let mut ws = WriteSet::new();
        ws.insert("k".to_string(), Some(b"1".to_vec()));
        ws.insert("k\u{ff}zzzzzzzz".to_string(), Some(b"2".to_vec()));
        store.commit("tx1", ts(1), &ws).unwrap();
        assert_eq!(store.history("k").unwrap().len(), 1);
    }
}
