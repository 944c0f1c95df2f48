//! Configuration for the ledger host

use crate::types::Channel;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Data directory for RocksDB (one subdirectory per channel)
    pub data_dir: PathBuf,

    /// Service name
    pub service_name: String,

    /// Service version
    pub service_version: String,

    /// State store backend
    pub store: StoreBackend,

    /// Channels hosted by this peer
    pub channels: Vec<Channel>,

    /// Peer actor mailbox capacity
    pub mailbox_capacity: usize,

    /// RocksDB configuration
    pub rocksdb: RocksDBConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data/ledger"),
            service_name: "ledger-core".to_string(),
            service_version: env!("CARGO_PKG_VERSION").to_string(),
            store: StoreBackend::Memory,
            channels: vec![
                Channel::new("bilateralchannel"),
                Channel::new("fundingchannel"),
            ],
            mailbox_capacity: 1024,
            rocksdb: RocksDBConfig::default(),
        }
    }
}

/// State store backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// In-memory maps
    Memory,
    /// RocksDB under `data_dir`
    RocksDb,
}

impl std::str::FromStr for StoreBackend {
    type Err = crate::Error;

    fn from_str(s: &str) -> crate::Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "memory" => Ok(StoreBackend::Memory),
            "rocksdb" => Ok(StoreBackend::RocksDb),
            other => Err(crate::Error::Config(format!(
                "unknown store backend {}",
                other
            ))),
        }
    }
}

/// RocksDB configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RocksDBConfig {
    /// Write buffer size (MB)
    pub write_buffer_size_mb: usize,

    /// Max write buffers
    pub max_write_buffer_number: i32,

    /// Max background jobs (compaction + flush)
    pub max_background_jobs: i32,

    /// Enable statistics
    pub enable_statistics: bool,
}

impl Default for RocksDBConfig {
    fn default() -> Self {
        Self {
            write_buffer_size_mb: 64,
            max_write_buffer_number: 3,
            max_background_jobs: 2,
            enable_statistics: false,
        }
    }
}

impl Config {
    /// Load from file
    pub fn from_file(path: impl AsRef<std::path::Path>) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from environment variables
    pub fn from_env() -> crate::Result<Self> {
        let mut config = Config::default();

        if let Ok(data_dir) = std::env::var("LEDGER_DATA_DIR") {
            config.data_dir = PathBuf::from(data_dir);
        }

        if let Ok(store) = std::env::var("LEDGER_STORE") {
            config.store = store.parse()?;
        }

        if let Ok(channels) = std::env::var("LEDGER_CHANNELS") {
            config.channels = channels
                .split(',')
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(Channel::parse)
                .collect::<crate::Result<_>>()?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Check invariants between fields
    pub fn validate(&self) -> crate::Result<()> {
        if self.channels.is_empty() {
            return Err(crate::Error::Config(
                "at least one channel is required".to_string(),
            ));
        }
        if self.mailbox_capacity == 0 {
            return Err(crate::Error::Config(
                "mailbox_capacity must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
