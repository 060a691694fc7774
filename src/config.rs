//! Configuration for LodeKV
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

use crate::error::{LodeError, Result};

/// Main configuration for a LodeKV store (and its HTTP front end)
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for all data files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── MANIFEST          (current file-set, next ids)
    ///     ├── wal-00000001.log  (write-ahead log segments)
    ///     ├── 000001.sst        (table data)
    ///     └── 000001.idx        (sparse index for 000001.sst)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// Sync strategy: how often to fsync WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // MemTable Configuration
    // -------------------------------------------------------------------------
    /// Max size of memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    // -------------------------------------------------------------------------
    // Table File Configuration
    // -------------------------------------------------------------------------
    /// One sparse index entry every `index_interval` records
    pub index_interval: usize,

    /// Compaction output files are cut once they reach this size (bytes)
    pub target_file_size: u64,

    // -------------------------------------------------------------------------
    // Compaction Configuration
    // -------------------------------------------------------------------------
    /// Number of levels, including L0
    pub num_levels: usize,

    /// L0 file count that triggers an L0 -> L1 compaction
    pub level0_compaction_trigger: usize,

    /// Max bytes in L1; deeper levels grow by `level_size_multiplier`
    pub base_level_size: u64,

    /// Growth factor between consecutive levels
    pub level_size_multiplier: u64,

    /// How often the compactor checks for work without being woken (ms)
    pub compaction_interval_ms: u64,

    /// Run the compactor on a background thread
    pub background_compaction: bool,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// HTTP listen address
    pub listen_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,

    /// Largest accepted request body (bytes)
    pub max_body_size: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./lodekv_data"),
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            memtable_size_limit: 4 * 1024 * 1024, // 4 MB
            index_interval: 16,
            target_file_size: 2 * 1024 * 1024, // 2 MB
            num_levels: 4,
            level0_compaction_trigger: 4,
            base_level_size: 10 * 1024 * 1024, // 10 MB
            level_size_multiplier: 10,
            compaction_interval_ms: 1000,
            background_compaction: true,
            listen_addr: "127.0.0.1:3000".to_string(),
            max_connections: 1024,
            read_timeout_ms: 5000,
            write_timeout_ms: 5000,
            max_body_size: 16 * 1024 * 1024, // 16 MB
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Reject settings the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(LodeError::Config("data_dir must not be empty".into()));
        }
        if let WalSyncStrategy::EveryNEntries { count: 0 } = self.wal_sync_strategy {
            return Err(LodeError::Config("WAL sync count must be at least 1".into()));
        }
        if self.memtable_size_limit == 0 {
            return Err(LodeError::Config("memtable_size_limit must be > 0".into()));
        }
        if self.index_interval == 0 {
            return Err(LodeError::Config("index_interval must be > 0".into()));
        }
        if self.target_file_size == 0 || self.base_level_size == 0 {
            return Err(LodeError::Config(
                "target_file_size and base_level_size must be > 0".into(),
            ));
        }
        if self.num_levels < 2 {
            return Err(LodeError::Config("num_levels must be at least 2".into()));
        }
        if self.level0_compaction_trigger == 0 {
            return Err(LodeError::Config(
                "level0_compaction_trigger must be > 0".into(),
            ));
        }
        if self.background_compaction && self.compaction_interval_ms == 0 {
            return Err(LodeError::Config(
                "compaction_interval_ms must be > 0".into(),
            ));
        }
        if self.level_size_multiplier < 2 {
            return Err(LodeError::Config(
                "level_size_multiplier must be at least 2".into(),
            ));
        }
        Ok(())
    }

    /// Byte budget for `level` (L1 and deeper)
    pub fn max_bytes_for_level(&self, level: usize) -> u64 {
        let mut size = self.base_level_size;
        for _ in 1..level {
            size = size.saturating_mul(self.level_size_multiplier);
        }
        size
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for all storage)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.memtable_size_limit = size;
        self
    }

    /// Set the sparse index interval (records per index entry)
    pub fn index_interval(mut self, interval: usize) -> Self {
        self.config.index_interval = interval;
        self
    }

    /// Set the target size of compaction output files
    pub fn target_file_size(mut self, size: u64) -> Self {
        self.config.target_file_size = size;
        self
    }

    /// Set the number of levels
    pub fn num_levels(mut self, levels: usize) -> Self {
        self.config.num_levels = levels;
        self
    }

    /// Set the L0 file count that triggers compaction
    pub fn level0_compaction_trigger(mut self, count: usize) -> Self {
        self.config.level0_compaction_trigger = count;
        self
    }

    /// Set the byte budget of L1
    pub fn base_level_size(mut self, size: u64) -> Self {
        self.config.base_level_size = size;
        self
    }

    /// Set the growth factor between levels
    pub fn level_size_multiplier(mut self, multiplier: u64) -> Self {
        self.config.level_size_multiplier = multiplier;
        self
    }

    /// Set the compaction check interval (in milliseconds)
    pub fn compaction_interval_ms(mut self, ms: u64) -> Self {
        self.config.compaction_interval_ms = ms;
        self
    }

    /// Enable or disable the background compactor
    pub fn background_compaction(mut self, enabled: bool) -> Self {
        self.config.background_compaction = enabled;
        self
    }

    /// Set the HTTP listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the largest accepted request body (in bytes)
    pub fn max_body_size(mut self, size: usize) -> Self {
        self.config.max_body_size = size;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
