//! Configuration for rewindlog
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a recovery manager instance
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory for the log files
    /// Internal structure:
    ///   {data_dir}/
    ///     ├── wal.log                (write-ahead log, one JSON record per line)
    ///     └── last_checkpoint.json   (checkpoint metadata, atomically replaced)
    pub data_dir: PathBuf,

    // -------------------------------------------------------------------------
    // WAL Configuration
    // -------------------------------------------------------------------------
    /// When buffered records are written and fsynced to the WAL
    pub wal_sync_strategy: WalSyncStrategy,

    // -------------------------------------------------------------------------
    // Checkpoint Configuration
    // -------------------------------------------------------------------------
    /// Take a checkpoint on COMMIT once this many records were appended since
    /// the previous checkpoint. `None` leaves checkpointing to the caller.
    pub checkpoint_threshold: Option<usize>,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalSyncStrategy {
    /// flush + fsync after every appended record (safest, slowest)
    EveryRecord,

    /// flush + fsync whenever a COMMIT or ABORT is appended
    OnTransactionEnd,

    /// only explicit `flush()` / `save_checkpoint()` calls write the WAL
    Manual,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./rewindlog_data"),
            wal_sync_strategy: WalSyncStrategy::OnTransactionEnd,
            checkpoint_threshold: None,
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the data directory (root for the WAL and checkpoint file)
    pub fn data_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.data_dir = path.into();
        self
    }

    /// Set the WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.wal_sync_strategy = strategy;
        self
    }

    /// Checkpoint on COMMIT after `records` appends since the last checkpoint
    pub fn checkpoint_threshold(mut self, records: usize) -> Self {
        self.config.checkpoint_threshold = Some(records);
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
