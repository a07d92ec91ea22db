//! Checkpoint Module
//!
//! Persists the last stable point of the log.
//!
//! ## Responsibilities
//! - Hold the checkpoint metadata (`checkpoint_lsn`, `active_tx`, `timestamp`)
//! - Replace the metadata file atomically (temp file + fsync + rename)
//! - Report "no checkpoint yet" when the file is absent
//!
//! Computing `active_tx` and emitting the CHECKPOINT record happen in
//! `RecoveryManager::save_checkpoint`, which holds the buffer and the writer.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, RewindError};
use crate::wal::{Lsn, TxId};

/// Contents of `last_checkpoint.json`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckpointMetadata {
    /// LSN of the CHECKPOINT record; REDO starts here
    pub checkpoint_lsn: Lsn,

    /// Transactions not yet committed/aborted at checkpoint time
    pub active_tx: Vec<TxId>,

    /// Wall-clock time (unix millis) the checkpoint was taken
    pub timestamp: u64,
}

/// Reads and atomically replaces the checkpoint metadata file
#[derive(Debug, Clone)]
pub struct CheckpointStore {
    path: PathBuf,
}

impl CheckpointStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the metadata; `None` means no checkpoint was ever taken
    pub fn load(&self) -> Result<Option<CheckpointMetadata>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        serde_json::from_str(&contents).map(Some).map_err(|e| {
            RewindError::Serialization(format!(
                "Failed to parse checkpoint metadata {}: {}",
                self.path.display(),
                e
            ))
        })
    }

    /// Write the metadata so a reader sees either the old or the new file
    pub fn store(&self, metadata: &CheckpointMetadata) -> Result<()> {
        let json = serde_json::to_string_pretty(metadata)?;
        let temp_path = self.temp_path();

        // Step 1: Write and fsync the temp file
        {
            let mut file = File::create(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }

        // Step 2: Atomic rename over the live file
        fs::rename(&temp_path, &self.path)?;

        // Step 3: fsync the directory so the rename is durable
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            let dir = OpenOptions::new().read(true).open(parent)?;
            dir.sync_all()?;
        }

        debug!(
            checkpoint_lsn = metadata.checkpoint_lsn,
            active = metadata.active_tx.len(),
            "checkpoint metadata stored"
        );
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}
