//! Shared history builder for recovery tests

use rewindlog::checkpoint::CheckpointMetadata;
use rewindlog::wal::{LogBody, LogBuffer, LogRecord, Lsn, TxId};
use serde_json::Value;

/// Builds an in-memory history with explicit timestamps
pub struct History {
    buffer: LogBuffer,
    timestamp: u64,
}

impl History {
    pub fn new() -> Self {
        Self {
            buffer: LogBuffer::new(0, 0),
            timestamp: 1_000,
        }
    }

    /// Stamp subsequent records with `timestamp`
    pub fn at(mut self, timestamp: u64) -> Self {
        self.timestamp = timestamp;
        self
    }

    pub fn start(self, txid: TxId) -> Self {
        self.push(LogBody::Start { txid })
    }

    pub fn update(
        self,
        txid: TxId,
        key: impl Into<Value>,
        old_value: impl Into<Value>,
        new_value: impl Into<Value>,
    ) -> Self {
        self.push(LogBody::operation(txid, "accounts", key, old_value, new_value))
    }

    pub fn commit(self, txid: TxId) -> Self {
        self.push(LogBody::Commit { txid })
    }

    pub fn abort(self, txid: TxId) -> Self {
        self.push(LogBody::Abort { txid })
    }

    pub fn checkpoint(self, active_tx: Vec<TxId>) -> Self {
        self.push(LogBody::Checkpoint { active_tx })
    }

    pub fn last_lsn(&self) -> Lsn {
        self.buffer.last_lsn()
    }

    pub fn build(self) -> Vec<LogRecord> {
        self.buffer.records().to_vec()
    }

    fn push(mut self, body: LogBody) -> Self {
        self.buffer.append_at(self.timestamp, body);
        self
    }
}

/// Metadata for the CHECKPOINT record at `lsn` in `history`
pub fn metadata_for(history: &[LogRecord], lsn: Lsn) -> CheckpointMetadata {
    let record = history.iter().find(|r| r.lsn == lsn).unwrap();
    match &record.body {
        LogBody::Checkpoint { active_tx } => CheckpointMetadata {
            checkpoint_lsn: lsn,
            active_tx: active_tx.clone(),
            timestamp: record.timestamp,
        },
        other => panic!("LSN {} is not a checkpoint: {:?}", lsn, other),
    }
}
