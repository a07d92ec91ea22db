//! Transaction operations
//!
//! What callers hand to `RecoveryManager::write_log`.

use serde_json::Value;

use crate::wal::{LogBody, LogType, TxId};

/// A transaction event to be logged
#[derive(Debug, Clone, PartialEq)]
pub enum TxOperation {
    /// Start a transaction
    Begin { txid: TxId },

    /// A data mutation with its pre- and post-image (`Null` = row absent)
    Mutate {
        txid: TxId,
        table: String,
        key: Value,
        old_value: Value,
        new_value: Value,
    },

    /// Commit a transaction
    Commit { txid: TxId },

    /// Abort a transaction; its operations are rolled back before
    /// `write_log` returns
    Abort { txid: TxId },
}

impl TxOperation {
    pub fn begin(txid: TxId) -> Self {
        TxOperation::Begin { txid }
    }

    pub fn mutate(
        txid: TxId,
        table: impl Into<String>,
        key: impl Into<Value>,
        old_value: impl Into<Value>,
        new_value: impl Into<Value>,
    ) -> Self {
        TxOperation::Mutate {
            txid,
            table: table.into(),
            key: key.into(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }

    pub fn commit(txid: TxId) -> Self {
        TxOperation::Commit { txid }
    }

    pub fn abort(txid: TxId) -> Self {
        TxOperation::Abort { txid }
    }

    /// Get the transaction this operation belongs to
    pub fn txid(&self) -> TxId {
        match self {
            TxOperation::Begin { txid }
            | TxOperation::Mutate { txid, .. }
            | TxOperation::Commit { txid }
            | TxOperation::Abort { txid } => *txid,
        }
    }

    /// Log type this operation is recorded as
    pub fn log_type(&self) -> LogType {
        match self {
            TxOperation::Begin { .. } => LogType::Start,
            TxOperation::Mutate { .. } => LogType::Operation,
            TxOperation::Commit { .. } => LogType::Commit,
            TxOperation::Abort { .. } => LogType::Abort,
        }
    }

    /// Check if this operation ends its transaction
    pub fn is_terminal(&self) -> bool {
        matches!(self, TxOperation::Commit { .. } | TxOperation::Abort { .. })
    }
}

impl From<TxOperation> for LogBody {
    fn from(op: TxOperation) -> Self {
        match op {
            TxOperation::Begin { txid } => LogBody::Start { txid },
            TxOperation::Mutate {
                txid,
                table,
                key,
                old_value,
                new_value,
            } => LogBody::Operation {
                txid,
                table,
                key,
                old_value,
                new_value,
            },
            TxOperation::Commit { txid } => LogBody::Commit { txid },
            TxOperation::Abort { txid } => LogBody::Abort { txid },
        }
    }
}
