//! Error types for rewindlog
//!
//! Provides a unified error type for logging, checkpointing and recovery.

use thiserror::Error;

use crate::wal::TxId;

/// Result type alias using RewindError
pub type Result<T> = std::result::Result<T, RewindError>;

/// Unified error type for rewindlog operations
#[derive(Debug, Error)]
pub enum RewindError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    /// Reading or writing the WAL or checkpoint file failed. Retryable.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // WAL Errors
    // -------------------------------------------------------------------------
    /// A WAL line that is not the final line failed to parse.
    #[error("Corrupt WAL record at line {line}: {reason}")]
    CorruptRecord { line: u64, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Recovery Errors
    // -------------------------------------------------------------------------
    #[error("Ambiguous recovery criteria: supply at most one of transaction_id and timestamp")]
    AmbiguousCriteria,

    #[error("Transaction {0} has no START record in the log")]
    CriteriaNotFound(TxId),

    #[error("Inconsistent log: {0}")]
    InconsistentLog(String),

    /// The plan was only partially applied; the database must be considered
    /// recovery-incomplete until `recover` is retried.
    #[error("Recovery incomplete: applied {applied} of {total} instructions: {reason}")]
    RecoveryIncomplete {
        applied: usize,
        total: usize,
        reason: String,
    },

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    #[error("Storage error: {0}")]
    Storage(String),

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl RewindError {
    /// Whether the caller may retry the failed operation as-is.
    ///
    /// Only I/O failures qualify. Retrying means re-acquiring the manager's
    /// exclusive section, so nothing is looped internally.
    pub fn is_retryable(&self) -> bool {
        matches!(self, RewindError::Io(_))
    }
}

impl From<serde_json::Error> for RewindError {
    fn from(err: serde_json::Error) -> Self {
        RewindError::Serialization(err.to_string())
    }
}
