//! Recovery criteria
//!
//! Selects which recovery algorithm runs.

use serde::{Deserialize, Serialize};

use crate::error::{Result, RewindError};
use crate::wal::TxId;

/// Caller-supplied recovery criteria: empty, a transaction id, or a timestamp
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecoverCriteria {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transaction_id: Option<TxId>,

    /// Unix millis
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<u64>,
}

/// The algorithm a set of criteria resolves to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryMode {
    /// ARIES analysis / redo / undo
    Crash,

    /// Undo the transaction and everything logged after its START
    UntilTransaction(TxId),

    /// Undo every operation stamped later than the timestamp
    UntilTimestamp(u64),
}

impl RecoverCriteria {
    /// No criteria: crash recovery
    pub fn crash() -> Self {
        Self::default()
    }

    pub fn transaction(transaction_id: TxId) -> Self {
        Self {
            transaction_id: Some(transaction_id),
            timestamp: None,
        }
    }

    pub fn timestamp(timestamp: u64) -> Self {
        Self {
            transaction_id: None,
            timestamp: Some(timestamp),
        }
    }

    /// Resolve to a mode, rejecting criteria that name both targets
    pub fn mode(&self) -> Result<RecoveryMode> {
        match (self.transaction_id, self.timestamp) {
            (None, None) => Ok(RecoveryMode::Crash),
            (Some(txid), None) => Ok(RecoveryMode::UntilTransaction(txid)),
            (None, Some(ts)) => Ok(RecoveryMode::UntilTimestamp(ts)),
            (Some(_), Some(_)) => Err(RewindError::AmbiguousCriteria),
        }
    }
}

impl RecoveryMode {
    /// Point-in-time modes undo committed work after the cut point
    pub fn is_point_in_time(&self) -> bool {
        !matches!(self, RecoveryMode::Crash)
    }
}
