//! Recovery Module
//!
//! Decides which UNDO/REDO instructions bring the data back to a consistent
//! state. Never touches data itself: plans are handed to a `StorageApply`.
//!
//! ## Algorithms
//! - Single-transaction rollback: on ABORT, undo that transaction's
//!   operations, newest first, back to its START
//! - Crash recovery (ARIES): analysis from the last checkpoint, redo of every
//!   operation from the checkpoint on, undo of transactions left active
//! - Point-in-time recovery: undo everything after a transaction's START or
//!   after a timestamp, **including committed work**. This is a restore, not
//!   crash-consistency recovery, and is destructive to later commits.

mod analysis;
mod criteria;
mod planner;

use std::collections::BTreeSet;
use std::fmt;

use serde_json::Value;

use crate::wal::{Lsn, TxId};

pub use analysis::{analyze, validate_history, Analysis, TxStatus};
pub use criteria::{RecoverCriteria, RecoveryMode};
pub use planner::{crash_recovery, plan, point_in_time, rollback_transaction, Rollback};

/// Direction of a single instruction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    /// Restore the pre-image (`old_value`)
    Undo,
    /// Re-apply the post-image (`new_value`)
    Redo,
}

/// One step of a plan: write `value` to `table`/`key`
#[derive(Debug, Clone, PartialEq)]
pub struct Instruction {
    pub action: Action,

    /// LSN of the OPERATION record this was derived from
    pub lsn: Lsn,

    pub txid: TxId,
    pub table: String,
    pub key: Value,
    pub value: Value,
}

impl fmt::Display for Instruction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let action = match self.action {
            Action::Undo => "UNDO",
            Action::Redo => "REDO",
        };
        write!(
            f,
            "{} LSN {}: {}.{} = {} (T{})",
            action, self.lsn, self.table, self.key, self.value, self.txid
        )
    }
}

/// Ordered instructions produced by one recovery run
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryPlan {
    pub mode: RecoveryMode,

    /// Apply strictly in this order
    pub instructions: Vec<Instruction>,

    /// Unterminated transactions the plan rolls back entirely; the manager
    /// closes them with ABORT records once the plan is applied
    pub rolled_back: BTreeSet<TxId>,
}

impl RecoveryPlan {
    pub fn empty(mode: RecoveryMode) -> Self {
        Self {
            mode,
            instructions: Vec::new(),
            rolled_back: BTreeSet::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn undo_count(&self) -> usize {
        self.count(Action::Undo)
    }

    pub fn redo_count(&self) -> usize {
        self.count(Action::Redo)
    }

    fn count(&self, action: Action) -> usize {
        self.instructions
            .iter()
            .filter(|i| i.action == action)
            .count()
    }
}
