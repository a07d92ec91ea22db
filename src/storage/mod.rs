//! Storage Module
//!
//! The data store recovery plans are applied to.
//!
//! ## Responsibilities
//! - `StorageApply`: the capability the recovery engine consumes
//! - `MemoryStorage`: an in-memory adapter for tests, tools and embedding
//!
//! ## Contract
//! Both operations must be idempotent (applying an instruction twice leaves
//! the same data as applying it once) and individually durable or safely
//! retryable: the engine may re-run a partially applied plan from the start.
//! A `Value::Null` value means "row absent" and removes the row.

mod memory;

use serde_json::Value;

use crate::error::Result;
use crate::recovery::{Action, Instruction};

pub use memory::MemoryStorage;

/// Applies UNDO/REDO instructions to live data
pub trait StorageApply {
    /// Restore `old_value` at `table`/`key`
    fn apply_undo(&mut self, table: &str, key: &Value, old_value: &Value) -> Result<()>;

    /// Re-apply `new_value` at `table`/`key`
    fn apply_redo(&mut self, table: &str, key: &Value, new_value: &Value) -> Result<()>;

    /// Dispatch a plan instruction
    fn apply(&mut self, instruction: &Instruction) -> Result<()> {
        match instruction.action {
            Action::Undo => self.apply_undo(&instruction.table, &instruction.key, &instruction.value),
            Action::Redo => self.apply_redo(&instruction.table, &instruction.key, &instruction.value),
        }
    }
}
