//! In-memory storage adapter
//!
//! BTreeMap-based table store implementing `StorageApply`.

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::trace;

use crate::error::Result;
use super::StorageApply;

/// In-memory rows keyed by (table, canonical JSON key)
///
/// Instructions set absolute values, so applying one twice is a no-op the
/// second time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MemoryStorage {
    rows: BTreeMap<(String, String), Value>,

    /// Instructions applied so far (including no-op repeats)
    applied: u64,
}

impl MemoryStorage {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a row (`None` if absent)
    pub fn get(&self, table: &str, key: &Value) -> Option<&Value> {
        self.rows.get(&row_key(table, key))
    }

    /// Write a row directly, bypassing the log (`Null` removes it)
    pub fn put(&mut self, table: &str, key: &Value, value: Value) {
        let row = row_key(table, key);
        if value.is_null() {
            self.rows.remove(&row);
        } else {
            self.rows.insert(row, value);
        }
    }

    /// Number of rows across all tables
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Instructions applied through `StorageApply`
    pub fn applied(&self) -> u64 {
        self.applied
    }

    /// Rows of one table in key order
    pub fn table(&self, table: &str) -> Vec<(&str, &Value)> {
        self.rows
            .iter()
            .filter(|((t, _), _)| t == table)
            .map(|((_, k), v)| (k.as_str(), v))
            .collect()
    }
}

impl StorageApply for MemoryStorage {
    fn apply_undo(&mut self, table: &str, key: &Value, old_value: &Value) -> Result<()> {
        trace!(table, %key, value = %old_value, "undo");
        self.put(table, key, old_value.clone());
        self.applied += 1;
        Ok(())
    }

    fn apply_redo(&mut self, table: &str, key: &Value, new_value: &Value) -> Result<()> {
        trace!(table, %key, value = %new_value, "redo");
        self.put(table, key, new_value.clone());
        self.applied += 1;
        Ok(())
    }
}

fn row_key(table: &str, key: &Value) -> (String, String) {
    (table.to_string(), key.to_string())
}
