//! In-memory log buffer
//!
//! Holds appended records until they are flushed to the WAL file, and owns
//! the LSN counter.

use std::time::{SystemTime, UNIX_EPOCH};

use super::{LogBody, LogRecord, Lsn};

/// Unflushed records plus the sequence/timestamp state used to stamp them
#[derive(Debug, Default)]
pub struct LogBuffer {
    /// Records not yet confirmed written, in LSN order
    records: Vec<LogRecord>,

    /// Highest LSN handed out so far (0 = none)
    last_lsn: Lsn,

    /// Timestamp of the most recent record, keeps timestamps non-decreasing
    last_timestamp: u64,
}

impl LogBuffer {
    /// Create an empty buffer that continues after `last_lsn` / `last_timestamp`
    /// (the values found at the tail of the durable WAL)
    pub fn new(last_lsn: Lsn, last_timestamp: u64) -> Self {
        Self {
            records: Vec::new(),
            last_lsn,
            last_timestamp,
        }
    }

    /// Append a record, assigning the next LSN and the current time
    pub fn append(&mut self, body: LogBody) -> Lsn {
        let timestamp = now_millis().max(self.last_timestamp);
        self.push(timestamp, body)
    }

    /// Append with an explicit timestamp (clamped so it never goes backwards)
    pub fn append_at(&mut self, timestamp: u64, body: LogBody) -> Lsn {
        let timestamp = timestamp.max(self.last_timestamp);
        self.push(timestamp, body)
    }

    fn push(&mut self, timestamp: u64, body: LogBody) -> Lsn {
        self.last_lsn += 1;
        self.last_timestamp = timestamp;
        self.records.push(LogRecord::new(self.last_lsn, timestamp, body));
        self.last_lsn
    }

    /// Buffered records in LSN order
    pub fn records(&self) -> &[LogRecord] {
        &self.records
    }

    /// Remove the first `count` records (confirmed written by a flush)
    pub fn drain_flushed(&mut self, count: usize) {
        let count = count.min(self.records.len());
        self.records.drain(..count);
    }

    pub fn last_lsn(&self) -> Lsn {
        self.last_lsn
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Milliseconds since the unix epoch
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}
