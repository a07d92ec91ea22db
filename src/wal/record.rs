//! WAL record definitions
//!
//! Defines the structure of individual log records and their one-line JSON
//! encoding.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, RewindError};

/// Log Sequence Number - strictly increasing, assigned at append time
pub type Lsn = u64;

/// Transaction identifier
pub type TxId = u64;

/// The five kinds of logged events
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogType {
    Start,
    Operation,
    Commit,
    Abort,
    Checkpoint,
}

impl fmt::Display for LogType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LogType::Start => "START",
            LogType::Operation => "OPERATION",
            LogType::Commit => "COMMIT",
            LogType::Abort => "ABORT",
            LogType::Checkpoint => "CHECKPOINT",
        };
        f.write_str(name)
    }
}

/// What a record describes. Field presence follows from the variant.
#[derive(Debug, Clone, PartialEq)]
pub enum LogBody {
    /// Transaction began
    Start { txid: TxId },

    /// A data mutation: `old_value` is the UNDO pre-image, `new_value` the
    /// REDO post-image. `Value::Null` stands for "row absent".
    Operation {
        txid: TxId,
        table: String,
        key: Value,
        old_value: Value,
        new_value: Value,
    },

    /// Transaction committed
    Commit { txid: TxId },

    /// Transaction aborted (its rollback is applied right after logging)
    Abort { txid: TxId },

    /// Transactions active when the checkpoint was taken
    Checkpoint { active_tx: Vec<TxId> },
}

impl LogBody {
    /// Build an OPERATION body
    pub fn operation(
        txid: TxId,
        table: impl Into<String>,
        key: impl Into<Value>,
        old_value: impl Into<Value>,
        new_value: impl Into<Value>,
    ) -> Self {
        LogBody::Operation {
            txid,
            table: table.into(),
            key: key.into(),
            old_value: old_value.into(),
            new_value: new_value.into(),
        }
    }

    pub fn log_type(&self) -> LogType {
        match self {
            LogBody::Start { .. } => LogType::Start,
            LogBody::Operation { .. } => LogType::Operation,
            LogBody::Commit { .. } => LogType::Commit,
            LogBody::Abort { .. } => LogType::Abort,
            LogBody::Checkpoint { .. } => LogType::Checkpoint,
        }
    }

    /// Owning transaction; `None` only for CHECKPOINT
    pub fn txid(&self) -> Option<TxId> {
        match self {
            LogBody::Start { txid }
            | LogBody::Operation { txid, .. }
            | LogBody::Commit { txid }
            | LogBody::Abort { txid } => Some(*txid),
            LogBody::Checkpoint { .. } => None,
        }
    }
}

/// A single record in the WAL
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    /// Log Sequence Number - monotonically increasing
    pub lsn: Lsn,

    /// Timestamp (unix millis) when the record was appended
    pub timestamp: u64,

    /// The logged event
    pub body: LogBody,
}

impl LogRecord {
    pub fn new(lsn: Lsn, timestamp: u64, body: LogBody) -> Self {
        Self {
            lsn,
            timestamp,
            body,
        }
    }

    pub fn txid(&self) -> Option<TxId> {
        self.body.txid()
    }

    pub fn log_type(&self) -> LogType {
        self.body.log_type()
    }

    /// Encode as a single JSON line (without the trailing newline)
    ///
    /// The `crc` field comes last and is the CRC32 of the line text with
    /// that field removed.
    pub fn to_line(&self) -> Result<String> {
        let mut line = serde_json::to_string(&RawRecord::from(self))?;
        let crc = crc32fast::hash(line.as_bytes());
        line.pop();
        line.push_str(&format!("{}{}}}", CRC_FIELD, crc));
        Ok(line)
    }

    /// Decode a single JSON line. `line_no` (1-based) is reported on failure.
    pub fn from_line(line: &str, line_no: u64) -> Result<Self> {
        parse_line(line).map_err(|reason| RewindError::CorruptRecord {
            line: line_no,
            reason,
        })
    }
}

impl fmt::Display for LogRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.body {
            LogBody::Start { txid } => write!(f, "{}: <T{}, Start>", self.lsn, txid),
            LogBody::Operation {
                txid,
                table,
                key,
                old_value,
                new_value,
            } => write!(
                f,
                "{}: <T{}, {}.{}, {}, {}>",
                self.lsn, txid, table, key, old_value, new_value
            ),
            LogBody::Commit { txid } => write!(f, "{}: <T{}, Commit>", self.lsn, txid),
            LogBody::Abort { txid } => write!(f, "{}: <T{}, Abort>", self.lsn, txid),
            LogBody::Checkpoint { active_tx } => {
                write!(f, "{}: <Checkpoint, T: {:?}>", self.lsn, active_tx)
            }
        }
    }
}

// =============================================================================
// Line Format
// =============================================================================

/// Separator that introduces the trailing checksum field
const CRC_FIELD: &str = ",\"crc\":";

/// Flat on-disk shape of a record. Optional fields are omitted when absent.
#[derive(Debug, Serialize, Deserialize)]
struct RawRecord {
    lsn: Lsn,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    txid: Option<TxId>,
    log_type: LogType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    table: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    key: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    old_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    new_value: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    active_tx: Option<Vec<TxId>>,
    timestamp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    crc: Option<u32>,
}

impl From<&LogRecord> for RawRecord {
    fn from(record: &LogRecord) -> Self {
        let mut raw = RawRecord {
            lsn: record.lsn,
            txid: record.txid(),
            log_type: record.log_type(),
            table: None,
            key: None,
            old_value: None,
            new_value: None,
            active_tx: None,
            timestamp: record.timestamp,
            crc: None,
        };

        match &record.body {
            LogBody::Operation {
                table,
                key,
                old_value,
                new_value,
                ..
            } => {
                raw.table = Some(table.clone());
                raw.key = non_null(key);
                raw.old_value = non_null(old_value);
                raw.new_value = non_null(new_value);
            }
            LogBody::Checkpoint { active_tx } => {
                raw.active_tx = Some(active_tx.clone());
            }
            _ => {}
        }

        raw
    }
}

fn non_null(value: &Value) -> Option<Value> {
    match value {
        Value::Null => None,
        other => Some(other.clone()),
    }
}

/// The line as it was before the trailing `crc` field was appended
fn unsigned_text(line: &str) -> Option<String> {
    let at = line.rfind(CRC_FIELD)?;
    let digits = line[at + CRC_FIELD.len()..].strip_suffix('}')?;
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    Some(format!("{}}}", &line[..at]))
}

fn parse_line(line: &str) -> std::result::Result<LogRecord, String> {
    let mut raw: RawRecord =
        serde_json::from_str(line).map_err(|e| format!("invalid JSON record: {}", e))?;

    // Verify checksum over the bytes as written, if the writer recorded one
    if let Some(expected) = raw.crc {
        let unsigned = unsigned_text(line)
            .ok_or_else(|| "crc is not the final field".to_string())?;
        let actual = crc32fast::hash(unsigned.as_bytes());
        if actual != expected {
            return Err(format!(
                "CRC mismatch: expected {:08x}, got {:08x}",
                expected, actual
            ));
        }
    }

    let require_txid = |raw: &RawRecord| {
        raw.txid
            .ok_or_else(|| format!("{} record without txid", raw.log_type))
    };

    let body = match raw.log_type {
        LogType::Start => LogBody::Start {
            txid: require_txid(&raw)?,
        },
        LogType::Commit => LogBody::Commit {
            txid: require_txid(&raw)?,
        },
        LogType::Abort => LogBody::Abort {
            txid: require_txid(&raw)?,
        },
        LogType::Operation => {
            let txid = require_txid(&raw)?;
            let table = raw
                .table
                .take()
                .ok_or_else(|| "OPERATION record without table".to_string())?;
            let key = raw
                .key
                .take()
                .ok_or_else(|| "OPERATION record without key".to_string())?;
            LogBody::Operation {
                txid,
                table,
                key,
                old_value: raw.old_value.take().unwrap_or(Value::Null),
                new_value: raw.new_value.take().unwrap_or(Value::Null),
            }
        }
        LogType::Checkpoint => LogBody::Checkpoint {
            active_tx: raw.active_tx.take().unwrap_or_default(),
        },
    };

    Ok(LogRecord::new(raw.lsn, raw.timestamp, body))
}
