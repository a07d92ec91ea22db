//! Write-Ahead Log (WAL) Module
//!
//! Provides durability guarantees through append-only logging.
//!
//! ## Responsibilities
//! - Buffer log records in memory with strictly increasing LSNs
//! - Flush buffered records to the WAL file, one JSON object per line
//! - CRC32 checksums for corruption detection
//! - Lazy, restartable reads of the durable log
//! - Torn-tail repair after a crash
//!
//! ## File Format
//! ```text
//! {"lsn":1,"txid":7,"log_type":"START","timestamp":1700000000000,"crc":...}
//! {"lsn":2,"txid":7,"log_type":"OPERATION","table":"accounts","key":1,
//!  "old_value":3000,"new_value":5000,"timestamp":1700000000001,"crc":...}
//! {"lsn":3,"log_type":"CHECKPOINT","active_tx":[7],"timestamp":...,"crc":...}
//! ```
//!
//! A line that fails to parse is a torn write if it is the last line of the
//! file, and corruption otherwise.

mod buffer;
mod reader;
mod record;
mod repair;
mod writer;

pub use buffer::{now_millis, LogBuffer};
pub use reader::{WalIterator, WalReader, WalSource};
pub use record::{LogBody, LogRecord, LogType, Lsn, TxId};
pub use repair::{RepairReport, WalRepair};
pub use writer::{PartialFlush, WalFile, WalWriter};
