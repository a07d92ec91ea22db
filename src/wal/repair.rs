//! WAL Repair
//!
//! Makes the WAL file safe to append to after a crash.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use tracing::{info, warn};

use crate::error::Result;
use super::{Lsn, WalReader};

/// Repairs torn writes at the tail of a WAL file
pub struct WalRepair;

/// Result of a repair or verify pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RepairReport {
    /// Number of valid records in the file
    pub records_recovered: u64,

    /// Last valid LSN (0 if the file holds no records)
    pub last_lsn: Lsn,

    /// Timestamp of the last valid record (0 if none)
    pub last_timestamp: u64,

    /// Whether a torn final line was (or would be) removed
    pub was_truncated: bool,

    /// Whether the final record was (or would be) given its missing newline
    pub was_terminated: bool,
}

impl WalRepair {
    /// Repair a WAL file in place
    ///
    /// This will:
    /// 1. Read all valid records
    /// 2. Fail on corruption before the final line
    /// 3. Truncate a torn final line
    /// 4. Terminate a valid final line that lacks its newline
    ///
    /// A missing file is treated as empty.
    pub fn repair(path: &Path) -> Result<RepairReport> {
        let (report, valid_len) = Self::scan(path)?;

        if report.was_truncated {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
            warn!(
                path = %path.display(),
                valid_len,
                "truncated torn write at WAL tail"
            );
        }

        if report.was_terminated {
            let mut file = OpenOptions::new().append(true).open(path)?;
            file.write_all(b"\n")?;
            file.sync_all()?;
        }

        if report.records_recovered > 0 {
            info!(
                records = report.records_recovered,
                last_lsn = report.last_lsn,
                "WAL scanned"
            );
        }

        Ok(report)
    }

    /// Verify integrity of a WAL file without modifying it
    pub fn verify(path: &Path) -> Result<RepairReport> {
        Self::scan(path).map(|(report, _)| report)
    }

    fn scan(path: &Path) -> Result<(RepairReport, u64)> {
        let mut report = RepairReport::default();

        if !path.exists() {
            return Ok((report, 0));
        }

        let mut reader = WalReader::open(path)?;
        while let Some(record) = reader.next_record()? {
            report.records_recovered += 1;
            report.last_lsn = record.lsn;
            report.last_timestamp = record.timestamp;
        }

        report.was_truncated = reader.torn_tail();
        report.was_terminated = reader.unterminated_tail();
        Ok((report, reader.valid_len()))
    }
}
