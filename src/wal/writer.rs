//! WAL Writer
//!
//! Handles appending records to the WAL file.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Result, RewindError};
use super::{LogBuffer, LogRecord};

/// File operations the writer relies on
pub trait WalFile: Write {
    /// Current length in bytes
    fn current_len(&self) -> io::Result<u64>;

    /// Truncate to `len` bytes
    fn truncate(&self, len: u64) -> io::Result<()>;

    /// Flush written data to stable storage
    fn sync(&self) -> io::Result<()>;
}

impl WalFile for File {
    fn current_len(&self) -> io::Result<u64> {
        Ok(self.metadata()?.len())
    }

    fn truncate(&self, len: u64) -> io::Result<()> {
        self.set_len(len)
    }

    fn sync(&self) -> io::Result<()> {
        self.sync_data()
    }
}

/// Appends records to the WAL file, one JSON line each
///
/// The file is only ever extended. The single exception is cutting back a
/// partially written line after a failed append, which never touches bytes
/// that were confirmed written.
pub struct WalWriter<F: WalFile = File> {
    path: PathBuf,
    file: F,

    /// Length of the file up to the last confirmed line
    confirmed_len: u64,
}

/// Outcome of a failed `append_all`
#[derive(Debug)]
pub struct PartialFlush {
    /// Records (from the front of the batch) that were fully written
    pub written: usize,

    /// The failure that stopped the batch
    pub error: RewindError,
}

impl WalWriter<File> {
    /// Open or create a WAL file for appending
    ///
    /// The file must end on a line boundary; run `WalRepair::repair` first.
    pub fn open(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Self::with_file(path, file)
    }
}

impl<F: WalFile> WalWriter<F> {
    /// Write through an already opened handle positioned at its end
    pub fn with_file(path: &Path, file: F) -> Result<Self> {
        let confirmed_len = file.current_len()?;

        Ok(Self {
            path: path.to_path_buf(),
            file,
            confirmed_len,
        })
    }

    /// Append every record in order, then fsync.
    ///
    /// On failure returns how many records were confirmed written so the
    /// caller can keep the rest buffered.
    pub fn append_all(&mut self, records: &[LogRecord]) -> std::result::Result<usize, PartialFlush> {
        let mut written = 0;

        for record in records {
            if let Err(error) = self.append_line(record) {
                self.cut_back();
                return Err(PartialFlush { written, error });
            }
            written += 1;
        }

        // Written lines stay in the file; a retried flush re-runs this fsync
        // even when nothing is left to append.
        if let Err(e) = self.file.sync() {
            return Err(PartialFlush {
                written,
                error: RewindError::Io(e),
            });
        }

        debug!(records = written, path = %self.path.display(), "WAL flushed");
        Ok(written)
    }

    /// Write out the buffer, draining whatever was confirmed written
    ///
    /// On failure the unwritten records stay buffered so calling this again
    /// retries them in order.
    pub fn flush_buffer(&mut self, buffer: &mut LogBuffer) -> Result<()> {
        match self.append_all(buffer.records()) {
            Ok(written) => {
                buffer.drain_flushed(written);
                Ok(())
            }
            Err(PartialFlush { written, error }) => {
                buffer.drain_flushed(written);
                warn!(
                    written,
                    remaining = buffer.len(),
                    error = %error,
                    "WAL flush failed"
                );
                Err(error)
            }
        }
    }

    fn append_line(&mut self, record: &LogRecord) -> Result<()> {
        let mut line = record.to_line()?;
        line.push('\n');
        self.file.write_all(line.as_bytes())?;
        self.confirmed_len += line.len() as u64;
        Ok(())
    }

    /// Remove bytes of a half-written line past the last confirmed one
    fn cut_back(&mut self) {
        match self.file.current_len() {
            Ok(len) if len > self.confirmed_len => {
                if let Err(e) = self.file.truncate(self.confirmed_len) {
                    warn!(error = %e, "failed to cut back partial WAL line");
                }
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "failed to stat WAL after append error"),
        }
    }

    /// Bytes confirmed written
    pub fn len(&self) -> u64 {
        self.confirmed_len
    }

    pub fn is_empty(&self) -> bool {
        self.confirmed_len == 0
    }
}
