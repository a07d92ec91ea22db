//! WAL Reader
//!
//! Handles reading records from the WAL file.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use tracing::warn;

use crate::error::{Result, RewindError};
use super::LogRecord;

/// Reads records from the WAL file, one line at a time
///
/// A line that fails to parse is a torn write when it is the last line of
/// the file (skipped) and corruption anywhere else.
pub struct WalReader {
    reader: BufReader<File>,

    /// Next unread line as (line number, byte offset, text), read ahead so
    /// the final line can be told apart
    peeked: Option<(u64, u64, Vec<u8>)>,

    /// Lines read so far
    lines_read: u64,

    /// Byte offset where the next `read_line` starts
    next_offset: u64,

    /// Byte offset just past the last record returned
    valid_len: u64,

    /// Set when the final line was skipped as a torn write
    torn_tail: bool,

    /// Set when the final record lacked its terminating newline
    unterminated_tail: bool,
}

impl WalReader {
    /// Open a WAL file for reading
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut reader = Self {
            reader: BufReader::new(file),
            peeked: None,
            lines_read: 0,
            next_offset: 0,
            valid_len: 0,
            torn_tail: false,
            unterminated_tail: false,
        };
        reader.advance()?;
        Ok(reader)
    }

    /// Read the next line into `peeked`
    fn advance(&mut self) -> Result<()> {
        let mut line = Vec::new();
        let bytes = self.reader.read_until(b'\n', &mut line)?;

        self.peeked = if bytes == 0 {
            None
        } else {
            self.lines_read += 1;
            let offset = self.next_offset;
            self.next_offset += bytes as u64;
            Some((self.lines_read, offset, line))
        };
        Ok(())
    }

    /// Read the next record from the WAL
    pub fn next_record(&mut self) -> Result<Option<LogRecord>> {
        let (line_no, offset, line) = match self.peeked.take() {
            Some(peeked) => peeked,
            None => return Ok(None),
        };
        self.advance()?;
        let is_last = self.peeked.is_none();

        let parsed = match std::str::from_utf8(&line) {
            Ok(text) => {
                let content = text.trim_end_matches(&['\n', '\r'][..]);
                if content.trim().is_empty() {
                    Err(RewindError::CorruptRecord {
                        line: line_no,
                        reason: "empty line".to_string(),
                    })
                } else {
                    LogRecord::from_line(content, line_no)
                }
            }
            Err(e) => Err(RewindError::CorruptRecord {
                line: line_no,
                reason: format!("invalid UTF-8: {}", e),
            }),
        };

        match parsed {
            Ok(record) => {
                self.valid_len = offset + line.len() as u64;
                if is_last && line.last() != Some(&b'\n') {
                    self.unterminated_tail = true;
                }
                Ok(Some(record))
            }
            Err(e) if is_last => {
                warn!(line = line_no, error = %e, "ignoring torn final WAL line");
                self.torn_tail = true;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Iterate over all records
    pub fn records(self) -> WalIterator {
        WalIterator {
            reader: self,
            done: false,
        }
    }

    /// Number of bytes covered by records returned so far
    pub fn valid_len(&self) -> u64 {
        self.valid_len
    }

    /// Whether the final line was skipped as a torn write
    pub fn torn_tail(&self) -> bool {
        self.torn_tail
    }

    /// Whether the final record lacked its trailing newline
    pub fn unterminated_tail(&self) -> bool {
        self.unterminated_tail
    }
}

/// Lazy iterator over WAL records, in file (= LSN) order
///
/// Stops after the first error.
pub struct WalIterator {
    reader: WalReader,
    done: bool,
}

impl Iterator for WalIterator {
    type Item = Result<LogRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.reader.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                None
            }
            Err(e) => {
                self.done = true;
                Some(Err(e))
            }
        }
    }
}

/// Restartable source of WAL records: every `iter()` re-reads from the start
#[derive(Debug, Clone)]
pub struct WalSource {
    path: PathBuf,
}

impl WalSource {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// A fresh iterator from the beginning of the file (empty if the file
    /// does not exist yet)
    pub fn iter(&self) -> Result<Box<dyn Iterator<Item = Result<LogRecord>>>> {
        if !self.path.exists() {
            return Ok(Box::new(std::iter::empty()));
        }
        Ok(Box::new(WalReader::open(&self.path)?.records()))
    }

    /// Read every record into memory
    pub fn read_all(&self) -> Result<Vec<LogRecord>> {
        self.iter()?.collect()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
