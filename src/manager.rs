//! Recovery Manager Module
//!
//! The service object that owns the log and runs recovery.
//!
//! ## Responsibilities
//! - Translate transaction operations into log records
//! - Roll back a transaction as soon as its ABORT is logged
//! - Flush the buffer per the configured sync strategy
//! - Take checkpoints (on demand, or by threshold on COMMIT)
//! - Compute and apply recovery plans

use std::collections::{BTreeSet, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::{MappedMutexGuard, Mutex, MutexGuard};
use tracing::{debug, info, warn};

use crate::checkpoint::{CheckpointMetadata, CheckpointStore};
use crate::config::{Config, WalSyncStrategy};
use crate::error::{Result, RewindError};
use crate::operation::TxOperation;
use crate::recovery::{
    self, analyze, rollback_transaction, validate_history, Instruction, RecoverCriteria,
    RecoveryMode, RecoveryPlan,
};
use crate::storage::StorageApply;
use crate::wal::{
    now_millis, LogBody, LogBuffer, LogRecord, LogType, Lsn, TxId, WalRepair,
    WalSource, WalWriter,
};

/// What a `recover` call did
#[derive(Debug, Clone, PartialEq)]
pub struct RecoveryReport {
    /// The plan that was applied, in full
    pub plan: RecoveryPlan,

    /// Instructions applied (equals `plan.len()` on success)
    pub applied: usize,

    /// Transactions closed with an ABORT record after the plan was applied
    pub aborted: Vec<TxId>,

    /// Checkpoint taken once recovery finished
    pub checkpoint: CheckpointMetadata,
}

/// The WAL-based failure recovery manager
///
/// ## Concurrency Model: one exclusive section
///
/// Append, flush, checkpoint and recovery all read or mutate the buffer,
/// the WAL file and the LSN counter, so every public operation holds
/// `inner` for its whole duration. Callers on many threads may share one
/// manager (`&self` everywhere); their critical sections are serialized.
///
/// `recover` blocks until the plan is computed *and* applied. It cannot be
/// cancelled part-way: a half-applied plan leaves data worse off than before.
pub struct RecoveryManager<S: StorageApply> {
    /// Manager configuration
    config: Config,

    /// Everything guarded by the exclusive section
    inner: Mutex<Inner<S>>,
}

struct Inner<S> {
    /// Unflushed records and the LSN counter
    buffer: LogBuffer,

    /// Append handle on the WAL file
    writer: WalWriter,

    /// Restartable reader over the WAL file
    source: WalSource,

    /// last_checkpoint.json
    checkpoints: CheckpointStore,

    /// Transactions started and not yet committed/aborted
    active: BTreeSet<TxId>,

    /// Every transaction id that ever started (ids are never reused)
    seen: HashSet<TxId>,

    /// Records appended since the last checkpoint
    since_checkpoint: usize,

    sync_strategy: WalSyncStrategy,
    checkpoint_threshold: Option<usize>,

    /// Data the plans are applied to
    storage: S,
}

impl<S: StorageApply> RecoveryManager<S> {
    // =========================================================================
    // Internal Path Constants
    // =========================================================================
    const WAL_FILENAME: &'static str = "wal.log";
    const CHECKPOINT_FILENAME: &'static str = "last_checkpoint.json";

    /// Open or create a manager with the given config
    ///
    /// On startup:
    /// 1. Create the data directory
    /// 2. Repair a torn write at the WAL tail
    /// 3. Rebuild the active-transaction set from the log
    /// 4. Continue the LSN counter after the last durable record
    ///
    /// Opening does not run recovery; call `recover` for that.
    pub fn open(config: Config, storage: S) -> Result<Self> {
        if config.checkpoint_threshold == Some(0) {
            return Err(RewindError::Config(
                "checkpoint_threshold must be at least 1".to_string(),
            ));
        }

        // Step 1: Create data directory if it doesn't exist
        fs::create_dir_all(&config.data_dir)?;
        let wal_path = config.data_dir.join(Self::WAL_FILENAME);
        let checkpoint_path = config.data_dir.join(Self::CHECKPOINT_FILENAME);

        // Step 2: Make the WAL safe to append to
        let repair = WalRepair::repair(&wal_path)?;
        let writer = WalWriter::open(&wal_path)?;
        let source = WalSource::new(&wal_path);
        let checkpoints = CheckpointStore::new(checkpoint_path);

        // Step 3: Rebuild transaction state
        let history = source.read_all()?;
        validate_history(&history)?;
        let checkpoint = checkpoints.load()?;
        let analysis = analyze(&history, checkpoint.as_ref())?;
        let active = analysis.active();
        let seen = history
            .iter()
            .filter_map(|r| match r.body {
                LogBody::Start { txid } => Some(txid),
                _ => None,
            })
            .chain(active.iter().copied())
            .collect();

        info!(
            data_dir = %config.data_dir.display(),
            records = repair.records_recovered,
            last_lsn = repair.last_lsn,
            checkpoint_lsn = ?checkpoint.as_ref().map(|c| c.checkpoint_lsn),
            active = active.len(),
            "recovery manager opened"
        );

        // Step 4: Continue numbering after the durable tail
        let buffer = LogBuffer::new(repair.last_lsn, repair.last_timestamp);

        let inner = Inner {
            buffer,
            writer,
            source,
            checkpoints,
            active,
            seen,
            since_checkpoint: history.len() - analysis.redo_start,
            sync_strategy: config.wal_sync_strategy,
            checkpoint_threshold: config.checkpoint_threshold,
            storage,
        };

        Ok(Self {
            config,
            inner: Mutex::new(inner),
        })
    }

    /// Log a transaction operation and return its LSN
    ///
    /// Steps:
    /// 1. Check the operation against the active-transaction set
    /// 2. Append to the buffer
    /// 3. For ABORT, apply the transaction's rollback
    /// 4. Flush per the sync strategy
    /// 5. For COMMIT, checkpoint if the threshold is reached
    ///
    /// On an I/O error the record stays buffered; retry with `flush()`.
    /// If the rollback of an ABORT cannot be fully applied the ABORT stays
    /// logged, and `recover(RecoverCriteria::crash())` completes it.
    pub fn write_log(&self, operation: TxOperation) -> Result<Lsn> {
        let mut inner = self.inner.lock();
        inner.write_log(operation)
    }

    /// Write every buffered record to the WAL and fsync
    pub fn flush(&self) -> Result<()> {
        self.inner.lock().flush()
    }

    /// Emit a CHECKPOINT record, flush, and persist the checkpoint metadata
    pub fn save_checkpoint(&self) -> Result<CheckpointMetadata> {
        self.inner.lock().save_checkpoint()
    }

    /// Read the checkpoint metadata (`None` if no checkpoint was taken)
    pub fn load_checkpoint(&self) -> Result<Option<CheckpointMetadata>> {
        self.inner.lock().checkpoints.load()
    }

    /// Compute the plan `criteria` selects without applying it
    pub fn plan(&self, criteria: RecoverCriteria) -> Result<RecoveryPlan> {
        let mode = criteria.mode()?;
        self.inner.lock().plan(mode)
    }

    /// Run recovery: compute the plan, apply it in order, then close the
    /// rolled-back transactions and take a checkpoint
    ///
    /// Point-in-time criteria undo committed work after the cut point.
    pub fn recover(&self, criteria: RecoverCriteria) -> Result<RecoveryReport> {
        // Rejected before the log is touched
        let mode = criteria.mode()?;

        let mut inner = self.inner.lock();
        inner.recover(mode)
    }

    /// Lazily read every durable WAL record (buffered records excluded)
    ///
    /// Each call starts again from the beginning of the file.
    pub fn read_all(&self) -> Result<Box<dyn Iterator<Item = Result<LogRecord>>>> {
        let source = self.inner.lock().source.clone();
        source.iter()
    }

    // =========================================================================
    // Accessors (for testing and debugging)
    // =========================================================================

    /// Transactions started and not yet committed/aborted
    pub fn active_transactions(&self) -> BTreeSet<TxId> {
        self.inner.lock().active.clone()
    }

    /// Highest LSN assigned so far
    pub fn last_lsn(&self) -> Lsn {
        self.inner.lock().buffer.last_lsn()
    }

    /// Number of records not yet flushed
    pub fn buffered_records(&self) -> usize {
        self.inner.lock().buffer.len()
    }

    /// Locked access to the storage adapter
    pub fn storage(&self) -> MappedMutexGuard<'_, S> {
        MutexGuard::map(self.inner.lock(), |inner| &mut inner.storage)
    }

    /// Consume the manager, dropping unflushed records, and return the storage
    pub fn into_storage(self) -> S {
        self.inner.into_inner().storage
    }

    /// Get the configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Path of the WAL file
    pub fn wal_path(&self) -> PathBuf {
        self.config.data_dir.join(Self::WAL_FILENAME)
    }

    /// Path of the checkpoint metadata file
    pub fn checkpoint_path(&self) -> PathBuf {
        self.config.data_dir.join(Self::CHECKPOINT_FILENAME)
    }

    /// Get the data directory path
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }
}

// =============================================================================
// Critical Sections (called with the lock held)
// =============================================================================

impl<S: StorageApply> Inner<S> {
    fn write_log(&mut self, operation: TxOperation) -> Result<Lsn> {
        // Step 1: Validate
        self.check(&operation)?;
        let txid = operation.txid();
        let log_type = operation.log_type();
        let terminal = operation.is_terminal();

        // Step 2: Append
        let lsn = match operation {
            TxOperation::Begin { .. } => {
                self.active.insert(txid);
                self.seen.insert(txid);
                self.append(operation.into())
            }
            TxOperation::Commit { .. } | TxOperation::Abort { .. } => {
                self.active.remove(&txid);
                self.append(operation.into())
            }
            TxOperation::Mutate { .. } => self.append(operation.into()),
        };
        debug!(lsn, txid, log_type = %log_type, "logged");

        // Step 3: ABORT rolls back immediately
        let rollback = if log_type == LogType::Abort {
            Some(self.rollback(txid))
        } else {
            None
        };

        // Step 4: Durability (the ABORT is flushed even if its rollback failed)
        let flush = match self.sync_strategy {
            WalSyncStrategy::EveryRecord => true,
            WalSyncStrategy::OnTransactionEnd => terminal,
            WalSyncStrategy::Manual => false,
        };
        if flush {
            self.flush()?;
        }
        if let Some(result) = rollback {
            let undone = result?;
            info!(txid, undone, "transaction rolled back");
        }

        // Step 5: Checkpoint policy
        if log_type == LogType::Commit {
            if let Some(threshold) = self.checkpoint_threshold {
                if self.since_checkpoint >= threshold {
                    self.save_checkpoint()?;
                }
            }
        }

        Ok(lsn)
    }

    fn check(&self, operation: &TxOperation) -> Result<()> {
        let txid = operation.txid();
        match operation {
            TxOperation::Begin { .. } if self.seen.contains(&txid) => {
                Err(RewindError::InconsistentLog(format!(
                    "transaction id {} was already used",
                    txid
                )))
            }
            TxOperation::Begin { .. } => Ok(()),
            _ if !self.active.contains(&txid) => Err(RewindError::InconsistentLog(format!(
                "{} for transaction {}, which is not active",
                operation.log_type(),
                txid
            ))),
            TxOperation::Mutate { key, .. } if key.is_null() => Err(RewindError::InconsistentLog(
                format!("mutation in transaction {} has a null key", txid),
            )),
            _ => Ok(()),
        }
    }

    fn append(&mut self, body: LogBody) -> Lsn {
        self.since_checkpoint += 1;
        self.buffer.append(body)
    }

    fn flush(&mut self) -> Result<()> {
        self.writer.flush_buffer(&mut self.buffer)
    }

    /// Durable WAL followed by the buffer, in LSN order
    fn history(&self) -> Result<Vec<LogRecord>> {
        let mut records = self.source.read_all()?;
        records.extend(self.buffer.records().iter().cloned());
        Ok(records)
    }

    /// Undo `txid`'s operations, searching the buffer before the WAL
    fn rollback(&mut self, txid: TxId) -> Result<usize> {
        let mut rollback = rollback_transaction(self.buffer.records().iter().rev(), txid);

        if !rollback.reached_start {
            let history = self.history()?;
            rollback = rollback_transaction(history.iter().rev(), txid);
        }
        if !rollback.reached_start {
            return Err(RewindError::InconsistentLog(format!(
                "START of aborted transaction {} not found",
                txid
            )));
        }

        apply_all(&mut self.storage, &rollback.instructions)
    }

    fn save_checkpoint(&mut self) -> Result<CheckpointMetadata> {
        // Step 1: Active transactions, by the same analysis crash recovery uses
        let previous = self.checkpoints.load()?;
        let history = self.history()?;
        let active_tx: Vec<TxId> = analyze(&history, previous.as_ref())?
            .active()
            .into_iter()
            .collect();

        // Step 2: CHECKPOINT record
        let checkpoint_lsn = self.append(LogBody::Checkpoint {
            active_tx: active_tx.clone(),
        });
        let timestamp = self
            .buffer
            .records()
            .last()
            .map_or_else(now_millis, |r| r.timestamp);

        // Step 3: Flush buffer (including the CHECKPOINT record)
        self.flush()?;

        // Step 4: Persist metadata atomically
        let metadata = CheckpointMetadata {
            checkpoint_lsn,
            active_tx,
            timestamp,
        };
        self.checkpoints.store(&metadata)?;
        self.active = metadata.active_tx.iter().copied().collect();
        self.since_checkpoint = 0;

        info!(
            checkpoint_lsn,
            active = ?metadata.active_tx,
            "checkpoint saved"
        );
        Ok(metadata)
    }

    fn plan(&self, mode: RecoveryMode) -> Result<RecoveryPlan> {
        let history = self.history()?;
        let checkpoint = self.checkpoints.load()?;
        if checkpoint.is_none() && mode == RecoveryMode::Crash {
            debug!("no checkpoint found, scanning the whole log");
        }
        recovery::plan(&history, checkpoint.as_ref(), mode)
    }

    fn recover(&mut self, mode: RecoveryMode) -> Result<RecoveryReport> {
        info!(mode = ?mode, "recovery started");

        // Step 1: Plan
        let plan = self.plan(mode)?;
        if mode.is_point_in_time() {
            warn!(
                mode = ?mode,
                undo = plan.undo_count(),
                "point-in-time recovery undoes committed transactions after the cut point"
            );
        }

        // Step 2: Apply, all or report failure
        let applied = apply_all(&mut self.storage, &plan.instructions)?;

        // Step 3: Close transactions the plan rolled back entirely
        let mut aborted = Vec::new();
        for txid in &plan.rolled_back {
            if self.active.remove(txid) {
                self.append(LogBody::Abort { txid: *txid });
                aborted.push(*txid);
            }
        }

        // Step 4: Checkpoint so later crash recovery starts past this point
        let checkpoint = self.save_checkpoint()?;

        info!(
            mode = ?mode,
            redo = plan.redo_count(),
            undo = plan.undo_count(),
            aborted = aborted.len(),
            "recovery complete"
        );

        Ok(RecoveryReport {
            plan,
            applied,
            aborted,
            checkpoint,
        })
    }
}

/// Apply instructions in order; any failure fails the whole run
fn apply_all<S: StorageApply>(storage: &mut S, instructions: &[Instruction]) -> Result<usize> {
    let total = instructions.len();
    for (applied, instruction) in instructions.iter().enumerate() {
        storage
            .apply(instruction)
            .map_err(|e| RewindError::RecoveryIncomplete {
                applied,
                total,
                reason: e.to_string(),
            })?;
    }
    Ok(total)
}
