//! Log analysis
//!
//! Classifies transactions and checks that the log is well formed.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use tracing::debug;

use crate::checkpoint::CheckpointMetadata;
use crate::error::{Result, RewindError};
use crate::wal::{LogBody, LogRecord, Lsn, TxId};

/// Final state of a transaction as seen by analysis
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxStatus {
    /// No terminal record: uncommitted, to be undone by crash recovery
    Active,
    Committed,
    Aborted,
}

/// Output of the analysis phase
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Analysis {
    /// Every transaction seen from the checkpoint on (or seeded by it)
    pub statuses: BTreeMap<TxId, TxStatus>,

    /// Index into the history of the first record the redo phase replays
    pub redo_start: usize,

    /// LSN the scan started from, if a checkpoint was used
    pub checkpoint_lsn: Option<Lsn>,
}

impl Analysis {
    /// Transactions without a terminal record
    pub fn active(&self) -> BTreeSet<TxId> {
        self.statuses
            .iter()
            .filter(|(_, status)| **status == TxStatus::Active)
            .map(|(txid, _)| *txid)
            .collect()
    }

    pub fn status(&self, txid: TxId) -> Option<TxStatus> {
        self.statuses.get(&txid).copied()
    }
}

/// Analysis phase: scan forward from the checkpoint (or the beginning),
/// seeded with the checkpoint's active set
pub fn analyze(history: &[LogRecord], checkpoint: Option<&CheckpointMetadata>) -> Result<Analysis> {
    let mut analysis = Analysis::default();

    if let Some(meta) = checkpoint {
        analysis.redo_start = locate_checkpoint(history, meta.checkpoint_lsn)?;
        analysis.checkpoint_lsn = Some(meta.checkpoint_lsn);
        for txid in &meta.active_tx {
            analysis.statuses.insert(*txid, TxStatus::Active);
        }
    }

    for record in &history[analysis.redo_start..] {
        match &record.body {
            LogBody::Start { txid } => {
                debug!(lsn = record.lsn, txid, "analysis: started");
                analysis.statuses.insert(*txid, TxStatus::Active);
            }
            LogBody::Operation { txid, .. } => {
                if !analysis.statuses.contains_key(txid) {
                    return Err(RewindError::InconsistentLog(format!(
                        "operation at LSN {} belongs to transaction {}, which is neither \
                         active at the checkpoint nor started after it",
                        record.lsn, txid
                    )));
                }
            }
            // A terminal record for a transaction not tracked here finished
            // work that predates the checkpoint; it only matters as "not active".
            LogBody::Commit { txid } => {
                debug!(lsn = record.lsn, txid, "analysis: committed");
                analysis.statuses.insert(*txid, TxStatus::Committed);
            }
            LogBody::Abort { txid } => {
                debug!(lsn = record.lsn, txid, "analysis: aborted");
                analysis.statuses.insert(*txid, TxStatus::Aborted);
            }
            LogBody::Checkpoint { .. } => {}
        }
    }

    Ok(analysis)
}

/// Index of the CHECKPOINT record with `checkpoint_lsn`
fn locate_checkpoint(history: &[LogRecord], checkpoint_lsn: Lsn) -> Result<usize> {
    let index = history
        .binary_search_by_key(&checkpoint_lsn, |r| r.lsn)
        .map_err(|_| {
            let last = history.last().map_or(0, |r| r.lsn);
            RewindError::InconsistentLog(format!(
                "checkpoint LSN {} not found in the log (last LSN {})",
                checkpoint_lsn, last
            ))
        })?;

    match history[index].body {
        LogBody::Checkpoint { .. } => Ok(index),
        _ => Err(RewindError::InconsistentLog(format!(
            "checkpoint metadata points at LSN {}, which is a {} record",
            checkpoint_lsn,
            history[index].log_type()
        ))),
    }
}

/// Check the whole history for structural violations
///
/// - LSNs strictly increase
/// - a transaction starts at most once
/// - OPERATION/COMMIT/ABORT follow the transaction's START (a CHECKPOINT
///   listing a transaction before any of its records counts as its start,
///   for logs whose head was archived)
/// - nothing follows a transaction's COMMIT/ABORT
pub fn validate_history(history: &[LogRecord]) -> Result<()> {
    #[derive(PartialEq)]
    enum Seen {
        Open,
        Closed,
    }

    let mut transactions: HashMap<TxId, Seen> = HashMap::new();
    let mut prev_lsn: Option<Lsn> = None;

    for record in history {
        if let Some(prev) = prev_lsn {
            if record.lsn <= prev {
                return Err(RewindError::InconsistentLog(format!(
                    "LSN {} follows LSN {}",
                    record.lsn, prev
                )));
            }
        }
        prev_lsn = Some(record.lsn);

        match &record.body {
            LogBody::Start { txid } => {
                if transactions.insert(*txid, Seen::Open).is_some() {
                    return Err(RewindError::InconsistentLog(format!(
                        "transaction {} started twice (again at LSN {})",
                        txid, record.lsn
                    )));
                }
            }
            LogBody::Operation { txid, .. } | LogBody::Commit { txid } | LogBody::Abort { txid } => {
                match transactions.get(txid) {
                    None => {
                        return Err(RewindError::InconsistentLog(format!(
                            "{} at LSN {} for transaction {} has no preceding START",
                            record.log_type(),
                            record.lsn,
                            txid
                        )))
                    }
                    Some(Seen::Closed) => {
                        return Err(RewindError::InconsistentLog(format!(
                            "{} at LSN {} for transaction {} follows its COMMIT/ABORT",
                            record.log_type(),
                            record.lsn,
                            txid
                        )))
                    }
                    Some(Seen::Open) => {}
                }
                if !matches!(record.body, LogBody::Operation { .. }) {
                    transactions.insert(*txid, Seen::Closed);
                }
            }
            LogBody::Checkpoint { active_tx } => {
                for txid in active_tx {
                    if transactions.get(txid) == Some(&Seen::Closed) {
                        return Err(RewindError::InconsistentLog(format!(
                            "checkpoint at LSN {} lists finished transaction {}",
                            record.lsn, txid
                        )));
                    }
                    transactions.entry(*txid).or_insert(Seen::Open);
                }
            }
        }
    }

    Ok(())
}
