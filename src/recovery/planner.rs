//! Recovery planner
//!
//! The three recovery algorithms, as pure functions over the record history
//! (durable WAL followed by the in-memory buffer, in LSN order).

use std::collections::BTreeSet;

use tracing::{debug, info};

use crate::checkpoint::CheckpointMetadata;
use crate::error::{Result, RewindError};
use crate::wal::{LogBody, LogRecord, TxId};

use super::{analyze, validate_history, Action, Instruction, RecoveryMode, RecoveryPlan};

/// Result of a single-transaction backward scan
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Rollback {
    /// Undo instructions, newest operation first
    pub instructions: Vec<Instruction>,

    /// Whether the scan reached the transaction's START
    pub reached_start: bool,
}

/// Single-transaction rollback
///
/// `records` must yield the history newest first. Operations of other
/// transactions are skipped; the scan stops at the transaction's START.
pub fn rollback_transaction<'a, I>(records: I, txid: TxId) -> Rollback
where
    I: IntoIterator<Item = &'a LogRecord>,
{
    let mut rollback = Rollback::default();

    for record in records {
        match &record.body {
            LogBody::Start { txid: t } if *t == txid => {
                rollback.reached_start = true;
                break;
            }
            LogBody::Operation { txid: t, .. } if *t == txid => {
                if let Some(undo) = undo_of(record) {
                    rollback.instructions.push(undo);
                }
            }
            _ => {}
        }
    }

    rollback
}

/// Validate the history, then run the algorithm `mode` selects
pub fn plan(
    history: &[LogRecord],
    checkpoint: Option<&CheckpointMetadata>,
    mode: RecoveryMode,
) -> Result<RecoveryPlan> {
    validate_history(history)?;

    match mode {
        RecoveryMode::Crash => crash_recovery(history, checkpoint),
        RecoveryMode::UntilTransaction(_) | RecoveryMode::UntilTimestamp(_) => {
            point_in_time(history, mode)
        }
    }
}

/// ARIES-style crash recovery: analysis, redo, undo
pub fn crash_recovery(
    history: &[LogRecord],
    checkpoint: Option<&CheckpointMetadata>,
) -> Result<RecoveryPlan> {
    let mut plan = RecoveryPlan::empty(RecoveryMode::Crash);

    // Phase 1: Analysis
    let analysis = analyze(history, checkpoint)?;
    let losers = analysis.active();
    info!(
        phase = "analysis",
        checkpoint_lsn = ?analysis.checkpoint_lsn,
        transactions = analysis.statuses.len(),
        losers = losers.len(),
        "crash recovery"
    );

    // Phase 2: Redo every operation from the checkpoint on. An ABORT
    // replays the rollback that was applied when it was logged.
    for (index, record) in history.iter().enumerate().skip(analysis.redo_start) {
        match &record.body {
            LogBody::Operation { .. } => {
                if let Some(redo) = redo_of(record) {
                    debug!("{}", redo);
                    plan.instructions.push(redo);
                }
            }
            LogBody::Abort { txid } => {
                let compensation = rollback_transaction(history[..index].iter().rev(), *txid);
                for undo in &compensation.instructions {
                    debug!(abort_lsn = record.lsn, "{}", undo);
                }
                plan.instructions.extend(compensation.instructions);
            }
            _ => {}
        }
    }
    info!(phase = "redo", instructions = plan.len(), "crash recovery");

    // Phase 3: Undo losers, newest first, until every loser's START is passed
    let mut pending = losers.clone();
    let redo_len = plan.len();
    for record in history.iter().rev() {
        if pending.is_empty() {
            break;
        }
        match &record.body {
            LogBody::Operation { txid, .. } if losers.contains(txid) => {
                if let Some(undo) = undo_of(record) {
                    debug!("{}", undo);
                    plan.instructions.push(undo);
                }
            }
            LogBody::Start { txid } => {
                pending.remove(txid);
            }
            _ => {}
        }
    }
    info!(
        phase = "undo",
        instructions = plan.len() - redo_len,
        "crash recovery"
    );

    plan.rolled_back = losers;
    Ok(plan)
}

/// Point-in-time recovery by transaction or timestamp
///
/// Undoes committed work after the cut point as well: this is a restore to
/// an earlier state, not crash-consistency recovery.
pub fn point_in_time(history: &[LogRecord], mode: RecoveryMode) -> Result<RecoveryPlan> {
    let mut plan = RecoveryPlan::empty(mode);

    if let RecoveryMode::UntilTransaction(target) = mode {
        let found = history
            .iter()
            .any(|r| matches!(r.body, LogBody::Start { txid } if txid == target));
        if !found {
            return Err(RewindError::CriteriaNotFound(target));
        }
    }

    let mut started = BTreeSet::new();
    let mut finished = BTreeSet::new();
    let mut cut_lsn = None;

    for record in history.iter().rev() {
        let reached = match mode {
            RecoveryMode::UntilTransaction(target) => {
                matches!(record.body, LogBody::Start { txid } if txid == target)
            }
            RecoveryMode::UntilTimestamp(ts) => record.timestamp <= ts,
            RecoveryMode::Crash => true,
        };

        if reached {
            cut_lsn = Some(record.lsn);
            if let LogBody::Start { txid } = record.body {
                // The target's START is an inclusive stop: its work is undone
                if matches!(mode, RecoveryMode::UntilTransaction(_)) {
                    started.insert(txid);
                }
            }
            break;
        }

        match &record.body {
            LogBody::Operation { .. } => {
                if let Some(undo) = undo_of(record) {
                    debug!("{}", undo);
                    plan.instructions.push(undo);
                }
            }
            LogBody::Start { txid } => {
                started.insert(*txid);
            }
            LogBody::Commit { txid } | LogBody::Abort { txid } => {
                finished.insert(*txid);
            }
            LogBody::Checkpoint { .. } => {}
        }
    }

    info!(
        mode = ?mode,
        cut_lsn = ?cut_lsn,
        undo = plan.len(),
        "point-in-time recovery planned"
    );

    plan.rolled_back = started.difference(&finished).copied().collect();
    Ok(plan)
}

fn undo_of(record: &LogRecord) -> Option<Instruction> {
    instruction(record, Action::Undo)
}

fn redo_of(record: &LogRecord) -> Option<Instruction> {
    instruction(record, Action::Redo)
}

fn instruction(record: &LogRecord, action: Action) -> Option<Instruction> {
    match &record.body {
        LogBody::Operation {
            txid,
            table,
            key,
            old_value,
            new_value,
        } => Some(Instruction {
            action,
            lsn: record.lsn,
            txid: *txid,
            table: table.clone(),
            key: key.clone(),
            value: match action {
                Action::Undo => old_value.clone(),
                Action::Redo => new_value.clone(),
            },
        }),
        _ => None,
    }
}
