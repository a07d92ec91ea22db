//! Tests for RecoveryManager logging
//!
//! These tests verify:
//! - Manager lifecycle (open/reopen)
//! - LSN assignment across flush and reload
//! - Sync strategies
//! - Operation validation against the active set
//! - Immediate rollback on ABORT
//! - Checkpoints (on demand and by threshold)
//! - Concurrent writers

use std::collections::BTreeSet;
use std::fs;
use std::sync::Arc;
use std::thread;

use rewindlog::config::{Config, WalSyncStrategy};
use rewindlog::storage::MemoryStorage;
use rewindlog::wal::{LogBody, LogType};
use rewindlog::{RecoverCriteria, RecoveryManager, RewindError, TxOperation};
use serde_json::{json, Value};
use tempfile::TempDir;

use crate::common::{balance, config, crash_and_reopen, setup_manager, update, FlakyStorage};

// =============================================================================
// Lifecycle Tests
// =============================================================================

#[test]
fn test_open_creates_directory_and_wal() {
    let temp_dir = TempDir::new().unwrap();
    let data_dir = temp_dir.path().join("mydb");
    let config = Config::builder().data_dir(&data_dir).build();

    let manager = RecoveryManager::open(config, MemoryStorage::new()).unwrap();

    assert!(data_dir.exists());
    assert!(data_dir.join("wal.log").exists());
    assert_eq!(manager.wal_path(), data_dir.join("wal.log"));
    assert_eq!(manager.last_lsn(), 0);
    assert!(manager.load_checkpoint().unwrap().is_none());
}

#[test]
fn test_zero_checkpoint_threshold_is_rejected() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .checkpoint_threshold(0)
        .build();

    assert!(matches!(
        RecoveryManager::open(config, MemoryStorage::new()),
        Err(RewindError::Config(_))
    ));
}

#[test]
fn test_open_refuses_corrupt_wal() {
    let (temp_dir, manager) = setup_manager(WalSyncStrategy::EveryRecord);
    manager.write_log(TxOperation::begin(1)).unwrap();
    manager.write_log(TxOperation::commit(1)).unwrap();
    drop(manager);

    let wal_path = temp_dir.path().join("wal.log");
    let contents = fs::read_to_string(&wal_path).unwrap();
    fs::write(&wal_path, format!("garbage\n{}", contents)).unwrap();

    let result = RecoveryManager::open(
        config(&temp_dir, WalSyncStrategy::EveryRecord),
        MemoryStorage::new(),
    );
    assert!(matches!(result, Err(RewindError::CorruptRecord { line: 1, .. })));
}

// =============================================================================
// LSN Tests
// =============================================================================

#[test]
fn test_lsns_strictly_increase_without_gaps() {
    let (_temp, manager) = setup_manager(WalSyncStrategy::OnTransactionEnd);
    let mut lsns = Vec::new();

    for txid in 1..=5 {
        lsns.push(manager.write_log(TxOperation::begin(txid)).unwrap());
        lsns.push(
            manager
                .write_log(TxOperation::mutate(txid, "accounts", txid, 0, 1))
                .unwrap(),
        );
        lsns.push(manager.write_log(TxOperation::commit(txid)).unwrap());
    }

    assert_eq!(lsns, (1..=15).collect::<Vec<_>>());
    assert_eq!(manager.last_lsn(), 15);
}

#[test]
fn test_lsns_continue_after_reload() {
    let (temp_dir, manager) = setup_manager(WalSyncStrategy::OnTransactionEnd);
    manager.write_log(TxOperation::begin(1)).unwrap();
    manager.write_log(TxOperation::commit(1)).unwrap();

    let manager = crash_and_reopen(&temp_dir, manager);

    assert_eq!(manager.last_lsn(), 2);
    assert_eq!(manager.write_log(TxOperation::begin(2)).unwrap(), 3);
}

#[test]
fn test_wal_round_trip() {
    let (_temp, manager) = setup_manager(WalSyncStrategy::Manual);
    manager.write_log(TxOperation::begin(1)).unwrap();
    manager
        .write_log(TxOperation::mutate(
            1,
            "users",
            json!({"id": 7}),
            Value::Null,
            json!({"name": "ann", "tags": ["x", "y"]}),
        ))
        .unwrap();
    manager.write_log(TxOperation::commit(1)).unwrap();
    manager.flush().unwrap();

    let records: Vec<_> = manager
        .read_all()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();

    assert_eq!(records.len(), 3);
    assert_eq!(
        records[1].body,
        LogBody::operation(
            1,
            "users",
            json!({"id": 7}),
            Value::Null,
            json!({"name": "ann", "tags": ["x", "y"]})
        )
    );
    let types: Vec<_> = records.iter().map(|r| r.log_type()).collect();
    assert_eq!(types, vec![LogType::Start, LogType::Operation, LogType::Commit]);
}

#[test]
fn test_float_values_survive_reopen_and_recovery() {
    let (temp_dir, manager) = setup_manager(WalSyncStrategy::OnTransactionEnd);
    let prices = [0.103, 1.2229999999999999, 1.0715660391465826e-75, 1.5e300];

    manager.write_log(TxOperation::begin(1)).unwrap();
    for (i, price) in prices.iter().enumerate() {
        manager
            .write_log(TxOperation::mutate(1, "prices", i as u64, 0, *price))
            .unwrap();
    }
    manager.write_log(TxOperation::commit(1)).unwrap();
    manager.write_log(TxOperation::begin(2)).unwrap();
    manager.write_log(TxOperation::commit(2)).unwrap();

    let manager = crash_and_reopen(&temp_dir, manager);
    manager.recover(RecoverCriteria::crash()).unwrap();

    let records: Vec<_> = manager
        .read_all()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    for (i, price) in prices.iter().enumerate() {
        assert_eq!(
            records[i + 1].body,
            LogBody::operation(1, "prices", i as u64, 0, *price)
        );
    }
    assert_eq!(
        manager.storage().get("prices", &json!(2)),
        Some(&json!(1.0715660391465826e-75))
    );
}

// =============================================================================
// Sync Strategy Tests
// =============================================================================

#[test]
fn test_every_record_flushes_immediately() {
    let (_temp, manager) = setup_manager(WalSyncStrategy::EveryRecord);

    manager.write_log(TxOperation::begin(1)).unwrap();

    assert_eq!(manager.buffered_records(), 0);
    assert_eq!(manager.read_all().unwrap().count(), 1);
}

#[test]
fn test_on_transaction_end_flushes_at_commit() {
    let (_temp, manager) = setup_manager(WalSyncStrategy::OnTransactionEnd);

    manager.write_log(TxOperation::begin(1)).unwrap();
    manager
        .write_log(TxOperation::mutate(1, "accounts", "a", 0, 1))
        .unwrap();
    assert_eq!(manager.buffered_records(), 2);
    assert_eq!(manager.read_all().unwrap().count(), 0);

    manager.write_log(TxOperation::commit(1)).unwrap();
    assert_eq!(manager.buffered_records(), 0);
    assert_eq!(manager.read_all().unwrap().count(), 3);
}

#[test]
fn test_manual_strategy_loses_unflushed_records_on_crash() {
    let (temp_dir, manager) = setup_manager(WalSyncStrategy::Manual);
    manager.write_log(TxOperation::begin(1)).unwrap();
    manager.write_log(TxOperation::commit(1)).unwrap();
    manager.flush().unwrap();
    manager.write_log(TxOperation::begin(2)).unwrap();
    assert_eq!(manager.buffered_records(), 1);

    let manager = crash_and_reopen(&temp_dir, manager);

    assert_eq!(manager.last_lsn(), 2);
    assert!(manager.active_transactions().is_empty());
}

#[test]
fn test_reopen_repairs_torn_tail() {
    let (temp_dir, manager) = setup_manager(WalSyncStrategy::EveryRecord);
    manager.write_log(TxOperation::begin(1)).unwrap();
    drop(manager);

    let wal_path = temp_dir.path().join("wal.log");
    let mut contents = fs::read_to_string(&wal_path).unwrap();
    contents.push_str("{\"lsn\":2,\"txid\":1,\"log_type\":\"COMM");
    fs::write(&wal_path, contents).unwrap();

    let manager = RecoveryManager::open(
        config(&temp_dir, WalSyncStrategy::EveryRecord),
        MemoryStorage::new(),
    )
    .unwrap();

    assert_eq!(manager.last_lsn(), 1);
    assert_eq!(manager.write_log(TxOperation::commit(1)).unwrap(), 2);
    assert_eq!(manager.read_all().unwrap().count(), 2);
}

// =============================================================================
// Validation Tests
// =============================================================================

#[test]
fn test_operation_for_inactive_transaction_is_rejected() {
    let (_temp, manager) = setup_manager(WalSyncStrategy::OnTransactionEnd);

    let err = manager
        .write_log(TxOperation::mutate(4, "accounts", "a", 0, 1))
        .unwrap_err();
    assert!(matches!(err, RewindError::InconsistentLog(_)));

    let err = manager.write_log(TxOperation::commit(4)).unwrap_err();
    assert!(matches!(err, RewindError::InconsistentLog(_)));

    // Nothing was logged
    assert_eq!(manager.last_lsn(), 0);
}

#[test]
fn test_transaction_ids_are_not_reused() {
    let (temp_dir, manager) = setup_manager(WalSyncStrategy::OnTransactionEnd);
    manager.write_log(TxOperation::begin(1)).unwrap();

    assert!(matches!(
        manager.write_log(TxOperation::begin(1)),
        Err(RewindError::InconsistentLog(_))
    ));

    manager.write_log(TxOperation::commit(1)).unwrap();
    let manager = crash_and_reopen(&temp_dir, manager);

    assert!(matches!(
        manager.write_log(TxOperation::begin(1)),
        Err(RewindError::InconsistentLog(_))
    ));
}

#[test]
fn test_null_key_is_rejected() {
    let (_temp, manager) = setup_manager(WalSyncStrategy::OnTransactionEnd);
    manager.write_log(TxOperation::begin(1)).unwrap();

    assert!(matches!(
        manager.write_log(TxOperation::mutate(1, "accounts", Value::Null, 0, 1)),
        Err(RewindError::InconsistentLog(_))
    ));
}

#[test]
fn test_active_set_tracks_transactions() {
    let (_temp, manager) = setup_manager(WalSyncStrategy::OnTransactionEnd);
    manager.write_log(TxOperation::begin(1)).unwrap();
    manager.write_log(TxOperation::begin(2)).unwrap();
    manager.write_log(TxOperation::begin(3)).unwrap();
    manager.write_log(TxOperation::commit(2)).unwrap();
    manager.write_log(TxOperation::abort(3)).unwrap();

    assert_eq!(manager.active_transactions(), BTreeSet::from([1]));
}

// =============================================================================
// ABORT Rollback Tests
// =============================================================================

#[test]
fn test_abort_restores_old_value() {
    let (_temp, manager) = setup_manager(WalSyncStrategy::OnTransactionEnd);
    manager
        .storage()
        .put("accounts", &json!("balance"), json!(3000));

    manager.write_log(TxOperation::begin(1)).unwrap();
    update(&manager, 1, "balance", 5000);
    assert_eq!(balance(&manager, "balance"), json!(5000));

    manager.write_log(TxOperation::abort(1)).unwrap();

    assert_eq!(balance(&manager, "balance"), json!(3000));
    assert_eq!(manager.storage().applied(), 1);
}

#[test]
fn test_abort_leaves_other_transactions_alone() {
    let (_temp, manager) = setup_manager(WalSyncStrategy::OnTransactionEnd);

    manager.write_log(TxOperation::begin(1)).unwrap();
    manager.write_log(TxOperation::begin(2)).unwrap();
    update(&manager, 1, "a", 10);
    update(&manager, 2, "b", 20);
    update(&manager, 1, "a", 11);
    manager.write_log(TxOperation::abort(1)).unwrap();

    assert_eq!(balance(&manager, "a"), Value::Null);
    assert_eq!(balance(&manager, "b"), json!(20));
}

#[test]
fn test_abort_spanning_flushed_and_buffered_records() {
    let (_temp, manager) = setup_manager(WalSyncStrategy::Manual);

    manager.write_log(TxOperation::begin(1)).unwrap();
    update(&manager, 1, "a", 10);
    manager.flush().unwrap();
    update(&manager, 1, "b", 20);
    manager.write_log(TxOperation::abort(1)).unwrap();

    assert_eq!(balance(&manager, "a"), Value::Null);
    assert_eq!(balance(&manager, "b"), Value::Null);
}

#[test]
fn test_abort_with_failing_storage_reports_incomplete() {
    let temp_dir = TempDir::new().unwrap();
    let manager = RecoveryManager::open(
        config(&temp_dir, WalSyncStrategy::OnTransactionEnd),
        FlakyStorage::default(),
    )
    .unwrap();

    manager.write_log(TxOperation::begin(1)).unwrap();
    update(&manager, 1, "a", 10);
    manager.storage().fail_after = Some(0);

    let err = manager.write_log(TxOperation::abort(1)).unwrap_err();
    assert!(matches!(
        err,
        RewindError::RecoveryIncomplete {
            applied: 0,
            total: 1,
            ..
        }
    ));
    // The ABORT is logged; the transaction is over
    assert!(manager.active_transactions().is_empty());
}

// =============================================================================
// Checkpoint Tests
// =============================================================================

#[test]
fn test_save_checkpoint_records_active_transactions() {
    let (_temp, manager) = setup_manager(WalSyncStrategy::Manual);
    manager.write_log(TxOperation::begin(1)).unwrap();
    manager.write_log(TxOperation::begin(2)).unwrap();
    manager.write_log(TxOperation::commit(1)).unwrap();

    let checkpoint = manager.save_checkpoint().unwrap();

    assert_eq!(checkpoint.checkpoint_lsn, 4);
    assert_eq!(checkpoint.active_tx, vec![2]);
    assert_eq!(manager.load_checkpoint().unwrap(), Some(checkpoint.clone()));

    // The CHECKPOINT record and everything before it are durable
    assert_eq!(manager.buffered_records(), 0);
    let records: Vec<_> = manager
        .read_all()
        .unwrap()
        .collect::<Result<_, _>>()
        .unwrap();
    assert_eq!(
        records.last().unwrap().body,
        LogBody::Checkpoint {
            active_tx: vec![2]
        }
    );
    assert_eq!(records.last().unwrap().timestamp, checkpoint.timestamp);
}

#[test]
fn test_consecutive_checkpoints() {
    let (_temp, manager) = setup_manager(WalSyncStrategy::OnTransactionEnd);
    manager.write_log(TxOperation::begin(1)).unwrap();
    manager.save_checkpoint().unwrap();
    manager.write_log(TxOperation::begin(2)).unwrap();
    manager.write_log(TxOperation::commit(1)).unwrap();

    let checkpoint = manager.save_checkpoint().unwrap();

    assert_eq!(checkpoint.active_tx, vec![2]);
    assert_eq!(checkpoint.checkpoint_lsn, 5);
}

#[test]
fn test_checkpoint_threshold_triggers_on_commit() {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .data_dir(temp_dir.path())
        .checkpoint_threshold(4)
        .build();
    let manager = RecoveryManager::open(config, MemoryStorage::new()).unwrap();

    manager.write_log(TxOperation::begin(1)).unwrap();
    manager
        .write_log(TxOperation::mutate(1, "accounts", "a", 0, 1))
        .unwrap();
    manager.write_log(TxOperation::commit(1)).unwrap();
    assert!(manager.load_checkpoint().unwrap().is_none());

    manager.write_log(TxOperation::begin(2)).unwrap();
    manager.write_log(TxOperation::commit(2)).unwrap();

    let checkpoint = manager.load_checkpoint().unwrap().unwrap();
    assert_eq!(checkpoint.checkpoint_lsn, 6);
    assert!(checkpoint.active_tx.is_empty());
}

// =============================================================================
// Concurrency Tests
// =============================================================================

#[test]
fn test_concurrent_writers() {
    let (_temp, manager) = setup_manager(WalSyncStrategy::OnTransactionEnd);
    let manager = Arc::new(manager);

    let handles: Vec<_> = (0..4u64)
        .map(|thread_id| {
            let manager = Arc::clone(&manager);
            thread::spawn(move || {
                for i in 0..25u64 {
                    let txid = thread_id * 100 + i + 1;
                    manager.write_log(TxOperation::begin(txid)).unwrap();
                    manager
                        .write_log(TxOperation::mutate(txid, "accounts", txid, 0, 1))
                        .unwrap();
                    manager.write_log(TxOperation::commit(txid)).unwrap();
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }

    assert_eq!(manager.last_lsn(), 300);
    assert!(manager.active_transactions().is_empty());
    let lsns: Vec<_> = manager
        .read_all()
        .unwrap()
        .map(|r| r.unwrap().lsn)
        .collect();
    assert_eq!(lsns, (1..=300).collect::<Vec<_>>());
}
