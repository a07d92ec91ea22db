//! Tests for the log buffer
//!
//! These tests verify:
//! - LSN assignment and continuation
//! - Non-decreasing timestamps
//! - Draining flushed records

use rewindlog::wal::{LogBody, LogBuffer};

#[test]
fn test_lsns_start_at_one() {
    let mut buffer = LogBuffer::new(0, 0);

    assert_eq!(buffer.append(LogBody::Start { txid: 1 }), 1);
    assert_eq!(buffer.append(LogBody::Commit { txid: 1 }), 2);
    assert_eq!(buffer.last_lsn(), 2);
    assert_eq!(buffer.len(), 2);
}

#[test]
fn test_lsns_continue_after_durable_tail() {
    let mut buffer = LogBuffer::new(41, 0);

    assert_eq!(buffer.append(LogBody::Start { txid: 9 }), 42);
}

#[test]
fn test_lsns_strictly_increase() {
    let mut buffer = LogBuffer::new(0, 0);
    for txid in 1..=50 {
        buffer.append(LogBody::Start { txid });
    }

    let lsns: Vec<_> = buffer.records().iter().map(|r| r.lsn).collect();
    assert!(lsns.windows(2).all(|w| w[0] < w[1]));
}

#[test]
fn test_timestamps_never_go_backwards() {
    let mut buffer = LogBuffer::new(0, 5_000);

    buffer.append_at(1_000, LogBody::Start { txid: 1 });
    buffer.append_at(7_000, LogBody::Commit { txid: 1 });
    buffer.append_at(6_000, LogBody::Start { txid: 2 });

    let timestamps: Vec<_> = buffer.records().iter().map(|r| r.timestamp).collect();
    assert_eq!(timestamps, vec![5_000, 7_000, 7_000]);
}

#[test]
fn test_append_uses_wall_clock() {
    let mut buffer = LogBuffer::new(0, 0);
    let before = rewindlog::wal::now_millis();
    buffer.append(LogBody::Start { txid: 1 });

    assert!(buffer.records()[0].timestamp >= before);
}

#[test]
fn test_drain_flushed_keeps_tail() {
    let mut buffer = LogBuffer::new(0, 0);
    for txid in 1..=5 {
        buffer.append(LogBody::Start { txid });
    }

    buffer.drain_flushed(3);

    assert_eq!(buffer.len(), 2);
    assert_eq!(buffer.records()[0].lsn, 4);
    // LSN counter is unaffected
    assert_eq!(buffer.last_lsn(), 5);

    buffer.drain_flushed(10);
    assert!(buffer.is_empty());
}
