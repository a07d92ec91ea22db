//! # rewindlog
//!
//! A write-ahead-log failure recovery engine with:
//! - Buffered, checksummed WAL with configurable sync
//! - Immediate rollback of aborted transactions
//! - ARIES-style crash recovery (analysis, redo, undo) from the last checkpoint
//! - Point-in-time restore to a transaction or a timestamp
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     RecoveryManager                          │
//! │           (write_log / flush / checkpoint / recover)         │
//! └─────────────────────┬───────────────────────────────────────┘
//!                       │
//!          ┌────────────┼─────────────────┐
//!          │            │                 │
//!          ▼            ▼                 ▼
//!   ┌─────────────┐ ┌────────────┐ ┌─────────────┐
//!   │  LogBuffer  │ │ Checkpoint │ │  Recovery   │
//!   │ + WalWriter │ │   Store    │ │   Planner   │
//!   └──────┬──────┘ └────────────┘ └──────┬──────┘
//!          │                              │ Instructions
//!          ▼                              ▼
//!   ┌─────────────┐                ┌─────────────┐
//!   │   wal.log   │                │   Storage   │
//!   │ (JSON lines)│                │ (StorageApply)
//!   └─────────────┘                └─────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;

pub mod wal;
pub mod checkpoint;
pub mod recovery;
pub mod storage;
pub mod operation;
pub mod manager;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use error::{Result, RewindError};
pub use config::{Config, WalSyncStrategy};
pub use manager::{RecoveryManager, RecoveryReport};
pub use operation::TxOperation;
pub use recovery::{RecoverCriteria, RecoveryPlan};
pub use storage::{MemoryStorage, StorageApply};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of rewindlog
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
