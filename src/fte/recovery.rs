// src/fte/recovery.rs

//! Crash recovery: reconstruct a transaction from its WAL file and
//! reloaded snapshots, then finish whatever the crash interrupted.
//!
//! Replay trusts the WAL completely — `tx_start` seeds identity and
//! creation time, `op_intent` appends a pending operation, `op_complete`
//! (and `op_rollback`) mark the matching sequence number, and the two
//! terminal entries set the final state. If replay ends with the
//! transaction still `active`, the crash happened before commit or
//! rollback, and recovery finishes the job itself with a best-effort
//! rollback using whatever snapshots survived.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::snapshot::SnapshotStore;
use crate::wal::{WalEntryType, WriteAheadLog};

use super::{FileOperation, OperationStatus, Transaction, TransactionState};

/// What recovery did with a reconstructed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The transaction was still active at crash time; recovery rolled
    /// it back using the reloaded snapshots.
    RolledBack,
    /// The transaction had already committed before the crash.
    AlreadyCommitted,
    /// The transaction had already rolled back before the crash.
    AlreadyRolledBack,
    /// The WAL held no usable entries (or was itself empty).
    Empty,
}

/// Reconstruct a transaction from `wal_path` and finish recovery.
///
/// `wal_path` is `<baseDir>/.plandex/wal/<txId>.wal`; the snapshot
/// directory lives at the fixed sibling path
/// `<baseDir>/.plandex/snapshots/<txId>/`, so it's derived rather than
/// passed in separately.
pub fn recover(wal_path: &Path) -> Result<(Transaction, RecoveryOutcome)> {
    let base_dir = base_dir_from_wal_path(wal_path)?;
    let tx_id = tx_id_from_wal_path(wal_path)?;

    let wal = WriteAheadLog::open_for_recovery(wal_path)?;
    let entries = wal.read_all()?;

    if entries.is_empty() {
        let snapshots = SnapshotStore::new(snapshot_dir(&base_dir, &tx_id))?;
        let tx = Transaction::from_recovery(
            tx_id,
            base_dir,
            chrono::Utc::now(),
            TransactionState::Active,
            Vec::new(),
            HashSet::new(),
            1,
            Some(wal),
            Some(snapshots),
        );
        return Ok((tx, RecoveryOutcome::Empty));
    }

    let mut state = TransactionState::Active;
    let mut operations: Vec<FileOperation> = Vec::new();
    let mut tracked_paths: HashSet<PathBuf> = HashSet::new();
    let mut next_seq = 1u64;
    let mut created_at = entries[0].timestamp;

    for entry in &entries {
        match entry.entry_type {
            WalEntryType::TxStart => {
                created_at = entry.timestamp;
            }
            WalEntryType::OpIntent => {
                if let Some(record) = &entry.operation {
                    tracked_paths.insert(record.path.clone());
                    if let Some(new_path) = &record.new_path {
                        tracked_paths.insert(new_path.clone());
                    }
                    next_seq = next_seq.max(record.seq + 1);
                    operations.push(FileOperation {
                        seq: record.seq,
                        kind: record.kind,
                        path: record.path.clone(),
                        new_path: record.new_path.clone(),
                        content: None,
                        content_hash: record.content_hash.clone(),
                        status: OperationStatus::Pending,
                        staged_at: entry.timestamp,
                        applied_at: None,
                        error: None,
                    });
                }
            }
            WalEntryType::OpComplete => {
                if let Some(record) = &entry.operation {
                    if let Some(op) = operations.iter_mut().find(|op| op.seq == record.seq) {
                        op.status = OperationStatus::Applied;
                        op.applied_at = Some(entry.timestamp);
                    }
                }
            }
            WalEntryType::OpRollback => {
                if let Some(record) = &entry.operation {
                    if let Some(op) = operations.iter_mut().find(|op| op.seq == record.seq) {
                        op.status = OperationStatus::RolledBack;
                    }
                }
            }
            WalEntryType::TxCommit => state = TransactionState::Committed,
            WalEntryType::TxRollback => state = TransactionState::RolledBack,
            WalEntryType::TxFailed => state = TransactionState::Failed,
            WalEntryType::Checkpoint => {}
        }
    }

    let snapshots = SnapshotStore::new(snapshot_dir(&base_dir, &tx_id))?;
    let reloaded = snapshots.load_all()?;
    info!(tx_id = %tx_id, snapshots = reloaded.len(), ?state, "replayed WAL for crash recovery");

    let mut tx = Transaction::from_recovery(
        tx_id.clone(),
        base_dir,
        created_at,
        state,
        operations,
        tracked_paths,
        next_seq,
        Some(wal),
        Some(snapshots),
    );

    let outcome = match state {
        TransactionState::Active => {
            warn!(tx_id = %tx_id, "transaction was active at crash time, rolling back");
            tx.rollback("crash recovery")?;
            RecoveryOutcome::RolledBack
        }
        TransactionState::Committed => RecoveryOutcome::AlreadyCommitted,
        TransactionState::RolledBack => RecoveryOutcome::AlreadyRolledBack,
        TransactionState::Preparing | TransactionState::Failed => RecoveryOutcome::Empty,
    };

    Ok((tx, outcome))
}

fn tx_id_from_wal_path(wal_path: &Path) -> Result<String> {
    wal_path
        .file_stem()
        .and_then(|s| s.to_str())
        .map(str::to_string)
        .ok_or_else(|| Error::WalCorrupt(format!("cannot derive transaction id from {}", wal_path.display())))
}

fn base_dir_from_wal_path(wal_path: &Path) -> Result<PathBuf> {
    wal_path
        .parent() // .../.plandex/wal
        .and_then(Path::parent) // .../.plandex
        .and_then(Path::parent) // base dir
        .map(Path::to_path_buf)
        .ok_or_else(|| Error::WalCorrupt(format!("cannot derive base dir from {}", wal_path.display())))
}

fn snapshot_dir(base_dir: &Path, tx_id: &str) -> PathBuf {
    base_dir.join(".plandex").join("snapshots").join(tx_id)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fte::{Transaction, TransactionConfig};
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn recovers_active_transaction_by_rolling_back() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("r"), "original").unwrap();
        let config = TransactionConfig::new(dir.path().to_path_buf());

        let wal_path = {
            let mut tx = Transaction::new(&config, "plan1", "main");
            tx.begin().unwrap();
            tx.modify_file("r", b"mid".to_vec()).unwrap();
            tx.apply_next().unwrap();
            // Simulate a crash: drop without commit or rollback, leaving
            // the WAL and snapshot directory on disk.
            let wal_dir = dir.path().join(".plandex").join("wal");
            wal_dir.join(format!("{}.wal", tx.id()))
        };
        assert!(wal_path.exists());
        assert_eq!(fs::read_to_string(dir.path().join("r")).unwrap(), "mid");

        let (tx, outcome) = recover(&wal_path).unwrap();
        assert_eq!(outcome, RecoveryOutcome::RolledBack);
        assert_eq!(tx.state(), TransactionState::RolledBack);
        assert_eq!(fs::read_to_string(dir.path().join("r")).unwrap(), "original");
        assert!(!wal_path.exists());
    }

    #[test]
    fn recovers_committed_transaction_as_a_no_op() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("r"), "original").unwrap();
        let config = TransactionConfig::new(dir.path().to_path_buf());

        // Write a WAL by hand that ends in tx_commit but whose WAL file
        // was never cleaned up (e.g. the crash hit between the WAL
        // delete and the snapshot-dir delete in `commit`).
        let wal_dir = dir.path().join(".plandex").join("wal");
        let mut wal = WriteAheadLog::create(&wal_dir, "committedtx0001").unwrap();
        wal.append("committedtx0001", WalEntryType::TxStart, None, None, None).unwrap();
        wal.append("committedtx0001", WalEntryType::TxCommit, None, None, None).unwrap();
        let wal_path = wal.path().to_path_buf();
        drop(wal);

        let (tx, outcome) = recover(&wal_path).unwrap();
        assert_eq!(outcome, RecoveryOutcome::AlreadyCommitted);
        assert_eq!(tx.state(), TransactionState::Committed);
        assert_eq!(fs::read_to_string(dir.path().join("r")).unwrap(), "original");
    }

    #[test]
    fn empty_wal_recovers_to_empty_outcome() {
        let dir = TempDir::new().unwrap();
        let wal_dir = dir.path().join(".plandex").join("wal");
        fs::create_dir_all(&wal_dir).unwrap();
        let wal_path = wal_dir.join("emptytx00000001.wal");
        fs::write(&wal_path, b"").unwrap();

        let (_tx, outcome) = recover(&wal_path).unwrap();
        assert_eq!(outcome, RecoveryOutcome::Empty);
    }
}
