// src/fte/mod.rs

//! File Transaction Engine: ACID-style staging, apply, checkpoint,
//! commit and rollback over an on-disk tree, backed by a write-ahead
//! log and persisted snapshots.
//!
//! A transaction is single-threaded by construction — every mutating
//! method takes `&mut self`, so the "exclusive lock per transaction"
//! the design calls for falls out of ordinary Rust ownership rather
//! than an explicit file lock. Multiple transactions on disjoint base
//! directories may run in parallel (each owns its own `Transaction`
//! value); serializing concurrent transactions on the *same* base
//! directory is the host's responsibility.

pub mod checkpoint;
pub mod recovery;

pub use checkpoint::TxCheckpoint;
pub use recovery::{recover, RecoveryOutcome};

use std::collections::{HashMap, HashSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::hash::hash_bytes;
use crate::path::safe_join;
use crate::reporter::{FilePhase, FileStatus, PatchEvent, PatchPhase, PatchStatusReporter, SilentReporter};
use crate::snapshot::SnapshotStore;
use crate::wal::{OperationRecord, StateChange, WalEntryType, WriteAheadLog};

static TX_ID_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Derive a 16-lowercase-hex transaction id from SHA-256 over a
/// monotonic timestamp source (wall-clock nanoseconds plus a
/// process-local counter, so two transactions created in the same
/// nanosecond still get distinct ids).
fn generate_tx_id() -> String {
    let nanos = Utc::now().timestamp_nanos_opt().unwrap_or_default();
    let counter = TX_ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    let hash = hash_bytes(format!("{nanos}-{counter}").as_bytes());
    hash.as_str()[..16].to_string()
}

/// Where a transaction's WAL and snapshot directories live relative to
/// a project's base directory.
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    pub base_dir: PathBuf,
}

impl TransactionConfig {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn control_dir(&self) -> PathBuf {
        self.base_dir.join(".plandex")
    }

    fn wal_dir(&self) -> PathBuf {
        self.control_dir().join("wal")
    }

    fn snapshot_dir(&self, tx_id: &str) -> PathBuf {
        self.control_dir().join("snapshots").join(tx_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    Active,
    Preparing,
    Committed,
    RolledBack,
    Failed,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::RolledBack | Self::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Create,
    Modify,
    Delete,
    Rename,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationStatus {
    Pending,
    Applied,
    RolledBack,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOperation {
    pub seq: u64,
    pub kind: OperationKind,
    pub path: PathBuf,
    pub new_path: Option<PathBuf>,
    #[serde(skip)]
    pub content: Option<Vec<u8>>,
    pub content_hash: Option<String>,
    pub status: OperationStatus,
    pub staged_at: DateTime<Utc>,
    pub applied_at: Option<DateTime<Utc>>,
    pub error: Option<String>,
}

impl FileOperation {
    fn to_record(&self) -> OperationRecord {
        OperationRecord {
            seq: self.seq,
            kind: self.kind,
            path: self.path.clone(),
            new_path: self.new_path.clone(),
            content_hash: self.content_hash.clone(),
            status: self.status,
        }
    }
}

/// Move `src` to `dst` atomically when possible, falling back to
/// copy+fsync+remove across filesystem boundaries (`EXDEV`, raw OS
/// error 18 on every platform Rust targets for this crate).
pub(crate) fn move_file_atomic(src: &Path, dst: &Path) -> io::Result<()> {
    match fs::rename(src, dst) {
        Ok(()) => Ok(()),
        Err(e) if e.raw_os_error() == Some(18) => {
            debug!(
                "cross-filesystem move ({} -> {}), falling back to copy",
                src.display(),
                dst.display()
            );
            fs::copy(src, dst)?;
            let file = fs::File::open(dst)?;
            file.sync_all()?;
            drop(file);
            if let Some(parent) = dst.parent() {
                if let Ok(dir) = fs::File::open(parent) {
                    let _ = dir.sync_all();
                }
            }
            fs::remove_file(src)?;
            Ok(())
        }
        Err(e) => Err(e),
    }
}

/// An active (or terminated) file transaction.
pub struct Transaction {
    id: String,
    plan_id: String,
    branch: String,
    base_dir: PathBuf,
    created_at: DateTime<Utc>,
    state: TransactionState,
    begun: bool,
    operations: Vec<FileOperation>,
    checkpoints: HashMap<String, TxCheckpoint>,
    tracked_paths: HashSet<PathBuf>,
    next_seq: u64,
    wal: Option<WriteAheadLog>,
    snapshots: Option<SnapshotStore>,
    provider_error: Option<String>,
    reporter: Arc<dyn PatchStatusReporter>,
    cancel: Option<Arc<AtomicBool>>,
    staging_phase_emitted: bool,
}

impl Transaction {
    /// Construct a transaction in state `active`, not yet begun: no
    /// directories or WAL exist on disk until [`Transaction::begin`].
    pub fn new(config: &TransactionConfig, plan_id: impl Into<String>, branch: impl Into<String>) -> Self {
        Self {
            id: generate_tx_id(),
            plan_id: plan_id.into(),
            branch: branch.into(),
            base_dir: config.base_dir.clone(),
            created_at: Utc::now(),
            state: TransactionState::Active,
            begun: false,
            operations: Vec::new(),
            checkpoints: HashMap::new(),
            tracked_paths: HashSet::new(),
            next_seq: 1,
            wal: None,
            snapshots: None,
            provider_error: None,
            reporter: Arc::new(SilentReporter),
            cancel: None,
            staging_phase_emitted: false,
        }
    }

    /// Reconstruct a transaction from WAL replay during crash recovery.
    /// `begun` is always true here — by definition a WAL file only
    /// exists once `begin()` has run.
    pub(crate) fn from_recovery(
        id: String,
        base_dir: PathBuf,
        created_at: DateTime<Utc>,
        state: TransactionState,
        operations: Vec<FileOperation>,
        tracked_paths: HashSet<PathBuf>,
        next_seq: u64,
        wal: Option<WriteAheadLog>,
        snapshots: Option<SnapshotStore>,
    ) -> Self {
        Self {
            id,
            plan_id: String::new(),
            branch: String::new(),
            base_dir,
            created_at,
            state,
            begun: true,
            operations,
            checkpoints: HashMap::new(),
            tracked_paths,
            next_seq,
            wal,
            snapshots,
            provider_error: None,
            reporter: Arc::new(SilentReporter),
            cancel: None,
            staging_phase_emitted: true,
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn PatchStatusReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn operations(&self) -> &[FileOperation] {
        &self.operations
    }

    pub fn checkpoint(&self, name: &str) -> Option<&TxCheckpoint> {
        self.checkpoints.get(name)
    }

    pub fn set_provider_error(&mut self, err: impl Into<String>) {
        self.provider_error = Some(err.into());
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
    }

    fn check_cancelled(&self, op: &str) -> Result<()> {
        if self.is_cancelled() {
            Err(Error::Cancelled(op.to_string()))
        } else {
            Ok(())
        }
    }

    fn emit_patch_event(&self, phase: PatchPhase) {
        self.reporter.on_patch_event(PatchEvent {
            tx_id: self.id.clone(),
            phase,
            message: None,
            timestamp: Utc::now(),
        });
    }

    fn emit_file_status(&self, path: &Path, phase: FilePhase, message: Option<String>) {
        self.reporter.on_file_status(FileStatus {
            tx_id: self.id.clone(),
            path: path.display().to_string(),
            phase,
            message,
            timestamp: Utc::now(),
        });
    }

    /// Create the snapshot + WAL directories and write the `tx_start`
    /// WAL entry. Rejects a second call on the same transaction.
    pub fn begin(&mut self) -> Result<()> {
        if self.begun {
            return Err(Error::invalid_state("not yet begun", "already begun"));
        }

        let config = TransactionConfig::new(self.base_dir.clone());
        let snapshot_dir = config.snapshot_dir(&self.id);
        let wal_dir = config.wal_dir();

        let snapshots = SnapshotStore::new(snapshot_dir)?;
        let mut wal = WriteAheadLog::create(&wal_dir, &self.id)?;
        wal.append(&self.id, WalEntryType::TxStart, None, None, None)?;

        self.snapshots = Some(snapshots);
        self.wal = Some(wal);
        self.begun = true;

        self.emit_patch_event(PatchPhase::Preparing);
        info!(tx_id = %self.id, "transaction begun");
        Ok(())
    }

    fn require_active(&self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(Error::invalid_state("active", format!("{:?}", self.state)));
        }
        if !self.begun {
            return Err(Error::invalid_state("begun", "not begun"));
        }
        Ok(())
    }

    fn wal_mut(&mut self) -> Result<&mut WriteAheadLog> {
        self.wal
            .as_mut()
            .ok_or_else(|| Error::invalid_state("begun", "not begun"))
    }

    fn snapshots_ref(&self) -> Result<&SnapshotStore> {
        self.snapshots
            .as_ref()
            .ok_or_else(|| Error::invalid_state("begun", "not begun"))
    }

    fn resolve(&self, rel: impl AsRef<str>) -> Result<PathBuf> {
        safe_join(&self.base_dir, rel)
    }

    fn stage(
        &mut self,
        kind: OperationKind,
        path: PathBuf,
        new_path: Option<PathBuf>,
        content: Option<Vec<u8>>,
    ) -> Result<u64> {
        self.require_active()?;

        if !self.staging_phase_emitted {
            self.emit_patch_event(PatchPhase::Staging);
            self.staging_phase_emitted = true;
        }

        self.snapshots_ref()?.capture(&path)?;
        self.tracked_paths.insert(path.clone());
        if let Some(np) = &new_path {
            self.snapshots_ref()?.capture(np)?;
            self.tracked_paths.insert(np.clone());
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        let content_hash = content.as_ref().map(|c| hash_bytes(c).to_string());
        let op = FileOperation {
            seq,
            kind,
            path: path.clone(),
            new_path: new_path.clone(),
            content,
            content_hash,
            status: OperationStatus::Pending,
            staged_at: Utc::now(),
            applied_at: None,
            error: None,
        };

        let tx_id = self.id.clone();
        self.wal_mut()?
            .append(&tx_id, WalEntryType::OpIntent, Some(op.to_record()), None, None)?;

        self.emit_file_status(&path, FilePhase::Staged, None);
        self.operations.push(op);
        Ok(seq)
    }

    pub fn create_file(&mut self, rel: impl AsRef<str>, content: Vec<u8>) -> Result<u64> {
        let path = self.resolve(rel)?;
        self.stage(OperationKind::Create, path, None, Some(content))
    }

    pub fn modify_file(&mut self, rel: impl AsRef<str>, content: Vec<u8>) -> Result<u64> {
        let path = self.resolve(rel)?;
        self.stage(OperationKind::Modify, path, None, Some(content))
    }

    pub fn delete_file(&mut self, rel: impl AsRef<str>) -> Result<u64> {
        let path = self.resolve(rel)?;
        self.stage(OperationKind::Delete, path, None, None)
    }

    pub fn rename_file(&mut self, old_rel: impl AsRef<str>, new_rel: impl AsRef<str>) -> Result<u64> {
        let old_path = self.resolve(old_rel)?;
        let new_path = self.resolve(new_rel)?;
        self.stage(OperationKind::Rename, old_path, Some(new_path), None)
    }

    /// Apply the lowest-sequence pending operation, if any.
    pub fn apply_next(&mut self) -> Result<Option<u64>> {
        self.require_active()?;
        self.check_cancelled("apply")?;

        let idx = self
            .operations
            .iter()
            .position(|op| op.status == OperationStatus::Pending);
        let Some(idx) = idx else {
            return Ok(None);
        };

        let (seq, kind, path, new_path, content) = {
            let op = &self.operations[idx];
            (op.seq, op.kind, op.path.clone(), op.new_path.clone(), op.content.clone())
        };

        self.emit_file_status(&path, FilePhase::Applying, None);

        let outcome = apply_mutation(kind, &path, new_path.as_deref(), content.as_deref());

        match outcome {
            Ok(()) => {
                let tx_id = self.id.clone();
                let record = self.operations[idx].to_record();
                self.wal_mut()?.append(
                    &tx_id,
                    WalEntryType::OpComplete,
                    Some(record),
                    None,
                    None,
                )?;
                let op = &mut self.operations[idx];
                op.status = OperationStatus::Applied;
                op.applied_at = Some(Utc::now());
                self.emit_file_status(&path, FilePhase::Applied, None);
                Ok(Some(seq))
            }
            Err(e) => {
                let op = &mut self.operations[idx];
                op.status = OperationStatus::Failed;
                op.error = Some(e.to_string());
                self.emit_file_status(&path, FilePhase::Failed, Some(e.to_string()));
                Err(Error::Io(e))
            }
        }
    }

    /// Apply every pending operation in order, stopping at the first
    /// error (the transaction stays active; the caller decides whether
    /// to roll back).
    pub fn apply_all(&mut self) -> Result<()> {
        self.emit_patch_event(PatchPhase::Applying);
        while self.apply_next()?.is_some() {}
        Ok(())
    }

    /// Commit: requires no operation left pending or failed.
    pub fn commit(&mut self) -> Result<()> {
        if self.state != TransactionState::Active {
            return Err(Error::invalid_state("active", format!("{:?}", self.state)));
        }
        if self
            .operations
            .iter()
            .any(|op| matches!(op.status, OperationStatus::Pending | OperationStatus::Failed))
        {
            return Err(Error::invalid_state(
                "no pending/failed operations",
                "pending or failed operations remain",
            ));
        }

        self.emit_patch_event(PatchPhase::Committing);

        let tx_id = self.id.clone();
        self.wal_mut()?.append(&tx_id, WalEntryType::TxCommit, None, None, None)?;
        self.state = TransactionState::Committed;

        if let Some(wal) = self.wal.take() {
            wal.delete()?;
        }
        if let Some(snapshots) = self.snapshots.take() {
            snapshots.clear()?;
        }

        self.emit_patch_event(PatchPhase::Done);
        info!(tx_id = %self.id, "transaction committed");
        Ok(())
    }

    /// Roll back: permitted from any non-committed state. Reverses
    /// applied operations in descending sequence order, best-effort —
    /// a failure reversing one operation is recorded but does not abort
    /// the loop.
    pub fn rollback(&mut self, reason: &str) -> Result<()> {
        if self.state == TransactionState::Committed {
            return Err(Error::invalid_state("not committed", "committed"));
        }

        self.emit_patch_event(PatchPhase::RollingBack);

        let tx_id = self.id.clone();
        self.wal_mut()?.append(
            &tx_id,
            WalEntryType::TxRollback,
            None,
            None,
            Some(StateChange {
                old_state: format!("{:?}", self.state),
                new_state: "RolledBack".to_string(),
                reason: Some(reason.to_string()),
            }),
        )?;

        let mut applied: Vec<usize> = self
            .operations
            .iter()
            .enumerate()
            .filter(|(_, op)| op.status == OperationStatus::Applied)
            .map(|(i, _)| i)
            .collect();
        applied.sort_by_key(|&i| std::cmp::Reverse(self.operations[i].seq));

        for idx in applied {
            let (seq, kind, path, new_path) = {
                let op = &self.operations[idx];
                (op.seq, op.kind, op.path.clone(), op.new_path.clone())
            };

            let result = reverse_operation(self.snapshots_ref()?, kind, &path, new_path.as_deref());

            match result {
                Ok(()) => {
                    let tx_id = self.id.clone();
                    let record = self.operations[idx].to_record();
                    if let Err(e) = self.wal_mut()?.append(
                        &tx_id,
                        WalEntryType::OpRollback,
                        Some(record),
                        None,
                        None,
                    ) {
                        warn!(seq, error = %e, "failed writing op_rollback WAL entry");
                    }
                    self.operations[idx].status = OperationStatus::RolledBack;
                }
                Err(e) => {
                    warn!(seq, error = %e, "best-effort rollback of operation failed");
                    self.operations[idx].error = Some(e.to_string());
                }
            }
        }

        self.state = TransactionState::RolledBack;

        if let Some(wal) = self.wal.take() {
            wal.delete()?;
        }
        if let Some(snapshots) = self.snapshots.take() {
            snapshots.clear()?;
        }

        self.emit_patch_event(PatchPhase::Done);
        info!(tx_id = %self.id, reason, "transaction rolled back");
        Ok(())
    }

    /// Snapshot current filesystem content for every tracked path, plus
    /// the list of applied operations so far.
    pub fn create_checkpoint(&mut self, name: impl Into<String>, description: Option<String>) -> Result<&TxCheckpoint> {
        self.require_active()?;
        let name = name.into();

        let after_op = self
            .operations
            .iter()
            .filter(|op| op.status == OperationStatus::Applied)
            .map(|op| op.seq)
            .max()
            .unwrap_or(0);
        let applied_ops: Vec<u64> = self
            .operations
            .iter()
            .filter(|op| op.status == OperationStatus::Applied)
            .map(|op| op.seq)
            .collect();

        let mut hashes = HashMap::new();
        let mut contents = HashMap::new();
        for path in &self.tracked_paths {
            if let Ok(content) = fs::read(path) {
                hashes.insert(path.clone(), hash_bytes(&content).to_string());
                contents.insert(path.clone(), content);
            }
        }

        let checkpoint = TxCheckpoint {
            name: name.clone(),
            description,
            created_at: Utc::now(),
            after_op,
            applied_ops,
            hashes,
            contents,
            journal_hash: None,
        };

        let tx_id = self.id.clone();
        self.wal_mut()?
            .append(&tx_id, WalEntryType::Checkpoint, None, Some(name.clone()), None)?;

        self.checkpoints.insert(name.clone(), checkpoint);
        Ok(self.checkpoints.get(&name).expect("just inserted"))
    }

    /// Reverse operations sequenced after the checkpoint, restoring
    /// each touched path to its checkpoint content (falling back to the
    /// transaction's original pre-image for paths not tracked at
    /// checkpoint time).
    pub fn rollback_to_checkpoint(&mut self, name: &str) -> Result<()> {
        self.require_active()?;
        let checkpoint = self
            .checkpoints
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownCheckpoint(name.to_string()))?;

        let tx_id = self.id.clone();
        self.wal_mut()?.append(
            &tx_id,
            WalEntryType::Checkpoint,
            None,
            Some(format!("rollback_to:{name}")),
            None,
        )?;

        let mut reversed: Vec<usize> = self
            .operations
            .iter()
            .enumerate()
            .filter(|(_, op)| op.status == OperationStatus::Applied && op.seq > checkpoint.after_op)
            .map(|(i, _)| i)
            .collect();
        reversed.sort_by_key(|&i| std::cmp::Reverse(self.operations[i].seq));

        for idx in reversed {
            let (seq, kind, path, new_path) = {
                let op = &self.operations[idx];
                (op.seq, op.kind, op.path.clone(), op.new_path.clone())
            };

            if kind == OperationKind::Rename {
                if let Some(np) = &new_path {
                    let _ = move_file_atomic(np, &path);
                }
            }

            let restore_path = new_path.as_ref().unwrap_or(&path);
            let result = if let Some(content) = checkpoint.content_for(restore_path) {
                write_content(restore_path, content)
            } else {
                self.snapshots_ref()?
                    .get(&path)
                    .and_then(|snap| match snap {
                        Some(s) => self.snapshots_ref()?.restore(&s),
                        None => Ok(()),
                    })
            };

            match result {
                Ok(()) => self.operations[idx].status = OperationStatus::RolledBack,
                Err(e) => {
                    warn!(seq, error = %e, "checkpoint rollback of operation failed");
                    self.operations[idx].error = Some(e.to_string());
                }
            }
        }

        Ok(())
    }
}

fn apply_mutation(
    kind: OperationKind,
    path: &Path,
    new_path: Option<&Path>,
    content: Option<&[u8]>,
) -> io::Result<()> {
    match kind {
        OperationKind::Create | OperationKind::Modify => {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::write(path, content.unwrap_or_default())
        }
        OperationKind::Delete => fs::remove_file(path),
        OperationKind::Rename => {
            let new_path = new_path.ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, "rename missing destination")
            })?;
            if let Some(parent) = new_path.parent() {
                fs::create_dir_all(parent)?;
            }
            move_file_atomic(path, new_path)
        }
    }
}

fn reverse_operation(
    snapshots: &SnapshotStore,
    kind: OperationKind,
    path: &Path,
    new_path: Option<&Path>,
) -> Result<()> {
    match kind {
        OperationKind::Create | OperationKind::Modify | OperationKind::Delete => {
            if let Some(snap) = snapshots.get(path)? {
                snapshots.restore(&snap)?;
            }
            Ok(())
        }
        OperationKind::Rename => {
            let new_path = new_path.ok_or_else(|| {
                Error::invalid_state("rename operation with destination", "missing destination")
            })?;
            if new_path.exists() {
                move_file_atomic(new_path, path)?;
            }
            if let Some(dest_snap) = snapshots.get(new_path)? {
                if dest_snap.meta.existed {
                    snapshots.restore(&dest_snap)?;
                }
            }
            Ok(())
        }
    }
}

fn write_content(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, content)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TransactionConfig) {
        let dir = TempDir::new().unwrap();
        let config = TransactionConfig::new(dir.path().to_path_buf());
        (dir, config)
    }

    #[test]
    fn happy_path_create_and_modify_then_commit() {
        let (dir, config) = setup();
        fs::write(dir.path().join("a.go"), "a").unwrap();

        let mut tx = Transaction::new(&config, "plan1", "main");
        tx.begin().unwrap();
        tx.create_file("new.go", b"x".to_vec()).unwrap();
        tx.modify_file("a.go", b"y".to_vec()).unwrap();
        tx.apply_all().unwrap();
        tx.commit().unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("new.go")).unwrap(), "x");
        assert_eq!(fs::read_to_string(dir.path().join("a.go")).unwrap(), "y");
        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(!config.snapshot_dir(tx.id()).exists());
        assert!(!config.wal_dir().join(format!("{}.wal", tx.id())).exists());
    }

    #[test]
    fn partial_failure_rolls_back_fully() {
        let (dir, config) = setup();
        fs::write(dir.path().join("a"), "A").unwrap();
        fs::write(dir.path().join("b"), "B").unwrap();
        fs::create_dir(dir.path().join("sub")).unwrap();

        let mut tx = Transaction::new(&config, "plan1", "main");
        tx.begin().unwrap();
        tx.modify_file("a", b"A1".to_vec()).unwrap();
        tx.modify_file("b", b"B1".to_vec()).unwrap();
        tx.create_file("sub/c", b"C".to_vec()).unwrap();

        // Make sub/ non-writable so staging the third apply fails.
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir.path().join("sub"), fs::Permissions::from_mode(0o555)).unwrap();
        }

        tx.apply_next().unwrap();
        tx.apply_next().unwrap();
        #[cfg(unix)]
        {
            let err = tx.apply_next();
            assert!(err.is_err());
        }

        tx.rollback("c failed").unwrap();

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(dir.path().join("sub"), fs::Permissions::from_mode(0o755)).unwrap();
        }

        assert_eq!(fs::read_to_string(dir.path().join("a")).unwrap(), "A");
        assert_eq!(fs::read_to_string(dir.path().join("b")).unwrap(), "B");
        assert!(!dir.path().join("sub/c").exists());
        assert_eq!(tx.state(), TransactionState::RolledBack);
    }

    #[test]
    fn single_snapshot_per_path() {
        let (dir, config) = setup();
        fs::write(dir.path().join("v"), "v0").unwrap();

        let mut tx = Transaction::new(&config, "plan1", "main");
        tx.begin().unwrap();
        tx.modify_file("v", b"v1".to_vec()).unwrap();
        tx.modify_file("v", b"v2".to_vec()).unwrap();
        tx.modify_file("v", b"v3".to_vec()).unwrap();

        let path = dir.path().join("v");
        let snap = tx.snapshots_ref().unwrap().get(&path).unwrap().unwrap();
        assert_eq!(snap.content.as_deref(), Some(b"v0".as_slice()));

        tx.apply_all().unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "v3");

        tx.rollback("undo").unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "v0");
    }

    #[test]
    fn checkpoint_rollback_restores_only_later_ops() {
        let (dir, config) = setup();
        fs::write(dir.path().join("a"), "a0").unwrap();
        fs::write(dir.path().join("b"), "b0").unwrap();
        fs::write(dir.path().join("c"), "c0").unwrap();

        let mut tx = Transaction::new(&config, "plan1", "main");
        tx.begin().unwrap();

        tx.modify_file("a", b"a1".to_vec()).unwrap();
        tx.apply_next().unwrap();
        tx.modify_file("b", b"b1".to_vec()).unwrap();
        tx.apply_next().unwrap();

        tx.create_checkpoint("AB", None).unwrap();

        tx.modify_file("c", b"c1".to_vec()).unwrap();
        tx.apply_next().unwrap();

        tx.rollback_to_checkpoint("AB").unwrap();

        assert_eq!(fs::read_to_string(dir.path().join("a")).unwrap(), "a1");
        assert_eq!(fs::read_to_string(dir.path().join("b")).unwrap(), "b1");
        assert_eq!(fs::read_to_string(dir.path().join("c")).unwrap(), "c0");
    }

    #[test]
    fn commit_requires_no_pending_or_failed_operations() {
        let (dir, config) = setup();
        let _ = &dir;
        let mut tx = Transaction::new(&config, "plan1", "main");
        tx.begin().unwrap();
        tx.create_file("x", b"1".to_vec()).unwrap();
        assert!(tx.commit().is_err());
    }

    #[test]
    fn rollback_after_commit_is_an_error() {
        let (dir, config) = setup();
        let _ = &dir;
        let mut tx = Transaction::new(&config, "plan1", "main");
        tx.begin().unwrap();
        tx.create_file("x", b"1".to_vec()).unwrap();
        tx.apply_all().unwrap();
        tx.commit().unwrap();
        assert!(tx.rollback("too late").is_err());
    }

    #[test]
    fn commit_after_rollback_is_an_error() {
        let (dir, config) = setup();
        let _ = &dir;
        let mut tx = Transaction::new(&config, "plan1", "main");
        tx.begin().unwrap();
        tx.create_file("x", b"1".to_vec()).unwrap();
        tx.apply_all().unwrap();
        tx.rollback("reason").unwrap();
        assert!(tx.commit().is_err());
    }

    #[test]
    fn begin_twice_is_rejected() {
        let (dir, config) = setup();
        let _ = &dir;
        let mut tx = Transaction::new(&config, "plan1", "main");
        tx.begin().unwrap();
        assert!(tx.begin().is_err());
    }
}
