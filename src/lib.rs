// src/lib.rs

//! patchtx: the execution-recovery core of an AI-assisted code-modification
//! tool.
//!
//! Three tightly coupled subsystems:
//!
//! - [`fte`] — the File Transaction Engine: ACID-style staging, apply,
//!   snapshot, checkpoint, commit and rollback over an on-disk tree,
//!   backed by a write-ahead log and persisted snapshots.
//! - [`journal`] — the Run Journal: an append-only, hash-chained record
//!   of every non-deterministic step a run takes, with named recovery
//!   points.
//! - [`retry`] — the Retry & Recovery Controller: a policy-driven retry
//!   loop that classifies provider failures, enforces operation-safety
//!   constraints, and detects unrecoverable conditions.
//!
//! [`resume`] ties checkpoint selection, journal verification and file
//! divergence repair together for resuming an interrupted run.
//! [`reporter`] is the observability capability the FTE drives
//! synchronously as it moves through its lifecycle. [`registry`] is the
//! process-wide sink classified failures finalise into.

pub mod env;
mod error;
pub mod fte;
pub mod hash;
pub mod journal;
pub mod path;
pub mod registry;
pub mod reporter;
pub mod resume;
pub mod retry;
pub mod snapshot;
pub mod wal;

pub use error::{Error, Result};

pub use fte::{
    recover, FileOperation, OperationKind, OperationStatus, RecoveryOutcome, Transaction, TransactionConfig, TransactionState, TxCheckpoint,
};

pub use journal::{EntryError, EntryPayload, EntryStatus, EntryType, JournalCheckpoint, JournalHeader, JournalState, JournalStatus, RunJournal};

pub use retry::{
    classify, compute_delay, CallFailure, CheckOutcome, FailureCategory, FailureType, FileChangeRecord, IdempotencyManager,
    IdempotencyRecord, IdempotencyStats, IdempotencyStatus, OperationSafety, ProviderFailure, RetryAttempt, RetryConfig, RetryController,
    RetryOutcome, RetryStrategy,
};

pub use registry::{ErrorRegistry, ErrorReport, UnrecoverableError, UnrecoverableKind};

pub use reporter::{CollectingReporter, FilePhase, FileStatus, PatchEvent, PatchPhase, PatchStatusReporter, SilentReporter};

pub use resume::{Divergence, DivergenceKind, ResumeOptions, ValidationReport};

pub use hash::{hash_bytes, hash_str, Hash, Hasher};

pub use snapshot::{FileSnapshot, SnapshotMeta, SnapshotStore};

pub use wal::{OperationRecord, StateChange, WalEntry, WalEntryType, WriteAheadLog};
