// src/error.rs

//! Crate-wide error type.
//!
//! One enum covers every fallible surface in the crate — FTE, WAL,
//! snapshots, the run journal and the retry controller all return
//! [`Result`]. Callers that need to branch on failure kind match on
//! [`Error`] directly; callers that just want to propagate use `?`.

use std::path::PathBuf;
use thiserror::Error;

use crate::registry::UnrecoverableError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("path escapes project root: {0}")]
    PathTraversal(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid state: expected {expected}, found {found}")]
    InvalidState { expected: String, found: String },

    #[error("unknown checkpoint: {0}")]
    UnknownCheckpoint(String),

    #[error("snapshot missing for {path}")]
    SnapshotMissing { path: PathBuf },

    #[error("journal integrity check failed: expected hash {expected}, found {found}")]
    JournalIntegrity { expected: String, found: String },

    #[error("WAL corrupt: {0}")]
    WalCorrupt(String),

    #[error("operation cancelled: {0}")]
    Cancelled(String),

    #[error("unrecoverable: {0}")]
    Unrecoverable(Box<UnrecoverableError>),
}

impl Error {
    pub fn invalid_state(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Self::InvalidState {
            expected: expected.into(),
            found: found.into(),
        }
    }
}

impl From<UnrecoverableError> for Error {
    fn from(e: UnrecoverableError) -> Self {
        Self::Unrecoverable(Box::new(e))
    }
}
