// src/fte/checkpoint.rs

//! Named, in-transaction recovery points.
//!
//! A `TxCheckpoint` captures full file *content*, not just hashes — that
//! is what lets `rollback_to_checkpoint` restore exactly what the tree
//! looked like at that point, as opposed to full `rollback`, which only
//! ever has the pre-transaction snapshot to fall back on.

use std::collections::HashMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxCheckpoint {
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    /// Highest applied operation sequence number at checkpoint time.
    pub after_op: u64,
    /// Sequence numbers of operations applied as of this checkpoint.
    pub applied_ops: Vec<u64>,
    /// Content hash of every tracked path as of this checkpoint.
    pub hashes: HashMap<PathBuf, String>,
    /// Full content of every tracked path as of this checkpoint.
    pub contents: HashMap<PathBuf, Vec<u8>>,
    /// Correlated Run Journal hash at the moment this checkpoint was
    /// taken, if the driver created both checkpoints together.
    pub journal_hash: Option<String>,
}

impl TxCheckpoint {
    pub fn content_for(&self, path: &PathBuf) -> Option<&[u8]> {
        self.contents.get(path).map(|v| v.as_slice())
    }
}
