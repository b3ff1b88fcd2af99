// src/wal.rs

//! Write-ahead log for the File Transaction Engine.
//!
//! One file per transaction at `<baseDir>/.plandex/wal/<txId>.wal`:
//! line-delimited JSON, UTF-8, no BOM, one `WalEntry` per line. Every
//! append is immediately fsynced — the WAL is the durability boundary
//! the whole FTE stands on, so unlike the run journal (which only needs
//! to be flushed at checkpoints) there is no buffered-write fast path
//! here at all.
//!
//! Malformed lines are skipped on replay rather than aborting the whole
//! read: a line is only ever malformed because a crash truncated it
//! mid-write, and it is always the last line.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::fte::{OperationKind, OperationStatus};

/// The WAL-level record of a staged operation. Deliberately its own type
/// rather than a reuse of the live `FileOperation` — the WAL payload is a
/// durable snapshot of intent, not a handle into the running transaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationRecord {
    pub seq: u64,
    pub kind: OperationKind,
    pub path: PathBuf,
    pub new_path: Option<PathBuf>,
    pub content_hash: Option<String>,
    pub status: OperationStatus,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChange {
    pub old_state: String,
    pub new_state: String,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WalEntryType {
    TxStart,
    OpIntent,
    OpComplete,
    OpRollback,
    Checkpoint,
    TxCommit,
    TxRollback,
    TxFailed,
}

/// One line of the WAL. Field order matches (`seq`, `timestamp`,
/// `txId`, `entryType`, ...) so a human tailing the file sees it in a
/// stable order; this has no effect on parsing, which is by key.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalEntry {
    pub seq: u64,
    pub timestamp: DateTime<Utc>,
    pub tx_id: String,
    pub entry_type: WalEntryType,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<OperationRecord>,
    #[serde(rename = "checkpoint", skip_serializing_if = "Option::is_none")]
    pub checkpoint_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub state_change: Option<StateChange>,
}

impl WalEntry {
    pub fn is_barrier(&self) -> bool {
        matches!(
            self.entry_type,
            WalEntryType::TxStart
                | WalEntryType::TxCommit
                | WalEntryType::TxRollback
                | WalEntryType::TxFailed
        )
    }
}

/// Append-only writer/reader over a single transaction's WAL file.
pub struct WriteAheadLog {
    path: PathBuf,
    file: File,
    next_seq: u64,
}

impl WriteAheadLog {
    /// Create a fresh WAL file at `dir/<tx_id>.wal`, truncating any
    /// leftover file from a previous run with the same id.
    pub fn create(dir: &Path, tx_id: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{tx_id}.wal"));
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            path,
            file,
            next_seq: 1,
        })
    }

    /// Open an existing WAL file for recovery, without truncating it.
    pub fn open_for_recovery(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().read(true).append(true).open(path)?;
        let entries = read_entries(path)?;
        let next_seq = entries.last().map(|e| e.seq + 1).unwrap_or(1);
        Ok(Self {
            path: path.to_path_buf(),
            file,
            next_seq,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one entry and fsync before returning. Every WAL write goes
    /// through this path — there is no non-fsyncing append.
    pub fn append(
        &mut self,
        tx_id: &str,
        entry_type: WalEntryType,
        operation: Option<OperationRecord>,
        checkpoint_name: Option<String>,
        state_change: Option<StateChange>,
    ) -> Result<u64> {
        let seq = self.next_seq;
        let entry = WalEntry {
            seq,
            timestamp: Utc::now(),
            tx_id: tx_id.to_string(),
            entry_type,
            operation,
            checkpoint_name,
            state_change,
        };
        let line = serde_json::to_string(&entry)?;
        self.file.write_all(line.as_bytes())?;
        self.file.write_all(b"\n")?;
        self.file.sync_all()?;
        self.next_seq += 1;
        Ok(seq)
    }

    /// Read every well-formed entry, in file order, skipping malformed
    /// (truncated) trailing lines.
    pub fn read_all(&self) -> Result<Vec<WalEntry>> {
        read_entries(&self.path)
    }

    /// Remove the WAL file. Called on commit and on successful rollback.
    pub fn delete(self) -> Result<()> {
        if self.path.exists() {
            fs::remove_file(&self.path)?;
        }
        Ok(())
    }
}

fn read_entries(path: &Path) -> Result<Vec<WalEntry>> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let file = File::open(path)?;
    let reader = BufReader::new(file);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = match line {
            Ok(l) => l,
            Err(_) => break,
        };
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<WalEntry>(&line) {
            Ok(entry) => entries.push(entry),
            Err(_) => break,
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn append_and_read_round_trip() {
        let dir = TempDir::new().unwrap();
        let mut wal = WriteAheadLog::create(dir.path(), "abc123").unwrap();
        wal.append("abc123", WalEntryType::TxStart, None, None, None)
            .unwrap();
        wal.append(
            "abc123",
            WalEntryType::OpIntent,
            Some(OperationRecord {
                seq: 1,
                kind: OperationKind::Create,
                path: PathBuf::from("a.txt"),
                new_path: None,
                content_hash: Some("deadbeef".into()),
                status: OperationStatus::Pending,
            }),
            None,
            None,
        )
        .unwrap();

        let entries = wal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].seq, 1);
        assert_eq!(entries[1].seq, 2);
        assert!(entries[0].is_barrier());
        assert!(!entries[1].is_barrier());
    }

    #[test]
    fn malformed_trailing_line_is_skipped() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("trunc.wal");
        fs::write(
            &path,
            "{\"seq\":1,\"timestamp\":\"2024-01-01T00:00:00Z\",\"txId\":\"x\",\"entryType\":\"tx_start\"}\n{\"seq\":2,\"timest",
        )
        .unwrap();
        let entries = read_entries(&path).unwrap();
        assert_eq!(entries.len(), 1);
    }

    #[test]
    fn recovery_continues_sequence_numbering() {
        let dir = TempDir::new().unwrap();
        {
            let mut wal = WriteAheadLog::create(dir.path(), "tx1").unwrap();
            wal.append("tx1", WalEntryType::TxStart, None, None, None)
                .unwrap();
        }
        let path = dir.path().join("tx1.wal");
        let mut reopened = WriteAheadLog::open_for_recovery(&path).unwrap();
        let seq = reopened
            .append("tx1", WalEntryType::TxCommit, None, None, None)
            .unwrap();
        assert_eq!(seq, 2);
    }

    #[test]
    fn delete_removes_file() {
        let dir = TempDir::new().unwrap();
        let wal = WriteAheadLog::create(dir.path(), "tx2").unwrap();
        let path = wal.path().to_path_buf();
        assert!(path.exists());
        wal.delete().unwrap();
        assert!(!path.exists());
    }
}
