// src/journal/mod.rs

//! Run Journal: an append-only, hash-chained record of every
//! non-deterministic step a run takes — user prompts, model responses,
//! file operations, retries, checkpoints — so an interrupted run can be
//! resumed or replayed deterministically.
//!
//! Entries only ever grow at the tail; existing entries are mutated
//! in place (status, timing, error) but never reordered or removed.
//! Checkpoints hold *copies* of journal state, never references, so a
//! journal and its checkpoints can't form an ownership cycle.

pub mod canonical;

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::hash::Hash;
use canonical::{canonical_json, rfc3339_z};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryType {
    UserPrompt,
    ModelRequest,
    ModelResponse,
    FileBuild,
    FileWrite,
    FileDelete,
    FileMove,
    ContextLoad,
    UserDecision,
    SubtaskStart,
    SubtaskComplete,
    Checkpoint,
    Error,
    RetryAttempt,
    RetryExhaust,
    CircuitEvent,
    FallbackEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Blocked,
}

/// Typed payload, discriminated by `entry_type` at the call site rather
/// than by its own tag — a sum type, not a polymorphic hierarchy (§9).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EntryPayload {
    UserPrompt { text: String },
    ModelRequest { provider: String, model: String },
    ModelResponse { provider: String, model: String, content_hash: Option<String> },
    FileBuild { path: PathBuf },
    FileWrite { path: PathBuf, content_hash: String },
    FileDelete { path: PathBuf },
    FileMove { from: PathBuf, to: PathBuf },
    ContextLoad { source: String },
    UserDecision { prompt: String, choice: String },
    Subtask { name: String },
    Checkpoint { name: String },
    Error { message: String },
    RetryAttempt { attempt: u32, failure_type: String, succeeded: bool },
    RetryExhaust { attempts: u32, failure_type: String },
    CircuitEvent { provider: String, state: String },
    FallbackEvent { from_provider: String, to_provider: String },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryError {
    pub message: String,
    pub kind: Option<String>,
}

/// Drivers wrap their own fallible steps (context loading, subtask
/// execution) in `anyhow`; this is the one conversion edge between that
/// driver-side `anyhow::Error` and the journal's own typed `EntryError`.
impl From<anyhow::Error> for EntryError {
    fn from(err: anyhow::Error) -> Self {
        Self {
            message: err.to_string(),
            kind: err.chain().nth(1).map(|_| "chained".to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    pub index: usize,
    pub id: Uuid,
    #[serde(with = "rfc3339_z")]
    pub timestamp: DateTime<Utc>,
    pub entry_type: EntryType,
    pub status: EntryStatus,
    #[serde(with = "rfc3339_z::option")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(with = "rfc3339_z::option")]
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub payload: EntryPayload,
    pub input_hash: Option<String>,
    pub depends_on: Vec<usize>,
    pub error: Option<EntryError>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalStatus {
    Recording,
    Paused,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalHeader {
    pub plan_id: String,
    pub branch: String,
    pub org: String,
    pub user: String,
    pub initial_prompt: String,
    #[serde(with = "rfc3339_z")]
    pub created_at: DateTime<Utc>,
}

/// Top-level journal state. This is the value type a [`JournalCheckpoint`]
/// copies wholesale — a checkpoint owns a snapshot of this, never a
/// reference to the live journal's state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalState {
    pub status: JournalStatus,
    pub cursor: usize,
    #[serde(with = "rfc3339_z::option")]
    pub paused_at: Option<DateTime<Utc>>,
    pub resume_count: u32,
    pub last_error: Option<EntryError>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalCheckpoint {
    pub name: String,
    pub description: Option<String>,
    pub auto: bool,
    #[serde(with = "rfc3339_z")]
    pub created_at: DateTime<Utc>,
    pub entry_index: usize,
    pub journal_hash: String,
    pub file_hashes: HashMap<PathBuf, String>,
    pub file_contents: Option<HashMap<PathBuf, Vec<u8>>>,
    pub state_snapshot: JournalState,
}

/// Append-only run journal. Hash-chained via [`RunJournal::hash_up_to`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunJournal {
    pub header: JournalHeader,
    pub state: JournalState,
    pub entries: Vec<JournalEntry>,
    pub checkpoints: HashMap<String, JournalCheckpoint>,
    pub skip_list: HashSet<usize>,
    pub file_states: HashMap<PathBuf, String>,
}

impl RunJournal {
    pub fn new(
        plan_id: impl Into<String>,
        branch: impl Into<String>,
        org: impl Into<String>,
        user: impl Into<String>,
        initial_prompt: impl Into<String>,
    ) -> Self {
        Self {
            header: JournalHeader {
                plan_id: plan_id.into(),
                branch: branch.into(),
                org: org.into(),
                user: user.into(),
                initial_prompt: initial_prompt.into(),
                created_at: Utc::now(),
            },
            state: JournalState {
                status: JournalStatus::Recording,
                cursor: 0,
                paused_at: None,
                resume_count: 0,
                last_error: None,
            },
            entries: Vec::new(),
            checkpoints: HashMap::new(),
            skip_list: HashSet::new(),
            file_states: HashMap::new(),
        }
    }

    /// Append a pending entry and return its (stable) index. The only
    /// way to extend the log.
    pub fn append(&mut self, entry_type: EntryType, payload: EntryPayload) -> usize {
        self.append_with(entry_type, payload, None, Vec::new())
    }

    pub fn append_with(
        &mut self,
        entry_type: EntryType,
        payload: EntryPayload,
        input_hash: Option<String>,
        depends_on: Vec<usize>,
    ) -> usize {
        let index = self.entries.len();
        self.entries.push(JournalEntry {
            index,
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            entry_type,
            status: EntryStatus::Pending,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            payload,
            input_hash,
            depends_on,
            error: None,
        });
        index
    }

    fn entry_mut(&mut self, index: usize) -> Result<&mut JournalEntry> {
        self.entries
            .get_mut(index)
            .ok_or_else(|| Error::invalid_state("existing entry index", format!("index {index} out of range")))
    }

    pub fn start(&mut self, index: usize) -> Result<()> {
        let now = Utc::now();
        let entry = self.entry_mut(index)?;
        if !matches!(entry.status, EntryStatus::Pending | EntryStatus::Blocked) {
            return Err(Error::invalid_state(
                "pending or blocked",
                format!("{:?}", entry.status),
            ));
        }
        entry.status = EntryStatus::Running;
        entry.started_at = Some(now);
        self.state.cursor = index;
        Ok(())
    }

    pub fn complete(&mut self, index: usize) -> Result<()> {
        let now = Utc::now();
        let entry = self.entry_mut(index)?;
        entry.status = EntryStatus::Completed;
        entry.completed_at = Some(now);
        entry.duration_ms = entry.started_at.map(|s| (now - s).num_milliseconds());
        self.state.cursor = index + 1;
        Ok(())
    }

    pub fn fail(&mut self, index: usize, err: EntryError) -> Result<()> {
        let now = Utc::now();
        let entry = self.entry_mut(index)?;
        entry.status = EntryStatus::Failed;
        entry.completed_at = Some(now);
        entry.duration_ms = entry.started_at.map(|s| (now - s).num_milliseconds());
        entry.error = Some(err.clone());
        self.state.cursor = index + 1;
        self.state.last_error = Some(err);
        Ok(())
    }

    pub fn skip(&mut self, index: usize, reason: impl Into<String>) -> Result<()> {
        self.skip_range(index, index + 1, reason)
    }

    /// Mark `[start, end)` as skipped. Completed entries in the range
    /// reject the whole call — a completed step already happened and
    /// cannot be retroactively skipped.
    pub fn skip_range(&mut self, start: usize, end: usize, reason: impl Into<String>) -> Result<()> {
        let reason = reason.into();
        for i in start..end {
            let entry = self.entry_mut(i)?;
            if entry.status == EntryStatus::Completed {
                return Err(Error::invalid_state(
                    "not completed",
                    format!("entry {i} already completed, cannot skip"),
                ));
            }
        }
        for i in start..end {
            let entry = self.entry_mut(i)?;
            entry.status = EntryStatus::Skipped;
            entry.error = Some(EntryError { message: reason.clone(), kind: Some("skipped".into()) });
            self.skip_list.insert(i);
        }
        Ok(())
    }

    pub fn unskip(&mut self, index: usize) -> Result<()> {
        self.skip_list.remove(&index);
        let entry = self.entry_mut(index)?;
        if entry.status == EntryStatus::Skipped {
            entry.status = EntryStatus::Pending;
            entry.error = None;
        }
        Ok(())
    }

    /// Pause recording. Auto-creates a checkpoint named `pause_<cursor>`
    /// so the exact point of interruption is always recoverable.
    pub fn pause(&mut self, reason: impl Into<String>) -> Result<String> {
        if self.state.status == JournalStatus::Paused {
            return Err(Error::invalid_state("recording", "already paused"));
        }
        let reason = reason.into();
        self.state.status = JournalStatus::Paused;
        self.state.paused_at = Some(Utc::now());
        let name = format!("pause_{}", self.state.cursor);
        self.create_checkpoint(name.clone(), Some(reason), true)?;
        Ok(name)
    }

    pub fn resume(&mut self) -> Result<()> {
        if self.state.status != JournalStatus::Paused {
            return Err(Error::invalid_state("paused", "recording"));
        }
        self.state.status = JournalStatus::Recording;
        self.state.paused_at = None;
        Ok(())
    }

    /// Restore state from a named checkpoint, overwriting the current
    /// state snapshot wholesale — the checkpoint holds a value, not a
    /// reference, so this is a plain clone-and-replace.
    pub fn resume_from(&mut self, name: &str) -> Result<()> {
        let checkpoint = self
            .checkpoints
            .get(name)
            .ok_or_else(|| Error::UnknownCheckpoint(name.to_string()))?;
        self.state = checkpoint.state_snapshot.clone();
        self.state.status = JournalStatus::Recording;
        Ok(())
    }

    /// Re-mark `[index, end)` pending, except entries that are skipped
    /// or already completed, and bump the resume counter.
    pub fn resume_from_entry(&mut self, index: usize) -> Result<()> {
        let len = self.entries.len();
        for i in index..len {
            if self.skip_list.contains(&i) {
                continue;
            }
            let entry = &mut self.entries[i];
            if entry.status == EntryStatus::Completed {
                continue;
            }
            entry.status = EntryStatus::Pending;
            entry.started_at = None;
            entry.completed_at = None;
            entry.duration_ms = None;
            entry.error = None;
        }
        self.state.cursor = index;
        self.state.status = JournalStatus::Recording;
        self.state.resume_count += 1;
        Ok(())
    }

    /// Record the last known on-disk hash of `path`, so resume's file
    /// validation can include paths this journal has touched even when
    /// they weren't part of the checkpoint that's being restored to.
    pub fn record_file_state(&mut self, path: PathBuf, hash: String) {
        self.file_states.insert(path, hash);
    }

    /// SHA-256 of the concatenated canonical JSON of entries `[0, i)`.
    /// Prefix-stable: hashing the first `i` entries of a longer journal
    /// yields the same digest as hashing a journal truncated to `i`
    /// entries, since the hash never depends on anything past index `i`.
    pub fn hash_up_to(&self, i: usize) -> Result<Hash> {
        let mut hasher = crate::hash::Hasher::new();
        for entry in self.entries.iter().take(i) {
            let encoded = canonical_json(entry)?;
            hasher.update(encoded.as_bytes());
        }
        Ok(hasher.finalize())
    }

    pub fn create_checkpoint(
        &mut self,
        name: impl Into<String>,
        description: Option<String>,
        auto: bool,
    ) -> Result<usize> {
        let name = name.into();
        let journal_hash = self.hash_up_to(self.state.cursor)?.to_string();

        let checkpoint = JournalCheckpoint {
            name: name.clone(),
            description,
            auto,
            created_at: Utc::now(),
            entry_index: self.state.cursor,
            journal_hash,
            file_hashes: self.file_states.clone(),
            file_contents: None,
            state_snapshot: self.state.clone(),
        };
        self.checkpoints.insert(name.clone(), checkpoint);

        let index = self.append(EntryType::Checkpoint, EntryPayload::Checkpoint { name });
        self.auto_complete(index, true, None);
        Ok(index)
    }

    /// Most recently created checkpoint, breaking ties on an identical
    /// `created_at` by lexicographically descending checkpoint name.
    pub fn latest_checkpoint(&self) -> Option<&JournalCheckpoint> {
        self.checkpoints.values().max_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.name.cmp(&b.name))
        })
    }

    /// The most recent checkpoint whose preceding entries are all
    /// completed — none failed, pending or running.
    pub fn latest_good_checkpoint(&self) -> Option<&JournalCheckpoint> {
        let mut good: Vec<&JournalCheckpoint> = self
            .checkpoints
            .values()
            .filter(|cp| {
                self.entries[..cp.entry_index.min(self.entries.len())]
                    .iter()
                    .all(|e| matches!(e.status, EntryStatus::Completed | EntryStatus::Skipped))
            })
            .collect();
        good.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.name.cmp(&b.name)));
        good.into_iter().last()
    }

    fn auto_complete(&mut self, index: usize, succeeded: bool, failure_message: Option<String>) {
        if succeeded {
            let _ = self.complete(index);
        } else {
            let _ = self.fail(
                index,
                EntryError {
                    message: failure_message.unwrap_or_default(),
                    kind: Some("retry".into()),
                },
            );
        }
    }

    /// Retry-event appenders are auto-completing: the journal doesn't
    /// model them as long-running work, it adds and immediately
    /// transitions the entry.
    pub fn append_retry_attempt(&mut self, attempt: u32, failure_type: &str, succeeded: bool) -> usize {
        let index = self.append(
            EntryType::RetryAttempt,
            EntryPayload::RetryAttempt { attempt, failure_type: failure_type.to_string(), succeeded },
        );
        self.auto_complete(
            index,
            succeeded,
            Some(format!("attempt {attempt} failed: {failure_type}")),
        );
        index
    }

    pub fn append_retry_exhaust(&mut self, attempts: u32, failure_type: &str) -> usize {
        let index = self.append(
            EntryType::RetryExhaust,
            EntryPayload::RetryExhaust { attempts, failure_type: failure_type.to_string() },
        );
        self.auto_complete(index, false, Some(format!("exhausted after {attempts} attempts")));
        index
    }

    pub fn append_circuit_event(&mut self, provider: &str, state: &str) -> usize {
        let index = self.append(
            EntryType::CircuitEvent,
            EntryPayload::CircuitEvent { provider: provider.to_string(), state: state.to_string() },
        );
        self.auto_complete(index, true, None);
        index
    }

    pub fn append_fallback_event(&mut self, from_provider: &str, to_provider: &str) -> usize {
        let index = self.append(
            EntryType::FallbackEvent,
            EntryPayload::FallbackEvent {
                from_provider: from_provider.to_string(),
                to_provider: to_provider.to_string(),
            },
        );
        self.auto_complete(index, true, None);
        index
    }

    /// Serialize to the journal file's wire format: a single JSON
    /// document with keys `header`, `state`, `entries`, `checkpoints`,
    /// `skipList`, `fileStates`.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(s: &str) -> Result<Self> {
        Ok(serde_json::from_str(s)?)
    }

    /// Write the journal file, fsyncing before returning — the journal
    /// is read back on resume, so a torn write there is as dangerous as
    /// a torn WAL write.
    pub fn save(&self, path: &std::path::Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = self.to_json()?;
        let file = std::fs::File::create(path)?;
        let mut writer = std::io::BufWriter::new(file);
        std::io::Write::write_all(&mut writer, json.as_bytes())?;
        std::io::Write::flush(&mut writer)?;
        writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
        Ok(())
    }

    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn prompt_journal() -> RunJournal {
        RunJournal::new("plan1", "main", "acme", "alice", "do the thing")
    }

    #[test]
    fn entry_error_from_anyhow_keeps_the_root_message() {
        let err = anyhow::anyhow!("context load failed").context("loading src/lib.rs");
        let entry_error: EntryError = err.into();
        assert!(entry_error.message.contains("context load failed"));
        assert_eq!(entry_error.kind.as_deref(), Some("chained"));
    }

    #[test]
    fn append_start_complete_advances_cursor() {
        let mut j = prompt_journal();
        let i = j.append(EntryType::UserPrompt, EntryPayload::UserPrompt { text: "hi".into() });
        assert_eq!(j.entries[i].status, EntryStatus::Pending);

        j.start(i).unwrap();
        assert_eq!(j.entries[i].status, EntryStatus::Running);

        j.complete(i).unwrap();
        assert_eq!(j.entries[i].status, EntryStatus::Completed);
        assert_eq!(j.state.cursor, i + 1);
        assert!(j.entries[i].duration_ms.is_some());
    }

    #[test]
    fn completed_entries_cannot_be_skipped() {
        let mut j = prompt_journal();
        let i = j.append(EntryType::FileWrite, EntryPayload::FileWrite { path: "a".into(), content_hash: "h".into() });
        j.start(i).unwrap();
        j.complete(i).unwrap();
        assert!(j.skip(i, "too late").is_err());
    }

    #[test]
    fn skip_range_then_unskip() {
        let mut j = prompt_journal();
        let a = j.append(EntryType::FileWrite, EntryPayload::FileWrite { path: "a".into(), content_hash: "h".into() });
        let b = j.append(EntryType::FileWrite, EntryPayload::FileWrite { path: "b".into(), content_hash: "h".into() });
        j.skip_range(a, b + 1, "not needed").unwrap();
        assert_eq!(j.entries[a].status, EntryStatus::Skipped);
        assert_eq!(j.entries[b].status, EntryStatus::Skipped);

        j.unskip(a).unwrap();
        assert_eq!(j.entries[a].status, EntryStatus::Pending);
        assert!(!j.skip_list.contains(&a));
    }

    #[test]
    fn pause_auto_creates_checkpoint_and_resume_clears_it() {
        let mut j = prompt_journal();
        let i = j.append(EntryType::UserPrompt, EntryPayload::UserPrompt { text: "hi".into() });
        j.start(i).unwrap();
        j.complete(i).unwrap();

        let name = j.pause("waiting on user").unwrap();
        assert_eq!(j.state.status, JournalStatus::Paused);
        assert!(j.checkpoints.contains_key(&name));

        j.resume().unwrap();
        assert_eq!(j.state.status, JournalStatus::Recording);
        assert!(j.state.paused_at.is_none());
    }

    #[test]
    fn resume_from_entry_rewinds_pending_and_bumps_count() {
        let mut j = prompt_journal();
        let a = j.append(EntryType::FileWrite, EntryPayload::FileWrite { path: "a".into(), content_hash: "h".into() });
        let b = j.append(EntryType::FileWrite, EntryPayload::FileWrite { path: "b".into(), content_hash: "h".into() });
        j.start(a).unwrap();
        j.complete(a).unwrap();
        j.start(b).unwrap();
        j.fail(b, EntryError { message: "boom".into(), kind: None }).unwrap();

        j.resume_from_entry(a).unwrap();
        // `a` completed, must stay completed; `b` failed, gets re-marked pending.
        assert_eq!(j.entries[a].status, EntryStatus::Completed);
        assert_eq!(j.entries[b].status, EntryStatus::Pending);
        assert_eq!(j.state.resume_count, 1);
    }

    #[test]
    fn hash_up_to_is_prefix_stable() {
        let mut j = prompt_journal();
        j.append(EntryType::UserPrompt, EntryPayload::UserPrompt { text: "one".into() });
        j.append(EntryType::UserPrompt, EntryPayload::UserPrompt { text: "two".into() });
        let prefix_hash = j.hash_up_to(1).unwrap();

        // A journal truncated to the same first entry (same id, same
        // timestamp — cloned, not re-appended) must hash identically.
        let mut truncated = prompt_journal();
        truncated.entries.push(j.entries[0].clone());
        let truncated_hash = truncated.hash_up_to(1).unwrap();

        assert_eq!(prefix_hash, truncated_hash);
    }

    #[test]
    fn full_hash_changes_when_full_length_grows() {
        let mut j = prompt_journal();
        j.append(EntryType::UserPrompt, EntryPayload::UserPrompt { text: "one".into() });
        let h1 = j.hash_up_to(1).unwrap();
        j.append(EntryType::UserPrompt, EntryPayload::UserPrompt { text: "two".into() });
        let h2 = j.hash_up_to(2).unwrap();
        assert_ne!(h1, h2);
        assert_eq!(h1, j.hash_up_to(1).unwrap());
    }

    #[test]
    fn checkpoint_records_journal_hash_up_to_cursor() {
        let mut j = prompt_journal();
        let i = j.append(EntryType::UserPrompt, EntryPayload::UserPrompt { text: "one".into() });
        j.start(i).unwrap();
        j.complete(i).unwrap();

        let cursor_before = j.state.cursor;
        j.create_checkpoint("cp1", None, false).unwrap();
        let cp = j.checkpoints.get("cp1").unwrap();
        assert_eq!(cp.journal_hash, j.hash_up_to(cursor_before).unwrap().to_string());
    }

    #[test]
    fn checkpoint_tie_break_is_lexicographic_descending_on_name() {
        let mut j = prompt_journal();
        j.create_checkpoint("b_checkpoint", None, false).unwrap();
        j.create_checkpoint("a_checkpoint", None, false).unwrap();
        // Force identical timestamps to exercise the tie-break path.
        let now = Utc::now();
        for cp in j.checkpoints.values_mut() {
            cp.created_at = now;
        }
        let latest = j.latest_checkpoint().unwrap();
        assert_eq!(latest.name, "b_checkpoint");
    }

    #[test]
    fn retry_attempt_appender_auto_completes() {
        let mut j = prompt_journal();
        let i = j.append_retry_attempt(1, "rate_limit", false);
        assert_eq!(j.entries[i].status, EntryStatus::Failed);

        let ok = j.append_retry_attempt(2, "rate_limit", true);
        assert_eq!(j.entries[ok].status, EntryStatus::Completed);
    }

    #[test]
    fn json_round_trip_preserves_fields_and_hash() {
        let mut j = prompt_journal();
        let i = j.append(EntryType::UserPrompt, EntryPayload::UserPrompt { text: "one".into() });
        j.start(i).unwrap();
        j.complete(i).unwrap();
        j.create_checkpoint("cp1", Some("before the risky part".into()), false).unwrap();

        let json = j.to_json().unwrap();
        assert!(json.contains("\"skipList\""));
        assert!(json.contains("\"fileStates\""));

        let restored = RunJournal::from_json(&json).unwrap();
        assert_eq!(restored.entries.len(), j.entries.len());
        assert_eq!(restored.header.plan_id, j.header.plan_id);
        assert_eq!(restored.checkpoints.len(), j.checkpoints.len());
        assert_eq!(
            restored.hash_up_to(restored.entries.len()).unwrap(),
            j.hash_up_to(j.entries.len()).unwrap()
        );
    }

    #[test]
    fn save_and_load_round_trip_through_a_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut j = prompt_journal();
        j.append(EntryType::UserPrompt, EntryPayload::UserPrompt { text: "hi".into() });

        let path = dir.path().join("run.journal.json");
        j.save(&path).unwrap();
        let loaded = RunJournal::load(&path).unwrap();
        assert_eq!(loaded.entries.len(), 1);
        assert_eq!(loaded.header.plan_id, "plan1");
    }

    #[test]
    fn latest_good_checkpoint_skips_checkpoints_with_failures_before_them() {
        let mut j = prompt_journal();
        let a = j.append(EntryType::FileWrite, EntryPayload::FileWrite { path: "a".into(), content_hash: "h".into() });
        j.start(a).unwrap();
        j.complete(a).unwrap();
        j.create_checkpoint("good", None, false).unwrap();

        let b = j.append(EntryType::FileWrite, EntryPayload::FileWrite { path: "b".into(), content_hash: "h".into() });
        j.start(b).unwrap();
        j.fail(b, EntryError { message: "boom".into(), kind: None }).unwrap();
        j.create_checkpoint("bad", None, false).unwrap();

        let good = j.latest_good_checkpoint().unwrap();
        assert_eq!(good.name, "good");
    }
}
