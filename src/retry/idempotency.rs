// src/retry/idempotency.rs

//! Process-local idempotency tracking: suppress duplicate retries of an
//! operation that already completed or is already in flight.
//!
//! A `DashMap` keyed store hands out per-key state without a process-wide
//! lock; the key is caller-supplied (a hash of
//! `{plan, branch, operation, params}`).

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::hash::hash_str;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdempotencyStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChangeRecord {
    pub path: PathBuf,
    pub op_type: String,
    pub pre_hash: Option<String>,
    pub post_hash: Option<String>,
    pub applied: bool,
    pub rollback_available: bool,
}

impl FileChangeRecord {
    pub fn new(path: impl Into<PathBuf>, op_type: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            op_type: op_type.into(),
            pre_hash: None,
            post_hash: None,
            applied: false,
            rollback_available: false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    pub request_hash: String,
    pub status: IdempotencyStatus,
    pub attempts: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub file_changes: Vec<FileChangeRecord>,
    pub result: Option<String>,
    pub error: Option<String>,
}

/// The verdict of [`IdempotencyManager::check`]: whether a caller should
/// proceed with the operation or treat it as already handled.
#[derive(Debug, Clone)]
pub struct CheckOutcome {
    pub duplicate: bool,
    pub should_proceed: bool,
    pub existing_record: Option<IdempotencyRecord>,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct IdempotencyStats {
    pub total: usize,
    pub pending: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub failed: usize,
    pub rolled_back: usize,
}

/// Compute the stable key for `{plan, branch, operation, params}`. Two
/// calls with the same four inputs always yield the same key; the
/// manager treats different `params` under the same key as a distinct
/// operation via the separately-tracked request hash.
pub fn compute_key(plan: &str, branch: &str, operation: &str, params: &str) -> String {
    hash_str(&format!("{plan}\0{branch}\0{operation}\0{params}")).to_string()
}

/// Process-local idempotency tracker. Construct one per process (or per
/// run) rather than sharing across unrelated runs — there is no
/// persistence across restarts, by design: idempotency here is a
/// best-effort, in-memory safeguard against double-execution within a
/// single run, not a durability mechanism.
pub struct IdempotencyManager {
    records: DashMap<String, IdempotencyRecord>,
    max_age: Duration,
}

impl Default for IdempotencyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl IdempotencyManager {
    pub fn new() -> Self {
        Self::with_max_age(Duration::hours(24))
    }

    pub fn with_max_age(max_age: Duration) -> Self {
        Self { records: DashMap::new(), max_age }
    }

    /// Check whether `request` under `key` is a duplicate of an
    /// in-flight or already-completed operation. A different request
    /// hash under the same key is never a duplicate, even if a record
    /// already exists there, because it represents a distinct operation.
    pub fn check(&self, key: &str, request: &str) -> CheckOutcome {
        let request_hash = hash_str(request).to_string();
        let Some(entry) = self.records.get(key) else {
            return CheckOutcome { duplicate: false, should_proceed: true, existing_record: None };
        };
        let record = entry.clone();
        drop(entry);

        if record.request_hash != request_hash {
            return CheckOutcome { duplicate: false, should_proceed: true, existing_record: None };
        }

        let expired = Utc::now() - record.updated_at > self.max_age;
        let duplicate = !expired && matches!(record.status, IdempotencyStatus::Completed | IdempotencyStatus::InProgress);

        CheckOutcome { duplicate, should_proceed: !duplicate, existing_record: Some(record) }
    }

    /// Begin (or resume) an attempt under `key`. Increments the attempt
    /// counter; a request hash mismatch against an existing record
    /// starts a fresh record rather than extending the old one.
    pub fn start(&self, key: &str, request: &str) -> IdempotencyRecord {
        let request_hash = hash_str(request).to_string();
        let now = Utc::now();

        let mut entry = self.records.entry(key.to_string()).or_insert_with(|| IdempotencyRecord {
            key: key.to_string(),
            request_hash: request_hash.clone(),
            status: IdempotencyStatus::Pending,
            attempts: 0,
            created_at: now,
            updated_at: now,
            file_changes: Vec::new(),
            result: None,
            error: None,
        });

        if entry.request_hash != request_hash {
            *entry = IdempotencyRecord {
                key: key.to_string(),
                request_hash: request_hash.clone(),
                status: IdempotencyStatus::Pending,
                attempts: 0,
                created_at: now,
                updated_at: now,
                file_changes: Vec::new(),
                result: None,
                error: None,
            };
        }

        entry.attempts += 1;
        entry.status = IdempotencyStatus::InProgress;
        entry.updated_at = now;
        entry.clone()
    }

    pub fn complete(&self, key: &str, success: bool, result: Option<String>, err: Option<String>) {
        if let Some(mut entry) = self.records.get_mut(key) {
            entry.status = if success { IdempotencyStatus::Completed } else { IdempotencyStatus::Failed };
            entry.result = result;
            entry.error = err;
            entry.updated_at = Utc::now();
        }
    }

    pub fn mark_rolled_back(&self, key: &str) {
        if let Some(mut entry) = self.records.get_mut(key) {
            entry.status = IdempotencyStatus::RolledBack;
            entry.updated_at = Utc::now();
        }
    }

    pub fn record_file_change(&self, key: &str, change: FileChangeRecord) {
        if let Some(mut entry) = self.records.get_mut(key) {
            entry.file_changes.push(change);
            entry.updated_at = Utc::now();
        }
    }

    pub fn mark_applied(&self, key: &str, path: &Path) {
        if let Some(mut entry) = self.records.get_mut(key) {
            if let Some(change) = entry.file_changes.iter_mut().find(|c| c.path == path) {
                change.applied = true;
            }
            entry.updated_at = Utc::now();
        }
    }

    pub fn get(&self, key: &str) -> Option<IdempotencyRecord> {
        self.records.get(key).map(|e| e.clone())
    }

    /// Purge records whose last update is older than `max_age`. Returns
    /// the number of records removed.
    pub fn cleanup(&self) -> usize {
        let cutoff = Utc::now() - self.max_age;
        let stale: Vec<String> = self.records.iter().filter(|e| e.updated_at < cutoff).map(|e| e.key().clone()).collect();
        for key in &stale {
            self.records.remove(key);
        }
        stale.len()
    }

    pub fn stats(&self) -> IdempotencyStats {
        let mut stats = IdempotencyStats::default();
        for entry in self.records.iter() {
            stats.total += 1;
            match entry.status {
                IdempotencyStatus::Pending => stats.pending += 1,
                IdempotencyStatus::InProgress => stats.in_progress += 1,
                IdempotencyStatus::Completed => stats.completed += 1,
                IdempotencyStatus::Failed => stats.failed += 1,
                IdempotencyStatus::RolledBack => stats.rolled_back += 1,
            }
        }
        stats
    }
}

/// Default purge age, exposed for callers building their own
/// `IdempotencyManager::with_max_age` around a different policy.
pub const DEFAULT_MAX_AGE: StdDuration = StdDuration::from_secs(24 * 60 * 60);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_key_is_not_a_duplicate() {
        let mgr = IdempotencyManager::new();
        let outcome = mgr.check("k1", "req-a");
        assert!(!outcome.duplicate);
        assert!(outcome.should_proceed);
    }

    #[test]
    fn in_progress_duplicate_does_not_proceed() {
        let mgr = IdempotencyManager::new();
        mgr.start("k1", "req-a");
        let outcome = mgr.check("k1", "req-a");
        assert!(outcome.duplicate);
        assert!(!outcome.should_proceed);
    }

    #[test]
    fn completed_successful_duplicate_does_not_proceed() {
        let mgr = IdempotencyManager::new();
        mgr.start("k1", "req-a");
        mgr.complete("k1", true, Some("ok".to_string()), None);
        let outcome = mgr.check("k1", "req-a");
        assert!(outcome.duplicate);
    }

    #[test]
    fn failed_record_allows_retry() {
        let mgr = IdempotencyManager::new();
        mgr.start("k1", "req-a");
        mgr.complete("k1", false, None, Some("boom".to_string()));
        let outcome = mgr.check("k1", "req-a");
        assert!(!outcome.duplicate);
        assert!(outcome.should_proceed);
    }

    #[test]
    fn rolled_back_record_allows_retry() {
        let mgr = IdempotencyManager::new();
        mgr.start("k1", "req-a");
        mgr.complete("k1", true, None, None);
        mgr.mark_rolled_back("k1");
        let outcome = mgr.check("k1", "req-a");
        assert!(!outcome.duplicate);
    }

    #[test]
    fn different_params_under_the_same_key_are_distinct_operations() {
        let mgr = IdempotencyManager::new();
        mgr.start("k1", "req-a");
        mgr.complete("k1", true, None, None);
        let outcome = mgr.check("k1", "req-b");
        assert!(!outcome.duplicate);
        assert!(outcome.should_proceed);
    }

    #[test]
    fn repeated_start_with_same_request_increments_attempts_without_resetting_identity() {
        let mgr = IdempotencyManager::new();
        let first = mgr.start("k1", "req-a");
        let second = mgr.start("k1", "req-a");
        assert_eq!(first.created_at, second.created_at);
        assert_eq!(second.attempts, 2);
    }

    #[test]
    fn compute_key_is_stable_and_sensitive_to_each_input() {
        let a = compute_key("plan1", "main", "modify_file", "{}");
        let b = compute_key("plan1", "main", "modify_file", "{}");
        let c = compute_key("plan1", "main", "delete_file", "{}");
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn cleanup_purges_only_stale_records() {
        let mgr = IdempotencyManager::with_max_age(Duration::milliseconds(0));
        mgr.start("k1", "req-a");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let removed = mgr.cleanup();
        assert_eq!(removed, 1);
        assert!(mgr.get("k1").is_none());
    }

    #[test]
    fn stats_count_by_status() {
        let mgr = IdempotencyManager::new();
        mgr.start("k1", "req-a");
        mgr.start("k2", "req-b");
        mgr.complete("k2", true, None, None);
        let stats = mgr.stats();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.in_progress, 1);
        assert_eq!(stats.completed, 1);
    }
}
