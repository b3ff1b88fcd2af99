// src/registry.rs

//! Process-wide error registry: the terminal sink for classified
//! failures that the retry controller gives up on.
//!
//! A `DashMap`-backed store with last-writer-wins semantics, keyed by a
//! generated report id; a report is written once and never mutated in
//! place.

use std::fmt;
use std::sync::OnceLock;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnrecoverableKind {
    QuotaExhausted,
    AuthInvalid,
    ContentPolicy,
    ContextTooLong,
    CheckpointLost,
    JournalCorrupted,
    SnapshotMissing,
    ExternalModification,
    DiskFull,
    ConcurrentAccess,
}

/// A classified failure for which no automatic recovery exists.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnrecoverableError {
    pub kind: UnrecoverableKind,
    pub message: String,
}

impl UnrecoverableError {
    pub fn new(kind: UnrecoverableKind, message: impl Into<String>) -> Self {
        Self { kind, message: message.into() }
    }
}

impl fmt::Display for UnrecoverableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for UnrecoverableError {}

/// User-visible shape a non-retryable or unrecoverable failure surfaces
/// as: root cause, the step it happened in, and recovery
/// guidance split into what the user must do versus what they could try
/// instead versus how to avoid it next time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub root_cause: String,
    pub step_context: Option<String>,
    pub required_actions: Vec<String>,
    pub alternative_approaches: Vec<String>,
    pub prevention_advice: Vec<String>,
    pub unrecoverable: Option<UnrecoverableError>,
    pub created_at: DateTime<Utc>,
}

impl ErrorReport {
    pub fn new(root_cause: impl Into<String>) -> Self {
        Self {
            root_cause: root_cause.into(),
            step_context: None,
            required_actions: Vec::new(),
            alternative_approaches: Vec::new(),
            prevention_advice: Vec::new(),
            unrecoverable: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_step_context(mut self, ctx: impl Into<String>) -> Self {
        self.step_context = Some(ctx.into());
        self
    }

    pub fn with_unrecoverable(mut self, err: UnrecoverableError) -> Self {
        self.unrecoverable = Some(err);
        self
    }

    pub fn with_required_action(mut self, action: impl Into<String>) -> Self {
        self.required_actions.push(action.into());
        self
    }

    pub fn with_alternative(mut self, alt: impl Into<String>) -> Self {
        self.alternative_approaches.push(alt.into());
        self
    }

    pub fn with_prevention(mut self, advice: impl Into<String>) -> Self {
        self.prevention_advice.push(advice.into());
        self
    }
}

fn generate_error_id() -> String {
    format!("err_{}", Utc::now().timestamp_nanos_opt().unwrap_or_default())
}

/// Process-local registry of `ErrorReport`s. Safe to construct
/// independently in tests; [`global`] offers the convenience default
/// instance the design notes (§9) call for instead of a bare static.
#[derive(Default)]
pub struct ErrorRegistry {
    reports: DashMap<String, ErrorReport>,
}

impl ErrorRegistry {
    pub fn new() -> Self {
        Self { reports: DashMap::new() }
    }

    /// Store a report under a generated id and return that id.
    pub fn store(&self, report: ErrorReport) -> String {
        let id = generate_error_id();
        self.reports.insert(id.clone(), report);
        id
    }

    pub fn get(&self, id: &str) -> Option<ErrorReport> {
        self.reports.get(id).map(|entry| entry.clone())
    }

    pub fn len(&self) -> usize {
        self.reports.len()
    }

    pub fn is_empty(&self) -> bool {
        self.reports.is_empty()
    }
}

static GLOBAL: OnceLock<ErrorRegistry> = OnceLock::new();

/// The process-wide default instance.
pub fn global() -> &'static ErrorRegistry {
    GLOBAL.get_or_init(ErrorRegistry::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_then_get_round_trips() {
        let registry = ErrorRegistry::new();
        let report = ErrorReport::new("provider quota exhausted")
            .with_unrecoverable(UnrecoverableError::new(UnrecoverableKind::QuotaExhausted, "429"))
            .with_required_action("upgrade your plan or wait for quota reset");

        let id = registry.store(report);
        assert!(id.starts_with("err_"));

        let fetched = registry.get(&id).unwrap();
        assert_eq!(fetched.root_cause, "provider quota exhausted");
        assert_eq!(fetched.required_actions.len(), 1);
    }

    #[test]
    fn unknown_id_returns_none() {
        let registry = ErrorRegistry::new();
        assert!(registry.get("err_0").is_none());
    }

    #[test]
    fn global_returns_the_same_instance() {
        global().store(ErrorReport::new("marker"));
        assert!(!global().is_empty());
    }
}
