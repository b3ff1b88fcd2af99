// src/reporter.rs

//! Patch status reporting.
//!
//! `PatchStatusReporter` is the capability the File Transaction Engine
//! calls out to as it moves through its lifecycle. The FTE calls it
//! synchronously from within its own single-threaded lock discipline, so
//! any implementation observes a monotone, in-order timeline — there is
//! no concurrent-delivery case to guard against on the subscriber side.

use std::sync::Mutex;

use chrono::{DateTime, Utc};

/// Transaction-level lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchPhase {
    Preparing,
    Staging,
    Applying,
    Committing,
    RollingBack,
    Done,
}

/// Per-file lifecycle phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilePhase {
    Staged,
    Applying,
    Applied,
    Failed,
    Skipped,
}

#[derive(Debug, Clone)]
pub struct FileStatus {
    pub tx_id: String,
    pub path: String,
    pub phase: FilePhase,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct PatchEvent {
    pub tx_id: String,
    pub phase: PatchPhase,
    pub message: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// A capability with two methods, called synchronously by the FTE.
pub trait PatchStatusReporter: Send + Sync {
    fn on_file_status(&self, status: FileStatus);
    fn on_patch_event(&self, event: PatchEvent);
}

/// No-op reporter. The default when a driver doesn't care about
/// observability.
#[derive(Debug, Default)]
pub struct SilentReporter;

impl PatchStatusReporter for SilentReporter {
    fn on_file_status(&self, _status: FileStatus) {}
    fn on_patch_event(&self, _event: PatchEvent) {}
}

/// Collects every event in order. Used by tests that assert on the
/// lifecycle sequence rather than just the end state.
#[derive(Default)]
pub struct CollectingReporter {
    pub file_statuses: Mutex<Vec<FileStatus>>,
    pub patch_events: Mutex<Vec<PatchEvent>>,
}

impl PatchStatusReporter for CollectingReporter {
    fn on_file_status(&self, status: FileStatus) {
        self.file_statuses.lock().unwrap().push(status);
    }

    fn on_patch_event(&self, event: PatchEvent) {
        self.patch_events.lock().unwrap().push(event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collecting_reporter_preserves_order() {
        let reporter = CollectingReporter::default();
        reporter.on_patch_event(PatchEvent {
            tx_id: "t1".into(),
            phase: PatchPhase::Preparing,
            message: None,
            timestamp: Utc::now(),
        });
        reporter.on_patch_event(PatchEvent {
            tx_id: "t1".into(),
            phase: PatchPhase::Staging,
            message: None,
            timestamp: Utc::now(),
        });

        let events = reporter.patch_events.lock().unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].phase, PatchPhase::Preparing);
        assert_eq!(events[1].phase, PatchPhase::Staging);
    }

    #[test]
    fn silent_reporter_is_a_true_no_op() {
        let reporter = SilentReporter;
        reporter.on_file_status(FileStatus {
            tx_id: "t".into(),
            path: "a".into(),
            phase: FilePhase::Applied,
            message: None,
            timestamp: Utc::now(),
        });
    }
}
