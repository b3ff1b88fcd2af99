// src/retry/controller.rs

//! The five-step retry loop: classify, pick a strategy,
//! gate on operation safety, roll a conditional operation back to its
//! pre-operation checkpoint before retrying, and finalise into an
//! [`ErrorReport`] when the cap is reached or the failure turns out to
//! be unrecoverable.
//!
//! The loop itself doesn't know how to call a model provider — that's
//! the driver's `FnMut` closure — it only knows how to classify what
//! comes back, decide whether to wait and retry, and how to ask the
//! file transaction engine to undo a conditional operation in between
//! attempts.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::fte::Transaction;
use crate::journal::RunJournal;
use crate::registry::{ErrorRegistry, ErrorReport, UnrecoverableError, UnrecoverableKind};

use super::classify::{classify, FailureType, ProviderFailure};
use super::{RetryConfig, RetryStrategy};

/// How safe it is to retry a given kind of operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationSafety {
    /// Always retryable: model request, context load, file read,
    /// checkpoint create, validation, health check.
    Safe,
    /// Retryable only after rolling back to the pre-operation
    /// checkpoint: file write/edit/delete/move, file build, context
    /// update, plan update.
    Conditional,
    /// Not retryable unless `RetryConfig::retry_irreversible` is set:
    /// shell exec, external API write, deploy, notification.
    Irreversible,
}

/// A single attempt's outcome, as recorded in the data model (§3).
#[derive(Debug, Clone)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub duration_ms: i64,
    pub succeeded: bool,
    pub failure: Option<ProviderFailure>,
    pub delay: Option<Duration>,
    pub fallback_used: bool,
    pub fallback_type: Option<String>,
}

/// Final disposition of a call wrapped by the controller.
#[derive(Debug)]
pub enum RetryOutcome<T> {
    /// The call succeeded, possibly after one or more retries.
    Succeeded { value: T, attempts: Vec<RetryAttempt> },
    /// The call was not retried (or ran out of retries) and the
    /// controller gave up; `error_id` indexes the stored [`ErrorReport`].
    Exhausted { error_id: String, attempts: Vec<RetryAttempt> },
    /// A cancellation signal fired mid-retry; no further attempts are
    /// made and no report is filed, since this wasn't a failure.
    Cancelled { attempts: Vec<RetryAttempt> },
}

/// A classified failure returned by the wrapped call, carrying enough
/// context for the controller to decide what to do next.
pub struct CallFailure {
    pub http_code: u16,
    pub error_code: Option<String>,
    pub message: String,
    pub provider: String,
}

fn is_unrecoverable(failure_type: FailureType) -> Option<UnrecoverableKind> {
    match failure_type {
        FailureType::QuotaExhausted => Some(UnrecoverableKind::QuotaExhausted),
        FailureType::AuthInvalid => Some(UnrecoverableKind::AuthInvalid),
        FailureType::ContentPolicy => Some(UnrecoverableKind::ContentPolicy),
        FailureType::ContextTooLong => Some(UnrecoverableKind::ContextTooLong),
        _ => None,
    }
}

/// Drives the five-step retry loop against a wrapped provider call,
/// optionally tied to an FTE transaction (for conditional rollback) and
/// a run journal (for retry-event bookkeeping).
pub struct RetryController<'a> {
    config: RetryConfig,
    cancel: Option<Arc<AtomicBool>>,
    registry: &'a ErrorRegistry,
    journal: Option<&'a mut RunJournal>,
}

impl<'a> RetryController<'a> {
    pub fn new(config: RetryConfig, registry: &'a ErrorRegistry) -> Self {
        Self { config, cancel: None, registry, journal: None }
    }

    pub fn with_cancel(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn with_journal(mut self, journal: &'a mut RunJournal) -> Self {
        self.journal = Some(journal);
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|c| c.load(Ordering::Relaxed))
    }

    /// Sleep `delay`, checking the cancellation signal every 20ms so a
    /// cancel fires promptly instead of only at the next attempt.
    fn cancellable_sleep(&self, delay: Duration) -> bool {
        let step = Duration::from_millis(20);
        let deadline = Instant::now() + delay;
        loop {
            if self.is_cancelled() {
                return false;
            }
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return true;
            }
            thread::sleep(remaining.min(step));
        }
    }

    /// Run `call` under the retry policy for `safety`. `call` returns
    /// `Ok(T)` on success or `Err(CallFailure)` describing what the
    /// provider said went wrong. `rollback_conditional`, if provided, is
    /// invoked against `tx` before each retry of a conditional
    /// operation, restoring the pre-operation checkpoint named
    /// `checkpoint_name`.
    pub fn execute<T>(
        &mut self,
        safety: OperationSafety,
        checkpoint_name: Option<&str>,
        tx: Option<&mut Transaction>,
        mut call: impl FnMut(u32) -> Result<T, CallFailure>,
    ) -> RetryOutcome<T> {
        let mut attempts = Vec::new();
        let mut tx = tx;

        // Step 1: operation safety forbids retry entirely -> one shot.
        let retry_allowed = match safety {
            OperationSafety::Safe | OperationSafety::Conditional => true,
            OperationSafety::Irreversible => self.config.retry_irreversible,
        };

        let mut attempt_no = 0u32;
        loop {
            if self.is_cancelled() {
                return RetryOutcome::Cancelled { attempts };
            }

            let started_at = Utc::now();
            let start = Instant::now();
            let result = call(attempt_no);
            let completed_at = Utc::now();
            let duration_ms = start.elapsed().as_millis() as i64;

            match result {
                Ok(value) => {
                    attempts.push(RetryAttempt {
                        attempt: attempt_no,
                        started_at,
                        completed_at,
                        duration_ms,
                        succeeded: true,
                        failure: None,
                        delay: None,
                        fallback_used: false,
                        fallback_type: None,
                    });
                    if let Some(journal) = self.journal.as_deref_mut() {
                        journal.append_retry_attempt(attempt_no, "none", true);
                    }
                    return RetryOutcome::Succeeded { value, attempts };
                }
                Err(failure) => {
                    // Step 2: classify and select a strategy.
                    let provider_failure = classify(failure.http_code, failure.error_code.as_deref(), &failure.message, &failure.provider);
                    let strategy = RetryStrategy::for_failure(provider_failure.failure_type);

                    attempts.push(RetryAttempt {
                        attempt: attempt_no,
                        started_at,
                        completed_at,
                        duration_ms,
                        succeeded: false,
                        failure: Some(provider_failure.clone()),
                        delay: None,
                        fallback_used: false,
                        fallback_type: None,
                    });
                    if let Some(journal) = self.journal.as_deref_mut() {
                        journal.append_retry_attempt(attempt_no, &provider_failure.failure_type.to_string(), false);
                    }

                    // Step 3: non-retryable, unrecoverable, or
                    // operation-safety forbids it entirely -> finalise.
                    let unrecoverable = is_unrecoverable(provider_failure.failure_type);
                    let max_attempts = self.config.effective_max_attempts(strategy.max_attempts);
                    let exhausted = attempt_no + 1 >= max_attempts;

                    if !retry_allowed || !provider_failure.retryable || unrecoverable.is_some() || exhausted {
                        if let Some(journal) = self.journal.as_deref_mut() {
                            journal.append_retry_exhaust(attempt_no + 1, &provider_failure.failure_type.to_string());
                        }
                        let error_id = self.finalize(&failure, &provider_failure, unrecoverable);
                        return RetryOutcome::Exhausted { error_id, attempts };
                    }

                    // Step 4: conditional operations roll back to their
                    // pre-operation checkpoint before the next attempt.
                    if safety == OperationSafety::Conditional {
                        if let (Some(tx), Some(name)) = (tx.as_deref_mut(), checkpoint_name) {
                            if let Err(e) = tx.rollback_to_checkpoint(name) {
                                warn!(error = %e, checkpoint = name, "conditional rollback before retry failed");
                            }
                        }
                    }

                    let delay = super::backoff::compute_delay(&strategy, &self.config, attempt_no, provider_failure.retry_after_seconds);
                    let Some(delay) = delay else {
                        // Retry-After exceeded the configured ceiling:
                        // treat as non-retryable.
                        if let Some(journal) = self.journal.as_deref_mut() {
                            journal.append_retry_exhaust(attempt_no + 1, &provider_failure.failure_type.to_string());
                        }
                        let error_id = self.finalize(&failure, &provider_failure, unrecoverable);
                        return RetryOutcome::Exhausted { error_id, attempts };
                    };

                    info!(attempt = attempt_no, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                    if !self.cancellable_sleep(delay) {
                        return RetryOutcome::Cancelled { attempts };
                    }

                    attempt_no += 1;
                }
            }
        }
    }

    fn finalize(&self, failure: &CallFailure, provider_failure: &ProviderFailure, unrecoverable: Option<UnrecoverableKind>) -> String {
        let mut report = ErrorReport::new(failure.message.clone()).with_step_context(format!("provider={}", failure.provider));

        if let Some(kind) = unrecoverable {
            let err = UnrecoverableError::new(kind, failure.message.clone());
            report = report.with_unrecoverable(err);
        }
        if let Some(action) = &provider_failure.required_action {
            report = report.with_required_action(action.clone());
        }
        if provider_failure.fallback_suggested {
            report = report.with_alternative("retry against a fallback provider or model");
        }

        self.registry.store(report)
    }
}
