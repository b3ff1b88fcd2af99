// src/retry/mod.rs

//! Retry & Recovery Controller: classification, backoff, idempotency and
//! the five-step retry loop that ties them to the file transaction
//! engine and the run journal.

pub mod backoff;
pub mod classify;
pub mod controller;
pub mod idempotency;

pub use backoff::compute_delay;
pub use classify::{classify, FailureCategory, FailureType, ProviderFailure};
pub use controller::{CallFailure, OperationSafety, RetryAttempt, RetryController, RetryOutcome};
pub use idempotency::{CheckOutcome, FileChangeRecord, IdempotencyManager, IdempotencyRecord, IdempotencyStats, IdempotencyStatus};

use crate::env;

/// Per-failure-type retry policy: how many attempts, how the
/// delay grows, whether it respects `Retry-After`, and whether a fallback
/// model/provider should be tried before exhausting attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryStrategy {
    pub should_retry: bool,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub use_jitter: bool,
    pub respect_retry_after: bool,
    pub try_fallback_first: bool,
}

impl RetryStrategy {
    pub fn for_failure(failure_type: FailureType) -> Self {
        use FailureType::*;
        match failure_type {
            RateLimit => Self {
                should_retry: true,
                max_attempts: 5,
                initial_delay_ms: 1_000,
                max_delay_ms: 60_000,
                backoff_multiplier: 2.0,
                use_jitter: true,
                respect_retry_after: true,
                try_fallback_first: false,
            },
            ServerError => Self {
                should_retry: true,
                max_attempts: 3,
                initial_delay_ms: 500,
                max_delay_ms: 30_000,
                backoff_multiplier: 2.0,
                use_jitter: true,
                respect_retry_after: false,
                try_fallback_first: true,
            },
            Overloaded => Self {
                should_retry: true,
                max_attempts: 4,
                initial_delay_ms: 1_000,
                max_delay_ms: 45_000,
                backoff_multiplier: 2.0,
                use_jitter: true,
                respect_retry_after: false,
                try_fallback_first: true,
            },
            Timeout => Self {
                should_retry: true,
                max_attempts: 3,
                initial_delay_ms: 2_000,
                max_delay_ms: 30_000,
                backoff_multiplier: 1.5,
                use_jitter: true,
                respect_retry_after: false,
                try_fallback_first: false,
            },
            QuotaExhausted | AuthInvalid | PermissionDenied | ModelNotFound | ContextTooLong | ContentPolicy | InvalidRequest => Self {
                should_retry: false,
                max_attempts: 1,
                initial_delay_ms: 0,
                max_delay_ms: 0,
                backoff_multiplier: 1.0,
                use_jitter: false,
                respect_retry_after: false,
                try_fallback_first: false,
            },
        }
    }
}

/// Global caps a driver can override via environment variables, layered
/// on top of (never above) each failure type's own [`RetryStrategy`].
#[derive(Debug, Clone)]
pub struct RetryConfig {
    pub max_attempts: Option<u32>,
    pub max_delay_ms: Option<u64>,
    pub max_provider_retry_after_ms: Option<u64>,
    pub retry_irreversible: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: None,
            max_delay_ms: None,
            max_provider_retry_after_ms: None,
            retry_irreversible: false,
        }
    }
}

impl RetryConfig {
    pub fn from_env() -> Self {
        Self {
            max_attempts: env::read_u32(env::MAX_RETRY_ATTEMPTS),
            max_delay_ms: env::read_u64(env::MAX_RETRY_DELAY_MS),
            max_provider_retry_after_ms: env::read_u64(env::MAX_PROVIDER_RETRY_AFTER_MS),
            retry_irreversible: env::read_bool(env::RETRY_IRREVERSIBLE).unwrap_or(false),
        }
    }

    pub fn effective_max_attempts(&self, strategy_max: u32) -> u32 {
        match self.max_attempts {
            Some(cap) => cap.min(strategy_max),
            None => strategy_max,
        }
    }

    pub fn effective_max_delay_ms(&self, strategy_max: u64) -> u64 {
        match self.max_delay_ms {
            Some(cap) => cap.min(strategy_max),
            None => strategy_max,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn non_retryable_failures_have_a_single_attempt_budget() {
        let s = RetryStrategy::for_failure(FailureType::AuthInvalid);
        assert!(!s.should_retry);
        assert_eq!(s.max_attempts, 1);
    }

    #[test]
    fn config_cap_never_raises_the_strategy_ceiling() {
        let config = RetryConfig { max_attempts: Some(10), ..RetryConfig::default() };
        assert_eq!(config.effective_max_attempts(3), 3);
    }

    #[test]
    fn config_cap_can_lower_the_strategy_ceiling() {
        let config = RetryConfig { max_attempts: Some(1), ..RetryConfig::default() };
        assert_eq!(config.effective_max_attempts(5), 1);
    }
}
