// src/retry/backoff.rs

//! Full-jitter exponential backoff, modeled on the circuit breaker's
//! jitter computation: pick a ceiling, then draw uniformly under it
//! rather than adding a bounded jitter term on top of a fixed delay.

use std::time::Duration;

use rand::Rng;

use super::{RetryConfig, RetryStrategy};

/// Compute the delay before the next attempt, or `None` if the failure
/// should be treated as non-retryable because the provider's
/// `Retry-After` exceeds the configured ceiling.
///
/// With `Retry-After` present and respected, the base is
/// `retry_after * 1.1` (a small margin over what the provider asked
/// for). Otherwise the base is `initial_delay * multiplier ^ attempt`.
/// The base is clamped to the effective max delay; with jitter enabled,
/// the final value is drawn uniformly from `[0, base]`.
pub fn compute_delay(strategy: &RetryStrategy, config: &RetryConfig, attempt: u32, retry_after_seconds: Option<u64>) -> Option<Duration> {
    let max_delay_ms = config.effective_max_delay_ms(strategy.max_delay_ms) as f64;

    let base_ms = if strategy.respect_retry_after {
        match retry_after_seconds {
            Some(secs) => {
                let base = secs as f64 * 1_000.0 * 1.1;
                if let Some(ceiling) = config.max_provider_retry_after_ms {
                    if base > ceiling as f64 {
                        return None;
                    }
                }
                base
            }
            None => exponential_base(strategy, attempt),
        }
    } else {
        exponential_base(strategy, attempt)
    };

    let clamped = base_ms.min(max_delay_ms).max(0.0);

    let final_ms = if strategy.use_jitter {
        if clamped <= 0.0 {
            0.0
        } else {
            rand::thread_rng().gen_range(0.0..=clamped)
        }
    } else {
        clamped
    };

    Some(Duration::from_millis(final_ms.round() as u64))
}

fn exponential_base(strategy: &RetryStrategy, attempt: u32) -> f64 {
    strategy.initial_delay_ms as f64 * strategy.backoff_multiplier.powi(attempt as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retry::classify::FailureType;

    #[test]
    fn delay_is_clamped_to_the_effective_max() {
        let strategy = RetryStrategy::for_failure(FailureType::RateLimit);
        let config = RetryConfig { max_delay_ms: Some(500), ..RetryConfig::default() };
        for attempt in 0..10 {
            let delay = compute_delay(&strategy, &config, attempt, None).unwrap();
            assert!(delay.as_millis() <= 500);
        }
    }

    #[test]
    fn retry_after_over_the_ceiling_is_non_retryable() {
        let strategy = RetryStrategy::for_failure(FailureType::RateLimit);
        let config = RetryConfig { max_provider_retry_after_ms: Some(1_000), ..RetryConfig::default() };
        assert!(compute_delay(&strategy, &config, 0, Some(60)).is_none());
    }

    #[test]
    fn retry_after_under_the_ceiling_is_honored() {
        let strategy = RetryStrategy::for_failure(FailureType::RateLimit);
        let config = RetryConfig::default();
        let delay = compute_delay(&strategy, &config, 0, Some(2)).unwrap();
        // base = 2000ms * 1.1 = 2200ms, jittered down to at most that.
        assert!(delay.as_millis() <= 2_200);
    }

    #[test]
    fn without_jitter_the_delay_is_deterministic() {
        let mut strategy = RetryStrategy::for_failure(FailureType::ServerError);
        strategy.use_jitter = false;
        let config = RetryConfig::default();
        let delay = compute_delay(&strategy, &config, 1, None).unwrap();
        assert_eq!(delay.as_millis(), 1_000); // 500 * 2^1
    }

    #[test]
    fn exponential_growth_without_retry_after() {
        let strategy = RetryStrategy::for_failure(FailureType::Overloaded);
        let config = RetryConfig::default();
        let d0 = compute_delay(&strategy, &config, 0, None).unwrap();
        let d5 = compute_delay(&strategy, &config, 5, None).unwrap();
        // Can't compare exact values under jitter, but the ceiling for a
        // later attempt should never be lower than for an earlier one.
        assert!(d0.as_millis() <= strategy.max_delay_ms as u128);
        assert!(d5.as_millis() <= strategy.max_delay_ms as u128);
    }
}
