// src/retry/classify.rs

//! Provider-failure classification: turn an HTTP status, an optional
//! provider error code and a free-text message into a typed
//! [`FailureType`] plus retry guidance.
//!
//! Message patterns are checked before the HTTP-code table on purpose —
//! a 429 that says "exceeded your current quota" is a different failure
//! than a 429 that says "rate limit reached", and no HTTP status code
//! distinguishes the two.

use std::sync::OnceLock;

use regex::RegexSet;
use serde::{Deserialize, Serialize};
use strum_macros::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum FailureType {
    InvalidRequest,
    AuthInvalid,
    QuotaExhausted,
    PermissionDenied,
    ModelNotFound,
    ContextTooLong,
    ContentPolicy,
    RateLimit,
    ServerError,
    Overloaded,
    Timeout,
}

/// A coarse grouping alongside the precise [`FailureType`] — useful to a
/// driver that wants to branch on "is this our fault or theirs" without
/// enumerating every failure type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureCategory {
    ClientError,
    ServerError,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderFailure {
    pub failure_type: FailureType,
    pub category: FailureCategory,
    pub retryable: bool,
    pub fallback_suggested: bool,
    pub retry_after_seconds: Option<u64>,
    pub max_retries: u32,
    pub required_action: Option<String>,
}

fn context_too_long_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)context.{0,20}(too long|length exceed|window)",
            r"(?i)maximum context length",
            r"(?i)context_length_exceeded",
            r"(?i)too many tokens",
        ])
        .expect("static context-too-long patterns are valid regexes")
    })
}

fn content_policy_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)content.?policy",
            r"(?i)content_policy",
            r"(?i)safety system",
            r"(?i)flagged (by|as) (our|the) (content|safety) (policy|system)",
        ])
        .expect("static content-policy patterns are valid regexes")
    })
}

fn quota_exhausted_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([
            r"(?i)exceeded your current quota",
            r"(?i)quota.{0,10}exceeded",
            r"(?i)insufficient_quota",
            r"(?i)billing",
        ])
        .expect("static quota-exhausted patterns are valid regexes")
    })
}

fn overloaded_patterns() -> &'static RegexSet {
    static SET: OnceLock<RegexSet> = OnceLock::new();
    SET.get_or_init(|| {
        RegexSet::new([r"(?i)overloaded", r"(?i)currently (unavailable|at capacity)"])
            .expect("static overloaded patterns are valid regexes")
    })
}

/// Classify a provider failure. `error_code` is an optional
/// provider-supplied machine-readable code (e.g. `"insufficient_quota"`)
/// folded into the same haystack as `message` for pattern matching.
pub fn classify(http_code: u16, error_code: Option<&str>, message: &str, provider: &str) -> ProviderFailure {
    let haystack = match error_code {
        Some(code) => format!("{message} {code}"),
        None => message.to_string(),
    };

    if context_too_long_patterns().is_match(&haystack) {
        return context_too_long();
    }
    if content_policy_patterns().is_match(&haystack) {
        return content_policy();
    }
    if quota_exhausted_patterns().is_match(&haystack) {
        return quota_exhausted(provider);
    }

    match http_code {
        400 => invalid_request(),
        401 => auth_invalid(provider),
        402 => quota_exhausted(provider),
        403 => permission_denied(provider),
        404 => model_not_found(),
        413 => context_too_long(),
        429 => rate_limit(),
        500 | 502 => server_error(),
        503 => {
            if overloaded_patterns().is_match(&haystack) {
                overloaded()
            } else {
                server_error()
            }
        }
        504 => timeout(),
        529 => overloaded(),
        code if (500..600).contains(&code) => server_error(),
        _ => invalid_request(),
    }
}

fn invalid_request() -> ProviderFailure {
    ProviderFailure {
        failure_type: FailureType::InvalidRequest,
        category: FailureCategory::ClientError,
        retryable: false,
        fallback_suggested: false,
        retry_after_seconds: None,
        max_retries: 0,
        required_action: Some("fix the request and resubmit".to_string()),
    }
}

fn auth_invalid(provider: &str) -> ProviderFailure {
    ProviderFailure {
        failure_type: FailureType::AuthInvalid,
        category: FailureCategory::ClientError,
        retryable: false,
        fallback_suggested: false,
        retry_after_seconds: None,
        max_retries: 0,
        required_action: Some(format!("check the {provider} API key and permissions")),
    }
}

fn quota_exhausted(provider: &str) -> ProviderFailure {
    ProviderFailure {
        failure_type: FailureType::QuotaExhausted,
        category: FailureCategory::ClientError,
        retryable: false,
        fallback_suggested: false,
        retry_after_seconds: None,
        max_retries: 0,
        required_action: Some(format!("upgrade or top up the {provider} account's quota")),
    }
}

fn permission_denied(provider: &str) -> ProviderFailure {
    ProviderFailure {
        failure_type: FailureType::PermissionDenied,
        category: FailureCategory::ClientError,
        retryable: false,
        fallback_suggested: false,
        retry_after_seconds: None,
        max_retries: 0,
        required_action: Some(format!("grant access to this resource on {provider}")),
    }
}

fn model_not_found() -> ProviderFailure {
    ProviderFailure {
        failure_type: FailureType::ModelNotFound,
        category: FailureCategory::ClientError,
        retryable: false,
        fallback_suggested: true,
        retry_after_seconds: None,
        max_retries: 0,
        required_action: Some("pick a model the provider currently serves".to_string()),
    }
}

fn context_too_long() -> ProviderFailure {
    ProviderFailure {
        failure_type: FailureType::ContextTooLong,
        category: FailureCategory::ClientError,
        retryable: false,
        fallback_suggested: false,
        retry_after_seconds: None,
        max_retries: 0,
        required_action: Some("shrink the context or split the request".to_string()),
    }
}

fn content_policy() -> ProviderFailure {
    ProviderFailure {
        failure_type: FailureType::ContentPolicy,
        category: FailureCategory::ClientError,
        retryable: false,
        fallback_suggested: false,
        retry_after_seconds: None,
        max_retries: 0,
        required_action: Some("revise the request to satisfy the provider's content policy".to_string()),
    }
}

fn rate_limit() -> ProviderFailure {
    ProviderFailure {
        failure_type: FailureType::RateLimit,
        category: FailureCategory::ClientError,
        retryable: true,
        fallback_suggested: false,
        retry_after_seconds: None,
        max_retries: 5,
        required_action: None,
    }
}

fn server_error() -> ProviderFailure {
    ProviderFailure {
        failure_type: FailureType::ServerError,
        category: FailureCategory::ServerError,
        retryable: true,
        fallback_suggested: true,
        retry_after_seconds: None,
        max_retries: 3,
        required_action: None,
    }
}

fn overloaded() -> ProviderFailure {
    ProviderFailure {
        failure_type: FailureType::Overloaded,
        category: FailureCategory::ServerError,
        retryable: true,
        fallback_suggested: true,
        retry_after_seconds: None,
        max_retries: 4,
        required_action: None,
    }
}

fn timeout() -> ProviderFailure {
    ProviderFailure {
        failure_type: FailureType::Timeout,
        category: FailureCategory::ServerError,
        retryable: true,
        fallback_suggested: false,
        retry_after_seconds: None,
        max_retries: 3,
        required_action: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_limit_message_is_retryable() {
        let f = classify(429, None, "Rate limit reached, please slow down", "anthropic");
        assert_eq!(f.failure_type, FailureType::RateLimit);
        assert!(f.retryable);
    }

    #[test]
    fn quota_exhausted_message_beats_the_429_code() {
        let f = classify(429, None, "You exceeded your current quota", "openai");
        assert_eq!(f.failure_type, FailureType::QuotaExhausted);
        assert!(!f.retryable);
    }

    #[test]
    fn code_529_is_overloaded_and_retryable() {
        let f = classify(529, None, "overloaded_error", "anthropic");
        assert_eq!(f.failure_type, FailureType::Overloaded);
        assert!(f.retryable);
    }

    #[test]
    fn code_503_without_overload_wording_is_server_error() {
        let f = classify(503, None, "Service Unavailable", "openai");
        assert_eq!(f.failure_type, FailureType::ServerError);
    }

    #[test]
    fn code_503_with_overload_wording_is_overloaded() {
        let f = classify(503, None, "The model is currently overloaded", "openai");
        assert_eq!(f.failure_type, FailureType::Overloaded);
    }

    #[test]
    fn context_too_long_message_beats_400_code() {
        let f = classify(400, None, "This model's maximum context length is 8192 tokens", "openai");
        assert_eq!(f.failure_type, FailureType::ContextTooLong);
    }

    #[test]
    fn http_code_table_covers_client_errors() {
        assert_eq!(classify(401, None, "nope", "x").failure_type, FailureType::AuthInvalid);
        assert_eq!(classify(402, None, "nope", "x").failure_type, FailureType::QuotaExhausted);
        assert_eq!(classify(403, None, "nope", "x").failure_type, FailureType::PermissionDenied);
        assert_eq!(classify(404, None, "nope", "x").failure_type, FailureType::ModelNotFound);
        assert_eq!(classify(413, None, "nope", "x").failure_type, FailureType::ContextTooLong);
    }

    #[test]
    fn unmapped_5xx_falls_back_to_server_error_retryable() {
        let f = classify(599, None, "mystery failure", "x");
        assert_eq!(f.failure_type, FailureType::ServerError);
        assert!(f.retryable);
    }

    #[test]
    fn unmapped_4xx_falls_back_to_invalid_request_non_retryable() {
        let f = classify(418, None, "I'm a teapot", "x");
        assert_eq!(f.failure_type, FailureType::InvalidRequest);
        assert!(!f.retryable);
    }

    #[test]
    fn error_code_participates_in_pattern_matching() {
        let f = classify(400, Some("insufficient_quota"), "Request failed", "openai");
        assert_eq!(f.failure_type, FailureType::QuotaExhausted);
    }
}
