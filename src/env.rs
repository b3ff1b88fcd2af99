// src/env.rs

//! Environment-variable overrides for the retry controller's global caps.
//!
//! Every variable is optional; a missing or malformed value silently
//! falls back to the built-in default rather than erroring the whole
//! process — this is the one place the crate reads `std::env` at all.

use std::env;

pub const MAX_RETRY_ATTEMPTS: &str = "PLANDEX_MAX_RETRY_ATTEMPTS";
pub const MAX_RETRY_DELAY_MS: &str = "PLANDEX_MAX_RETRY_DELAY_MS";
pub const MAX_PROVIDER_RETRY_AFTER_MS: &str = "PLANDEX_MAX_PROVIDER_RETRY_AFTER_MS";
pub const RETRY_IRREVERSIBLE: &str = "PLANDEX_RETRY_IRREVERSIBLE";

pub(crate) fn read_u32(key: &str) -> Option<u32> {
    env::var(key).ok()?.trim().parse().ok()
}

pub(crate) fn read_u64(key: &str) -> Option<u64> {
    env::var(key).ok()?.trim().parse().ok()
}

pub(crate) fn read_bool(key: &str) -> Option<bool> {
    match env::var(key).ok()?.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" => Some(true),
        "false" | "0" | "no" => Some(false),
        _ => None,
    }
}
