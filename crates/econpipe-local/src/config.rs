//! Environment-driven knobs for the dedup service.

use crate::memo::{DEFAULT_MAX_SESSIONS, DEFAULT_MEMO_CAPACITY};
use crate::retry::RetryPolicy;
use std::time::Duration;

pub const DEFAULT_MAX_REQUESTS: usize = 1000;

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<u64>().ok())
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse::<usize>().ok())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    pub memo_capacity: usize,
    pub max_sessions: usize,
    pub max_requests: usize,
    pub retry: RetryPolicy,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            memo_capacity: DEFAULT_MEMO_CAPACITY,
            max_sessions: DEFAULT_MAX_SESSIONS,
            max_requests: DEFAULT_MAX_REQUESTS,
            retry: RetryPolicy::search(),
        }
    }
}

impl ServiceConfig {
    /// Defaults overridden by `ECONPIPE_*` variables; malformed values are ignored.
    pub fn from_env() -> Self {
        let d = Self::default();
        let mut retry = d.retry;
        if let Some(ms) = env_u64("ECONPIPE_TIMEOUT_MS") {
            retry.timeout = Duration::from_millis(ms.clamp(1_000, 120_000));
        }
        if let Some(n) = env_u64("ECONPIPE_MAX_RETRIES") {
            retry.max_retries = n.min(5) as u32;
        }
        Self {
            memo_capacity: env_usize("ECONPIPE_MEMO_CAPACITY")
                .unwrap_or(d.memo_capacity)
                .clamp(1, 10_000),
            max_sessions: env_usize("ECONPIPE_MAX_SESSIONS")
                .unwrap_or(d.max_sessions)
                .clamp(1, 100_000),
            max_requests: env_usize("ECONPIPE_MAX_REQUESTS")
                .unwrap_or(d.max_requests)
                .clamp(1, 100_000),
            retry,
        }
    }
}
