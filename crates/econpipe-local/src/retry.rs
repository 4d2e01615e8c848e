//! Per-attempt timeout with exponential backoff for transient failures.

use econpipe_core::{Error, Result, SearchApi, SearchOptions, SearchResponse};
use std::future::Future;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Budget for a single attempt.
    pub timeout: Duration,
    /// Additional attempts after the first.
    pub max_retries: u32,
    /// Delay before retry `n` (0-based) is `base_delay * 2^n`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::search()
    }
}

impl RetryPolicy {
    pub const fn search() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }

    /// Lighter fetch-style calls.
    pub const fn fetch() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }

    pub const fn light() -> Self {
        Self {
            timeout: Duration::from_secs(15),
            max_retries: 2,
            base_delay: Duration::from_secs(1),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay
            .saturating_mul(1u32.checked_shl(attempt).unwrap_or(u32::MAX))
    }
}

/// Run `call` until it succeeds, fails with a non-transient error, or retries run out.
///
/// Each attempt races a timer; losing the race counts as [`Error::Timeout`]. The last error is
/// returned once retries are exhausted.
pub async fn retry_with_timeout<T, F, Fut>(policy: RetryPolicy, mut call: F) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt: u32 = 0;
    loop {
        let out = match tokio::time::timeout(policy.timeout, call()).await {
            Ok(r) => r,
            Err(_) => Err(Error::Timeout(format!(
                "no response within {}ms",
                policy.timeout.as_millis()
            ))),
        };
        match out {
            Ok(v) => return Ok(v),
            Err(e) if e.is_retryable() && attempt < policy.max_retries => {
                let delay = policy.backoff(attempt);
                tracing::warn!(
                    attempt,
                    kind = %e.kind(),
                    delay_ms = delay.as_millis() as u64,
                    "transient failure; retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(e) => return Err(e),
        }
    }
}

pub async fn call_with_timeout(
    api: &dyn SearchApi,
    query: &str,
    options: &SearchOptions,
    policy: RetryPolicy,
) -> Result<SearchResponse> {
    retry_with_timeout(policy, || api.search(query, options)).await
}
