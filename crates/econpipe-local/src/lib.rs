//! In-process request dedup and memoization in front of a search/data API.
//!
//! The pieces compose leaf-first: [`canon`] builds keys, [`identity`] fingerprints records,
//! [`dedupe`] filters them, [`inflight`] collapses concurrent calls, [`memo`] caches per
//! session, [`retry`] wraps the external call. [`service::DedupService`] wires them together.

pub use econpipe_core::{Error, Result};

pub mod canon;
pub mod config;
pub mod dedupe;
pub mod identity;
pub mod inflight;
pub mod memo;
mod recency;
pub mod retry;
pub mod search;
pub mod service;

pub use canon::{build_tool_key, canon_options, canon_query};
pub use config::ServiceConfig;
pub use dedupe::{dedupe_by, RequestSeen};
pub use identity::result_id;
pub use inflight::Coalescer;
pub use memo::MemoStore;
pub use retry::{call_with_timeout, RetryPolicy};
pub use search::HttpSearchApi;
pub use service::{DedupService, ServiceStats};

/// Build a reqwest client with conservative connect/overall timeouts.
///
/// The per-attempt timeout in [`RetryPolicy`] is enforced separately; this is only the
/// outer safety net against stalled sockets.
pub fn default_http_client() -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .user_agent("econpipe-local/0.1")
        .connect_timeout(std::time::Duration::from_secs(10))
        .timeout(std::time::Duration::from_secs(120))
        .build()
        .map_err(|e| Error::Internal(e.to_string()))
}
