use serde::{Deserialize, Deserializer, Serialize};

/// Failure classes surfaced by search adapters and the dedup layer.
///
/// Every variant carries the original message. The enum is `Clone` because a coalesced call
/// hands the same outcome to every subscriber.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("not configured: {0}")]
    NotConfigured(String),
    #[error("unauthorized: {0}")]
    Auth(String),
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("timed out: {0}")]
    Timeout(String),
    #[error("connection reset: {0}")]
    ConnectionReset(String),
    #[error("dns lookup failed: {0}")]
    Dns(String),
    #[error("connect timed out: {0}")]
    ConnectTimeout(String),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("search failed: {0}")]
    Search(String),
    #[error("decode failed: {0}")]
    Decode(String),
    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    NotConfigured,
    Auth,
    RateLimited,
    Timeout,
    ConnectionReset,
    Dns,
    ConnectTimeout,
    InvalidRequest,
    Search,
    Decode,
    Internal,
}

impl ErrorKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::NotConfigured => "not_configured",
            Self::Auth => "auth",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::ConnectionReset => "connection_reset",
            Self::Dns => "dns",
            Self::ConnectTimeout => "connect_timeout",
            Self::InvalidRequest => "invalid_request",
            Self::Search => "search_failed",
            Self::Decode => "decode_failed",
            Self::Internal => "internal",
        }
    }

    /// Transient network failures. Rate limits are deliberately not in this set: they are
    /// reported to the caller and left for a later retry.
    pub fn is_transient(self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::ConnectionReset | Self::Dns | Self::ConnectTimeout
        )
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NotConfigured(_) => ErrorKind::NotConfigured,
            Self::Auth(_) => ErrorKind::Auth,
            Self::RateLimited(_) => ErrorKind::RateLimited,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::ConnectionReset(_) => ErrorKind::ConnectionReset,
            Self::Dns(_) => ErrorKind::Dns,
            Self::ConnectTimeout(_) => ErrorKind::ConnectTimeout,
            Self::InvalidRequest(_) => ErrorKind::InvalidRequest,
            Self::Search(_) => ErrorKind::Search,
            Self::Decode(_) => ErrorKind::Decode,
            Self::Internal(_) => ErrorKind::Internal,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::NotConfigured(m)
            | Self::Auth(m)
            | Self::RateLimited(m)
            | Self::Timeout(m)
            | Self::ConnectionReset(m)
            | Self::Dns(m)
            | Self::ConnectTimeout(m)
            | Self::InvalidRequest(m)
            | Self::Search(m)
            | Self::Decode(m)
            | Self::Internal(m) => m,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_transient()
    }

    /// Classify an error that only exists as a message (e.g. an upstream `error` string).
    ///
    /// Substring matching is brittle; adapters that see status codes or typed transport
    /// errors should construct the variant directly instead.
    pub fn from_message(message: impl Into<String>) -> Self {
        let message = message.into();
        let lower = message.to_ascii_lowercase();
        if lower.contains("401") || lower.contains("unauthorized") {
            Self::Auth(message)
        } else if lower.contains("429") || lower.contains("too many requests") {
            Self::RateLimited(message)
        } else if message.contains("ENOTFOUND") {
            Self::Dns(message)
        } else if message.contains("ECONNRESET") {
            Self::ConnectionReset(message)
        } else if message.contains("ETIMEDOUT") {
            Self::ConnectTimeout(message)
        } else if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout(message)
        } else {
            Self::Search(message)
        }
    }
}

/// Options forwarded to the search API. Unset fields are omitted on the wire.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_num_results: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub search_type: Option<String>,
    /// Treated as a set: order does not affect cache keys.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub included_sources: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub relevance_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_tool_call: Option<bool>,
}

impl SearchOptions {
    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

fn string_or_json<'de, D>(de: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    // Dataset sources return structured `content`; keep it as JSON text.
    let v = serde_json::Value::deserialize(de)?;
    Ok(match v {
        serde_json::Value::Null => String::new(),
        serde_json::Value::String(s) => s,
        other => other.to_string(),
    })
}

/// One record as returned by the search API, before it is fingerprinted.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawRecord {
    #[serde(default, deserialize_with = "string_or_json")]
    pub title: String,
    #[serde(default, deserialize_with = "string_or_json")]
    pub url: String,
    #[serde(default, deserialize_with = "string_or_json")]
    pub content: String,
    #[serde(
        default,
        alias = "publication_date",
        skip_serializing_if = "Option::is_none"
    )]
    pub date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Domain natural key (e.g. a statistical registry series id), when the source has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A fingerprinted record. `id` is derived from the record content, never random.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: String,
    #[serde(flatten)]
    pub raw: RawRecord,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResponse {
    #[serde(default)]
    pub results: Vec<RawRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_deduction_dollars: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    /// Some deployments answer HTTP 200 with `success: false` and an `error` string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// What the dedup layer hands back to a tool: fingerprinted, deduplicated records.
///
/// An empty result is not an error; `found` is false.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub found: bool,
    pub records: Vec<ResultRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total_deduction_dollars: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tx_id: Option<String>,
    /// Served from the session memo; no external call and no deduction.
    #[serde(default)]
    pub memo_hit: bool,
}

/// Caller identity taken from the surrounding request context. Opaque strings.
///
/// `session_id` scopes memoization (one conversation); `request_id` scopes cross-call dedup
/// (one user turn). Either may be absent.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallContext {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
}

impl CallContext {
    pub fn new(session_id: Option<String>, request_id: Option<String>) -> Self {
        let clean = |s: Option<String>| s.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
        Self {
            session_id: clean(session_id),
            request_id: clean(request_id),
        }
    }
}

#[async_trait::async_trait]
pub trait SearchApi: Send + Sync {
    fn name(&self) -> &'static str;
    async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse>;
}
