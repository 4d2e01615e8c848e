use econpipe_core::ErrorKind;
use serde::Serialize;

pub(crate) fn warning_hint(code: &'static str) -> Option<&'static str> {
    match code {
        "not_found" => Some(
            "The search returned no records (or every record was already shown in this request). Broaden the query, drop included_sources, or lower relevance_threshold.",
        ),
        "no_session_memo" => Some(
            "No session_id was provided, so this result was not memoized. Pass a stable session_id per conversation to avoid paying for repeat searches.",
        ),
        _ => None,
    }
}

pub(crate) fn warning_hints_from(codes: &[&'static str]) -> serde_json::Value {
    let mut m = serde_json::Map::new();
    for c in codes {
        if let Some(h) = warning_hint(c) {
            m.insert((*c).to_string(), serde_json::json!(h));
        }
    }
    serde_json::Value::Object(m)
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum ErrorCode {
    InvalidParams,
    NotConfigured,
    Unauthorized,
    RateLimited,
    Timeout,
    NetworkError,
    SearchFailed,
    UnexpectedError,
}

impl ErrorCode {
    pub(crate) fn as_str(self) -> &'static str {
        match self {
            Self::InvalidParams => "invalid_params",
            Self::NotConfigured => "not_configured",
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::Timeout => "timeout",
            Self::NetworkError => "network_error",
            Self::SearchFailed => "search_failed",
            Self::UnexpectedError => "unexpected_error",
        }
    }

    /// Whether the same call may succeed later without changing anything.
    pub(crate) fn retryable(self) -> bool {
        match self {
            Self::Timeout | Self::NetworkError => true,
            Self::InvalidParams
            | Self::NotConfigured
            | Self::Unauthorized
            | Self::RateLimited
            | Self::SearchFailed
            | Self::UnexpectedError => false,
        }
    }

    pub(crate) fn from_kind(kind: ErrorKind) -> Self {
        match kind {
            ErrorKind::NotConfigured => Self::NotConfigured,
            ErrorKind::Auth => Self::Unauthorized,
            ErrorKind::RateLimited => Self::RateLimited,
            ErrorKind::Timeout => Self::Timeout,
            ErrorKind::ConnectionReset | ErrorKind::Dns | ErrorKind::ConnectTimeout => {
                Self::NetworkError
            }
            ErrorKind::InvalidRequest => Self::InvalidParams,
            ErrorKind::Search | ErrorKind::Decode => Self::SearchFailed,
            ErrorKind::Internal => Self::UnexpectedError,
        }
    }

    pub(crate) fn default_hint(self) -> &'static str {
        match self {
            Self::InvalidParams => "Check the arguments (query must be non-empty).",
            Self::NotConfigured => "Set ECONPIPE_API_KEY (or VALYU_API_KEY) in the server environment.",
            Self::Unauthorized => "The API key was rejected. Check ECONPIPE_API_KEY.",
            Self::RateLimited => {
                "The search API is rate-limiting (HTTP 429). Retry later or reduce call volume."
            }
            Self::Timeout => "The search API did not answer in time after retries. Retry later.",
            Self::NetworkError => "Transient network failure after retries. Retry later.",
            Self::SearchFailed => "The search API returned an error. See message for details.",
            Self::UnexpectedError => "Unexpected internal error.",
        }
    }
}

pub(crate) fn add_envelope_fields(payload: &mut serde_json::Value, kind: &str, elapsed_ms: u128) {
    payload["schema_version"] = serde_json::json!(super::SCHEMA_VERSION);
    payload["kind"] = serde_json::json!(kind);
    payload["elapsed_ms"] = serde_json::json!(elapsed_ms);
    // `request` is null or an object, never missing.
    if payload.get("request").is_none() {
        payload["request"] = serde_json::Value::Null;
    }
}

pub(crate) fn error_obj(
    code: ErrorCode,
    message: impl ToString,
    hint: impl ToString,
) -> serde_json::Value {
    #[derive(Serialize)]
    struct ErrorObject {
        code: &'static str,
        message: String,
        hint: String,
        retryable: bool,
    }

    let e = ErrorObject {
        code: code.as_str(),
        message: message.to_string(),
        hint: hint.to_string(),
        retryable: code.retryable(),
    };
    match serde_json::to_value(e) {
        Ok(v) => v,
        Err(_) => serde_json::json!({
            "code": code.as_str(),
            "message": message.to_string(),
            "hint": hint.to_string(),
            "retryable": code.retryable()
        }),
    }
}
