use econpipe_core::{Error, Result, SearchApi, SearchOptions, SearchResponse};
use std::time::Instant;

pub const DEFAULT_ENDPOINT: &str = "https://api.valyu.network/v1/deepsearch";

pub fn api_key_from_env() -> Option<String> {
    std::env::var("ECONPIPE_API_KEY")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .or_else(|| {
            std::env::var("VALYU_API_KEY")
                .ok()
                .filter(|v| !v.trim().is_empty())
        })
}

pub fn endpoint_from_env() -> Option<String> {
    std::env::var("ECONPIPE_ENDPOINT")
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// JSON-over-HTTPS adapter for the search/data API.
///
/// Status codes and transport failures are mapped to typed errors here, so nothing downstream
/// has to pattern-match on messages.
#[derive(Debug, Clone)]
pub struct HttpSearchApi {
    client: reqwest::Client,
    api_key: String,
    endpoint: String,
}

impl HttpSearchApi {
    pub fn new(client: reqwest::Client, api_key: String, endpoint: String) -> Self {
        Self {
            client,
            api_key,
            endpoint,
        }
    }

    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = api_key_from_env().ok_or_else(|| {
            Error::NotConfigured("missing ECONPIPE_API_KEY (or VALYU_API_KEY)".to_string())
        })?;
        let endpoint = endpoint_from_env().unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
        Ok(Self::new(client, api_key, endpoint))
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn request_body(query: &str, o: &SearchOptions) -> serde_json::Value {
        let mut body = serde_json::json!({ "query": query });
        // Wire names are snake_case; unset options are omitted so the API applies its defaults.
        if let Some(n) = o.max_num_results {
            body["max_num_results"] = serde_json::json!(n);
        }
        if let Some(t) = o.search_type.as_deref() {
            body["search_type"] = serde_json::json!(t);
        }
        if let Some(src) = o.included_sources.as_ref() {
            body["included_sources"] = serde_json::json!(src);
        }
        if let Some(r) = o.relevance_threshold {
            body["relevance_threshold"] = serde_json::json!(r);
        }
        if let Some(b) = o.is_tool_call {
            body["is_tool_call"] = serde_json::json!(b);
        }
        body
    }
}

fn error_chain(e: &(dyn std::error::Error + 'static)) -> String {
    let mut out = e.to_string();
    let mut cur = e.source();
    while let Some(s) = cur {
        out.push_str(": ");
        out.push_str(&s.to_string());
        cur = s.source();
    }
    out
}

pub(crate) fn classify_transport(e: &reqwest::Error) -> Error {
    let msg = error_chain(e);
    let lower = msg.to_ascii_lowercase();
    if e.is_timeout() {
        return Error::Timeout(msg);
    }
    if lower.contains("dns")
        || lower.contains("failed to lookup address")
        || lower.contains("name or service not known")
        || lower.contains("no such host")
    {
        return Error::Dns(msg);
    }
    if lower.contains("connection reset") || lower.contains("broken pipe") {
        return Error::ConnectionReset(msg);
    }
    if e.is_connect() && lower.contains("timed out") {
        return Error::ConnectTimeout(msg);
    }
    Error::Search(msg)
}

fn classify_status(status: reqwest::StatusCode, body_hint: &str) -> Error {
    let msg = if body_hint.is_empty() {
        format!("search HTTP {status}")
    } else {
        format!("search HTTP {status}: {body_hint}")
    };
    match status.as_u16() {
        401 | 403 => Error::Auth(msg),
        429 => Error::RateLimited(msg),
        400 | 404 | 413 | 422 => Error::InvalidRequest(msg),
        408 | 504 => Error::Timeout(msg),
        _ => Error::Search(msg),
    }
}

#[async_trait::async_trait]
impl SearchApi for HttpSearchApi {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn search(&self, query: &str, options: &SearchOptions) -> Result<SearchResponse> {
        if query.trim().is_empty() {
            return Err(Error::InvalidRequest("query must be non-empty".to_string()));
        }
        let t0 = Instant::now();
        let resp = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .json(&Self::request_body(query, options))
            .send()
            .await
            .map_err(|e| classify_transport(&e))?;

        let status = resp.status();
        if !status.is_success() {
            // Bounded hint only; never echo large bodies into error messages.
            let text = resp.text().await.unwrap_or_default();
            let hint: String = text.trim().chars().take(200).collect();
            return Err(classify_status(status, &hint));
        }

        let parsed: SearchResponse = resp.json().await.map_err(|e| {
            if e.is_timeout() {
                Error::Timeout(e.to_string())
            } else {
                Error::Decode(e.to_string())
            }
        })?;
        if parsed.success == Some(false) {
            let msg = parsed
                .error
                .clone()
                .unwrap_or_else(|| "search reported success=false".to_string());
            return Err(Error::from_message(msg));
        }

        tracing::info!(
            endpoint = %self.endpoint,
            results = parsed.results.len(),
            elapsed_ms = t0.elapsed().as_millis() as u64,
            "search api call"
        );
        Ok(parsed)
    }
}
