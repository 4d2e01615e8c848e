//! Tool bodies shared by the CLI and the MCP server.
//!
//! Each function returns a complete JSON payload (envelope included); transport wrappers only
//! serialize it.

use super::envelope::{add_envelope_fields, error_obj, warning_hints_from, ErrorCode};
use econpipe_core::{CallContext, Error, SearchOptions};
use econpipe_local::search::{api_key_from_env, endpoint_from_env, DEFAULT_ENDPOINT};
use econpipe_local::{default_http_client, DedupService, HttpSearchApi, ServiceConfig};
use serde::Deserialize;
use std::sync::Arc;

pub(crate) const DEFAULT_TOOL: &str = "economic_search";

/// The process-wide service, or the reason it could not be built (usually a missing key).
///
/// Kept as a value so the MCP server can start unconfigured and report `not_configured` per call.
pub(crate) type ServiceHandle = Result<Arc<DedupService>, Error>;

pub(crate) fn build_service(endpoint: Option<String>) -> ServiceHandle {
    let api_key = api_key_from_env().ok_or_else(|| {
        Error::NotConfigured("missing ECONPIPE_API_KEY (or VALYU_API_KEY)".to_string())
    })?;
    let endpoint = endpoint
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .or_else(endpoint_from_env)
        .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string());
    let api = HttpSearchApi::new(default_http_client()?, api_key, endpoint);
    let config = ServiceConfig::from_env();
    tracing::debug!(
        memo_capacity = config.memo_capacity,
        timeout_ms = config.retry.timeout.as_millis() as u64,
        max_retries = config.retry.max_retries,
        "dedup service configured"
    );
    Ok(Arc::new(DedupService::new(Arc::new(api), config)))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[cfg_attr(feature = "stdio", derive(schemars::JsonSchema))]
pub(crate) struct EconomicSearchArgs {
    /// Natural-language query (required).
    #[serde(default)]
    pub query: Option<String>,
    /// Conversation id. Repeat searches within a session are served from memory.
    #[serde(default)]
    pub session_id: Option<String>,
    /// Turn id. A record is returned at most once per request_id across tool calls.
    #[serde(default)]
    pub request_id: Option<String>,
    /// Logical tool name used to namespace cache keys (default: economic_search).
    #[serde(default)]
    pub tool: Option<String>,
    #[serde(default)]
    pub max_num_results: Option<usize>,
    /// Source identifiers to restrict the search to (order does not matter).
    #[serde(default)]
    pub included_sources: Option<Vec<String>>,
    /// Search scope, e.g. "all", "web", "proprietary".
    #[serde(default)]
    pub search_type: Option<String>,
    #[serde(default)]
    pub relevance_threshold: Option<f64>,
}

impl EconomicSearchArgs {
    fn options(&self) -> SearchOptions {
        SearchOptions {
            max_num_results: self.max_num_results,
            search_type: self
                .search_type
                .as_deref()
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string),
            included_sources: self.included_sources.clone().filter(|v| !v.is_empty()),
            relevance_threshold: self.relevance_threshold,
            is_tool_call: Some(true),
        }
    }
}

pub(crate) async fn economic_search(
    service: &ServiceHandle,
    args: EconomicSearchArgs,
) -> serde_json::Value {
    let kind = DEFAULT_TOOL;
    let t0 = std::time::Instant::now();
    let query = args.query.as_deref().map(str::trim).unwrap_or("").to_string();
    let tool = args
        .tool
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_TOOL)
        .to_string();
    let ctx = CallContext::new(args.session_id.clone(), args.request_id.clone());
    let options = args.options();
    let request = serde_json::json!({
        "query": query,
        "tool": tool,
        "session_id": ctx.session_id,
        "request_id": ctx.request_id,
        "options": options,
    });

    let mut payload = if query.is_empty() {
        serde_json::json!({
            "ok": false,
            "request": request,
            "error": error_obj(
                ErrorCode::InvalidParams,
                "query must be non-empty",
                ErrorCode::InvalidParams.default_hint(),
            ),
        })
    } else {
        match service {
            Err(e) => failure(request, e),
            Ok(svc) => match svc.search(&tool, &query, &options, &ctx).await {
                Ok(out) => {
                    let mut warnings: Vec<&'static str> = Vec::new();
                    if !out.found {
                        warnings.push("not_found");
                    }
                    if ctx.session_id.is_none() {
                        warnings.push("no_session_memo");
                    }
                    serde_json::json!({
                        "ok": true,
                        "found": out.found,
                        "request": request,
                        "result_count": out.records.len(),
                        "results": out.records,
                        "total_deduction_dollars": out.total_deduction_dollars,
                        "tx_id": out.tx_id,
                        "memo_hit": out.memo_hit,
                        "warnings": warnings,
                        "warning_hints": warning_hints_from(&warnings),
                    })
                }
                Err(e) => failure(request, &e),
            },
        }
    };
    add_envelope_fields(&mut payload, kind, t0.elapsed().as_millis());
    payload
}

fn failure(request: serde_json::Value, e: &Error) -> serde_json::Value {
    let code = ErrorCode::from_kind(e.kind());
    tracing::debug!(code = code.as_str(), error = %e, "economic_search failed");
    serde_json::json!({
        "ok": false,
        "request": request,
        "error": error_obj(code, e.message(), code.default_hint()),
    })
}

pub(crate) fn usage(service: &ServiceHandle, tool_calls: serde_json::Value) -> serde_json::Value {
    let t0 = std::time::Instant::now();
    let mut payload = serde_json::json!({
        "ok": true,
        "configured": service.is_ok(),
        "tool_calls": tool_calls,
        "stats": service.as_ref().ok().map(|s| s.stats()),
    });
    add_envelope_fields(&mut payload, "econpipe_usage", t0.elapsed().as_millis());
    payload
}
