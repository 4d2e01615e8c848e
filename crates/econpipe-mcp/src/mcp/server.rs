use super::tools::{self, EconomicSearchArgs, ServiceHandle};
use rmcp::{
    handler::server::router::tool::ToolRouter as RmcpToolRouter,
    handler::server::wrapper::Parameters,
    model::{CallToolResult, Content, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
    transport::stdio,
    ErrorData as McpError, ServiceExt,
};
use schemars::JsonSchema;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

fn tool_result(payload: serde_json::Value) -> CallToolResult {
    // Structured content for machine consumers, plus a text copy for clients that only read
    // `content[0].text`.
    let mut r = CallToolResult::structured(payload.clone());
    r.content = vec![Content::text(payload.to_string())];
    r
}

#[derive(Debug, Deserialize, JsonSchema, Default)]
struct EconpipeUsageArgs {}

#[derive(Clone)]
pub(crate) struct EconpipeMcp {
    tool_router: RmcpToolRouter<Self>,
    service: ServiceHandle,
    tool_calls: Arc<Mutex<BTreeMap<String, u64>>>,
}

#[tool_router]
impl EconpipeMcp {
    pub(crate) fn new() -> Self {
        let service = tools::build_service(None);
        if let Err(e) = &service {
            // Not fatal: tools report not_configured until the server is restarted with a key.
            tracing::warn!(error = %e, "search service unavailable");
        }
        Self {
            tool_router: Self::tool_router(),
            service,
            tool_calls: Arc::new(Mutex::new(BTreeMap::new())),
        }
    }

    fn stats_inc_tool(&self, kind: &str) {
        let mut m = self.tool_calls.lock().unwrap_or_else(|e| e.into_inner());
        *m.entry(kind.to_string()).or_insert(0) += 1;
    }

    #[tool(
        description = "Search economic data and literature. Repeat searches in a session_id are served from memory; records already returned for a request_id are omitted."
    )]
    async fn economic_search(
        &self,
        params: Parameters<Option<EconomicSearchArgs>>,
    ) -> Result<CallToolResult, McpError> {
        self.stats_inc_tool("economic_search");
        let args = params.0.unwrap_or_default();
        let payload = tools::economic_search(&self.service, args).await;
        Ok(tool_result(payload))
    }

    #[tool(description = "Report in-process dedup/memo counters since server start (no secrets)")]
    async fn econpipe_usage(
        &self,
        _params: Parameters<Option<EconpipeUsageArgs>>,
    ) -> Result<CallToolResult, McpError> {
        self.stats_inc_tool("econpipe_usage");
        let calls = {
            let m = self.tool_calls.lock().unwrap_or_else(|e| e.into_inner());
            serde_json::to_value(&*m).unwrap_or_default()
        };
        Ok(tool_result(tools::usage(&self.service, calls)))
    }
}

#[tool_handler]
impl rmcp::ServerHandler for EconpipeMcp {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Deduplicated economic search. Pass session_id (conversation) and request_id (turn) so repeat searches are free and records are not shown twice. Outputs are JSON and schema-versioned."
                    .to_string(),
            ),
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            ..Default::default()
        }
    }
}

pub(crate) async fn serve_stdio() -> Result<(), McpError> {
    let svc = EconpipeMcp::new();
    let running = svc
        .serve(stdio())
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    // Keep the stdio server alive until the client closes.
    running
        .waiting()
        .await
        .map_err(|e| McpError::internal_error(e.to_string(), None))?;
    Ok(())
}
