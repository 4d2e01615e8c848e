#![cfg(feature = "stdio")]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn text_payload(r: &rmcp::model::CallToolResult) -> serde_json::Value {
    let s = r
        .content
        .first()
        .and_then(|c| c.as_text())
        .map(|t| t.text.clone())
        .unwrap_or_default();
    serde_json::from_str(&s).unwrap_or_default()
}

#[test]
fn econpipe_mcp_stdio_contract() {
    // Spawns the server as a child process against a local fixture; no network or real keys.
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    rt.block_on(async {
        use axum::{routing::post, Json, Router};
        use rmcp::{
            model::CallToolRequestParam,
            service::ServiceExt,
            transport::{ConfigureCommandExt, TokioChildProcess},
        };
        use std::net::SocketAddr;

        let hits = Arc::new(AtomicUsize::new(0));
        let hits_srv = hits.clone();
        let app = Router::new().route(
            "/v1/deepsearch",
            post(move |Json(body): Json<serde_json::Value>| {
                let hits = hits_srv.clone();
                async move {
                    hits.fetch_add(1, Ordering::SeqCst);
                    let q = body["query"].as_str().unwrap_or_default().to_string();
                    Json(serde_json::json!({
                        "success": true,
                        "results": [
                            {"title": format!("{q} release"), "url": "https://stats.example/cpi?utm_source=feed", "content": "CPI rose 0.2%"}
                        ]
                    }))
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr: SocketAddr = listener.local_addr()?;
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("axum serve");
        });

        let bin = assert_cmd::cargo::cargo_bin!("econpipe");
        let service = ()
            .serve(TokioChildProcess::new(
                tokio::process::Command::new(bin).configure(|cmd| {
                    cmd.args(["mcp-stdio"]);
                    cmd.env("ECONPIPE_API_KEY", "test-key");
                    cmd.env("ECONPIPE_ENDPOINT", format!("http://{addr}/v1/deepsearch"));
                    cmd.env_remove("ECONPIPE_ENV_FILE");
                    cmd.env("ECONPIPE_LOG", "error");
                }),
            )?)
            .await?;

        let tools = service.list_tools(Default::default()).await?;
        let names: BTreeSet<String> = tools
            .tools
            .iter()
            .map(|t| t.name.clone().into_owned())
            .collect();
        for must_have in ["economic_search", "econpipe_usage"] {
            assert!(names.contains(must_have), "missing tool {must_have}");
        }

        // Missing query: invalid_params, not a transport error.
        let bad = service
            .call_tool(CallToolRequestParam {
                name: "economic_search".into(),
                arguments: Some(serde_json::json!({}).as_object().cloned().unwrap()),
            })
            .await?;
        let bad_v = text_payload(&bad);
        assert_eq!(bad_v["kind"].as_str(), Some("economic_search"));
        assert_eq!(bad_v["ok"].as_bool(), Some(false));
        assert_eq!(bad_v["error"]["code"].as_str(), Some("invalid_params"));

        let args = serde_json::json!({
            "query": "US CPI",
            "session_id": "conv-9",
            "included_sources": ["bls", "fred"]
        });
        let first = service
            .call_tool(CallToolRequestParam {
                name: "economic_search".into(),
                arguments: Some(args.as_object().cloned().unwrap()),
            })
            .await?;
        let first_v = text_payload(&first);
        assert_eq!(first_v["schema_version"].as_u64(), Some(1));
        assert_eq!(first_v["ok"].as_bool(), Some(true));
        assert_eq!(first_v["found"].as_bool(), Some(true));
        let id = first_v["results"][0]["id"].as_str().unwrap_or("").to_string();
        assert_eq!(id.len(), 36, "fingerprint should be uuid-shaped: {id}");

        // Same query, reordered sources, different spacing: memo hit.
        let again = service
            .call_tool(CallToolRequestParam {
                name: "economic_search".into(),
                arguments: Some(
                    serde_json::json!({
                        "query": "  us   cpi ",
                        "session_id": "conv-9",
                        "included_sources": ["fred", "bls"]
                    })
                    .as_object()
                    .cloned()
                    .unwrap(),
                ),
            })
            .await?;
        let again_v = text_payload(&again);
        assert_eq!(again_v["results"][0]["id"].as_str(), Some(id.as_str()));
        assert_eq!(first_v["memo_hit"].as_bool(), Some(false));
        assert_eq!(again_v["memo_hit"].as_bool(), Some(true));
        assert!(again_v["total_deduction_dollars"].is_null());
        assert_eq!(hits.load(Ordering::SeqCst), 1);

        let usage = service
            .call_tool(CallToolRequestParam {
                name: "econpipe_usage".into(),
                arguments: Some(serde_json::json!({}).as_object().cloned().unwrap()),
            })
            .await?;
        let usage_v = text_payload(&usage);
        assert_eq!(usage_v["configured"].as_bool(), Some(true));
        assert_eq!(usage_v["stats"]["external_calls"].as_u64(), Some(1));
        assert_eq!(usage_v["stats"]["memo_hits"].as_u64(), Some(1));
        assert_eq!(usage_v["tool_calls"]["economic_search"].as_u64(), Some(3));

        service.cancel().await?;
        Ok::<(), Box<dyn std::error::Error>>(())
    })
    .expect("mcp stdio contract");
}
