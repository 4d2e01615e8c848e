use axum::{routing::post, Json, Router};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Offline fixture for the search API. Every query returns the same DOI-identified paper plus
/// one query-specific series, so cross-query dedupe is observable.
fn start_fixture(rt: &tokio::runtime::Runtime, hits: Arc<AtomicUsize>) -> SocketAddr {
    let app = Router::new().route(
        "/v1/deepsearch",
        post(move |Json(body): Json<serde_json::Value>| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                let q = body["query"].as_str().unwrap_or_default().to_string();
                if q == "nothing" {
                    return Json(serde_json::json!({"success": true, "results": []}));
                }
                Json(serde_json::json!({
                    "success": true,
                    "tx_id": format!("tx-{q}"),
                    "total_deduction_dollars": 0.001,
                    "results": [
                        {"title": "Output gaps revisited", "url": "https://doi.org/10.5555/gap.2024", "content": "..."},
                        {"title": format!("{q} (series)"), "url": format!("https://data.example/{}", q.replace(' ', "-")), "content": "1,2,3"}
                    ]
                }))
            }
        }),
    );
    rt.block_on(async {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind");
        let addr = listener.local_addr().expect("addr");
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("axum serve");
        });
        addr
    })
}

fn econpipe(addr: SocketAddr) -> std::process::Command {
    let mut cmd = std::process::Command::new(assert_cmd::cargo::cargo_bin!("econpipe"));
    cmd.env("ECONPIPE_API_KEY", "test-key")
        .env("ECONPIPE_ENDPOINT", format!("http://{addr}/v1/deepsearch"))
        .env_remove("VALYU_API_KEY")
        .env_remove("ECONPIPE_ENV_FILE")
        .env_remove("ECONPIPE_SESSION_ID")
        .env("ECONPIPE_LOG", "error");
    cmd
}

fn run_json(cmd: &mut std::process::Command) -> (bool, serde_json::Value) {
    let out = cmd.output().expect("run econpipe search");
    let s = String::from_utf8_lossy(&out.stdout);
    let v: serde_json::Value = serde_json::from_str(&s).expect("parse search json");
    (out.status.success(), v)
}

#[test]
fn search_repeat_in_one_session_is_served_from_memo() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = start_fixture(&rt, hits.clone());

    let (ok, v) = run_json(econpipe(addr).args([
        "search",
        "--query",
        "Euro area output gap",
        "--session-id",
        "conv-1",
        "--repeat",
        "3",
    ]));
    assert!(ok, "search failed: {v}");
    assert_eq!(v["kind"].as_str(), Some("search"));
    assert_eq!(v["ok"].as_bool(), Some(true));
    assert_eq!(v["found"].as_bool(), Some(true));
    assert_eq!(v["runs"].as_array().map(|r| r.len()), Some(3));
    assert_eq!(v["stats"]["external_calls"].as_u64(), Some(1));
    assert_eq!(v["stats"]["memo_hits"].as_u64(), Some(2));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[test]
fn search_request_id_surfaces_shared_records_once() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = start_fixture(&rt, hits.clone());

    let (ok, v) = run_json(econpipe(addr).args([
        "search",
        "--query",
        "output gap",
        "--query",
        "potential output",
        "--session-id",
        "conv-2",
        "--request-id",
        "turn-1",
    ]));
    assert!(ok, "search failed: {v}");
    let results = v["results"].as_array().expect("results");
    // The shared DOI paper appears once; each query contributes its own series.
    assert_eq!(results.len(), 3);
    let ids: std::collections::BTreeSet<&str> =
        results.iter().filter_map(|r| r["id"].as_str()).collect();
    assert_eq!(ids.len(), 3);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn search_empty_result_is_ok_but_not_found() {
    let rt = tokio::runtime::Runtime::new().expect("tokio runtime");
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = start_fixture(&rt, hits);

    let (ok, v) = run_json(econpipe(addr).args(["search", "--query", "nothing"]));
    assert!(ok);
    assert_eq!(v["ok"].as_bool(), Some(true));
    assert_eq!(v["found"].as_bool(), Some(false));
    assert_eq!(v["results"].as_array().map(|r| r.len()), Some(0));
}

#[test]
fn search_without_key_fails_not_configured() {
    let out = std::process::Command::new(assert_cmd::cargo::cargo_bin!("econpipe"))
        .args(["search", "--query", "gdp"])
        .env_remove("ECONPIPE_API_KEY")
        .env_remove("VALYU_API_KEY")
        .env_remove("ECONPIPE_ENV_FILE")
        .output()
        .expect("run econpipe search");
    assert!(!out.status.success());
    let v: serde_json::Value =
        serde_json::from_str(&String::from_utf8_lossy(&out.stdout)).expect("parse search json");
    assert_eq!(v["ok"].as_bool(), Some(false));
    assert_eq!(v["error"]["code"].as_str(), Some("not_configured"));
    assert_eq!(v["error"]["retryable"].as_bool(), Some(false));
    assert!(v["stats"].is_null());
}
