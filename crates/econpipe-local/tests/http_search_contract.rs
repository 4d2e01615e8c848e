use axum::{
    http::{HeaderMap, StatusCode},
    routing::post,
    Json, Router,
};
use econpipe_core::{CallContext, Error, SearchApi, SearchOptions};
use econpipe_local::{DedupService, HttpSearchApi, RetryPolicy, ServiceConfig};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

async fn serve(app: Router) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr: SocketAddr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    addr
}

fn api_for(addr: SocketAddr, key: &str) -> HttpSearchApi {
    HttpSearchApi::new(
        reqwest::Client::new(),
        key.to_string(),
        format!("http://{addr}/v1/deepsearch"),
    )
}

/// Echoes the query back as two records, one of which repeats a DOI under another URL.
fn fixture(hits: Arc<AtomicUsize>, delay_ms: u64) -> Router {
    Router::new().route(
        "/v1/deepsearch",
        post(move |headers: HeaderMap, Json(body): Json<serde_json::Value>| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                if headers.get("x-api-key").and_then(|v| v.to_str().ok()) != Some("good-key") {
                    return (
                        StatusCode::UNAUTHORIZED,
                        Json(serde_json::json!({"success": false, "error": "unauthorized"})),
                    );
                }
                let q = body["query"].as_str().unwrap_or_default().to_string();
                if q == "rate me" {
                    return (
                        StatusCode::TOO_MANY_REQUESTS,
                        Json(serde_json::json!({"success": false, "error": "slow down"})),
                    );
                }
                if q == "soft failure" {
                    return (
                        StatusCode::OK,
                        Json(serde_json::json!({"success": false, "error": "upstream timeout"})),
                    );
                }
                (
                    StatusCode::OK,
                    Json(serde_json::json!({
                        "success": true,
                        "tx_id": "tx_fixture",
                        "total_deduction_dollars": 0.002,
                        "results": [
                            {"title": format!("{q} paper"), "url": "https://doi.org/10.1000/xyz", "content": "", "source": "papers"},
                            {"title": format!("{q} mirror"), "url": "https://mirror.example/10.1000/XYZ", "content": "", "source": "papers"},
                            {"title": format!("{q} series"), "url": format!("https://data.example/series?q={}&utm_source=x", q.replace(' ', "+")), "content": {"values": [1, 2]}, "source": "stats"}
                        ],
                        "max_num_results": body.get("max_num_results").cloned().unwrap_or_default()
                    })),
                )
            }
        }),
    )
}

#[tokio::test]
async fn http_adapter_parses_results_and_cost() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = serve(fixture(hits.clone(), 0)).await;
    let api = api_for(addr, "good-key");
    let resp = api
        .search("us gdp", &SearchOptions::default())
        .await
        .expect("search");
    assert_eq!(resp.results.len(), 3);
    assert_eq!(resp.tx_id.as_deref(), Some("tx_fixture"));
    assert_eq!(resp.total_deduction_dollars, Some(0.002));
    assert_eq!(resp.results[2].content, r#"{"values":[1,2]}"#);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn http_adapter_maps_status_codes_to_typed_errors() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = serve(fixture(hits.clone(), 0)).await;

    let err = api_for(addr, "bad-key")
        .search("gdp", &SearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Auth(_)), "got {err:?}");

    let err = api_for(addr, "good-key")
        .search("rate me", &SearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::RateLimited(_)), "got {err:?}");

    let err = api_for(addr, "good-key")
        .search("soft failure", &SearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got {err:?}");

    let err = api_for(addr, "good-key")
        .search("   ", &SearchOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::InvalidRequest(_)), "got {err:?}");
    assert_eq!(hits.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn service_auth_failures_hit_the_network_once() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = serve(fixture(hits.clone(), 0)).await;
    let svc = DedupService::new(Arc::new(api_for(addr, "bad-key")), ServiceConfig::default());
    let err = svc
        .search(
            "economic_search",
            "gdp",
            &SearchOptions::default(),
            &CallContext::new(Some("s1".into()), None),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Auth(_)));
    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn service_coalesces_concurrent_http_calls_and_memoizes_per_session() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = serve(fixture(hits.clone(), 200)).await;
    let svc = Arc::new(DedupService::new(
        Arc::new(api_for(addr, "good-key")),
        ServiceConfig::default(),
    ));
    let ctx = CallContext::new(Some("conv-1".into()), None);
    let opts_a = SearchOptions {
        included_sources: Some(vec!["papers".into(), "stats".into()]),
        ..Default::default()
    };
    let opts_b = SearchOptions {
        included_sources: Some(vec!["stats".into(), "papers".into()]),
        ..Default::default()
    };

    let mut tasks = Vec::new();
    for i in 0..8 {
        let svc = Arc::clone(&svc);
        let ctx = ctx.clone();
        let opts = if i % 2 == 0 { opts_a.clone() } else { opts_b.clone() };
        tasks.push(tokio::spawn(async move {
            svc.search("economic_search", "US GDP", &opts, &ctx).await
        }));
    }
    let mut outs = Vec::new();
    for t in tasks {
        outs.push(t.await.expect("join").expect("search"));
    }
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    // DOI duplicate collapsed within the response.
    assert!(outs.iter().all(|o| o.records.len() == 2));

    let again = svc
        .search("economic_search", "us gdp", &opts_b, &ctx)
        .await
        .expect("memo hit");
    assert_eq!(again.records, outs[0].records);
    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert!(svc.stats().memo_hits >= 1);
}

#[tokio::test]
async fn service_times_out_slow_upstream_without_retrying_forever() {
    let hits = Arc::new(AtomicUsize::new(0));
    let addr = serve(fixture(hits.clone(), 2_000)).await;
    let cfg = ServiceConfig {
        retry: RetryPolicy::light()
            .with_timeout(Duration::from_millis(100))
            .with_max_retries(0),
        ..Default::default()
    };
    let svc = DedupService::new(Arc::new(api_for(addr, "good-key")), cfg);
    let err = svc
        .search(
            "economic_search",
            "gdp",
            &SearchOptions::default(),
            &CallContext::default(),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout(_)), "got {err:?}");
    assert!(err.is_retryable());
}
