// tests/api_http.rs
//
// HTTP-level tests for the public API Router without opening sockets.
// We exercise the router directly via tower::ServiceExt::oneshot.
//
// Covered:
// - GET /health
// - POST /analyze (success, validation failure, degraded unavailability)
// - GET /feed (SSE content type, resume header accepted)
// - GET /debug/breakers

use std::sync::Arc;

use axum::{
    body::{self, Body},
    http::{Request, StatusCode},
    Router,
};
use futures_util::StreamExt as _;
use serde_json::{json, Value as Json};
use tower::ServiceExt as _; // for `oneshot`

use ward_intel::api::{create_router, AppState};
use ward_intel::breaker::BreakerTuning;
use ward_intel::cache::ResultCache;
use ward_intel::config::{BreakerConfig, CacheConfig, FeedConfig};
use ward_intel::error::OrchestratorError;
use ward_intel::feed::FeedHub;
use ward_intel::model::{Capability, CostTier, Priority, ProviderDescriptor};
use ward_intel::provider::mock::ScriptedProvider;
use ward_intel::provider::DynProvider;
use ward_intel::router::ProviderRouter;
use ward_intel::service::AnalysisService;

const BODY_LIMIT: usize = 1024 * 1024; // 1MB, safe for tests

fn descriptor(id: &str) -> ProviderDescriptor {
    ProviderDescriptor {
        id: id.into(),
        cost_tier: CostTier::Economy,
        capabilities: vec![Capability::Quick, Capability::Standard, Capability::Deep],
        timeout_secs: 2,
        max_concurrent: 4,
    }
}

/// Build the same Router the binary uses, backed by the given providers.
fn test_router(providers: Vec<DynProvider>) -> Router {
    test_router_with_hub(providers).0
}

/// Same wiring, handing back the hub so tests can publish feed events.
fn test_router_with_hub(providers: Vec<DynProvider>) -> (Router, Arc<FeedHub>) {
    let cache = Arc::new(ResultCache::new(&CacheConfig::default()));
    let hub = Arc::new(FeedHub::new(FeedConfig::default()));
    let router = ProviderRouter::new(providers, BreakerTuning::from(&BreakerConfig::default()));
    let service = Arc::new(AnalysisService::new(
        Arc::clone(&cache),
        router,
        Arc::clone(&hub),
    ));
    let app = create_router(AppState {
        service,
        cache,
        hub: Arc::clone(&hub),
    });
    (app, hub)
}

/// Parse the `id:` fields out of raw SSE text.
fn sse_ids(raw: &str) -> Vec<u64> {
    raw.lines()
        .filter_map(|l| l.strip_prefix("id:"))
        .filter_map(|v| v.trim().parse().ok())
        .collect()
}

fn healthy_router() -> Router {
    test_router(vec![Arc::new(ScriptedProvider::fixed(
        descriptor("scout"),
        0.8,
    ))])
}

fn analyze_request(payload: &Json) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/analyze")
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(payload).expect("serialize")))
        .expect("build POST /analyze")
}

async fn json_body(resp: axum::response::Response) -> Json {
    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body");
    serde_json::from_slice(&bytes).expect("json body")
}

#[tokio::test]
async fn api_health_returns_200_and_ok_body() {
    let app = healthy_router();

    let req = Request::builder()
        .method("GET")
        .uri("/health")
        .body(Body::empty())
        .expect("build GET /health");

    let resp = app.oneshot(req).await.expect("oneshot /health");
    assert_eq!(resp.status(), StatusCode::OK, "health should be 200");

    let bytes = body::to_bytes(resp.into_body(), BODY_LIMIT)
        .await
        .expect("read body")
        .to_vec();
    assert_eq!(String::from_utf8(bytes).expect("utf8").trim(), "ok");
}

#[tokio::test]
async fn api_analyze_returns_canonical_result_fields() {
    let app = healthy_router();

    let payload = json!({
        "subject_key": "jubilee-hills",
        "depth": "standard",
        "strategic_context": "neutral"
    });
    let resp = app.oneshot(analyze_request(&payload)).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json_body(resp).await;
    assert_eq!(body["provider_id"], "scout");
    assert!(body["overview"].is_string());
    assert!(body["key_intelligence"].is_array());
    assert!(body["recommended_actions"].is_array());
    let confidence = body["confidence_score"].as_f64().expect("confidence");
    assert!((0.0..=1.0).contains(&confidence));
    assert_eq!(body["stale"], Json::Bool(false));
}

#[tokio::test]
async fn api_analyze_blank_subject_is_400_with_error_kind() {
    let app = healthy_router();

    let payload = json!({
        "subject_key": "   ",
        "depth": "quick",
        "strategic_context": "neutral"
    });
    let resp = app.oneshot(analyze_request(&payload)).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

    let body = json_body(resp).await;
    assert_eq!(body["error_kind"], "invalid_request");
    assert!(body["message"].is_string());
}

#[tokio::test]
async fn api_analyze_unknown_depth_is_a_client_error() {
    let app = healthy_router();

    let payload = json!({
        "subject_key": "jubilee-hills",
        "depth": "exhaustive",
        "strategic_context": "neutral"
    });
    let resp = app.oneshot(analyze_request(&payload)).await.expect("oneshot");
    assert!(resp.status().is_client_error(), "got {}", resp.status());
}

#[tokio::test]
async fn api_analyze_all_providers_down_is_503_unavailable() {
    let app = test_router(vec![Arc::new(ScriptedProvider::failing(
        descriptor("scout"),
        OrchestratorError::ServerError { status: 502 },
    ))]);

    let payload = json!({
        "subject_key": "jubilee-hills",
        "depth": "standard",
        "strategic_context": "defensive"
    });
    let resp = app.oneshot(analyze_request(&payload)).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);

    let body = json_body(resp).await;
    assert_eq!(body["error_kind"], "unavailable");
}

#[tokio::test]
async fn api_feed_is_an_event_stream_and_accepts_resume_header() {
    let app = healthy_router();

    let req = Request::builder()
        .method("GET")
        .uri("/feed?subject_key=jubilee-hills&categories=alert,analysis.completed")
        .header("last-event-id", "42")
        .body(Body::empty())
        .expect("build GET /feed");

    // The stream never terminates; status and headers are enough here.
    let resp = app.oneshot(req).await.expect("oneshot /feed");
    assert_eq!(resp.status(), StatusCode::OK);
    let content_type = resp
        .headers()
        .get("content-type")
        .expect("content-type")
        .to_str()
        .expect("ascii");
    assert!(content_type.starts_with("text/event-stream"));
}

#[tokio::test]
async fn api_feed_resume_replays_missed_event_frames() {
    let (app, hub) = test_router_with_hub(vec![Arc::new(ScriptedProvider::fixed(
        descriptor("scout"),
        0.8,
    ))]);

    for n in 0..3 {
        hub.publish(
            "analysis.completed",
            Priority::Medium,
            "jubilee-hills",
            json!({ "n": n }),
        ); // ids 1..=3
    }

    let req = Request::builder()
        .method("GET")
        .uri("/feed")
        .header("last-event-id", "1")
        .body(Body::empty())
        .expect("build GET /feed");

    let resp = app.oneshot(req).await.expect("oneshot /feed");
    assert_eq!(resp.status(), StatusCode::OK);

    // Read frames off the live stream until the replay is complete.
    let mut frames = resp.into_body().into_data_stream();
    let mut buf = String::new();
    loop {
        let ids = sse_ids(&buf);
        if ids.len() >= 2 {
            assert_eq!(ids, vec![2, 3], "replay must cover exactly the missed ids");
            break;
        }
        let chunk = tokio::time::timeout(std::time::Duration::from_secs(2), frames.next())
            .await
            .expect("frame within deadline")
            .expect("stream still open")
            .expect("body chunk");
        buf.push_str(std::str::from_utf8(&chunk).expect("utf8 frame"));
    }
}

#[tokio::test]
async fn api_debug_breakers_reports_every_provider() {
    let app = test_router(vec![
        Arc::new(ScriptedProvider::fixed(descriptor("scout"), 0.8)),
        Arc::new(ScriptedProvider::fixed(descriptor("flagship"), 0.9)),
    ]);

    let req = Request::builder()
        .method("GET")
        .uri("/debug/breakers")
        .body(Body::empty())
        .expect("build GET /debug/breakers");

    let resp = app.oneshot(req).await.expect("oneshot");
    assert_eq!(resp.status(), StatusCode::OK);

    let body = json_body(resp).await;
    let snapshots = body.as_array().expect("array");
    assert_eq!(snapshots.len(), 2);
    assert_eq!(snapshots[0]["state"], "closed");
}
