use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{get, post},
    Json, Router,
};
use futures_util::Stream;
use serde::Deserialize;
use tower_http::cors::CorsLayer;
use tracing::warn;

use crate::breaker::BreakerSnapshot;
use crate::cache::ResultCache;
use crate::config::AppConfig;
use crate::error::OrchestratorError;
use crate::feed::{FeedHub, FeedItem, HubStats, SubscriptionFilter};
use crate::model::{AnalysisRequest, AnalysisResult, Depth, StrategicContext};
use crate::provider;
use crate::router::ProviderRouter;
use crate::service::AnalysisService;

#[derive(Clone)]
pub struct AppState {
    pub service: Arc<AnalysisService>,
    pub cache: Arc<ResultCache>,
    pub hub: Arc<FeedHub>,
}

impl AppState {
    /// Wire the full orchestration stack from config. Providers come from
    /// the factory (mocks under `WARD_INTEL_TEST_MODE=mock`).
    pub fn from_config(cfg: &AppConfig) -> anyhow::Result<Self> {
        let providers = provider::build_providers(cfg)?;
        let cache = Arc::new(ResultCache::new(&cfg.cache));
        let hub = Arc::new(FeedHub::new(cfg.feed));
        let router = ProviderRouter::new(providers, (&cfg.breaker).into());
        let service = Arc::new(AnalysisService::new(
            Arc::clone(&cache),
            router,
            Arc::clone(&hub),
        ));
        Ok(Self {
            service,
            cache,
            hub,
        })
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/analyze", post(analyze))
        .route("/feed", get(feed))
        .route("/debug/breakers", get(debug_breakers))
        .route("/debug/feed", get(debug_feed))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

impl IntoResponse for OrchestratorError {
    fn into_response(self) -> Response {
        let status = match &self {
            OrchestratorError::InvalidRequest { .. } => StatusCode::BAD_REQUEST,
            OrchestratorError::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            // Internal taxonomy variants are recovered below this layer;
            // if one ever escapes, surface it as a bad gateway.
            _ => StatusCode::BAD_GATEWAY,
        };
        let body = serde_json::json!({
            "error_kind": self.kind(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

#[derive(Deserialize)]
struct AnalyzeReq {
    subject_key: String,
    depth: Depth,
    strategic_context: StrategicContext,
}

async fn analyze(
    State(state): State<AppState>,
    Json(body): Json<AnalyzeReq>,
) -> Result<Json<AnalysisResult>, OrchestratorError> {
    let request = AnalysisRequest::new(body.subject_key, body.depth, body.strategic_context);
    let result = state.service.analyze(request).await?;
    Ok(Json(result))
}

#[derive(Deserialize, Default)]
struct FeedQuery {
    #[serde(default)]
    last_event_id: Option<u64>,
    #[serde(default)]
    subject_key: Option<String>,
    /// Comma-separated category allow-list.
    #[serde(default)]
    categories: Option<String>,
}

/// Releases the hub registration when the SSE stream is dropped (client
/// disconnect or server shutdown).
struct DisconnectGuard {
    hub: Arc<FeedHub>,
    connection_id: u64,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        self.hub.disconnect(self.connection_id);
    }
}

async fn feed(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<FeedQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    // `Last-Event-ID` header wins over the query parameter on reconnect.
    let cursor = headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .or(query.last_event_id);

    let filter = SubscriptionFilter {
        subject_key: query.subject_key,
        categories: query.categories.map(|s| {
            s.split(',')
                .map(|c| c.trim().to_string())
                .filter(|c| !c.is_empty())
                .collect()
        }),
    };

    let conn = state.hub.subscribe(filter, cursor);
    let guard = DisconnectGuard {
        hub: Arc::clone(&state.hub),
        connection_id: conn.id(),
    };

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(item) = conn.next().await {
            match item {
                FeedItem::Event(event) => match Event::default()
                    .id(event.id.to_string())
                    .event("intel")
                    .json_data(event.as_ref())
                {
                    Ok(frame) => yield Ok::<Event, Infallible>(frame),
                    Err(e) => {
                        warn!(event_id = event.id, error = %e, "failed to encode feed event");
                    }
                },
                FeedItem::Heartbeat => {
                    yield Ok(Event::default().event("heartbeat").data(""));
                }
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}

async fn debug_breakers(State(state): State<AppState>) -> Json<Vec<BreakerSnapshot>> {
    Json(state.service.router().breaker_snapshots())
}

async fn debug_feed(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub.stats())
}
