// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod api;
pub mod breaker;
pub mod cache;
pub mod config;
pub mod error;
pub mod feed;
pub mod metrics;
pub mod model;
pub mod provider;
pub mod router;
pub mod service;

// ---- Re-exports for stable public API ----
pub use crate::api::{create_router, AppState};
pub use crate::config::AppConfig;
pub use crate::error::OrchestratorError;
pub use crate::model::{AnalysisRequest, AnalysisResult, Depth, Priority, StrategicContext};
pub use crate::service::AnalysisService;

/// Build the full application router from config, the same way the binary
/// does. Intended for in-process HTTP tests via `tower::ServiceExt`.
pub fn app(cfg: &AppConfig) -> anyhow::Result<axum::Router> {
    let state = AppState::from_config(cfg)?;
    Ok(create_router(state))
}
