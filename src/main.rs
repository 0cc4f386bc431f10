//! Ward Intelligence Service binary entrypoint.
//! Boots the Axum HTTP server, wiring the orchestration stack, background
//! jobs, and the Prometheus exporter.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use ward_intel::api::{create_router, AppState};
use ward_intel::config::AppConfig;
use ward_intel::metrics::Metrics;
use ward_intel::{cache, feed};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("ward_intel=info,warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op in prod environments. This enables
    // WARD_INTEL_CONFIG and the provider API keys from .env.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = AppConfig::load();
    let metrics = Metrics::init(cfg.cache.default_ttl_secs);

    let state = AppState::from_config(&cfg)?;

    // Background jobs: cache eviction sweep + feed heartbeat/idle reaper.
    cache::spawn_sweeper(
        Arc::clone(&state.cache),
        Duration::from_secs(cfg.cache.sweep_interval_secs),
    );
    feed::spawn_heartbeat(Arc::clone(&state.hub));

    let app = create_router(state).merge(metrics.router());

    let addr = std::env::var("WARD_INTEL_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(%addr, providers = cfg.providers.len(), "ward-intel listening");

    axum::serve(listener, app).await?;
    Ok(())
}
