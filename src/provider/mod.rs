//! AI provider adapters: a uniform async contract over heterogeneous
//! upstream HTTP APIs, plus the canonicalization step that turns whatever a
//! provider returned into a trustworthy [`AnalysisResult`].
//!
//! Adapters never fabricate fields: anything missing stays at a documented
//! default (empty arrays, zero source count), and out-of-range confidence is
//! clamped and logged rather than rejected.

pub mod anthropic;
pub mod local;
pub mod mock;
pub mod openai;

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use metrics::{counter, histogram};
use serde::Deserialize;
use tracing::warn;

use crate::config::{AppConfig, ProviderKind, ProviderSettings};
use crate::error::OrchestratorError;
use crate::model::{AnalysisRequest, AnalysisResult, ProviderDescriptor};

/// Partial analysis as parsed from a provider response. Every field is
/// optional; canonicalization fills the gaps.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawAnalysis {
    #[serde(default)]
    pub overview: Option<String>,
    #[serde(default)]
    pub key_intelligence: Vec<String>,
    #[serde(default)]
    pub opportunities: Vec<String>,
    #[serde(default)]
    pub threats: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    #[serde(default)]
    pub confidence_score: Option<f64>,
    #[serde(default)]
    pub cost_estimate: Option<f64>,
    #[serde(default)]
    pub source_count: Option<u32>,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

/// One AI provider behind its HTTP contract. `fetch` performs exactly one
/// network call; retries and fallback live in the router, not here.
#[async_trait]
pub trait ProviderClient: Send + Sync {
    fn descriptor(&self) -> &ProviderDescriptor;

    async fn fetch(&self, request: &AnalysisRequest) -> Result<RawAnalysis, OrchestratorError>;
}

pub type DynProvider = Arc<dyn ProviderClient>;

/// Invoke one provider with its configured timeout, canonicalize the
/// response, and emit the per-call latency/outcome metric (success or not).
pub async fn invoke(
    client: &dyn ProviderClient,
    request: &AnalysisRequest,
) -> Result<AnalysisResult, OrchestratorError> {
    let descriptor = client.descriptor();
    let started = Instant::now();
    let outcome = tokio::time::timeout(
        Duration::from_secs(descriptor.timeout_secs),
        client.fetch(request),
    )
    .await
    .unwrap_or(Err(OrchestratorError::Timeout));

    let elapsed = started.elapsed();
    histogram!("provider_call_duration_seconds", "provider" => descriptor.id.clone())
        .record(elapsed.as_secs_f64());

    match outcome {
        Ok(raw) => {
            counter!(
                "provider_calls_total",
                "provider" => descriptor.id.clone(),
                "outcome" => "ok"
            )
            .increment(1);
            Ok(canonicalize(raw, descriptor, request))
        }
        Err(e) => {
            counter!(
                "provider_calls_total",
                "provider" => descriptor.id.clone(),
                "outcome" => e.kind()
            )
            .increment(1);
            Err(e)
        }
    }
}

/// Turn a partial provider response into the canonical result. Confidence
/// outside [0, 1] is clamped and logged; absent fields take their documented
/// defaults; nothing is ever invented.
pub fn canonicalize(
    raw: RawAnalysis,
    descriptor: &ProviderDescriptor,
    request: &AnalysisRequest,
) -> AnalysisResult {
    let confidence = raw.confidence_score.unwrap_or(0.5);
    let clamped = confidence.clamp(0.0, 1.0);
    if (clamped - confidence).abs() > f64::EPSILON {
        warn!(
            provider = %descriptor.id,
            subject = %request.subject_key,
            reported = confidence,
            "provider confidence out of range; clamped"
        );
        counter!("provider_confidence_clamped_total", "provider" => descriptor.id.clone())
            .increment(1);
    }

    AnalysisResult {
        overview: raw.overview.unwrap_or_default(),
        key_intelligence: raw.key_intelligence,
        opportunities: raw.opportunities,
        threats: raw.threats,
        recommended_actions: raw.recommended_actions,
        confidence_score: clamped,
        provider_id: descriptor.id.clone(),
        cost_estimate: raw.cost_estimate.unwrap_or(0.0),
        source_count: raw.source_count.unwrap_or(0),
        produced_at: Utc::now(),
        ttl_seconds: raw.ttl_seconds.unwrap_or(0),
        stale: false,
    }
}

/// Shared prompt for all chat-style adapters: the model is asked for the
/// canonical JSON shape so parsing stays uniform across providers.
pub fn build_prompt(request: &AnalysisRequest) -> (String, String) {
    let system = "You are a campaign intelligence analyst. Respond with a single JSON object \
                  with keys: overview (string), key_intelligence (array of strings), \
                  opportunities (array of strings), threats (array of strings), \
                  recommended_actions (array of strings), confidence_score (number 0..1), \
                  source_count (integer). Output only the JSON object."
        .to_string();
    let user = format!(
        "Produce a {} strategic analysis for ward '{}' from a {} posture.",
        request.depth.as_str(),
        request.subject_key,
        request.strategic_context.as_str()
    );
    (system, user)
}

/// Salvage step shared by the chat adapters: prefer strict JSON, fall back
/// to using free text as the overview, and only report `MalformedResponse`
/// when there is nothing usable at all.
pub fn parse_model_content(content: &str) -> Result<RawAnalysis, OrchestratorError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(OrchestratorError::MalformedResponse {
            detail: "empty model content".into(),
        });
    }
    if let Ok(raw) = serde_json::from_str::<RawAnalysis>(trimmed) {
        return Ok(raw);
    }
    // Some models wrap JSON in a code fence; strip one layer and retry.
    let unfenced = trimmed
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if let Ok(raw) = serde_json::from_str::<RawAnalysis>(unfenced) {
        return Ok(raw);
    }
    // Degraded but usable: keep the text as the overview.
    Ok(RawAnalysis {
        overview: Some(trimmed.to_string()),
        ..RawAnalysis::default()
    })
}

/// Map an upstream HTTP status into the error taxonomy. 429 and 5xx count
/// toward the breaker; other non-success statuses mean the provider was
/// reachable but unusable for this call, which must not open the circuit.
pub fn classify_status(status: reqwest::StatusCode) -> OrchestratorError {
    if status.as_u16() == 429 {
        OrchestratorError::RateLimited
    } else if status.is_server_error() {
        OrchestratorError::ServerError {
            status: status.as_u16(),
        }
    } else {
        OrchestratorError::MalformedResponse {
            detail: format!("unexpected status {status}"),
        }
    }
}

/// Map a reqwest transport error. Connect failures count as server errors
/// for breaker purposes (status 599 stands in for "no response").
pub fn classify_transport(e: reqwest::Error) -> OrchestratorError {
    if e.is_timeout() {
        OrchestratorError::Timeout
    } else {
        OrchestratorError::ServerError { status: 599 }
    }
}

/// Build the shared reqwest client used by the HTTP adapters.
pub(crate) fn http_client(timeout_secs: u64) -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent("ward-intel/0.1")
        .connect_timeout(Duration::from_secs(4))
        .timeout(Duration::from_secs(timeout_secs))
        .build()
        .expect("reqwest client")
}

pub(crate) fn descriptor_from_settings(settings: &ProviderSettings) -> ProviderDescriptor {
    ProviderDescriptor {
        id: settings.id.clone(),
        cost_tier: settings.cost_tier,
        capabilities: settings.capabilities.clone(),
        timeout_secs: settings.timeout_secs,
        max_concurrent: settings.max_concurrent,
    }
}

/// Factory: build every configured provider adapter.
///
/// With `WARD_INTEL_TEST_MODE=mock` each configured provider is replaced by
/// a deterministic mock so HTTP-level tests run hermetically.
pub fn build_providers(cfg: &AppConfig) -> anyhow::Result<Vec<DynProvider>> {
    let mock_mode = std::env::var("WARD_INTEL_TEST_MODE")
        .map(|v| v == "mock")
        .unwrap_or(false);

    let mut providers: Vec<DynProvider> = Vec::with_capacity(cfg.providers.len());
    for settings in &cfg.providers {
        if mock_mode {
            providers.push(Arc::new(mock::ScriptedProvider::fixed(
                descriptor_from_settings(settings),
                0.8,
            )));
            continue;
        }
        let provider: DynProvider = match settings.kind {
            ProviderKind::Openai => Arc::new(openai::OpenAiClient::from_settings(settings)?),
            ProviderKind::Anthropic => {
                Arc::new(anthropic::AnthropicClient::from_settings(settings)?)
            }
            ProviderKind::Local => Arc::new(local::LocalClient::from_settings(settings)?),
        };
        providers.push(provider);
    }
    Ok(providers)
}
