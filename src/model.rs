//! # Core value types
//! Requests, results, provider descriptors, and feed events shared across
//! the orchestration layers. Everything here is a plain serde value; no I/O.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How much analysis work the caller wants spent on a subject.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Depth {
    Quick,
    Standard,
    Deep,
}

impl Depth {
    pub fn as_str(&self) -> &'static str {
        match self {
            Depth::Quick => "quick",
            Depth::Standard => "standard",
            Depth::Deep => "deep",
        }
    }
}

/// Strategic posture the analysis should be framed for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StrategicContext {
    Neutral,
    Defensive,
    Offensive,
}

impl StrategicContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            StrategicContext::Neutral => "neutral",
            StrategicContext::Defensive => "defensive",
            StrategicContext::Offensive => "offensive",
        }
    }
}

/// Immutable analysis request. `requested_at` is arrival time and does not
/// participate in the cache fingerprint (two logically identical requests
/// must collide regardless of when they arrive).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisRequest {
    pub subject_key: String,
    pub depth: Depth,
    pub strategic_context: StrategicContext,
    pub requested_at: DateTime<Utc>,
}

impl AnalysisRequest {
    pub fn new(subject_key: impl Into<String>, depth: Depth, context: StrategicContext) -> Self {
        Self {
            subject_key: subject_key.into(),
            depth,
            strategic_context: context,
            requested_at: Utc::now(),
        }
    }

    /// Deterministic cache key: SHA-256 over the semantic fields in sorted
    /// field-name order, so logically identical requests always collide.
    pub fn fingerprint(&self) -> String {
        let canonical = format!(
            "depth={}|strategic_context={}|subject_key={}",
            self.depth.as_str(),
            self.strategic_context.as_str(),
            self.subject_key
        );
        let digest = Sha256::digest(canonical.as_bytes());
        format!("{digest:x}")
    }
}

/// Canonical analysis output. Produced once by whichever provider served the
/// request, then treated as immutable (fresh requests produce fresh results).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisResult {
    pub overview: String,
    #[serde(default)]
    pub key_intelligence: Vec<String>,
    #[serde(default)]
    pub opportunities: Vec<String>,
    #[serde(default)]
    pub threats: Vec<String>,
    #[serde(default)]
    pub recommended_actions: Vec<String>,
    /// Always within [0, 1]; adapters clamp out-of-range provider values.
    pub confidence_score: f64,
    pub provider_id: String,
    pub cost_estimate: f64,
    pub source_count: u32,
    pub produced_at: DateTime<Utc>,
    pub ttl_seconds: u64,
    /// Set only on the degraded path when an expired cache entry is served.
    #[serde(default)]
    pub stale: bool,
}

/// Provider pricing band, cheapest first. Ordering drives candidate ranking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CostTier {
    Economy,
    Standard,
    Premium,
}

/// What a provider is declared capable of serving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Capability {
    Quick,
    Standard,
    Deep,
    FactCheck,
}

impl Depth {
    /// Capability a provider must declare to serve this depth.
    pub fn required_capability(&self) -> Capability {
        match self {
            Depth::Quick => Capability::Quick,
            Depth::Standard => Capability::Standard,
            Depth::Deep => Capability::Deep,
        }
    }
}

/// Static per-provider configuration. One descriptor per configured provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub id: String,
    pub cost_tier: CostTier,
    pub capabilities: Vec<Capability>,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
}

impl ProviderDescriptor {
    pub fn supports(&self, depth: Depth) -> bool {
        self.capabilities.contains(&depth.required_capability())
    }
}

/// Delivery priority for feed events. Ordering matters for the backpressure
/// policy: lower priorities are evicted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    Medium,
    High,
}

/// One unit of strategic intelligence pushed to feed subscribers. `id` is a
/// hub-global monotonic sequence number doubling as the resume cursor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntelligenceEvent {
    pub id: u64,
    pub category: String,
    pub payload: serde_json::Value,
    pub priority: Priority,
    pub subject_key: String,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fingerprint_ignores_arrival_time() {
        let mut a = AnalysisRequest::new("jubilee-hills", Depth::Standard, StrategicContext::Neutral);
        let mut b = AnalysisRequest::new("jubilee-hills", Depth::Standard, StrategicContext::Neutral);
        a.requested_at = Utc::now();
        b.requested_at = a.requested_at + chrono::Duration::seconds(90);
        assert_eq!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn fingerprint_differs_on_any_semantic_field() {
        let base = AnalysisRequest::new("jubilee-hills", Depth::Standard, StrategicContext::Neutral);
        let other_subject =
            AnalysisRequest::new("banjara-hills", Depth::Standard, StrategicContext::Neutral);
        let other_depth = AnalysisRequest::new("jubilee-hills", Depth::Deep, StrategicContext::Neutral);
        let other_ctx =
            AnalysisRequest::new("jubilee-hills", Depth::Standard, StrategicContext::Offensive);

        assert_ne!(base.fingerprint(), other_subject.fingerprint());
        assert_ne!(base.fingerprint(), other_depth.fingerprint());
        assert_ne!(base.fingerprint(), other_ctx.fingerprint());
    }

    #[test]
    fn depth_maps_to_matching_capability() {
        assert!(ProviderDescriptor {
            id: "p".into(),
            cost_tier: CostTier::Economy,
            capabilities: vec![Capability::Quick, Capability::Standard],
            timeout_secs: 5,
            max_concurrent: 4,
        }
        .supports(Depth::Standard));

        assert!(!ProviderDescriptor {
            id: "p".into(),
            cost_tier: CostTier::Economy,
            capabilities: vec![Capability::Quick],
            timeout_secs: 5,
            max_concurrent: 4,
        }
        .supports(Depth::Deep));
    }

    #[test]
    fn priority_ordering_is_low_to_high() {
        assert!(Priority::Low < Priority::Medium);
        assert!(Priority::Medium < Priority::High);
    }
}
