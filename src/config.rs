//! Application configuration: JSON file + environment resolution.
//!
//! Mirrors the `config/ai.json` loading discipline: values are read from a
//! JSON file, API keys may be the literal `"ENV"` to pull from a
//! provider-specific environment variable, and out-of-range numbers are
//! clamped back to defaults rather than rejected.

use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path, time::Duration};

use crate::model::{Capability, CostTier};

pub const DEFAULT_CONFIG_PATH: &str = "config/ward-intel.json";
pub const ENV_CONFIG_PATH: &str = "WARD_INTEL_CONFIG";

fn default_window_secs() -> u64 {
    60
}
fn default_failure_ratio() -> f64 {
    0.5
}
fn default_min_samples() -> u32 {
    4
}
fn default_cooldown_secs() -> u64 {
    2
}
fn default_cooldown_cap_secs() -> u64 {
    30
}
fn default_backoff_factor() -> f64 {
    2.0
}

/// Circuit breaker tuning. The exact ratio/cooldown curve is deliberately
/// configurable; the defaults keep detection well under 30s and probing
/// well under the 2s failover budget at the router layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BreakerConfig {
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Failures/attempts ratio that opens the circuit (inclusive).
    #[serde(default = "default_failure_ratio")]
    pub failure_ratio: f64,
    /// Minimum attempts inside the window before the ratio is considered.
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
    #[serde(default = "default_cooldown_secs")]
    pub cooldown_secs: u64,
    #[serde(default = "default_cooldown_cap_secs")]
    pub cooldown_cap_secs: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            window_secs: default_window_secs(),
            failure_ratio: default_failure_ratio(),
            min_samples: default_min_samples(),
            cooldown_secs: default_cooldown_secs(),
            cooldown_cap_secs: default_cooldown_cap_secs(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

impl BreakerConfig {
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }
    pub fn cooldown(&self) -> Duration {
        Duration::from_secs(self.cooldown_secs)
    }
    pub fn cooldown_cap(&self) -> Duration {
        Duration::from_secs(self.cooldown_cap_secs)
    }

    fn sanitize(&mut self) {
        if !(0.0..=1.0).contains(&self.failure_ratio) {
            self.failure_ratio = default_failure_ratio();
        }
        if self.backoff_factor < 1.0 {
            self.backoff_factor = default_backoff_factor();
        }
        if self.window_secs == 0 {
            self.window_secs = default_window_secs();
        }
        if self.cooldown_secs == 0 {
            self.cooldown_secs = default_cooldown_secs();
        }
        if self.cooldown_cap_secs < self.cooldown_secs {
            self.cooldown_cap_secs = self.cooldown_secs;
        }
    }
}

fn default_stale_retention_factor() -> u64 {
    3
}
fn default_sweep_interval_secs() -> u64 {
    60
}
fn default_result_ttl_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Stale entries are retained for `ttl × stale_retention_factor`.
    #[serde(default = "default_stale_retention_factor")]
    pub stale_retention_factor: u64,
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// TTL stamped on results whose provider did not supply one.
    #[serde(default = "default_result_ttl_secs")]
    pub default_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            stale_retention_factor: default_stale_retention_factor(),
            sweep_interval_secs: default_sweep_interval_secs(),
            default_ttl_secs: default_result_ttl_secs(),
        }
    }
}

impl CacheConfig {
    fn sanitize(&mut self) {
        if self.stale_retention_factor == 0 {
            self.stale_retention_factor = default_stale_retention_factor();
        }
        if self.sweep_interval_secs == 0 {
            self.sweep_interval_secs = default_sweep_interval_secs();
        }
        if self.default_ttl_secs == 0 {
            self.default_ttl_secs = default_result_ttl_secs();
        }
    }
}

fn default_queue_capacity() -> usize {
    64
}
fn default_ring_capacity() -> usize {
    512
}
fn default_ring_retention_secs() -> u64 {
    600
}
fn default_heartbeat_secs() -> u64 {
    30
}
fn default_idle_multiplier() -> u32 {
    3
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct FeedConfig {
    /// Per-connection outbound queue bound.
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    /// Resume ring buffer bound (event count).
    #[serde(default = "default_ring_capacity")]
    pub ring_capacity: usize,
    /// Resume ring buffer bound (event age).
    #[serde(default = "default_ring_retention_secs")]
    pub ring_retention_secs: u64,
    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,
    /// Idle timeout = heartbeat_secs × idle_multiplier without a drain.
    #[serde(default = "default_idle_multiplier")]
    pub idle_multiplier: u32,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            queue_capacity: default_queue_capacity(),
            ring_capacity: default_ring_capacity(),
            ring_retention_secs: default_ring_retention_secs(),
            heartbeat_secs: default_heartbeat_secs(),
            idle_multiplier: default_idle_multiplier(),
        }
    }
}

impl FeedConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_secs * u64::from(self.idle_multiplier.max(1)))
    }

    fn sanitize(&mut self) {
        if self.queue_capacity == 0 {
            self.queue_capacity = default_queue_capacity();
        }
        if self.ring_capacity == 0 {
            self.ring_capacity = default_ring_capacity();
        }
        // A zero retention would age out every retained event immediately,
        // silently disabling resume.
        if self.ring_retention_secs == 0 {
            self.ring_retention_secs = default_ring_retention_secs();
        }
        if self.heartbeat_secs == 0 {
            self.heartbeat_secs = default_heartbeat_secs();
        }
        if self.idle_multiplier == 0 {
            self.idle_multiplier = default_idle_multiplier();
        }
    }
}

/// Which adapter implementation backs a configured provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Openai,
    Anthropic,
    Local,
}

fn default_provider_timeout_secs() -> u64 {
    10
}
fn default_max_concurrent() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub id: String,
    pub kind: ProviderKind,
    pub cost_tier: CostTier,
    pub capabilities: Vec<Capability>,
    #[serde(default = "default_provider_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
    #[serde(default)]
    pub model: Option<String>,
    /// "ENV" resolves to OPENAI_API_KEY / ANTHROPIC_API_KEY by kind;
    /// `local` providers need no key.
    #[serde(default)]
    pub api_key: Option<String>,
    /// Base URL for `local` providers (e.g. an Ollama host).
    #[serde(default)]
    pub base_url: Option<String>,
}

impl ProviderSettings {
    /// Resolve `"ENV"` key indirection against the process environment.
    pub fn resolved_api_key(&self) -> anyhow::Result<Option<String>> {
        match self.api_key.as_deref() {
            Some(k) if k.trim().eq_ignore_ascii_case("env") => {
                let var = match self.kind {
                    ProviderKind::Openai => "OPENAI_API_KEY",
                    ProviderKind::Anthropic => "ANTHROPIC_API_KEY",
                    ProviderKind::Local => return Ok(None),
                };
                let key = env::var(var)
                    .map_err(|_| anyhow::anyhow!("Missing {var} env var for provider '{}'", self.id))?;
                Ok(Some(key))
            }
            Some(k) => Ok(Some(k.to_string())),
            None => Ok(None),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub providers: Vec<ProviderSettings>,
    #[serde(default)]
    pub breaker: BreakerConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub feed: FeedConfig,
}

impl AppConfig {
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let data = fs::read_to_string(path)?;
        let mut cfg: AppConfig = serde_json::from_str(&data)?;
        cfg.sanitize();
        Ok(cfg)
    }

    /// Load from `WARD_INTEL_CONFIG` (or the default path); a missing or
    /// unreadable file degrades to built-in defaults with a warning.
    pub fn load() -> Self {
        let path =
            env::var(ENV_CONFIG_PATH).unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        match Self::load_from_file(&path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::warn!(path = %path, error = %e, "config load failed; using defaults");
                let mut cfg = AppConfig::default();
                cfg.sanitize();
                cfg
            }
        }
    }

    fn sanitize(&mut self) {
        self.breaker.sanitize();
        self.cache.sanitize();
        self.feed.sanitize();
        for p in &mut self.providers {
            if p.timeout_secs == 0 {
                p.timeout_secs = default_provider_timeout_secs();
            }
            if p.max_concurrent == 0 {
                p.max_concurrent = default_max_concurrent();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.breaker.window_secs, 60);
        assert!((cfg.breaker.failure_ratio - 0.5).abs() < f64::EPSILON);
        assert_eq!(cfg.cache.stale_retention_factor, 3);
        assert_eq!(cfg.feed.idle_timeout(), Duration::from_secs(90));
    }

    #[test]
    fn sanitize_clamps_bad_values() {
        let mut cfg = AppConfig {
            breaker: BreakerConfig {
                failure_ratio: 3.0,
                backoff_factor: 0.1,
                window_secs: 0,
                cooldown_secs: 10,
                cooldown_cap_secs: 1,
                min_samples: 4,
            },
            ..AppConfig::default()
        };
        cfg.sanitize();
        assert!((cfg.breaker.failure_ratio - 0.5).abs() < f64::EPSILON);
        assert!(cfg.breaker.backoff_factor >= 1.0);
        assert_eq!(cfg.breaker.window_secs, 60);
        assert_eq!(cfg.breaker.cooldown_cap_secs, 10);
    }

    #[test]
    fn feed_sanitize_clamps_zero_retention() {
        let mut cfg = AppConfig::default();
        cfg.feed.ring_retention_secs = 0;
        cfg.feed.queue_capacity = 0;
        cfg.sanitize();
        assert_eq!(cfg.feed.ring_retention_secs, 600);
        assert_eq!(cfg.feed.queue_capacity, 64);
    }

    #[test]
    fn provider_settings_parse_with_defaults() {
        let json = r#"{
            "id": "scout",
            "kind": "local",
            "cost_tier": "economy",
            "capabilities": ["quick", "standard"]
        }"#;
        let p: ProviderSettings = serde_json::from_str(json).expect("parse provider settings");
        assert_eq!(p.timeout_secs, 10);
        assert_eq!(p.max_concurrent, 4);
        assert!(p.api_key.is_none());
    }
}
