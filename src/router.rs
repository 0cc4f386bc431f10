//! # Provider router
//! Orders eligible providers by cost and health, then attempts them
//! strictly in sequence until one produces a result.
//!
//! The router injects no delays of its own: an Open breaker is skipped
//! immediately, so observed failover time is bounded by the per-candidate
//! timeouts alone. Worst-case `execute` latency is the sum of the attempted
//! candidates' timeouts (candidate count × per-call timeout).

use std::sync::Arc;

use metrics::counter;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

use crate::breaker::{BreakerSnapshot, BreakerTuning, CircuitBreaker};
use crate::error::OrchestratorError;
use crate::model::{AnalysisRequest, AnalysisResult};
use crate::provider::{self, DynProvider};

/// Trust multiplier applied when the serving provider was not the first
/// candidate in cost order.
pub const FALLBACK_CONFIDENCE_PENALTY: f64 = 0.9;

/// One provider plus its guards: an independent circuit breaker and a
/// concurrency limiter sized from `ProviderDescriptor::max_concurrent`.
pub struct GuardedProvider {
    client: DynProvider,
    breaker: CircuitBreaker,
    limiter: Semaphore,
}

impl GuardedProvider {
    fn new(client: DynProvider, tuning: BreakerTuning) -> Self {
        let descriptor = client.descriptor();
        Self {
            breaker: CircuitBreaker::new(descriptor.id.clone(), tuning),
            limiter: Semaphore::new(descriptor.max_concurrent.max(1)),
            client,
        }
    }

    pub fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    pub fn id(&self) -> &str {
        &self.client.descriptor().id
    }
}

pub struct ProviderRouter {
    providers: Vec<Arc<GuardedProvider>>,
}

impl ProviderRouter {
    pub fn new(providers: Vec<DynProvider>, tuning: BreakerTuning) -> Self {
        Self {
            providers: providers
                .into_iter()
                .map(|p| Arc::new(GuardedProvider::new(p, tuning)))
                .collect(),
        }
    }

    /// Ordered candidate list: capability-filtered, ascending cost tier,
    /// with Closed breakers preferred over HalfOpen, and Open last (the
    /// breaker short-circuits those without network I/O anyway).
    pub fn select(&self, request: &AnalysisRequest) -> Vec<Arc<GuardedProvider>> {
        let mut candidates: Vec<Arc<GuardedProvider>> = self
            .providers
            .iter()
            .filter(|p| p.client.descriptor().supports(request.depth))
            .cloned()
            .collect();
        candidates.sort_by_key(|p| {
            (
                p.client.descriptor().cost_tier,
                p.breaker.state().routing_rank(),
            )
        });
        candidates
    }

    /// Attempt candidates in order until one succeeds. Provider-level
    /// failures (`Timeout`/`RateLimited`/`ServerError`/`MalformedResponse`)
    /// and `CircuitOpen` advance to the next candidate; exhaustion yields
    /// `NoProviderAvailable` for the service layer to degrade.
    pub async fn execute(
        &self,
        request: &AnalysisRequest,
    ) -> Result<AnalysisResult, OrchestratorError> {
        let candidates = self.select(request);
        if candidates.is_empty() {
            return Err(OrchestratorError::NoProviderAvailable);
        }

        for (rank, guarded) in candidates.iter().enumerate() {
            let attempt = match guarded.breaker.try_acquire() {
                Ok(a) => a,
                Err(e) => {
                    debug!(provider = guarded.id(), error = %e, "candidate skipped");
                    continue;
                }
            };

            // A saturated provider is treated like an unavailable candidate
            // rather than queued behind; the attempt drop records nothing.
            let _permit = match guarded.limiter.try_acquire() {
                Ok(p) => p,
                Err(_) => {
                    debug!(provider = guarded.id(), "concurrency limit reached; skipped");
                    continue;
                }
            };

            match provider::invoke(guarded.client.as_ref(), request).await {
                Ok(mut result) => {
                    attempt.succeed();
                    if rank > 0 {
                        result.confidence_score *= FALLBACK_CONFIDENCE_PENALTY;
                        counter!("router_fallback_served_total", "provider" => result.provider_id.clone())
                            .increment(1);
                    }
                    return Ok(result);
                }
                Err(e) => {
                    warn!(
                        provider = guarded.id(),
                        subject = %request.subject_key,
                        error = %e,
                        "provider attempt failed; advancing"
                    );
                    if e.counts_for_breaker() {
                        attempt.fail();
                    }
                    // Non-counting outcomes fall through: dropping the
                    // attempt releases any probe slot without a sample.
                }
            }
        }

        counter!("router_exhausted_total").increment(1);
        Err(OrchestratorError::NoProviderAvailable)
    }

    pub fn breaker_snapshots(&self) -> Vec<BreakerSnapshot> {
        self.providers.iter().map(|p| p.breaker.snapshot()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BreakerConfig;
    use crate::model::{Capability, CostTier, Depth, ProviderDescriptor, StrategicContext};
    use crate::provider::mock::ScriptedProvider;

    fn descriptor(id: &str, tier: CostTier, caps: Vec<Capability>) -> ProviderDescriptor {
        ProviderDescriptor {
            id: id.into(),
            cost_tier: tier,
            capabilities: caps,
            timeout_secs: 2,
            max_concurrent: 2,
        }
    }

    fn tuning() -> BreakerTuning {
        BreakerTuning::from(&BreakerConfig::default())
    }

    #[test]
    fn select_filters_by_capability_and_sorts_by_cost() {
        let router = ProviderRouter::new(
            vec![
                Arc::new(ScriptedProvider::fixed(
                    descriptor("flagship", CostTier::Premium, vec![Capability::Deep]),
                    0.9,
                )),
                Arc::new(ScriptedProvider::fixed(
                    descriptor(
                        "scout",
                        CostTier::Economy,
                        vec![Capability::Quick, Capability::Standard],
                    ),
                    0.6,
                )),
                Arc::new(ScriptedProvider::fixed(
                    descriptor(
                        "workhorse",
                        CostTier::Standard,
                        vec![Capability::Standard, Capability::Deep],
                    ),
                    0.8,
                )),
            ],
            tuning(),
        );

        let req = AnalysisRequest::new("jubilee-hills", Depth::Standard, StrategicContext::Neutral);
        let names: Vec<String> = router.select(&req).iter().map(|p| p.id().to_string()).collect();
        assert_eq!(names, vec!["scout", "workhorse"]);

        let deep = AnalysisRequest::new("jubilee-hills", Depth::Deep, StrategicContext::Neutral);
        let names: Vec<String> = router.select(&deep).iter().map(|p| p.id().to_string()).collect();
        assert_eq!(names, vec!["workhorse", "flagship"]);
    }
}
