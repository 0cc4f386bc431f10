//! # Analysis service
//! Public synchronous entry point: cache check, then the router chain,
//! then store-and-notify. Per request the flow is
//! `CacheCheck → {HIT: return} / {MISS: Routing → Caching → Return}`,
//! with `NoProviderAvailable` degrading to a stale-flagged cache entry
//! when one is still retained. The caller always gets a fresh result, a
//! flagged stale result, or an explicit `Unavailable`.

use std::sync::Arc;

use metrics::counter;
use tracing::{info, warn};

use crate::cache::{CacheLookup, ResultCache};
use crate::error::OrchestratorError;
use crate::feed::FeedHub;
use crate::model::{AnalysisRequest, AnalysisResult, Priority};
use crate::router::ProviderRouter;

const MAX_SUBJECT_KEY_LEN: usize = 128;

pub struct AnalysisService {
    cache: Arc<ResultCache>,
    router: ProviderRouter,
    hub: Arc<FeedHub>,
}

impl AnalysisService {
    pub fn new(cache: Arc<ResultCache>, router: ProviderRouter, hub: Arc<FeedHub>) -> Self {
        Self { cache, router, hub }
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    /// Run one analysis. May take seconds: candidate attempts are strictly
    /// sequential, so worst-case latency is the sum of the attempted
    /// providers' timeouts. Cancelling the returned future aborts the
    /// in-flight provider call and leaves breaker state untouched.
    pub async fn analyze(
        &self,
        request: AnalysisRequest,
    ) -> Result<AnalysisResult, OrchestratorError> {
        validate(&request)?;
        let fingerprint = request.fingerprint();

        if let CacheLookup::Fresh(result) = self.cache.get(&fingerprint) {
            // Cache hits deliberately emit no feed event: repeat queries
            // must not flood subscribers.
            return Ok(result);
        }

        match self.router.execute(&request).await {
            Ok(mut result) => {
                if result.ttl_seconds == 0 {
                    result.ttl_seconds = self.cache.default_ttl().as_secs();
                }
                self.cache
                    .put(&fingerprint, &request.subject_key, result.clone());
                self.hub.publish(
                    "analysis.completed",
                    Priority::Low,
                    request.subject_key.clone(),
                    serde_json::json!({
                        "subject_key": &request.subject_key,
                        "depth": request.depth.as_str(),
                        "provider_id": &result.provider_id,
                        "confidence_score": result.confidence_score,
                    }),
                );
                info!(
                    subject = %request.subject_key,
                    provider = %result.provider_id,
                    confidence = result.confidence_score,
                    "analysis completed"
                );
                Ok(result)
            }
            Err(OrchestratorError::NoProviderAvailable) => self.degraded(&request, &fingerprint),
            Err(e) => Err(e),
        }
    }

    /// Every provider path is gone; serve the retained stale entry if one
    /// exists, flagged so the client can show its trust level.
    fn degraded(
        &self,
        request: &AnalysisRequest,
        fingerprint: &str,
    ) -> Result<AnalysisResult, OrchestratorError> {
        match self.cache.peek(fingerprint) {
            CacheLookup::Stale(mut result) => {
                result.stale = true;
                counter!("analysis_stale_served_total").increment(1);
                warn!(
                    subject = %request.subject_key,
                    produced_at = %result.produced_at,
                    "all providers unavailable; serving stale result"
                );
                Ok(result)
            }
            _ => {
                counter!("analysis_unavailable_total").increment(1);
                warn!(subject = %request.subject_key, "all providers unavailable; no stale fallback");
                Err(OrchestratorError::Unavailable)
            }
        }
    }
}

fn validate(request: &AnalysisRequest) -> Result<(), OrchestratorError> {
    let subject = request.subject_key.trim();
    if subject.is_empty() {
        return Err(OrchestratorError::invalid("subject_key must not be empty"));
    }
    if subject.len() > MAX_SUBJECT_KEY_LEN {
        return Err(OrchestratorError::invalid(format!(
            "subject_key longer than {MAX_SUBJECT_KEY_LEN} chars"
        )));
    }
    Ok(())
}
