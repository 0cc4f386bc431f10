//! Scripted provider for tests and mock mode. Kept in the library (not
//! behind `cfg(test)`) so integration tests and `WARD_INTEL_TEST_MODE=mock`
//! can use it.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::OrchestratorError;
use crate::model::{AnalysisRequest, ProviderDescriptor};

use super::{ProviderClient, RawAnalysis};

/// Plays back a scripted sequence of outcomes, then repeats a fallback
/// outcome forever. Counts calls so tests can assert "exactly one provider
/// call" style properties.
pub struct ScriptedProvider {
    descriptor: ProviderDescriptor,
    script: Mutex<VecDeque<Result<RawAnalysis, OrchestratorError>>>,
    fallback: Result<RawAnalysis, OrchestratorError>,
    delay: Option<Duration>,
    calls: AtomicU32,
}

impl ScriptedProvider {
    pub fn new(
        descriptor: ProviderDescriptor,
        script: Vec<Result<RawAnalysis, OrchestratorError>>,
        fallback: Result<RawAnalysis, OrchestratorError>,
    ) -> Self {
        Self {
            descriptor,
            script: Mutex::new(script.into()),
            fallback,
            delay: None,
            calls: AtomicU32::new(0),
        }
    }

    /// Always answers with the given confidence.
    pub fn fixed(descriptor: ProviderDescriptor, confidence: f64) -> Self {
        Self::new(descriptor, Vec::new(), Ok(raw_ok(confidence)))
    }

    /// Always fails with the given error.
    pub fn failing(descriptor: ProviderDescriptor, error: OrchestratorError) -> Self {
        Self::new(descriptor, Vec::new(), Err(error))
    }

    /// Sleep this long before answering (for timeout tests).
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

/// A well-formed raw response with the given confidence.
pub fn raw_ok(confidence: f64) -> RawAnalysis {
    RawAnalysis {
        overview: Some("Contested ward; ground presence is decisive.".into()),
        key_intelligence: vec!["booth-level volunteer gap in two sectors".into()],
        opportunities: vec!["youth voter registration drive".into()],
        threats: vec!["opposition rally scheduled this weekend".into()],
        recommended_actions: vec!["reassign canvassers to sectors 4 and 7".into()],
        confidence_score: Some(confidence),
        cost_estimate: Some(0.002),
        source_count: Some(18),
        ttl_seconds: Some(300),
    }
}

#[async_trait]
impl ProviderClient for ScriptedProvider {
    fn descriptor(&self) -> &ProviderDescriptor {
        &self.descriptor
    }

    async fn fetch(&self, _request: &AnalysisRequest) -> Result<RawAnalysis, OrchestratorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let scripted = self
            .script
            .lock()
            .expect("script mutex poisoned")
            .pop_front();
        scripted.unwrap_or_else(|| self.fallback.clone())
    }
}
