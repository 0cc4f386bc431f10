//! Error taxonomy for the orchestration core.
//!
//! Provider-level failures (`Timeout`, `RateLimited`, `ServerError`,
//! `MalformedResponse`) are recovered inside the router by advancing to the
//! next candidate; they never reach the HTTP caller directly. The caller
//! sees exactly one of: a fresh result, a stale-flagged result,
//! `Unavailable`, or `InvalidRequest`.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
pub enum OrchestratorError {
    /// Provider did not answer within its configured timeout.
    #[error("provider call timed out")]
    Timeout,

    /// Provider answered 429 or an equivalent throttle signal.
    #[error("provider rate limited the call")]
    RateLimited,

    /// Provider answered with a 5xx status.
    #[error("provider server error (status {status})")]
    ServerError { status: u16 },

    /// Provider was reachable but the body could not be used at all.
    #[error("malformed provider response: {detail}")]
    MalformedResponse { detail: String },

    /// The provider's breaker is Open (or a probe is already in flight).
    #[error("circuit open for provider '{provider}'")]
    CircuitOpen { provider: String },

    /// Every eligible candidate was attempted or short-circuited.
    #[error("no provider available for this request")]
    NoProviderAvailable,

    /// No fresh result, no stale fallback. Surfaced to the caller as 503.
    #[error("analysis unavailable")]
    Unavailable,

    /// Rejected before any provider work. Surfaced to the caller as 400.
    #[error("invalid request: {reason}")]
    InvalidRequest { reason: String },
}

impl OrchestratorError {
    pub fn invalid(reason: impl Into<String>) -> Self {
        Self::InvalidRequest {
            reason: reason.into(),
        }
    }

    /// Whether this outcome counts toward a breaker's failure window.
    ///
    /// `MalformedResponse` is excluded: the provider is reachable, so
    /// opening the circuit on it would take a live provider out of rotation.
    pub fn counts_for_breaker(&self) -> bool {
        matches!(
            self,
            Self::Timeout | Self::RateLimited | Self::ServerError { .. }
        )
    }

    /// Stable machine-readable kind used in the HTTP error body and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::RateLimited => "rate_limited",
            Self::ServerError { .. } => "server_error",
            Self::MalformedResponse { .. } => "malformed_response",
            Self::CircuitOpen { .. } => "circuit_open",
            Self::NoProviderAvailable => "no_provider_available",
            Self::Unavailable => "unavailable",
            Self::InvalidRequest { .. } => "invalid_request",
        }
    }
}
