//! # Circuit breaker
//! Per-provider health state machine guarding outbound AI calls.
//!
//! Legal transitions only: Closed→Open (failure ratio breached inside the
//! rolling window), Open→HalfOpen (cooldown elapsed), HalfOpen→Closed
//! (probe success), HalfOpen→Open (probe failure, cooldown backs off
//! exponentially up to a cap). Breakers for different providers never share
//! a lock; one saturated provider must not stall another.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use metrics::counter;
use tracing::{debug, warn};

use crate::config::BreakerConfig;
use crate::error::OrchestratorError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitState {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        }
    }

    /// Router ordering rank: Closed ahead of HalfOpen ahead of Open.
    pub fn routing_rank(&self) -> u8 {
        match self {
            CircuitState::Closed => 0,
            CircuitState::HalfOpen => 1,
            CircuitState::Open => 2,
        }
    }
}

/// Breaker timing resolved to `Duration`s. Split from `BreakerConfig` so
/// tests can drive the state machine with millisecond cooldowns.
#[derive(Debug, Clone, Copy)]
pub struct BreakerTuning {
    pub window: Duration,
    pub failure_ratio: f64,
    pub min_samples: u32,
    pub cooldown: Duration,
    pub cooldown_cap: Duration,
    pub backoff_factor: f64,
}

impl From<&BreakerConfig> for BreakerTuning {
    fn from(cfg: &BreakerConfig) -> Self {
        Self {
            window: cfg.window(),
            failure_ratio: cfg.failure_ratio,
            min_samples: cfg.min_samples,
            cooldown: cfg.cooldown(),
            cooldown_cap: cfg.cooldown_cap(),
            backoff_factor: cfg.backoff_factor,
        }
    }
}

#[derive(Debug)]
struct Inner {
    state: CircuitState,
    /// Completed attempts inside the rolling window: `(when, failed)`.
    /// Aborted calls never land here.
    samples: VecDeque<(Instant, bool)>,
    opened_at: Option<Instant>,
    probe_in_flight: bool,
    /// Consecutive Open periods without a successful probe; drives backoff.
    open_streak: u32,
}

impl Default for Inner {
    fn default() -> Self {
        Self {
            state: CircuitState::Closed,
            samples: VecDeque::new(),
            opened_at: None,
            probe_in_flight: false,
            open_streak: 0,
        }
    }
}

impl Inner {
    fn prune(&mut self, window: Duration, now: Instant) {
        while let Some(&(t, _)) = self.samples.front() {
            if now.duration_since(t) > window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }

    fn failure_counts(&self) -> (u32, u32) {
        let total = self.samples.len() as u32;
        let failed = self.samples.iter().filter(|&&(_, f)| f).count() as u32;
        (failed, total)
    }
}

/// Thread-safe circuit breaker for one provider. All state for the provider
/// is serialized behind this breaker's own mutex.
#[derive(Debug)]
pub struct CircuitBreaker {
    provider_id: String,
    tuning: BreakerTuning,
    inner: Mutex<Inner>,
}

/// Read-only snapshot for diagnostics (`/debug/breakers`).
#[derive(Debug, Clone, serde::Serialize)]
pub struct BreakerSnapshot {
    pub provider_id: String,
    pub state: &'static str,
    pub window_failures: u32,
    pub window_attempts: u32,
    pub open_streak: u32,
}

/// Permission to make one call. Must be resolved with [`Attempt::succeed`]
/// or [`Attempt::fail`]; dropping it unresolved (cancellation) releases a
/// held probe slot and records nothing, so an aborted call is excluded from
/// the failure window.
#[derive(Debug)]
pub struct Attempt<'a> {
    breaker: &'a CircuitBreaker,
    probe: bool,
    resolved: bool,
}

impl CircuitBreaker {
    pub fn new(provider_id: impl Into<String>, tuning: BreakerTuning) -> Self {
        Self {
            provider_id: provider_id.into(),
            tuning,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn provider_id(&self) -> &str {
        &self.provider_id
    }

    /// Ask permission for one call. Open circuits reject immediately with
    /// `CircuitOpen` until the (backed-off) cooldown elapses, after which a
    /// single probe is admitted; a second caller during HalfOpen also gets
    /// `CircuitOpen` rather than a second probe.
    pub fn try_acquire(&self) -> Result<Attempt<'_>, OrchestratorError> {
        let mut inner = self.lock();
        let now = Instant::now();
        match inner.state {
            CircuitState::Closed => Ok(self.attempt(false)),
            CircuitState::Open => {
                let cooldown = self.current_cooldown(inner.open_streak);
                let elapsed = inner
                    .opened_at
                    .map(|t| now.duration_since(t))
                    .unwrap_or_default();
                if elapsed >= cooldown {
                    self.transition(&mut inner, CircuitState::HalfOpen);
                    inner.probe_in_flight = true;
                    Ok(self.attempt(true))
                } else {
                    Err(self.open_error())
                }
            }
            CircuitState::HalfOpen => {
                if inner.probe_in_flight {
                    Err(self.open_error())
                } else {
                    inner.probe_in_flight = true;
                    Ok(self.attempt(true))
                }
            }
        }
    }

    /// Current state without mutating anything (used for candidate ranking).
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> BreakerSnapshot {
        let mut inner = self.lock();
        inner.prune(self.tuning.window, Instant::now());
        let (failed, total) = inner.failure_counts();
        BreakerSnapshot {
            provider_id: self.provider_id.clone(),
            state: inner.state.as_str(),
            window_failures: failed,
            window_attempts: total,
            open_streak: inner.open_streak,
        }
    }

    fn attempt(&self, probe: bool) -> Attempt<'_> {
        Attempt {
            breaker: self,
            probe,
            resolved: false,
        }
    }

    fn open_error(&self) -> OrchestratorError {
        OrchestratorError::CircuitOpen {
            provider: self.provider_id.clone(),
        }
    }

    fn current_cooldown(&self, open_streak: u32) -> Duration {
        let exp = open_streak.saturating_sub(1).min(16);
        let factor = self.tuning.backoff_factor.powi(exp as i32);
        let backed_off = self.tuning.cooldown.mul_f64(factor.max(1.0));
        backed_off.min(self.tuning.cooldown_cap)
    }

    fn record_success(&self, probe: bool) {
        let mut inner = self.lock();
        let now = Instant::now();
        if probe {
            inner.probe_in_flight = false;
            inner.samples.clear();
            inner.open_streak = 0;
            inner.opened_at = None;
            self.transition(&mut inner, CircuitState::Closed);
        } else {
            inner.samples.push_back((now, false));
            inner.prune(self.tuning.window, now);
        }
    }

    fn record_failure(&self, probe: bool) {
        let mut inner = self.lock();
        let now = Instant::now();
        if probe {
            inner.probe_in_flight = false;
            inner.open_streak = inner.open_streak.saturating_add(1);
            inner.opened_at = Some(now);
            self.transition(&mut inner, CircuitState::Open);
            return;
        }

        inner.samples.push_back((now, true));
        inner.prune(self.tuning.window, now);
        let (failed, total) = inner.failure_counts();
        if inner.state == CircuitState::Closed
            && total >= self.tuning.min_samples
            && f64::from(failed) / f64::from(total) >= self.tuning.failure_ratio
        {
            inner.open_streak = 1;
            inner.opened_at = Some(now);
            self.transition(&mut inner, CircuitState::Open);
            warn!(
                provider = %self.provider_id,
                failures = failed,
                attempts = total,
                "failure ratio breached; circuit opened"
            );
        }
    }

    /// Cancellation / non-accounted outcome: release a probe slot without
    /// recording a sample or transitioning.
    fn release(&self, probe: bool) {
        if probe {
            let mut inner = self.lock();
            inner.probe_in_flight = false;
        }
    }

    fn transition(&self, inner: &mut Inner, to: CircuitState) {
        if inner.state == to {
            return;
        }
        debug!(
            provider = %self.provider_id,
            from = inner.state.as_str(),
            to = to.as_str(),
            "breaker transition"
        );
        counter!(
            "breaker_transitions_total",
            "provider" => self.provider_id.clone(),
            "to" => to.as_str()
        )
        .increment(1);
        inner.state = to;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().expect("breaker mutex poisoned")
    }
}

impl Attempt<'_> {
    pub fn is_probe(&self) -> bool {
        self.probe
    }

    pub fn succeed(mut self) {
        self.resolved = true;
        self.breaker.record_success(self.probe);
    }

    /// Record a completed failure. Only failures the taxonomy counts toward
    /// the breaker (`Timeout`/`RateLimited`/`ServerError`) should land here;
    /// everything else goes through drop/release.
    pub fn fail(mut self) {
        self.resolved = true;
        self.breaker.record_failure(self.probe);
    }
}

impl Drop for Attempt<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            self.breaker.release(self.probe);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tuning(cooldown_ms: u64) -> BreakerTuning {
        BreakerTuning {
            window: Duration::from_secs(60),
            failure_ratio: 0.5,
            min_samples: 4,
            cooldown: Duration::from_millis(cooldown_ms),
            cooldown_cap: Duration::from_millis(cooldown_ms * 8),
            backoff_factor: 2.0,
        }
    }

    fn fail_once(b: &CircuitBreaker) {
        b.try_acquire().expect("acquire").fail();
    }

    #[test]
    fn stays_closed_below_min_samples() {
        let b = CircuitBreaker::new("p", tuning(10));
        fail_once(&b);
        fail_once(&b);
        fail_once(&b);
        // 100% failures, but only 3 of 4 required samples.
        assert_eq!(b.state(), CircuitState::Closed);
    }

    #[test]
    fn opens_when_ratio_breached_within_window() {
        let b = CircuitBreaker::new("p", tuning(10));
        b.try_acquire().expect("acquire").succeed();
        b.try_acquire().expect("acquire").succeed();
        fail_once(&b);
        assert_eq!(b.state(), CircuitState::Closed); // 1/3 < 50%, 3 < min
        fail_once(&b);
        assert_eq!(b.state(), CircuitState::Open); // 2/4 >= 50%
        assert!(matches!(
            b.try_acquire(),
            Err(OrchestratorError::CircuitOpen { .. })
        ));
    }

    #[test]
    fn single_probe_after_cooldown_then_closes_on_success() {
        let b = CircuitBreaker::new("p", tuning(1));
        for _ in 0..4 {
            fail_once(&b);
        }
        assert_eq!(b.state(), CircuitState::Open);

        std::thread::sleep(Duration::from_millis(3));
        let probe = b.try_acquire().expect("probe admitted after cooldown");
        assert!(probe.is_probe());
        // Concurrent caller during HalfOpen gets CircuitOpen, not a probe.
        assert!(matches!(
            b.try_acquire(),
            Err(OrchestratorError::CircuitOpen { .. })
        ));

        probe.succeed();
        assert_eq!(b.state(), CircuitState::Closed);
        assert_eq!(b.snapshot().window_failures, 0);
    }

    #[test]
    fn probe_failure_reopens_with_backoff() {
        let b = CircuitBreaker::new("p", tuning(50));
        for _ in 0..4 {
            fail_once(&b);
        }
        std::thread::sleep(Duration::from_millis(60));
        b.try_acquire().expect("probe").fail();
        assert_eq!(b.state(), CircuitState::Open);
        assert_eq!(b.snapshot().open_streak, 2);
        // Backed-off cooldown (100ms) has not elapsed yet.
        assert!(b.try_acquire().is_err());
    }

    #[test]
    fn dropped_attempt_records_nothing_and_frees_probe() {
        let b = CircuitBreaker::new("p", tuning(1));
        drop(b.try_acquire().expect("acquire"));
        assert_eq!(b.snapshot().window_attempts, 0);

        for _ in 0..4 {
            fail_once(&b);
        }
        std::thread::sleep(Duration::from_millis(3));
        drop(b.try_acquire().expect("probe")); // cancelled probe
        // Probe slot released: the next caller may probe again.
        assert!(b.try_acquire().expect("second probe").is_probe());
    }
}
