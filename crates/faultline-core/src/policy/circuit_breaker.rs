//! Three-state circuit breaker: Closed → Open → Half-Open.
//!
//! State transitions:
//! - `Closed` → `Open`:      consecutive failures reach `failure_threshold`
//! - `Open` → `Half-Open`:   first admit after `open_duration` has elapsed
//! - `Half-Open` → `Closed`: every issued trial has completed and all succeeded
//! - `Half-Open` → `Open`:   any trial fails or is cancelled
//!
//! Every transition bumps a generation counter. Permits remember the
//! generation they were issued in, and outcomes from an older generation are
//! dropped so a slow call can never disturb the state that replaced it.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::outcome::{PolicyKind, RejectReason, Rejection};
use crate::policy::{Permit, Policy, Verdict};

/// Circuit breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Normal operation.
    Closed,
    /// All requests rejected until `open_duration` has passed.
    Open,
    /// A bounded number of trial calls test the dependency.
    HalfOpen,
}

impl std::fmt::Display for CircuitState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Closed => write!(f, "closed"),
            Self::Open => write!(f, "open"),
            Self::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// Configuration for the circuit breaker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Number of consecutive failures before opening.
    pub failure_threshold: u32,
    /// How long to stay open before letting a trial through.
    #[serde(rename = "open_duration_ms", with = "crate::config::duration_ms")]
    pub open_duration: Duration,
    /// Trials allowed in flight at once while half-open.
    pub half_open_trial_limit: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            open_duration: Duration::from_secs(30),
            half_open_trial_limit: 1,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::ZeroFailureThreshold);
        }
        if self.open_duration.is_zero() {
            return Err(ConfigError::ZeroOpenDuration);
        }
        if self.half_open_trial_limit == 0 {
            return Err(ConfigError::ZeroTrialLimit);
        }
        Ok(())
    }
}

/// Generation stamp carried by a permit from this breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct CircuitTicket {
    generation: u64,
}

/// Point-in-time view of the breaker's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitSnapshot {
    pub state: CircuitState,
    pub consecutive_failures: u32,
    pub trials_in_flight: u32,
    pub trial_successes: u32,
    pub isolated: bool,
}

struct CircuitInner {
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
    trials_in_flight: u32,
    trial_successes: u32,
    generation: u64,
    isolated: bool,
}

impl CircuitInner {
    fn trip(&mut self, now: Instant) {
        self.state = CircuitState::Open;
        self.opened_at = Some(now);
        self.consecutive_failures = 0;
        self.trials_in_flight = 0;
        self.trial_successes = 0;
        self.generation += 1;
    }

    fn close(&mut self) {
        self.state = CircuitState::Closed;
        self.opened_at = None;
        self.consecutive_failures = 0;
        self.trials_in_flight = 0;
        self.trial_successes = 0;
        self.isolated = false;
        self.generation += 1;
    }

    fn ticket(&self) -> CircuitTicket {
        CircuitTicket {
            generation: self.generation,
        }
    }
}

/// Thread-safe circuit breaker.
///
/// Clones share state; hand each executor its own breaker unless the shared
/// view is intended.
#[derive(Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Arc<Mutex<CircuitInner>>,
}

impl CircuitBreaker {
    /// Create a new circuit breaker in `Closed` state.
    pub fn new(config: CircuitBreakerConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    /// Create a breaker reading time from `clock`.
    pub fn with_clock(
        config: CircuitBreakerConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            config,
            clock,
            inner: Arc::new(Mutex::new(CircuitInner {
                state: CircuitState::Closed,
                consecutive_failures: 0,
                opened_at: None,
                trials_in_flight: 0,
                trial_successes: 0,
                generation: 0,
                isolated: false,
            })),
        })
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, CircuitInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Current state. Reading never transitions; only an admit moves
    /// `Open` to `Half-Open`.
    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn snapshot(&self) -> CircuitSnapshot {
        let inner = self.lock();
        CircuitSnapshot {
            state: inner.state,
            consecutive_failures: inner.consecutive_failures,
            trials_in_flight: inner.trials_in_flight,
            trial_successes: inner.trial_successes,
            isolated: inner.isolated,
        }
    }

    /// Decide admission without suspending.
    pub fn try_admit(&self) -> Result<Permit, Rejection> {
        let now = self.clock.now();
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => {}
            CircuitState::Open => {
                let opened_at = *inner.opened_at.get_or_insert(now);
                if inner.isolated
                    || now.saturating_duration_since(opened_at) < self.config.open_duration
                {
                    return Err(self.rejection());
                }
                inner.state = CircuitState::HalfOpen;
                inner.trials_in_flight = 1;
                inner.trial_successes = 0;
                inner.generation += 1;
                tracing::info!("Circuit breaker → half-open");
            }
            CircuitState::HalfOpen => {
                if inner.trials_in_flight >= self.config.half_open_trial_limit {
                    return Err(self.rejection());
                }
                inner.trials_in_flight += 1;
            }
        }
        Ok(Permit {
            ticket: Some(inner.ticket()),
            ..Permit::default()
        })
    }

    /// Feed the outcome of a call admitted by [`try_admit`](Self::try_admit).
    pub fn record_outcome(&self, permit: &Permit, verdict: Verdict) {
        let Some(ticket) = permit.ticket else {
            return;
        };
        let now = self.clock.now();
        let mut inner = self.lock();
        if ticket.generation != inner.generation {
            tracing::trace!(?verdict, "stale circuit breaker outcome ignored");
            return;
        }
        match (inner.state, verdict.is_success()) {
            (CircuitState::Closed, true) => {
                inner.consecutive_failures = 0;
            }
            (CircuitState::Closed, false) => {
                inner.consecutive_failures += 1;
                if inner.consecutive_failures >= self.config.failure_threshold {
                    let failures = inner.consecutive_failures;
                    inner.trip(now);
                    tracing::warn!(failures, "Circuit breaker → open");
                }
            }
            (CircuitState::HalfOpen, true) => {
                inner.trial_successes += 1;
                inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
                if inner.trials_in_flight == 0 {
                    let successes = inner.trial_successes;
                    inner.close();
                    tracing::info!(successes, "Circuit breaker → closed");
                }
            }
            (CircuitState::HalfOpen, false) => {
                inner.trip(now);
                tracing::warn!(?verdict, "Circuit breaker trial failed → open");
            }
            // generations always advance on trip, so this is unreachable in practice
            (CircuitState::Open, _) => {}
        }
    }

    /// Return an unused half-open trial to the pool.
    ///
    /// If it was the last one in flight and earlier trials succeeded, the
    /// window is complete and the circuit closes.
    fn release_trial(&self, permit: &Permit) {
        let Some(ticket) = permit.ticket else {
            return;
        };
        let mut inner = self.lock();
        if ticket.generation != inner.generation || inner.state != CircuitState::HalfOpen {
            return;
        }
        inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
        if inner.trials_in_flight == 0 && inner.trial_successes > 0 {
            inner.close();
            tracing::info!("Circuit breaker → closed");
        }
    }

    /// Force the circuit closed and clear all counters.
    pub fn reset(&self) {
        self.lock().close();
        tracing::info!("Circuit breaker reset → closed");
    }

    /// Force the circuit open until [`reset`](Self::reset), ignoring `open_duration`.
    pub fn isolate(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.trip(now);
        inner.isolated = true;
        tracing::warn!("Circuit breaker isolated → open");
    }

    fn rejection(&self) -> Rejection {
        Rejection::new(PolicyKind::CircuitBreaker, RejectReason::OpenCircuit)
    }
}

#[async_trait]
impl Policy for CircuitBreaker {
    fn kind(&self) -> PolicyKind {
        PolicyKind::CircuitBreaker
    }

    async fn admit(&self) -> Result<Permit, Rejection> {
        self.try_admit()
    }

    fn record(&self, permit: &Permit, verdict: Verdict) {
        self.record_outcome(permit, verdict);
    }

    fn abandon(&self, permit: &Permit) {
        self.release_trial(permit);
    }
}

impl std::fmt::Debug for CircuitBreaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CircuitBreaker")
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn cb(threshold: u32, trials: u32) -> (CircuitBreaker, ManualClock) {
        let clock = ManualClock::new();
        let breaker = CircuitBreaker::with_clock(
            CircuitBreakerConfig {
                failure_threshold: threshold,
                open_duration: Duration::from_secs(60),
                half_open_trial_limit: trials,
            },
            Arc::new(clock.clone()),
        )
        .unwrap();
        (breaker, clock)
    }

    fn fail_once(c: &CircuitBreaker) {
        let permit = c.try_admit().expect("admitted");
        c.record_outcome(&permit, Verdict::Failure);
    }

    fn open_then_wait(c: &CircuitBreaker, clock: &ManualClock) {
        for _ in 0..c.config().failure_threshold {
            fail_once(c);
        }
        assert_eq!(c.state(), CircuitState::Open);
        clock.advance(c.config().open_duration);
    }

    #[test]
    fn starts_closed() {
        let (c, _) = cb(5, 1);
        assert_eq!(c.state(), CircuitState::Closed);
        assert!(c.try_admit().is_ok());
    }

    #[test]
    fn opens_after_threshold_failures() {
        let (c, _) = cb(3, 1);
        fail_once(&c);
        fail_once(&c);
        assert_eq!(c.state(), CircuitState::Closed);
        fail_once(&c);
        assert_eq!(c.state(), CircuitState::Open);

        let rejection = c.try_admit().unwrap_err();
        assert_eq!(rejection.reason, RejectReason::OpenCircuit);
        assert_eq!(rejection.policy, PolicyKind::CircuitBreaker);
    }

    #[test]
    fn success_resets_failure_count() {
        let (c, _) = cb(3, 1);
        fail_once(&c);
        fail_once(&c);
        let permit = c.try_admit().unwrap();
        c.record_outcome(&permit, Verdict::Success);
        fail_once(&c);
        fail_once(&c);
        // Only 2 failures since last reset: should still be closed
        assert_eq!(c.state(), CircuitState::Closed);
        assert_eq!(c.snapshot().consecutive_failures, 2);
    }

    #[test]
    fn cancellation_counts_as_failure() {
        let (c, _) = cb(1, 1);
        let permit = c.try_admit().unwrap();
        c.record_outcome(&permit, Verdict::Cancelled);
        assert_eq!(c.state(), CircuitState::Open);
    }

    #[test]
    fn rejections_do_not_extend_open_window() {
        let (c, clock) = cb(1, 1);
        fail_once(&c);
        clock.advance(Duration::from_secs(30));
        for _ in 0..10 {
            assert!(c.try_admit().is_err());
        }
        clock.advance(Duration::from_secs(30));
        assert!(c.try_admit().is_ok());
    }

    #[test]
    fn admit_after_open_duration_enters_half_open() {
        let (c, clock) = cb(2, 1);
        fail_once(&c);
        fail_once(&c);
        assert!(c.try_admit().is_err());

        clock.advance(Duration::from_secs(59));
        assert!(c.try_admit().is_err());
        // Reading the state alone does not transition
        clock.advance(Duration::from_secs(1));
        assert_eq!(c.state(), CircuitState::Open);

        let trial = c.try_admit().expect("trial admitted");
        assert_eq!(c.state(), CircuitState::HalfOpen);
        c.record_outcome(&trial, Verdict::Success);
        assert_eq!(c.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_limits_trials() {
        let (c, clock) = cb(1, 2);
        open_then_wait(&c, &clock);

        let a = c.try_admit().unwrap();
        let b = c.try_admit().unwrap();
        assert!(c.try_admit().is_err(), "third concurrent trial must be rejected");

        // A finished trial frees room for another while b is still running
        c.record_outcome(&a, Verdict::Success);
        assert_eq!(c.state(), CircuitState::HalfOpen);
        let d = c.try_admit().expect("room for another trial");
        assert!(c.try_admit().is_err());

        c.record_outcome(&b, Verdict::Success);
        assert_eq!(c.state(), CircuitState::HalfOpen);
        c.record_outcome(&d, Verdict::Success);
        assert_eq!(c.state(), CircuitState::Closed);
        assert_eq!(c.snapshot().trials_in_flight, 0);
    }

    #[test]
    fn single_completed_trial_closes_with_larger_limit() {
        let (c, clock) = cb(1, 3);
        open_then_wait(&c, &clock);

        let trial = c.try_admit().unwrap();
        assert_eq!(c.snapshot().trials_in_flight, 1);
        c.record_outcome(&trial, Verdict::Success);
        assert_eq!(c.state(), CircuitState::Closed);
    }

    #[test]
    fn abandoning_last_trial_after_success_closes() {
        let (c, clock) = cb(1, 2);
        open_then_wait(&c, &clock);

        let a = c.try_admit().unwrap();
        let b = c.try_admit().unwrap();
        c.record_outcome(&a, Verdict::Success);
        assert_eq!(c.state(), CircuitState::HalfOpen);
        c.release_trial(&b);
        assert_eq!(c.state(), CircuitState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_and_discards_trials() {
        let (c, clock) = cb(1, 3);
        open_then_wait(&c, &clock);

        let a = c.try_admit().unwrap();
        let b = c.try_admit().unwrap();
        c.record_outcome(&a, Verdict::Failure);
        assert_eq!(c.state(), CircuitState::Open);

        // The surviving trial finishes late; it must not close the circuit
        c.record_outcome(&b, Verdict::Success);
        assert_eq!(c.state(), CircuitState::Open);
        assert_eq!(c.snapshot().trial_successes, 0);

        // Open window restarted at the failure
        assert!(c.try_admit().is_err());
    }

    #[test]
    fn stale_closed_outcome_is_ignored_after_trip() {
        let (c, _) = cb(1, 1);
        let slow = c.try_admit().unwrap();
        fail_once(&c);
        assert_eq!(c.state(), CircuitState::Open);
        c.record_outcome(&slow, Verdict::Success);
        assert_eq!(c.state(), CircuitState::Open);
    }

    #[test]
    fn abandoned_trial_is_returned() {
        let (c, clock) = cb(1, 1);
        open_then_wait(&c, &clock);

        let trial = c.try_admit().unwrap();
        assert!(c.try_admit().is_err());
        c.release_trial(&trial);
        assert!(c.try_admit().is_ok());
    }

    #[test]
    fn isolate_holds_open_until_reset() {
        let (c, clock) = cb(5, 1);
        c.isolate();
        clock.advance(Duration::from_secs(3600));
        assert!(c.try_admit().is_err());
        assert!(c.snapshot().isolated);

        c.reset();
        assert_eq!(c.state(), CircuitState::Closed);
        assert!(c.try_admit().is_ok());
    }

    #[test]
    fn invalid_config_is_rejected() {
        let bad = |cfg: CircuitBreakerConfig| CircuitBreaker::new(cfg).unwrap_err();
        assert_eq!(
            bad(CircuitBreakerConfig {
                failure_threshold: 0,
                ..Default::default()
            }),
            ConfigError::ZeroFailureThreshold
        );
        assert_eq!(
            bad(CircuitBreakerConfig {
                open_duration: Duration::ZERO,
                ..Default::default()
            }),
            ConfigError::ZeroOpenDuration
        );
        assert_eq!(
            bad(CircuitBreakerConfig {
                half_open_trial_limit: 0,
                ..Default::default()
            }),
            ConfigError::ZeroTrialLimit
        );
    }
}
