//! Fixed-window rate limiter.
//!
//! Up to `capacity` calls are admitted per window. A new window starts at the
//! first admit after the previous one expired, so an idle limiter does not
//! tick in the background. Rejected calls never consume capacity, and the
//! limiter has nothing to learn from outcomes.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock};
use crate::error::ConfigError;
use crate::outcome::{PolicyKind, RejectReason, Rejection};
use crate::policy::{Permit, Policy};

/// Rate limiter configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimiterConfig {
    /// Calls admitted per window. Zero rejects everything.
    pub capacity: u32,
    /// Window length.
    #[serde(rename = "window_ms", with = "crate::config::duration_ms")]
    pub window: Duration,
}

impl Default for RateLimiterConfig {
    fn default() -> Self {
        Self {
            capacity: 100,
            window: Duration::from_secs(1),
        }
    }
}

impl RateLimiterConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::ZeroWindow);
        }
        Ok(())
    }
}

struct WindowState {
    window_start: Instant,
    window_count: u32,
}

/// Thread-safe fixed-window rate limiter.
#[derive(Clone)]
pub struct RateLimiter {
    config: RateLimiterConfig,
    clock: Arc<dyn Clock>,
    state: Arc<Mutex<WindowState>>,
}

impl RateLimiter {
    pub fn new(config: RateLimiterConfig) -> Result<Self, ConfigError> {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self::build(config, clock))
    }

    /// `capacity` calls per `window`.
    pub fn per_window(capacity: u32, window: Duration) -> Result<Self, ConfigError> {
        Self::new(RateLimiterConfig { capacity, window })
    }

    /// Calls per second.
    pub fn per_second(capacity: u32) -> Self {
        // a one-second window always validates
        Self::build(
            RateLimiterConfig {
                capacity,
                window: Duration::from_secs(1),
            },
            Arc::new(SystemClock),
        )
    }

    /// Calls per minute.
    pub fn per_minute(capacity: u32) -> Self {
        Self::build(
            RateLimiterConfig {
                capacity,
                window: Duration::from_secs(60),
            },
            Arc::new(SystemClock),
        )
    }

    fn build(config: RateLimiterConfig, clock: Arc<dyn Clock>) -> Self {
        let window_start = clock.now();
        Self {
            config,
            clock,
            state: Arc::new(Mutex::new(WindowState {
                window_start,
                window_count: 0,
            })),
        }
    }

    pub fn config(&self) -> &RateLimiterConfig {
        &self.config
    }

    fn lock(&self) -> MutexGuard<'_, WindowState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn roll(&self, state: &mut WindowState, now: Instant) {
        if now.saturating_duration_since(state.window_start) >= self.config.window {
            state.window_start = now;
            state.window_count = 0;
        }
    }

    /// Try to take one unit of the current window's capacity.
    ///
    /// Returns `true` if the call is admitted.
    pub fn try_acquire(&self) -> bool {
        let now = self.clock.now();
        let mut state = self.lock();
        self.roll(&mut state, now);

        if state.window_count < self.config.capacity {
            state.window_count += 1;
            true
        } else {
            false
        }
    }

    /// Capacity left in the current window.
    pub fn remaining(&self) -> u32 {
        let now = self.clock.now();
        let mut state = self.lock();
        self.roll(&mut state, now);
        self.config.capacity - state.window_count
    }

    /// Time until the current window expires.
    pub fn reset_in(&self) -> Duration {
        let now = self.clock.now();
        let state = self.lock();
        self.config
            .window
            .saturating_sub(now.saturating_duration_since(state.window_start))
    }
}

#[async_trait]
impl Policy for RateLimiter {
    fn kind(&self) -> PolicyKind {
        PolicyKind::RateLimiter
    }

    async fn admit(&self) -> Result<Permit, Rejection> {
        if self.try_acquire() {
            Ok(Permit::granted())
        } else {
            tracing::debug!(
                capacity = self.config.capacity,
                reset_in_ms = self.reset_in().as_millis() as u64,
                "rate window exhausted"
            );
            Err(Rejection::new(PolicyKind::RateLimiter, RejectReason::RateExceeded))
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("capacity", &self.config.capacity)
            .field("window", &self.config.window)
            .finish()
    }
}
