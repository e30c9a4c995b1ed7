//! Policy engine: composable admission guards.
//!
//! A typical chain (applied in order):
//! ```text
//! Call → [RateLimiter] → [CircuitBreaker] → [Bulkhead] → Operation
//! ```
//! Outcomes are recorded in reverse, so the bulkhead (closest to the call)
//! observes first and releases its slot on the same unwind.

pub mod bulkhead;
pub mod circuit_breaker;
pub mod rate_limiter;

pub use bulkhead::{Bulkhead, BulkheadConfig, BulkheadSlot};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot, CircuitState};
pub use rate_limiter::{RateLimiter, RateLimiterConfig};

use async_trait::async_trait;

use crate::outcome::{PolicyKind, Rejection};
use circuit_breaker::CircuitTicket;

/// How an admitted call ended, as seen by a policy's `record` hook.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    Failure,
    /// Cancelled after admission. Never assumed successful.
    Cancelled,
}

impl Verdict {
    pub fn is_success(self) -> bool {
        self == Self::Success
    }
}

/// Proof of admission returned by [`Policy::admit`].
///
/// Carries whatever the granting policy needs to recognise the call again in
/// `record`. A bulkhead slot held here is released when the permit drops.
/// Policies defined outside this crate attach a [`token`](Self::token) and
/// look their own state up by it.
#[derive(Debug, Default)]
pub struct Permit {
    pub(crate) ticket: Option<CircuitTicket>,
    pub(crate) slot: Option<BulkheadSlot>,
    token: Option<u64>,
}

impl Permit {
    /// A plain grant with no attached state.
    pub fn granted() -> Self {
        Self::default()
    }

    /// A grant carrying a caller-chosen token, handed back in `record` and `abandon`.
    pub fn with_token(token: u64) -> Self {
        Self {
            token: Some(token),
            ..Self::default()
        }
    }

    pub fn token(&self) -> Option<u64> {
        self.token
    }

    /// Returns `true` if this permit holds a bulkhead slot.
    pub fn holds_slot(&self) -> bool {
        self.slot.is_some()
    }
}

/// The admit/record contract every policy implements.
///
/// # Thread Safety
/// Implementations must be `Send + Sync`; one instance serves every caller of
/// its executor concurrently.
///
/// # Object Safety
/// The trait is object-safe and is stored as `Box<dyn Policy>` in the executor.
#[async_trait]
pub trait Policy: Send + Sync + 'static {
    /// Identifies the policy in rejections and logs.
    fn kind(&self) -> PolicyKind;

    /// Decide whether a call may proceed. Only a bulkhead ever suspends here.
    async fn admit(&self) -> Result<Permit, Rejection>;

    /// Observe the outcome of a call this policy admitted.
    fn record(&self, _permit: &Permit, _verdict: Verdict) {}

    /// The call was admitted here but never executed, because a later policy
    /// rejected it or the caller went away first.
    fn abandon(&self, _permit: &Permit) {}
}
