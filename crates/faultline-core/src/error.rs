//! Error types for policy construction and call execution.

use thiserror::Error;

use crate::outcome::Rejection;

/// Invalid policy parameters, reported at construction time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Circuit breaker would never open.
    #[error("circuit breaker failure_threshold must be greater than zero")]
    ZeroFailureThreshold,

    /// Circuit breaker would flap straight back to half-open.
    #[error("circuit breaker open_duration must be greater than zero")]
    ZeroOpenDuration,

    /// Half-open state would admit no trial and never close.
    #[error("circuit breaker half_open_trial_limit must be at least 1")]
    ZeroTrialLimit,

    /// Rate limiter window of zero length.
    #[error("rate limiter window must be greater than zero")]
    ZeroWindow,

    /// Bulkhead with no execution slots.
    #[error("bulkhead max_concurrency must be greater than zero")]
    ZeroConcurrency,

    /// Queued callers would time out before they could ever be woken.
    #[error("bulkhead queue_timeout must be greater than zero")]
    ZeroQueueTimeout,
}

/// A non-successful [`Outcome`](crate::Outcome) viewed as a `Result` error.
#[derive(Debug, Error)]
pub enum ExecutionError<E> {
    /// A policy refused to admit the call; the operation never ran.
    #[error(transparent)]
    Rejected(#[from] Rejection),

    /// The operation ran and returned its own error.
    #[error("operation failed: {0}")]
    Operation(E),

    /// The caller cancelled after the call had been admitted.
    #[error("call cancelled after admission")]
    Cancelled,
}

impl<E> ExecutionError<E> {
    /// Returns `true` if the operation never started.
    pub fn is_rejection(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// Returns `true` if the protected operation produced this error itself.
    pub fn is_operation_error(&self) -> bool {
        matches!(self, Self::Operation(_))
    }

    /// The rejecting policy and reason, if the call was not admitted.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::Rejected(r) => Some(*r),
            _ => None,
        }
    }
}
