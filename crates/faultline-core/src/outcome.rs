//! The result surface handed back to callers of [`PolicyExecutor::run`].
//!
//! [`PolicyExecutor::run`]: crate::PolicyExecutor::run

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::error::ExecutionError;

/// Which policy produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    CircuitBreaker,
    RateLimiter,
    Bulkhead,
    /// A policy implemented outside this crate, named by its author.
    #[serde(skip_deserializing)]
    Custom(&'static str),
}

impl std::fmt::Display for PolicyKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitBreaker => write!(f, "circuit-breaker"),
            Self::RateLimiter => write!(f, "rate-limiter"),
            Self::Bulkhead => write!(f, "bulkhead"),
            Self::Custom(name) => f.write_str(name),
        }
    }
}

/// Why a call was not admitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    /// Circuit is open, or half-open with every trial slot taken.
    OpenCircuit,
    /// The current rate window is exhausted.
    RateExceeded,
    /// No free slot and the waiting queue is full.
    BulkheadFull,
    /// Waited in the bulkhead queue longer than `queue_timeout`.
    Timeout,
    /// The caller gave up before the call was admitted.
    Cancelled,
}

impl std::fmt::Display for RejectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::OpenCircuit => write!(f, "circuit open"),
            Self::RateExceeded => write!(f, "rate exceeded"),
            Self::BulkheadFull => write!(f, "bulkhead full"),
            Self::Timeout => write!(f, "queue timeout"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// An admission refusal: the rejecting policy plus its reason code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
#[error("{policy} rejected call: {reason}")]
pub struct Rejection {
    pub policy: PolicyKind,
    pub reason: RejectReason,
}

impl Rejection {
    pub fn new(policy: PolicyKind, reason: RejectReason) -> Self {
        Self { policy, reason }
    }
}

/// How an admitted call failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Failure<E> {
    /// The operation's own error, untouched.
    Operation(E),
    /// The caller cancelled while the operation was running.
    Cancelled,
}

/// Result of one attempt through a [`PolicyExecutor`](crate::PolicyExecutor).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome<T, E> {
    Success(T),
    Failure(Failure<E>),
    Rejected(Rejection),
}

impl<T, E> Outcome<T, E> {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failure(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }

    /// The rejection, if no policy admitted the call.
    pub fn rejection(&self) -> Option<Rejection> {
        match self {
            Self::Rejected(r) => Some(*r),
            _ => None,
        }
    }

    /// Map the success value, leaving failures and rejections untouched.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Outcome<U, E> {
        match self {
            Self::Success(v) => Outcome::Success(f(v)),
            Self::Failure(e) => Outcome::Failure(e),
            Self::Rejected(r) => Outcome::Rejected(r),
        }
    }

    /// Collapse into a `Result` for use with `?`.
    pub fn into_result(self) -> Result<T, ExecutionError<E>> {
        match self {
            Self::Success(v) => Ok(v),
            Self::Failure(Failure::Operation(e)) => Err(ExecutionError::Operation(e)),
            Self::Failure(Failure::Cancelled) => Err(ExecutionError::Cancelled),
            Self::Rejected(r) => Err(ExecutionError::Rejected(r)),
        }
    }
}
