//! faultline-core: admission policies for calls to unreliable dependencies.
//!
//! # Overview
//!
//! Every policy follows the same contract: decide whether a call may start,
//! let it run, observe how it ended, update internal state. The core crate
//! defines:
//!
//! - [`Clock`]: monotonic time source ([`SystemClock`], [`ManualClock`] for tests)
//! - [`policy`] module: circuit breaker, fixed-window rate limiter, bulkhead
//! - [`PolicyExecutor`]: runs an operation through an ordered policy chain
//! - [`Outcome`]: uniform result of one call attempt
//! - [`ConfigError`] / [`ExecutionError`]: structured error types
//! - [`config`] module: serde-friendly configuration for whole chains

pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod outcome;
pub mod policy;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{ExecutorConfig, PolicyConfig};
pub use error::{ConfigError, ExecutionError};
pub use executor::{PolicyExecutor, PolicyExecutorBuilder};
pub use outcome::{Failure, Outcome, PolicyKind, RejectReason, Rejection};
pub use policy::{
    Bulkhead, BulkheadConfig, CircuitBreaker, CircuitBreakerConfig, CircuitSnapshot,
    CircuitState, Permit, Policy, RateLimiter, RateLimiterConfig, Verdict,
};
