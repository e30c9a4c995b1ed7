//! Serializable configuration for whole policy chains.
//!
//! The core never reads files or the environment; an embedding service
//! deserializes an [`ExecutorConfig`] however it likes and hands it to
//! [`PolicyExecutor::from_config`](crate::PolicyExecutor::from_config).
//!
//! ```json
//! {
//!   "policies": [
//!     { "kind": "rate_limiter", "capacity": 5, "window_ms": 10000 },
//!     { "kind": "circuit_breaker", "failure_threshold": 2, "open_duration_ms": 60000 },
//!     { "kind": "bulkhead", "max_concurrency": 2, "max_queue": 4, "queue_timeout_ms": 1000 }
//!   ]
//! }
//! ```

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::outcome::PolicyKind;
use crate::policy::{BulkheadConfig, CircuitBreakerConfig, RateLimiterConfig};

/// One entry in a policy chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PolicyConfig {
    CircuitBreaker(CircuitBreakerConfig),
    RateLimiter(RateLimiterConfig),
    Bulkhead(BulkheadConfig),
}

impl PolicyConfig {
    pub fn kind(&self) -> PolicyKind {
        match self {
            Self::CircuitBreaker(_) => PolicyKind::CircuitBreaker,
            Self::RateLimiter(_) => PolicyKind::RateLimiter,
            Self::Bulkhead(_) => PolicyKind::Bulkhead,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::CircuitBreaker(c) => c.validate(),
            Self::RateLimiter(c) => c.validate(),
            Self::Bulkhead(c) => c.validate(),
        }
    }
}

/// An ordered policy chain; the first entry is consulted first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutorConfig {
    pub policies: Vec<PolicyConfig>,
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.policies.iter().try_for_each(PolicyConfig::validate)
    }
}

/// Serde helper: `Duration` as integer milliseconds.
pub(crate) mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
