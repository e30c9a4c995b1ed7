//! Runs a protected operation through an ordered policy chain.
//!
//! Admission walks the chain front to back and stops at the first rejection.
//! Once everything admits, the operation runs and its outcome is recorded
//! back to front, each policy releasing its permit right after it records.
//! All of that unwinding lives in a drop guard, so a cancelled or panicking
//! call settles its permits exactly like a finished one.

use std::future::Future;

use crate::config::{ExecutorConfig, PolicyConfig};
use crate::error::ConfigError;
use crate::outcome::{Failure, Outcome, PolicyKind, RejectReason, Rejection};
use crate::policy::{Bulkhead, CircuitBreaker, Permit, Policy, RateLimiter, Verdict};

/// Permits granted so far for one call, settled on every exit path.
struct Admitted<'a> {
    entries: Vec<(&'a dyn Policy, Permit)>,
    running: bool,
}

impl<'a> Admitted<'a> {
    fn with_capacity(n: usize) -> Self {
        Self {
            entries: Vec::with_capacity(n),
            running: false,
        }
    }

    fn push(&mut self, policy: &'a dyn Policy, permit: Permit) {
        self.entries.push((policy, permit));
    }

    /// Record `verdict` innermost-first, dropping each permit after its record.
    fn settle(&mut self, verdict: Verdict) {
        while let Some((policy, permit)) = self.entries.pop() {
            policy.record(&permit, verdict);
        }
    }
}

impl Drop for Admitted<'_> {
    fn drop(&mut self) {
        if self.entries.is_empty() {
            return;
        }
        if self.running {
            let verdict = if std::thread::panicking() {
                Verdict::Failure
            } else {
                Verdict::Cancelled
            };
            tracing::debug!(?verdict, "call dropped while running");
            self.settle(verdict);
        } else {
            while let Some((policy, permit)) = self.entries.pop() {
                policy.abandon(&permit);
            }
        }
    }
}

/// Composes policies around a single call.
///
/// `PolicyExecutor` is `Send + Sync`; share it behind an `Arc` and call
/// [`run`](Self::run) from as many tasks as needed.
pub struct PolicyExecutor {
    policies: Vec<Box<dyn Policy>>,
}

impl PolicyExecutor {
    /// Build an executor from an already ordered chain.
    pub fn new(policies: Vec<Box<dyn Policy>>) -> Self {
        Self { policies }
    }

    pub fn builder() -> PolicyExecutorBuilder {
        PolicyExecutorBuilder::default()
    }

    /// Build and validate every policy in `config`, preserving order.
    pub fn from_config(config: &ExecutorConfig) -> Result<Self, ConfigError> {
        let policies = config
            .policies
            .iter()
            .map(|entry| {
                let policy: Box<dyn Policy> = match entry {
                    PolicyConfig::CircuitBreaker(c) => Box::new(CircuitBreaker::new(c.clone())?),
                    PolicyConfig::RateLimiter(c) => Box::new(RateLimiter::new(c.clone())?),
                    PolicyConfig::Bulkhead(c) => Box::new(Bulkhead::new(c.clone())?),
                };
                Ok::<_, ConfigError>(policy)
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::new(policies))
    }

    /// Policy kinds in admission order.
    pub fn kinds(&self) -> Vec<PolicyKind> {
        self.policies.iter().map(|p| p.kind()).collect()
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Run `op` through the chain.
    pub async fn run<F, Fut, T, E>(&self, op: F) -> Outcome<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        self.run_until(op, std::future::pending()).await
    }

    /// Run `op` through the chain, giving up when `cancel` completes.
    ///
    /// - cancelled while waiting for admission: `Rejected(policy, Cancelled)`,
    ///   permits already granted are handed back unrecorded
    /// - cancelled while `op` runs: `Failure(Cancelled)`, recorded as a failure
    pub async fn run_until<F, Fut, T, E, C>(&self, op: F, cancel: C) -> Outcome<T, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        C: Future<Output = ()>,
    {
        tokio::pin!(cancel);
        let mut admitted = Admitted::with_capacity(self.policies.len());

        for policy in &self.policies {
            let admission = tokio::select! {
                biased;
                () = &mut cancel => Err(Rejection::new(policy.kind(), RejectReason::Cancelled)),
                admission = policy.admit() => admission,
            };
            match admission {
                Ok(permit) => admitted.push(&**policy, permit),
                Err(rejection) => {
                    tracing::debug!(%rejection, "call rejected");
                    return Outcome::Rejected(rejection);
                }
            }
        }

        admitted.running = true;
        let result = tokio::select! {
            biased;
            () = &mut cancel => None,
            result = op() => Some(result),
        };

        match result {
            Some(Ok(value)) => {
                admitted.settle(Verdict::Success);
                Outcome::Success(value)
            }
            Some(Err(err)) => {
                admitted.settle(Verdict::Failure);
                Outcome::Failure(Failure::Operation(err))
            }
            None => {
                tracing::debug!("call cancelled while running");
                admitted.settle(Verdict::Cancelled);
                Outcome::Failure(Failure::Cancelled)
            }
        }
    }
}

impl std::fmt::Debug for PolicyExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PolicyExecutor")
            .field("policies", &self.kinds())
            .finish()
    }
}

/// Fluent construction of a [`PolicyExecutor`]; policies run in insertion order.
#[derive(Default)]
pub struct PolicyExecutorBuilder {
    policies: Vec<Box<dyn Policy>>,
}

impl PolicyExecutorBuilder {
    pub fn policy(mut self, policy: impl Policy) -> Self {
        self.policies.push(Box::new(policy));
        self
    }

    pub fn build(self) -> PolicyExecutor {
        PolicyExecutor::new(self.policies)
    }
}
