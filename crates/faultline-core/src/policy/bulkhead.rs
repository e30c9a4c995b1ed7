//! Bulkhead: bounded concurrency with a bounded FIFO waiting queue.
//!
//! Slots come from a fair `tokio::sync::Semaphore`, so queued callers are
//! woken strictly in arrival order. A [`BulkheadSlot`] gives its slot back
//! when dropped, and a caller leaving the queue (timeout or cancellation)
//! returns its queue place the same way; no path can leak either.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};

use crate::error::ConfigError;
use crate::outcome::{PolicyKind, RejectReason, Rejection};
use crate::policy::{Permit, Policy};

/// Bulkhead configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BulkheadConfig {
    /// Calls allowed to execute at once.
    pub max_concurrency: u32,
    /// Callers allowed to wait for a slot. Zero disables queueing.
    pub max_queue: u32,
    /// How long a queued caller waits before giving up.
    #[serde(rename = "queue_timeout_ms", with = "crate::config::duration_ms")]
    pub queue_timeout: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            max_queue: 0,
            queue_timeout: Duration::from_secs(30),
        }
    }
}

impl BulkheadConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrency == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.queue_timeout.is_zero() {
            return Err(ConfigError::ZeroQueueTimeout);
        }
        Ok(())
    }
}

/// An execution slot. Released exactly once, on drop.
#[derive(Debug)]
pub struct BulkheadSlot {
    _permit: OwnedSemaphorePermit,
}

/// A reserved place in the waiting queue.
struct QueuePlace<'a> {
    queued: &'a AtomicUsize,
}

impl Drop for QueuePlace<'_> {
    fn drop(&mut self) {
        self.queued.fetch_sub(1, Ordering::AcqRel);
    }
}

struct BulkheadInner {
    slots: Arc<Semaphore>,
    queued: AtomicUsize,
}

/// Thread-safe bulkhead.
#[derive(Clone)]
pub struct Bulkhead {
    config: BulkheadConfig,
    inner: Arc<BulkheadInner>,
}

impl Bulkhead {
    pub fn new(config: BulkheadConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            inner: Arc::new(BulkheadInner {
                slots: Arc::new(Semaphore::new(config.max_concurrency as usize)),
                queued: AtomicUsize::new(0),
            }),
            config,
        })
    }

    pub fn config(&self) -> &BulkheadConfig {
        &self.config
    }

    /// Calls currently holding a slot.
    pub fn in_flight(&self) -> usize {
        self.config.max_concurrency as usize - self.inner.slots.available_permits()
    }

    /// Callers currently waiting for a slot.
    pub fn queued(&self) -> usize {
        self.inner.queued.load(Ordering::Acquire)
    }

    /// Free slots right now.
    pub fn available(&self) -> usize {
        self.inner.slots.available_permits()
    }

    /// Take a free slot without waiting.
    pub fn try_acquire(&self) -> Result<BulkheadSlot, RejectReason> {
        match Arc::clone(&self.inner.slots).try_acquire_owned() {
            Ok(permit) => Ok(BulkheadSlot { _permit: permit }),
            Err(TryAcquireError::NoPermits) | Err(TryAcquireError::Closed) => {
                Err(RejectReason::BulkheadFull)
            }
        }
    }

    /// Take a slot, queueing for up to `queue_timeout` if none is free.
    ///
    /// Rejects with `BulkheadFull` at once when the queue is also full, and
    /// with `Timeout` when the wait runs out. Dropping the returned future
    /// while queued gives the queue place back.
    pub async fn acquire(&self) -> Result<BulkheadSlot, RejectReason> {
        if let Ok(slot) = self.try_acquire() {
            return Ok(slot);
        }

        let Some(place) = self.enter_queue() else {
            tracing::debug!(
                max_concurrency = self.config.max_concurrency,
                max_queue = self.config.max_queue,
                "bulkhead full"
            );
            return Err(RejectReason::BulkheadFull);
        };

        let waited = tokio::time::timeout(
            self.config.queue_timeout,
            Arc::clone(&self.inner.slots).acquire_owned(),
        )
        .await;
        drop(place);

        match waited {
            Ok(Ok(permit)) => Ok(BulkheadSlot { _permit: permit }),
            Ok(Err(_closed)) => Err(RejectReason::BulkheadFull),
            Err(_elapsed) => {
                tracing::debug!(
                    timeout_ms = self.config.queue_timeout.as_millis() as u64,
                    "bulkhead queue wait timed out"
                );
                Err(RejectReason::Timeout)
            }
        }
    }

    fn enter_queue(&self) -> Option<QueuePlace<'_>> {
        let max_queue = self.config.max_queue as usize;
        self.inner
            .queued
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |q| {
                (q < max_queue).then_some(q + 1)
            })
            .ok()?;
        Some(QueuePlace {
            queued: &self.inner.queued,
        })
    }
}

#[async_trait]
impl Policy for Bulkhead {
    fn kind(&self) -> PolicyKind {
        PolicyKind::Bulkhead
    }

    async fn admit(&self) -> Result<Permit, Rejection> {
        let slot = self
            .acquire()
            .await
            .map_err(|reason| Rejection::new(PolicyKind::Bulkhead, reason))?;
        Ok(Permit {
            slot: Some(slot),
            ..Permit::default()
        })
    }
}

impl std::fmt::Debug for Bulkhead {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bulkhead")
            .field("in_flight", &self.in_flight())
            .field("queued", &self.queued())
            .finish()
    }
}
