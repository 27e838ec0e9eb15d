//! One priority lane: a concurrency semaphore, a bounded waiting count, and
//! observability counters.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use switchyard_core::{ClockSource, Priority, SystemClock};
use tokio::sync::{OwnedSemaphorePermit, Semaphore, TryAcquireError};
use uuid::Uuid;

use crate::error::AdmissionError;
use crate::service::config::LaneConfig;

/// Capacity of each lane's rolling error log.
pub const ERROR_LOG_CAPACITY: usize = 100;

/// A failed or timed-out call, kept for observability only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorEntry {
    pub call_id: Uuid,
    /// Millis since epoch.
    pub at: u64,
    pub message: String,
}

/// Point-in-time view of one lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LaneStats {
    pub priority: Priority,
    pub concurrency: usize,
    pub queue_depth_cap: usize,
    /// Admitted calls waiting for a concurrency slot.
    pub depth: usize,
    /// Calls currently executing.
    pub active: usize,
    pub processed: u64,
    pub rejected: u64,
    pub timed_out: u64,
    pub failed: u64,
    pub recent_errors: Vec<ErrorEntry>,
}

pub(crate) enum Admission {
    /// A slot was free; the call runs immediately.
    Ready(OwnedSemaphorePermit),
    /// The call waits for a slot and counts against the queue depth.
    Queued(DepthGuard),
}

pub(crate) struct Lane {
    pub(crate) priority: Priority,
    config: LaneConfig,
    semaphore: Arc<Semaphore>,
    depth: Arc<AtomicUsize>,
    active: Arc<AtomicUsize>,
    processed: AtomicU64,
    rejected: AtomicU64,
    timed_out: AtomicU64,
    failed: AtomicU64,
    errors: Mutex<VecDeque<ErrorEntry>>,
}

impl Lane {
    pub(crate) fn new(priority: Priority, config: LaneConfig) -> Self {
        Self {
            priority,
            config,
            semaphore: Arc::new(Semaphore::new(config.concurrency)),
            depth: Arc::new(AtomicUsize::new(0)),
            active: Arc::new(AtomicUsize::new(0)),
            processed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            timed_out: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            errors: Mutex::new(VecDeque::with_capacity(ERROR_LOG_CAPACITY)),
        }
    }

    /// Decides admission without waiting.
    pub(crate) fn admit(&self) -> Result<Admission, AdmissionError> {
        match Arc::clone(&self.semaphore).try_acquire_owned() {
            Ok(permit) => return Ok(Admission::Ready(permit)),
            Err(TryAcquireError::Closed) => return Err(AdmissionError::ShuttingDown),
            Err(TryAcquireError::NoPermits) => {}
        }

        let cap = self.config.queue_depth;
        let reserved = self
            .depth
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |depth| {
                (depth < cap).then_some(depth + 1)
            });

        match reserved {
            Ok(_) => Ok(Admission::Queued(DepthGuard {
                depth: Arc::clone(&self.depth),
            })),
            Err(_) => {
                self.rejected.fetch_add(1, Ordering::Relaxed);
                Err(AdmissionError::QueueFull {
                    priority: self.priority,
                })
            }
        }
    }

    /// Waits for a concurrency slot after being queued.
    pub(crate) async fn wait_for_slot(
        &self,
        queued: DepthGuard,
    ) -> Result<OwnedSemaphorePermit, AdmissionError> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| AdmissionError::ShuttingDown)?;
        drop(queued);
        Ok(permit)
    }

    pub(crate) fn start(&self) -> ActiveGuard {
        self.active.fetch_add(1, Ordering::AcqRel);
        ActiveGuard {
            active: Arc::clone(&self.active),
        }
    }

    pub(crate) fn record_success(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failure(&self, call_id: Uuid, message: String) {
        self.processed.fetch_add(1, Ordering::Relaxed);
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.push_error(call_id, message);
    }

    pub(crate) fn record_timeout(&self, call_id: Uuid, message: String) {
        self.timed_out.fetch_add(1, Ordering::Relaxed);
        self.push_error(call_id, message);
    }

    fn push_error(&self, call_id: Uuid, message: String) {
        let mut errors = self.errors.lock();
        if errors.len() == ERROR_LOG_CAPACITY {
            errors.pop_front();
        }
        errors.push_back(ErrorEntry {
            call_id,
            at: SystemClock.now(),
            message,
        });
    }

    /// Admitted calls not yet finished (waiting or executing).
    pub(crate) fn outstanding(&self) -> usize {
        self.depth.load(Ordering::Acquire) + self.active.load(Ordering::Acquire)
    }

    /// Fails every waiter and every later admission with `ShuttingDown`.
    pub(crate) fn close(&self) {
        self.semaphore.close();
    }

    pub(crate) fn stats(&self) -> LaneStats {
        LaneStats {
            priority: self.priority,
            concurrency: self.config.concurrency,
            queue_depth_cap: self.config.queue_depth,
            depth: self.depth.load(Ordering::Acquire),
            active: self.active.load(Ordering::Acquire),
            processed: self.processed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            timed_out: self.timed_out.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            recent_errors: self.errors.lock().iter().cloned().collect(),
        }
    }
}

/// Releases a queue-depth reservation when dropped, including on cancellation.
pub(crate) struct DepthGuard {
    depth: Arc<AtomicUsize>,
}

impl Drop for DepthGuard {
    fn drop(&mut self) {
        self.depth.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Tracks one executing call.
pub(crate) struct ActiveGuard {
    active: Arc<AtomicUsize>,
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}
