//! Process lifecycle state and admin request tracking for graceful shutdown.
//!
//! The state lives in an `ArcSwap` so readiness checks never take a lock.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use serde::Serialize;
use tokio::sync::watch;

/// Lifecycle of the switchyard process.
///
/// State machine: Starting -> Ready -> Draining -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    /// Components are initializing.
    Starting,
    /// Components are up and the admin surface is serving.
    Ready,
    /// Shutdown was requested; admitted work is finishing.
    Draining,
    /// Every admin request has completed.
    Stopped,
}

impl LifecycleState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Starting => "starting",
            Self::Ready => "ready",
            Self::Draining => "draining",
            Self::Stopped => "stopped",
        }
    }
}

/// Coordinates graceful shutdown.
///
/// 1. Readiness reads `state()`
/// 2. `begin_shutdown()` moves to Draining and wakes every `shutdown_receiver`
/// 3. `wait_for_drain()` waits for in-flight admin requests, then moves to
///    Stopped
#[derive(Debug)]
pub struct ShutdownController {
    signal: watch::Sender<bool>,
    in_flight: Arc<AtomicU64>,
    state: ArcSwap<LifecycleState>,
}

impl ShutdownController {
    #[must_use]
    pub fn new() -> Self {
        let (signal, _rx) = watch::channel(false);
        Self {
            signal,
            in_flight: Arc::new(AtomicU64::new(0)),
            state: ArcSwap::from_pointee(LifecycleState::Starting),
        }
    }

    pub fn set_ready(&self) {
        self.state.store(Arc::new(LifecycleState::Ready));
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        **self.state.load()
    }

    #[must_use]
    pub fn is_shutting_down(&self) -> bool {
        *self.signal.borrow()
    }

    #[must_use]
    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.signal.subscribe()
    }

    /// Resolves once `begin_shutdown` has been called.
    pub async fn wait_for_shutdown(&self) {
        let mut rx = self.signal.subscribe();
        // An error means the sender is gone, which only happens on drop.
        let _ = rx.wait_for(|stopping| *stopping).await;
    }

    /// Moves to Draining and signals every receiver. Idempotent.
    pub fn begin_shutdown(&self) {
        self.state.store(Arc::new(LifecycleState::Draining));
        self.signal.send_replace(true);
    }

    /// Counts one admin request until the guard drops.
    #[must_use]
    pub fn in_flight_guard(&self) -> InFlightGuard {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
        InFlightGuard {
            in_flight: Arc::clone(&self.in_flight),
        }
    }

    #[must_use]
    pub fn in_flight_count(&self) -> u64 {
        self.in_flight.load(Ordering::Relaxed)
    }

    /// Waits up to `timeout` for in-flight requests to finish.
    ///
    /// Returns `true` and moves to Stopped when they did; `false` leaves the
    /// state at Draining.
    pub async fn wait_for_drain(&self, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        while self.in_flight_count() > 0 {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        self.state.store(Arc::new(LifecycleState::Stopped));
        true
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the in-flight counter on drop, including during unwinding.
#[derive(Debug)]
pub struct InFlightGuard {
    in_flight: Arc<AtomicU64>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }
}
