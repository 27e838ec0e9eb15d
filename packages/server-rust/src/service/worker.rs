//! Background worker for periodic and on-demand tasks.
//!
//! Provides a generic `BackgroundWorker<R>` that processes tasks from an mpsc
//! channel via a `BackgroundRunnable` implementation, with periodic tick
//! callbacks. A failing tick is retried after a jittered backoff; the loop
//! itself only ends on `stop()`.

use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

// ---------------------------------------------------------------------------
// BackgroundRunnable trait
// ---------------------------------------------------------------------------

/// Task handler executed by `BackgroundWorker`.
#[async_trait]
pub trait BackgroundRunnable: Send + 'static {
    /// The type of task this runnable processes.
    type Task: Send + 'static;

    /// Process a single task.
    async fn run(&mut self, task: Self::Task);

    /// Called on each tick interval. An error schedules a backoff before the
    /// next tick. Default is a no-op.
    async fn on_tick(&mut self) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once when the worker is shutting down. Default is a no-op.
    async fn shutdown(&mut self) {}
}

// ---------------------------------------------------------------------------
// WorkerSchedule
// ---------------------------------------------------------------------------

/// Timing of a worker's periodic tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WorkerSchedule {
    pub tick_interval: Duration,
    /// Pause after a failed tick.
    pub error_backoff: Duration,
    /// Relative spread applied to `error_backoff`, e.g. `0.2` for +/-20%.
    pub jitter: f64,
}

impl WorkerSchedule {
    #[must_use]
    pub fn every(tick_interval: Duration) -> Self {
        Self {
            tick_interval,
            error_backoff: tick_interval,
            jitter: 0.0,
        }
    }

    #[must_use]
    pub fn with_backoff(mut self, error_backoff: Duration, jitter: f64) -> Self {
        self.error_backoff = error_backoff;
        self.jitter = jitter;
        self
    }

    /// `error_backoff` scaled by a random factor in `[1 - jitter, 1 + jitter]`.
    #[must_use]
    pub fn backoff(&self) -> Duration {
        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter <= f64::EPSILON {
            return self.error_backoff;
        }
        let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
        self.error_backoff.mul_f64(factor)
    }
}

// ---------------------------------------------------------------------------
// BackgroundWorker
// ---------------------------------------------------------------------------

/// Generic background worker that processes tasks via an mpsc channel.
///
/// The spawned tokio task:
/// 1. Listens for tasks on the channel and calls `run()` for each
/// 2. Calls `on_tick()` every `tick_interval` (not at startup)
/// 3. Sleeps a jittered backoff when a tick fails, then resumes
/// 4. Calls `shutdown()` when stopped
pub struct BackgroundWorker<R: BackgroundRunnable> {
    tx: Option<mpsc::Sender<R::Task>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl<R: BackgroundRunnable> BackgroundWorker<R> {
    /// Starts the worker. The task channel capacity is fixed at 256.
    pub fn start(mut runnable: R, schedule: WorkerSchedule) -> Self {
        let (tx, mut rx) = mpsc::channel::<R::Task>(256);
        let (shutdown_tx, mut shutdown_rx) = oneshot::channel::<()>();

        let handle = tokio::spawn(async move {
            let mut tick_interval = tokio::time::interval(schedule.tick_interval);
            tick_interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            // Skip the first immediate tick so on_tick doesn't fire at startup.
            tick_interval.tick().await;

            loop {
                tokio::select! {
                    task = rx.recv() => {
                        match task {
                            Some(t) => runnable.run(t).await,
                            None => break,
                        }
                    }
                    _ = tick_interval.tick() => {
                        if let Err(e) = runnable.on_tick().await {
                            let backoff = schedule.backoff();
                            warn!(error = %e, backoff_ms = backoff.as_millis(), "worker tick failed");
                            tokio::select! {
                                () = tokio::time::sleep(backoff) => {}
                                _ = &mut shutdown_rx => break,
                            }
                            tick_interval.reset();
                        }
                    }
                    _ = &mut shutdown_rx => {
                        break;
                    }
                }
            }

            runnable.shutdown().await;
        });

        Self {
            tx: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            handle: Some(handle),
        }
    }

    /// Submits a task to the worker.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker has been stopped.
    pub async fn submit(&self, task: R::Task) -> anyhow::Result<()> {
        match &self.tx {
            Some(tx) => tx
                .send(task)
                .await
                .map_err(|_| anyhow::anyhow!("worker channel closed")),
            None => Err(anyhow::anyhow!("worker not running")),
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stops the worker gracefully, waiting for the worker task to complete.
    pub async fn stop(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }
        self.tx.take();
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
