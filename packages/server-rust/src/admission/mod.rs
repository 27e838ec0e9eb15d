//! Priority-stratified admission control.
//!
//! Three independent lanes (High, Medium, Low) each cap how many calls run at
//! once and how many may wait for a slot. A call arriving at a full lane is
//! rejected with `QueueFull` immediately; nothing queues unboundedly. Budgets
//! are per lane and never shared, so Low keeps its own throughput while High
//! is saturated.

pub mod gather;
mod lane;

use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use switchyard_core::Priority;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

pub use gather::GatherPolicy;
pub use lane::{ErrorEntry, LaneStats, ERROR_LOG_CAPACITY};

use self::lane::{Admission, Lane};
use crate::error::AdmissionError;
use crate::service::config::AdmissionConfig;
use crate::service::lifecycle::{ComponentContext, ManagedComponent};

/// Bookkeeping for one submitted call.
#[derive(Debug, Clone)]
pub struct QueuedCall {
    pub id: Uuid,
    pub priority: Priority,
    pub enqueued_at: Instant,
    /// Covers both waiting for a slot and execution.
    pub deadline: Option<Instant>,
}

impl QueuedCall {
    fn new(priority: Priority, timeout: Option<Duration>) -> Self {
        let enqueued_at = Instant::now();
        Self {
            id: Uuid::new_v4(),
            priority,
            enqueued_at,
            deadline: timeout.map(|t| enqueued_at + t),
        }
    }
}

/// Snapshot of every lane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub closed: bool,
    pub lanes: Vec<LaneStats>,
}

// ---------------------------------------------------------------------------
// AdmissionQueue
// ---------------------------------------------------------------------------

pub struct AdmissionQueue {
    lanes: [Lane; 3],
    closed: AtomicBool,
    drain_timeout: Duration,
}

impl AdmissionQueue {
    #[must_use]
    pub fn new(config: &AdmissionConfig) -> Self {
        Self {
            lanes: Priority::ALL.map(|p| Lane::new(p, config.lane(p))),
            closed: AtomicBool::new(false),
            drain_timeout: config.drain_timeout,
        }
    }

    fn lane(&self, priority: Priority) -> &Lane {
        &self.lanes[priority.index()]
    }

    /// Runs `operation` once `priority`'s lane admits it.
    ///
    /// Rejection is immediate when the lane's waiting queue is full. Once
    /// admitted, the operation waits for a concurrency slot and then runs in
    /// the caller's task. `timeout` bounds waiting plus execution; on expiry
    /// the operation is dropped, its slot released, and `Timeout` returned.
    ///
    /// # Errors
    ///
    /// Returns the operation's own error, or an [`AdmissionError`] converted
    /// into `E` for rejection, timeout and shutdown.
    pub async fn submit<F, T, E>(
        &self,
        operation: F,
        priority: Priority,
        timeout: Option<Duration>,
    ) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
        E: From<AdmissionError> + Display,
    {
        if self.closed.load(Ordering::Acquire) {
            return Err(AdmissionError::ShuttingDown.into());
        }

        let lane = self.lane(priority);
        let call = QueuedCall::new(priority, timeout);

        let admission = match lane.admit() {
            Ok(admission) => admission,
            Err(err) => {
                if matches!(err, AdmissionError::QueueFull { .. }) {
                    metrics::counter!(
                        "switchyard_admission_rejected_total",
                        "priority" => priority.as_str()
                    )
                    .increment(1);
                    debug!(call_id = %call.id, %priority, "admission rejected, lane full");
                }
                return Err(err.into());
            }
        };

        let span = info_span!("admission", call_id = %call.id, priority = priority.as_str());
        let execution = async {
            let _permit = match admission {
                Admission::Ready(permit) => permit,
                Admission::Queued(queued) => lane.wait_for_slot(queued).await?,
            };
            let _active = lane.start();
            Ok::<_, AdmissionError>(operation.await)
        }
        .instrument(span.clone());

        let outcome = match timeout {
            Some(limit) => match tokio::time::timeout(limit, execution).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    #[allow(clippy::cast_possible_truncation)]
                    let timeout_ms = limit.as_millis() as u64;
                    let err = AdmissionError::Timeout {
                        priority,
                        timeout_ms,
                    };
                    lane.record_timeout(call.id, err.to_string());
                    metrics::counter!(
                        "switchyard_admission_timeouts_total",
                        "priority" => priority.as_str()
                    )
                    .increment(1);
                    return Err(err.into());
                }
            },
            None => execution.await,
        };

        let _entered = span.enter();
        match outcome {
            Ok(Ok(value)) => {
                lane.record_success();
                metrics::counter!(
                    "switchyard_admission_processed_total",
                    "priority" => priority.as_str()
                )
                .increment(1);
                Ok(value)
            }
            Ok(Err(err)) => {
                lane.record_failure(call.id, err.to_string());
                metrics::counter!(
                    "switchyard_admission_processed_total",
                    "priority" => priority.as_str()
                )
                .increment(1);
                Err(err)
            }
            Err(admission) => Err(admission.into()),
        }
    }

    /// Stops admitting new calls. Already admitted calls keep running.
    pub fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            info!("admission queue closed to new calls");
        }
    }

    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Admitted calls that have not finished, across all lanes.
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.lanes.iter().map(Lane::outstanding).sum()
    }

    /// Waits for admitted work to finish, up to `timeout`.
    ///
    /// Returns `true` if everything drained. On expiry the lanes are closed,
    /// so calls still waiting for a slot fail with `ShuttingDown`, and
    /// `false` is returned.
    pub async fn drain(&self, timeout: Duration) -> bool {
        self.close();
        let deadline = Instant::now() + timeout;

        loop {
            if self.outstanding() == 0 {
                info!("admission queue drained");
                return true;
            }
            if Instant::now() >= deadline {
                warn!(
                    outstanding = self.outstanding(),
                    "admission drain timed out, cancelling waiting calls"
                );
                for lane in &self.lanes {
                    lane.close();
                }
                return false;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            closed: self.is_closed(),
            lanes: self.lanes.iter().map(Lane::stats).collect(),
        }
    }
}

#[async_trait]
impl ManagedComponent for AdmissionQueue {
    fn name(&self) -> &'static str {
        "admission_queue"
    }

    async fn init(&self, _ctx: &ComponentContext) -> anyhow::Result<()> {
        Ok(())
    }

    async fn shutdown(&self, terminate: bool) -> anyhow::Result<()> {
        if terminate {
            self.close();
            for lane in &self.lanes {
                lane.close();
            }
        } else {
            self.drain(self.drain_timeout).await;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    use tokio::sync::Semaphore;

    use super::*;
    use crate::service::config::LaneConfig;

    #[derive(Debug, PartialEq, Eq, thiserror::Error)]
    enum TestError {
        #[error("admission: {0}")]
        Admission(#[from] AdmissionError),
        #[error("boom")]
        Boom,
    }

    fn queue(high: LaneConfig, medium: LaneConfig, low: LaneConfig) -> Arc<AdmissionQueue> {
        Arc::new(AdmissionQueue::new(&AdmissionConfig {
            high,
            medium,
            low,
            drain_timeout: Duration::from_secs(1),
        }))
    }

    /// Closed until `open` is called; then every holder passes.
    #[derive(Clone)]
    struct Gate(Arc<Semaphore>);

    impl Gate {
        fn new() -> Self {
            Self(Arc::new(Semaphore::new(0)))
        }

        async fn pass(&self) {
            let _permit = self.0.acquire().await;
        }

        fn open(&self) {
            self.0.add_permits(1024);
        }
    }

    async fn settle() {
        for _ in 0..20 {
            tokio::task::yield_now().await;
        }
    }

    /// Submits `n` calls on `priority` that block until `gate` opens.
    async fn occupy(
        queue: &Arc<AdmissionQueue>,
        priority: Priority,
        n: usize,
        gate: &Gate,
    ) -> Vec<tokio::task::JoinHandle<Result<(), TestError>>> {
        let mut handles = Vec::new();
        for _ in 0..n {
            let queue = Arc::clone(queue);
            let gate = gate.clone();
            handles.push(tokio::spawn(async move {
                queue
                    .submit(
                        async move {
                            gate.pass().await;
                            Ok::<_, TestError>(())
                        },
                        priority,
                        None,
                    )
                    .await
            }));
            settle().await;
        }
        handles
    }

    #[tokio::test]
    async fn submit_returns_operation_result() {
        let q = queue(LaneConfig::new(1, 1), LaneConfig::new(1, 1), LaneConfig::new(1, 1));
        let value = q
            .submit(async { Ok::<_, TestError>(7) }, Priority::High, None)
            .await
            .unwrap();
        assert_eq!(value, 7);

        let err = q
            .submit(async { Err::<(), _>(TestError::Boom) }, Priority::High, None)
            .await
            .unwrap_err();
        assert_eq!(err, TestError::Boom);

        let stats = q.stats();
        assert_eq!(stats.lanes[0].processed, 2);
        assert_eq!(stats.lanes[0].failed, 1);
        assert_eq!(stats.lanes[0].recent_errors[0].message, "boom");
    }

    #[tokio::test]
    async fn rejects_beyond_capacity_without_blocking() {
        let q = queue(LaneConfig::new(2, 3), LaneConfig::new(1, 1), LaneConfig::new(1, 1));
        let gate = Gate::new();

        // 2 running + 3 waiting fills the lane.
        let held = occupy(&q, Priority::High, 5, &gate).await;
        assert_eq!(q.stats().lanes[0].active, 2);
        assert_eq!(q.stats().lanes[0].depth, 3);

        let started = std::time::Instant::now();
        let err = q
            .submit(async { Ok::<_, TestError>(()) }, Priority::High, None)
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TestError::Admission(AdmissionError::QueueFull {
                priority: Priority::High
            })
        );
        assert!(started.elapsed() < Duration::from_millis(100));
        assert_eq!(q.stats().lanes[0].rejected, 1);

        gate.open();
        for handle in held {
            handle.await.unwrap().unwrap();
        }
        assert_eq!(q.outstanding(), 0);
        assert_eq!(q.stats().lanes[0].processed, 5);
    }

    #[tokio::test]
    async fn concurrency_cap_is_enforced() {
        let q = queue(LaneConfig::new(1, 1), LaneConfig::new(3, 50), LaneConfig::new(1, 1));
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..12 {
            let q = Arc::clone(&q);
            let running = Arc::clone(&running);
            let peak = Arc::clone(&peak);
            handles.push(tokio::spawn(async move {
                q.submit(
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, TestError>(())
                    },
                    Priority::Medium,
                    None,
                )
                .await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert_eq!(q.stats().lanes[1].processed, 12);
    }

    #[tokio::test]
    async fn low_lane_runs_while_high_is_saturated() {
        let q = queue(LaneConfig::new(1, 0), LaneConfig::new(1, 1), LaneConfig::new(1, 1));
        let gate = Gate::new();
        let held = occupy(&q, Priority::High, 1, &gate).await;

        let high = q
            .submit(async { Ok::<_, TestError>(()) }, Priority::High, None)
            .await;
        assert!(matches!(
            high,
            Err(TestError::Admission(AdmissionError::QueueFull { .. }))
        ));

        let low = q
            .submit(async { Ok::<_, TestError>("low ran") }, Priority::Low, None)
            .await
            .unwrap();
        assert_eq!(low, "low ran");

        gate.open();
        for handle in held {
            handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_and_frees_the_slot() {
        let q = queue(LaneConfig::new(1, 1), LaneConfig::new(1, 1), LaneConfig::new(1, 1));

        let err = q
            .submit(
                async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok::<_, TestError>(())
                },
                Priority::Low,
                Some(Duration::from_millis(50)),
            )
            .await
            .unwrap_err();
        assert_eq!(
            err,
            TestError::Admission(AdmissionError::Timeout {
                priority: Priority::Low,
                timeout_ms: 50
            })
        );

        let stats = q.stats();
        assert_eq!(stats.lanes[2].timed_out, 1);
        assert_eq!(stats.lanes[2].active, 0);

        let ok = q
            .submit(async { Ok::<_, TestError>(1) }, Priority::Low, None)
            .await;
        assert_eq!(ok, Ok(1));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_covers_time_spent_waiting() {
        let q = queue(LaneConfig::new(1, 1), LaneConfig::new(1, 1), LaneConfig::new(1, 1));
        let gate = Gate::new();
        let held = occupy(&q, Priority::Medium, 1, &gate).await;

        let err = q
            .submit(
                async { Ok::<_, TestError>(()) },
                Priority::Medium,
                Some(Duration::from_millis(20)),
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            TestError::Admission(AdmissionError::Timeout { .. })
        ));
        assert_eq!(q.stats().lanes[1].depth, 0);

        gate.open();
        for handle in held {
            handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn closed_queue_rejects_new_calls() {
        let q = queue(LaneConfig::new(1, 1), LaneConfig::new(1, 1), LaneConfig::new(1, 1));
        q.close();
        let err = q
            .submit(async { Ok::<_, TestError>(()) }, Priority::High, None)
            .await
            .unwrap_err();
        assert_eq!(err, TestError::Admission(AdmissionError::ShuttingDown));
    }

    #[tokio::test]
    async fn drain_waits_for_running_work() {
        let q = queue(LaneConfig::new(1, 1), LaneConfig::new(1, 1), LaneConfig::new(1, 1));
        let gate = Gate::new();
        let held = occupy(&q, Priority::High, 1, &gate).await;
        assert_eq!(q.outstanding(), 1);

        let opener = {
            let gate = gate.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(30)).await;
                gate.open();
            })
        };

        assert!(q.drain(Duration::from_secs(2)).await);
        assert!(q.is_closed());
        opener.await.unwrap();
        for handle in held {
            handle.await.unwrap().unwrap();
        }
    }

    #[tokio::test]
    async fn drain_timeout_cancels_waiters() {
        let q = queue(LaneConfig::new(1, 1), LaneConfig::new(1, 1), LaneConfig::new(1, 1));
        let gate = Gate::new();
        let mut held = occupy(&q, Priority::High, 2, &gate).await;
        assert_eq!(q.stats().lanes[0].depth, 1);

        assert!(!q.drain(Duration::from_millis(30)).await);

        let waiter = held.pop().unwrap();
        assert_eq!(
            waiter.await.unwrap(),
            Err(TestError::Admission(AdmissionError::ShuttingDown))
        );

        gate.open();
        for handle in held {
            handle.await.unwrap().unwrap();
        }
    }
}
