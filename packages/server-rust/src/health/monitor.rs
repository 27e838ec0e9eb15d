//! Background health monitor: runs a probe cycle on every tick and serves
//! on-demand probe requests.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::prober::{HealthProber, ProbeReport};
use crate::error::StorageError;
use crate::service::config::HealthConfig;
use crate::service::lifecycle::{ComponentContext, ManagedComponent};
use crate::service::worker::{BackgroundRunnable, BackgroundWorker, WorkerSchedule};

/// On-demand work for the monitor's worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HealthTask {
    ProbeAll,
    Probe(String),
}

struct MonitorRunnable {
    prober: HealthProber,
}

#[async_trait]
impl BackgroundRunnable for MonitorRunnable {
    type Task = HealthTask;

    async fn run(&mut self, task: HealthTask) {
        let outcome = match &task {
            HealthTask::ProbeAll => self.prober.probe_all().await.map(|_| ()),
            HealthTask::Probe(name) => self.prober.probe_service(name).await.map(|_| ()),
        };
        if let Err(e) = outcome {
            warn!(?task, error = %e, "requested health probe failed");
        }
    }

    async fn on_tick(&mut self) -> anyhow::Result<()> {
        let reports = self.prober.probe_all().await?;
        let changed = reports.iter().filter(|r| r.changed()).count();
        debug!(probed = reports.len(), changed, "health cycle complete");
        Ok(())
    }

    async fn shutdown(&mut self) {
        debug!("health monitor worker stopped");
    }
}

// ---------------------------------------------------------------------------
// HealthMonitor
// ---------------------------------------------------------------------------

/// Keeps service health eventually consistent with reality.
///
/// A probe cycle that fails as a whole (the registry cannot be listed) is
/// logged and retried after a jittered backoff; the loop keeps running.
pub struct HealthMonitor {
    prober: HealthProber,
    config: HealthConfig,
    worker: Mutex<Option<BackgroundWorker<MonitorRunnable>>>,
}

impl HealthMonitor {
    #[must_use]
    pub fn new(prober: HealthProber, config: HealthConfig) -> Self {
        Self {
            prober,
            config,
            worker: Mutex::new(None),
        }
    }

    /// Starts the periodic loop. Returns `false` if it was already running.
    pub async fn start(&self) -> bool {
        let mut worker = self.worker.lock().await;
        if worker.as_ref().is_some_and(BackgroundWorker::is_running) {
            return false;
        }
        let schedule = WorkerSchedule::every(self.config.probe_interval)
            .with_backoff(self.config.error_backoff, self.config.backoff_jitter);
        *worker = Some(BackgroundWorker::start(
            MonitorRunnable {
                prober: self.prober.clone(),
            },
            schedule,
        ));
        info!(
            interval_ms = self.config.probe_interval.as_millis(),
            "health monitor started"
        );
        true
    }

    /// Stops the loop, waiting for an in-flight cycle to finish.
    pub async fn stop(&self) {
        if let Some(mut worker) = self.worker.lock().await.take() {
            worker.stop().await;
            info!("health monitor stopped");
        }
    }

    pub async fn is_running(&self) -> bool {
        self.worker
            .lock()
            .await
            .as_ref()
            .is_some_and(BackgroundWorker::is_running)
    }

    /// Queues a probe on the running loop without waiting for it.
    ///
    /// # Errors
    ///
    /// Fails if the monitor is not running.
    pub async fn trigger(&self, task: HealthTask) -> anyhow::Result<()> {
        match self.worker.lock().await.as_ref() {
            Some(worker) => worker.submit(task).await,
            None => Err(anyhow::anyhow!("health monitor not running")),
        }
    }

    /// Runs one full probe cycle now.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the active services cannot be listed.
    pub async fn probe_all(&self) -> Result<Vec<ProbeReport>, StorageError> {
        self.prober.probe_all().await
    }

    /// Probes one service now. `None` if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the registry cannot be read.
    pub async fn probe_service(&self, name: &str) -> Result<Option<ProbeReport>, StorageError> {
        self.prober.probe_service(name).await
    }
}

#[async_trait]
impl ManagedComponent for HealthMonitor {
    fn name(&self) -> &'static str {
        "health_monitor"
    }

    async fn init(&self, _ctx: &ComponentContext) -> anyhow::Result<()> {
        if self.config.enabled {
            self.start().await;
        } else {
            info!("health monitor disabled by configuration");
        }
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        self.stop().await;
        Ok(())
    }
}
