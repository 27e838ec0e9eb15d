//! One probe cycle: checks every active service and records the results.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::Serialize;
use switchyard_core::{ConnectionMode, HealthStatus, Priority, ServiceRecord};
use tracing::{debug, info, warn};

use crate::admission::AdmissionQueue;
use crate::error::{AdmissionError, StorageError};
use crate::local::Mounter;
use crate::registry::Registry;
use crate::remote::RemoteTransport;

/// How a service's status was determined.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeMethod {
    Local,
    Remote,
    /// Not probed: disabled, unreachable by any mode, or the Low lane was full.
    Skipped,
}

/// Result of probing one service.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProbeReport {
    pub service: String,
    pub previous: HealthStatus,
    pub status: HealthStatus,
    pub method: ProbeMethod,
    pub latency_ms: u64,
    pub error: Option<String>,
}

impl ProbeReport {
    #[must_use]
    pub fn changed(&self) -> bool {
        self.method != ProbeMethod::Skipped && self.previous != self.status
    }

    fn skipped(record: &ServiceRecord, reason: impl Into<String>) -> Self {
        Self {
            service: record.name.clone(),
            previous: record.health_status,
            status: record.health_status,
            method: ProbeMethod::Skipped,
            latency_ms: 0,
            error: Some(reason.into()),
        }
    }
}

struct Observation {
    status: HealthStatus,
    method: ProbeMethod,
    error: Option<String>,
}

// ---------------------------------------------------------------------------
// HealthProber
// ---------------------------------------------------------------------------

/// Probes services through their mounted local target or remote address.
///
/// Probes run in the Low admission lane so they never take budget from
/// High or Medium traffic.
#[derive(Clone)]
pub struct HealthProber {
    registry: Arc<Registry>,
    mounter: Arc<Mounter>,
    transport: Arc<dyn RemoteTransport>,
    queue: Arc<AdmissionQueue>,
    probe_timeout: Duration,
}

impl HealthProber {
    #[must_use]
    pub fn new(
        registry: Arc<Registry>,
        mounter: Arc<Mounter>,
        transport: Arc<dyn RemoteTransport>,
        queue: Arc<AdmissionQueue>,
        probe_timeout: Duration,
    ) -> Self {
        Self {
            registry,
            mounter,
            transport,
            queue,
            probe_timeout,
        }
    }

    /// Probes every active service concurrently.
    ///
    /// A failure probing one service never aborts the others; reports come
    /// back sorted by service name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] only if the active services cannot be listed.
    pub async fn probe_all(&self) -> Result<Vec<ProbeReport>, StorageError> {
        let records = self.registry.list_active().await?;

        let probes: Vec<_> = records
            .into_iter()
            .map(|record| {
                let prober = self.clone();
                let name = record.name.clone();
                let previous = record.health_status;
                (name, previous, tokio::spawn(async move { prober.probe_record(record).await }))
            })
            .collect();

        let mut reports = Vec::with_capacity(probes.len());
        for (service, previous, handle) in probes {
            match handle.await {
                Ok(report) => reports.push(report),
                Err(e) => {
                    warn!(%service, error = %e, "health probe task failed");
                    let report = ProbeReport {
                        service,
                        previous,
                        status: HealthStatus::Down,
                        method: ProbeMethod::Local,
                        latency_ms: 0,
                        error: Some(e.to_string()),
                    };
                    self.record(&report).await;
                    reports.push(report);
                }
            }
        }
        reports.sort_by(|a, b| a.service.cmp(&b.service));
        Ok(reports)
    }

    /// Probes one service by name. `None` if it is unknown.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the registry cannot be read.
    pub async fn probe_service(&self, name: &str) -> Result<Option<ProbeReport>, StorageError> {
        match self.registry.get(name).await? {
            Some(record) => Ok(Some(self.probe_record(record).await)),
            None => Ok(None),
        }
    }

    async fn probe_record(&self, record: ServiceRecord) -> ProbeReport {
        if !record.is_active || record.preferred_mode == ConnectionMode::Disabled {
            return ProbeReport::skipped(&record, "disabled");
        }

        let start = Instant::now();
        let observed = self
            .queue
            .submit(
                async { Ok::<_, AdmissionError>(self.observe(&record).await) },
                Priority::Low,
                None,
            )
            .await;

        let observation = match observed {
            Ok(observation) => observation,
            Err(e) => {
                debug!(service = %record.name, error = %e, "health probe not admitted");
                return ProbeReport::skipped(&record, e.to_string());
            }
        };
        if observation.method == ProbeMethod::Skipped {
            return ProbeReport::skipped(&record, observation.error.unwrap_or_default());
        }

        let report = ProbeReport {
            service: record.name.clone(),
            previous: record.health_status,
            status: observation.status,
            method: observation.method,
            latency_ms: u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX),
            error: observation.error,
        };
        self.record(&report).await;
        report
    }

    async fn observe(&self, record: &ServiceRecord) -> Observation {
        let local = self.mounter.get(&record.name);

        if let Some(target) = local {
            let outcome = tokio::time::timeout(self.probe_timeout, target.health()).await;
            let error = match outcome {
                Ok(Ok(status)) => {
                    return Observation {
                        status,
                        method: ProbeMethod::Local,
                        error: None,
                    }
                }
                Ok(Err(e)) => e.to_string(),
                Err(_) => format!("local health check timed out after {:?}", self.probe_timeout),
            };
            if record.remote_address.is_none() {
                return Observation {
                    status: HealthStatus::Down,
                    method: ProbeMethod::Local,
                    error: Some(error),
                };
            }
            debug!(service = %record.name, %error, "local probe failed, asking remote");
        }

        let Some(address) = record.remote_address.as_deref() else {
            return Observation {
                status: record.health_status,
                method: ProbeMethod::Skipped,
                error: Some("no local target mounted and no remote address".to_string()),
            };
        };

        match self.transport.health(address, Some(self.probe_timeout)).await {
            Ok(health) => Observation {
                status: health.status(),
                method: ProbeMethod::Remote,
                error: None,
            },
            Err(e) => Observation {
                status: HealthStatus::Down,
                method: ProbeMethod::Remote,
                error: Some(e.to_string()),
            },
        }
    }

    async fn record(&self, report: &ProbeReport) {
        let now = self.registry.clock().now();
        if let Err(e) = self
            .registry
            .set_health(&report.service, report.status, now)
            .await
        {
            warn!(service = %report.service, error = %e, "failed to record health");
            return;
        }

        if report.changed() {
            info!(
                service = %report.service,
                previous = %report.previous,
                current = %report.status,
                method = ?report.method,
                "health changed"
            );
            metrics::counter!(
                "switchyard_health_transitions_total",
                "service" => report.service.clone(),
                "status" => report.status.as_str()
            )
            .increment(1);
        } else {
            debug!(service = %report.service, status = %report.status, "health unchanged");
        }
    }
}
