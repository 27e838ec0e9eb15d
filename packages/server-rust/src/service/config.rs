use std::time::Duration;

use switchyard_core::Priority;

use crate::network::AdminConfig;

/// Runtime configuration, resolved once at startup and handed to every
/// component constructor.
#[derive(Debug, Clone, Default)]
pub struct SwitchyardConfig {
    pub admission: AdmissionConfig,
    pub cache: CacheConfig,
    pub health: HealthConfig,
    pub remote: RemoteConfig,
    pub admin: AdminConfig,
}

/// Rejected configuration values.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{priority} lane concurrency must be at least 1")]
    ZeroConcurrency { priority: Priority },
    #[error("{field} must be greater than zero")]
    ZeroDuration { field: &'static str },
    #[error("health TTL ({health_ms}ms) must not exceed mode TTL ({mode_ms}ms)")]
    HealthTtlTooLong { health_ms: u128, mode_ms: u128 },
    #[error("backoff jitter must be within 0.0..=1.0, got {0}")]
    Jitter(String),
}

impl SwitchyardConfig {
    /// Checks cross-field constraints.
    ///
    /// # Errors
    ///
    /// Returns the first violated constraint.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for priority in Priority::ALL {
            if self.admission.lane(priority).concurrency == 0 {
                return Err(ConfigError::ZeroConcurrency { priority });
            }
        }

        let durations = [
            ("cache mode TTL", self.cache.mode_ttl),
            ("cache health TTL", self.cache.health_ttl),
            ("probe interval", self.health.probe_interval),
            ("probe timeout", self.health.probe_timeout),
            ("remote call timeout", self.remote.call_timeout),
        ];
        for (field, value) in durations {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration { field });
            }
        }

        if self.cache.health_ttl > self.cache.mode_ttl {
            return Err(ConfigError::HealthTtlTooLong {
                health_ms: self.cache.health_ttl.as_millis(),
                mode_ms: self.cache.mode_ttl.as_millis(),
            });
        }

        if !(0.0..=1.0).contains(&self.health.backoff_jitter) {
            return Err(ConfigError::Jitter(self.health.backoff_jitter.to_string()));
        }

        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Admission
// ---------------------------------------------------------------------------

/// Limits for one priority lane.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LaneConfig {
    /// Calls allowed to execute at once.
    pub concurrency: usize,
    /// Calls allowed to wait for a slot; the next one is rejected.
    pub queue_depth: usize,
}

impl LaneConfig {
    #[must_use]
    pub const fn new(concurrency: usize, queue_depth: usize) -> Self {
        Self {
            concurrency,
            queue_depth,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub high: LaneConfig,
    pub medium: LaneConfig,
    pub low: LaneConfig,
    /// How long shutdown waits for admitted work before cancelling waiters.
    pub drain_timeout: Duration,
}

impl AdmissionConfig {
    #[must_use]
    pub fn lane(&self, priority: Priority) -> LaneConfig {
        match priority {
            Priority::High => self.high,
            Priority::Medium => self.medium,
            Priority::Low => self.low,
        }
    }
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            high: LaneConfig::new(10, 50),
            medium: LaneConfig::new(5, 100),
            low: LaneConfig::new(2, 200),
            drain_timeout: Duration::from_secs(30),
        }
    }
}

// ---------------------------------------------------------------------------
// Cache, health, remote
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Lifetime of a cached effective mode.
    pub mode_ttl: Duration,
    /// Lifetime of a cached health snapshot. Shorter than `mode_ttl`.
    pub health_ttl: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            mode_ttl: Duration::from_secs(300),
            health_ttl: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Disables the periodic probe loop; on-demand probes still work.
    pub enabled: bool,
    pub probe_interval: Duration,
    /// Bound on a single local or remote health probe.
    pub probe_timeout: Duration,
    /// Pause after a failed probe cycle before the loop resumes.
    pub error_backoff: Duration,
    /// Fraction of `error_backoff` applied as random jitter (0.0 to 1.0).
    pub backoff_jitter: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            probe_interval: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(10),
            error_backoff: Duration::from_secs(10),
            backoff_jitter: 0.2,
        }
    }
}

#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Default bound on a remote call when the caller sets none.
    pub call_timeout: Duration,
    /// Sent as `X-Service-Token` on every remote call and probe.
    pub service_token: Option<String>,
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            call_timeout: Duration::from_secs(30),
            service_token: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SwitchyardConfig::default();
        assert_eq!(config.admission.high, LaneConfig::new(10, 50));
        assert_eq!(config.admission.medium, LaneConfig::new(5, 100));
        assert_eq!(config.admission.low, LaneConfig::new(2, 200));
        assert_eq!(config.cache.mode_ttl, Duration::from_secs(300));
        assert_eq!(config.cache.health_ttl, Duration::from_secs(60));
        assert_eq!(config.health.probe_interval, Duration::from_secs(30));
        assert_eq!(config.remote.call_timeout, Duration::from_secs(30));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn zero_concurrency_is_rejected() {
        let mut config = SwitchyardConfig::default();
        config.admission.low.concurrency = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroConcurrency {
                priority: Priority::Low
            })
        );
    }

    #[test]
    fn zero_queue_depth_is_allowed() {
        let mut config = SwitchyardConfig::default();
        config.admission.high.queue_depth = 0;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn health_ttl_longer_than_mode_ttl_is_rejected() {
        let mut config = SwitchyardConfig::default();
        config.cache.health_ttl = Duration::from_secs(600);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::HealthTtlTooLong { .. })
        ));
    }

    #[test]
    fn zero_ttl_is_rejected() {
        let mut config = SwitchyardConfig::default();
        config.cache.mode_ttl = Duration::ZERO;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration {
                field: "cache mode TTL"
            })
        );
    }
}
