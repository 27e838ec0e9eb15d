//! Command-line and environment configuration.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use clap::Parser;
use switchyard_core::ServiceMetadata;

use crate::network::AdminConfig;
use crate::service::config::{
    AdmissionConfig, CacheConfig, HealthConfig, LaneConfig, RemoteConfig, SwitchyardConfig,
};
use crate::telemetry::LogFormat;

/// Switchyard: adaptive local/remote call routing with priority admission.
#[derive(Parser, Debug, Clone)]
#[command(name = "switchyard", version)]
pub struct ConfigArgs {
    /// Admin API bind host
    #[arg(long, env = "SWITCHYARD_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Admin API port (0 picks a free port)
    #[arg(long, env = "SWITCHYARD_PORT", default_value_t = 8700)]
    pub port: u16,

    /// Bearer token required on mutating admin routes
    #[arg(long, env = "SWITCHYARD_ADMIN_TOKEN")]
    pub admin_token: Option<String>,

    /// Allowed CORS origins, comma separated
    #[arg(long, env = "SWITCHYARD_CORS_ORIGINS", value_delimiter = ',', default_value = "*")]
    pub cors_origins: Vec<String>,

    /// Admin request timeout in seconds
    #[arg(long, env = "SWITCHYARD_REQUEST_TIMEOUT_SECS", default_value_t = 30)]
    pub request_timeout_secs: u64,

    #[arg(long, env = "SWITCHYARD_HIGH_CONCURRENCY", default_value_t = 10)]
    pub high_concurrency: usize,
    #[arg(long, env = "SWITCHYARD_HIGH_QUEUE_DEPTH", default_value_t = 50)]
    pub high_queue_depth: usize,
    #[arg(long, env = "SWITCHYARD_MEDIUM_CONCURRENCY", default_value_t = 5)]
    pub medium_concurrency: usize,
    #[arg(long, env = "SWITCHYARD_MEDIUM_QUEUE_DEPTH", default_value_t = 100)]
    pub medium_queue_depth: usize,
    #[arg(long, env = "SWITCHYARD_LOW_CONCURRENCY", default_value_t = 2)]
    pub low_concurrency: usize,
    #[arg(long, env = "SWITCHYARD_LOW_QUEUE_DEPTH", default_value_t = 200)]
    pub low_queue_depth: usize,

    /// Seconds shutdown waits for admitted calls
    #[arg(long, env = "SWITCHYARD_DRAIN_TIMEOUT_SECS", default_value_t = 30)]
    pub drain_timeout_secs: u64,

    /// Cached effective-mode lifetime in seconds
    #[arg(long, env = "SWITCHYARD_MODE_TTL_SECS", default_value_t = 300)]
    pub mode_ttl_secs: u64,

    /// Cached health lifetime in seconds
    #[arg(long, env = "SWITCHYARD_HEALTH_TTL_SECS", default_value_t = 60)]
    pub health_ttl_secs: u64,

    /// Disable the periodic health monitor
    #[arg(long, env = "SWITCHYARD_NO_HEALTH_MONITOR")]
    pub no_health_monitor: bool,

    #[arg(long, env = "SWITCHYARD_PROBE_INTERVAL_SECS", default_value_t = 30)]
    pub probe_interval_secs: u64,
    #[arg(long, env = "SWITCHYARD_PROBE_TIMEOUT_SECS", default_value_t = 10)]
    pub probe_timeout_secs: u64,
    #[arg(long, env = "SWITCHYARD_PROBE_BACKOFF_SECS", default_value_t = 10)]
    pub probe_backoff_secs: u64,
    #[arg(long, env = "SWITCHYARD_PROBE_JITTER", default_value_t = 0.2)]
    pub probe_jitter: f64,

    /// Default remote call timeout in seconds
    #[arg(long, env = "SWITCHYARD_CALL_TIMEOUT_SECS", default_value_t = 30)]
    pub call_timeout_secs: u64,

    /// Sent as X-Service-Token on remote calls and probes
    #[arg(long, env = "SWITCHYARD_SERVICE_TOKEN")]
    pub service_token: Option<String>,

    /// JSON array of service metadata to register at startup
    #[arg(long, env = "SWITCHYARD_SERVICES_FILE")]
    pub services_file: Option<PathBuf>,

    /// Persist the registry in this redb file instead of memory
    #[arg(long, env = "SWITCHYARD_REGISTRY_PATH")]
    pub registry_path: Option<PathBuf>,

    /// Serve Prometheus metrics on this address
    #[arg(long, env = "SWITCHYARD_METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "SWITCHYARD_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[arg(long, env = "SWITCHYARD_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    pub log_format: LogFormat,
}

impl ConfigArgs {
    /// Maps the arguments onto a validated [`SwitchyardConfig`].
    ///
    /// # Errors
    ///
    /// Returns the first violated configuration constraint.
    pub fn to_config(&self) -> anyhow::Result<SwitchyardConfig> {
        let config = SwitchyardConfig {
            admission: AdmissionConfig {
                high: LaneConfig::new(self.high_concurrency, self.high_queue_depth),
                medium: LaneConfig::new(self.medium_concurrency, self.medium_queue_depth),
                low: LaneConfig::new(self.low_concurrency, self.low_queue_depth),
                drain_timeout: Duration::from_secs(self.drain_timeout_secs),
            },
            cache: CacheConfig {
                mode_ttl: Duration::from_secs(self.mode_ttl_secs),
                health_ttl: Duration::from_secs(self.health_ttl_secs),
            },
            health: HealthConfig {
                enabled: !self.no_health_monitor,
                probe_interval: Duration::from_secs(self.probe_interval_secs),
                probe_timeout: Duration::from_secs(self.probe_timeout_secs),
                error_backoff: Duration::from_secs(self.probe_backoff_secs),
                backoff_jitter: self.probe_jitter,
            },
            remote: RemoteConfig {
                call_timeout: Duration::from_secs(self.call_timeout_secs),
                service_token: self.service_token.clone(),
            },
            admin: AdminConfig {
                host: self.host.clone(),
                port: self.port,
                request_timeout: Duration::from_secs(self.request_timeout_secs),
                admin_token: self.admin_token.clone(),
                cors_origins: self.cors_origins.clone(),
            },
        };
        config.validate()?;
        Ok(config)
    }
}

/// Reads a JSON array of [`ServiceMetadata`].
///
/// # Errors
///
/// Fails if the file cannot be read or is not a valid manifest.
pub fn load_services_file(path: &Path) -> anyhow::Result<Vec<ServiceMetadata>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read services file {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("invalid services file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn defaults_map_to_default_config() {
        let args = ConfigArgs::try_parse_from(["switchyard"]).unwrap();
        let config = args.to_config().unwrap();
        let defaults = SwitchyardConfig::default();

        assert_eq!(config.admission.high, defaults.admission.high);
        assert_eq!(config.admission.low, defaults.admission.low);
        assert_eq!(config.cache.mode_ttl, defaults.cache.mode_ttl);
        assert_eq!(config.health.probe_interval, defaults.health.probe_interval);
        assert!(config.health.enabled);
        assert_eq!(config.admin.bind_address(), "127.0.0.1:8700");
        assert_eq!(args.log_format, LogFormat::Text);
    }

    #[test]
    fn flags_override_and_validate() {
        let args = ConfigArgs::try_parse_from([
            "switchyard",
            "--high-concurrency",
            "3",
            "--cors-origins",
            "http://a.test,http://b.test",
            "--no-health-monitor",
            "--log-format",
            "json",
        ])
        .unwrap();
        let config = args.to_config().unwrap();
        assert_eq!(config.admission.high, LaneConfig::new(3, 50));
        assert_eq!(config.admin.cors_origins.len(), 2);
        assert!(!config.health.enabled);
        assert_eq!(args.log_format, LogFormat::Json);

        let bad = ConfigArgs::try_parse_from(["switchyard", "--low-concurrency", "0"]).unwrap();
        assert!(bad.to_config().is_err());
    }

    #[test]
    fn reads_services_manifest() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "ai_svc", "has_local_target": true}},
                {{"name": "feeds", "remote_address": "http://feeds:8001"}}]"#
        )
        .unwrap();

        let services = load_services_file(file.path()).unwrap();
        assert_eq!(services.len(), 2);
        assert!(services[0].has_local_target);
        assert_eq!(services[1].remote_address.as_deref(), Some("http://feeds:8001"));

        assert!(load_services_file(Path::new("/nonexistent/services.json")).is_err());
    }
}
