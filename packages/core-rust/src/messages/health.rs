use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::HealthStatus;

/// Body of `GET {remote_address}/health`.
///
/// Only `status` is interpreted; anything else the service reports is kept in
/// `details` and passed through untouched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl HealthReport {
    #[must_use]
    pub fn new(status: HealthStatus) -> Self {
        Self {
            status: status.as_str().to_string(),
            details: Map::new(),
        }
    }

    /// Whether the service reported itself as fully healthy.
    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.status.eq_ignore_ascii_case("healthy")
    }

    /// Self-reported status; unrecognised values read as `Degraded`, since the
    /// service answered but did not claim to be healthy.
    #[must_use]
    pub fn reported_status(&self) -> HealthStatus {
        self.status.parse().unwrap_or(HealthStatus::Degraded)
    }
}
