use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Error returned when parsing one of the wire enums from a string fails.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {kind}: {value:?}")]
pub struct ParseEnumError {
    /// Name of the enum being parsed (e.g. `"connection mode"`).
    pub kind: &'static str,
    /// The rejected input.
    pub value: String,
}

/// How a call reaches a service.
///
/// `Local` dispatches to an in-process target, `Remote` issues a network
/// request, `Disabled` means the service must not be called at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionMode {
    Local,
    Remote,
    Disabled,
}

impl ConnectionMode {
    /// Wire name of the mode.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Local => "local",
            Self::Remote => "remote",
            Self::Disabled => "disabled",
        }
    }
}

impl fmt::Display for ConnectionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConnectionMode {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "remote" => Ok(Self::Remote),
            "disabled" => Ok(Self::Disabled),
            _ => Err(ParseEnumError {
                kind: "connection mode",
                value: s.to_string(),
            }),
        }
    }
}

/// Last observed health of a service.
///
/// State machine: `Unknown -> {Healthy, Degraded, Down}`, re-evaluated on every
/// probe cycle. There is no terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Down,
    #[default]
    Unknown,
}

impl HealthStatus {
    /// Wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Degraded => "degraded",
            Self::Down => "down",
            Self::Unknown => "unknown",
        }
    }

    /// Whether local dispatch is allowed in this state.
    #[must_use]
    pub fn permits_local(self) -> bool {
        matches!(self, Self::Healthy | Self::Unknown)
    }

    /// Whether remote dispatch is allowed in this state. Remote tolerates
    /// `Degraded`: the service is assumed reachable, just slow or flaky.
    #[must_use]
    pub fn permits_remote(self) -> bool {
        !matches!(self, Self::Down)
    }
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HealthStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "healthy" => Ok(Self::Healthy),
            "degraded" => Ok(Self::Degraded),
            "down" => Ok(Self::Down),
            "unknown" => Ok(Self::Unknown),
            _ => Err(ParseEnumError {
                kind: "health status",
                value: s.to_string(),
            }),
        }
    }
}

/// Admission lane a call is submitted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    /// User-facing, latency-sensitive work.
    High,
    /// Default lane.
    #[default]
    Medium,
    /// Background work such as health probes.
    Low,
}

impl Priority {
    /// All lanes, highest first.
    pub const ALL: [Priority; 3] = [Priority::High, Priority::Medium, Priority::Low];

    /// Wire name of the lane.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
        }
    }

    /// Dense index into per-lane arrays.
    #[must_use]
    pub fn index(self) -> usize {
        match self {
            Self::High => 0,
            Self::Medium => 1,
            Self::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "high" => Ok(Self::High),
            "medium" => Ok(Self::Medium),
            "low" => Ok(Self::Low),
            _ => Err(ParseEnumError {
                kind: "priority",
                value: s.to_string(),
            }),
        }
    }
}

/// Fields an operator may set explicitly. Once set, auto-discovery no longer
/// overwrites them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigField {
    PreferredMode,
    RemoteAddress,
    IsActive,
    Priority,
    DisplayName,
    Description,
}

impl ConfigField {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::PreferredMode => "preferred_mode",
            Self::RemoteAddress => "remote_address",
            Self::IsActive => "is_active",
            Self::Priority => "priority",
            Self::DisplayName => "display_name",
            Self::Description => "description",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_mode_parses_case_insensitively() {
        assert_eq!("LOCAL".parse::<ConnectionMode>().unwrap(), ConnectionMode::Local);
        assert_eq!(" remote ".parse::<ConnectionMode>().unwrap(), ConnectionMode::Remote);
        assert!("router".parse::<ConnectionMode>().is_err());
    }

    #[test]
    fn wire_names_are_lowercase() {
        assert_eq!(
            serde_json::to_string(&ConnectionMode::Disabled).unwrap(),
            "\"disabled\""
        );
        assert_eq!(serde_json::to_string(&HealthStatus::Degraded).unwrap(), "\"degraded\"");
        assert_eq!(serde_json::to_string(&Priority::Low).unwrap(), "\"low\"");
        assert_eq!(
            serde_json::to_string(&ConfigField::RemoteAddress).unwrap(),
            "\"remote_address\""
        );
    }

    #[test]
    fn health_permissions_follow_routing_policy() {
        assert!(HealthStatus::Healthy.permits_local());
        assert!(HealthStatus::Unknown.permits_local());
        assert!(!HealthStatus::Degraded.permits_local());
        assert!(!HealthStatus::Down.permits_local());

        assert!(HealthStatus::Degraded.permits_remote());
        assert!(!HealthStatus::Down.permits_remote());
    }

    #[test]
    fn priority_index_is_dense() {
        let indices: Vec<usize> = Priority::ALL.iter().map(|p| p.index()).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        assert_eq!(Priority::default(), Priority::Medium);
    }

    #[test]
    fn parse_error_names_the_kind() {
        let err = "urgent".parse::<Priority>().unwrap_err();
        assert_eq!(err.kind, "priority");
        assert_eq!(err.to_string(), "invalid priority: \"urgent\"");
    }
}
