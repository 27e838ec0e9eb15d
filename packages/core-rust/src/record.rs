//! Service records and the effective-mode routing policy.

use std::collections::BTreeSet;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};

use crate::types::{ConfigField, ConnectionMode, HealthStatus};

/// Default listing priority for discovered services (lower sorts first).
pub const DEFAULT_SERVICE_PRIORITY: i32 = 100;

static SERVICE_NAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]{0,127}$").expect("static regex is valid")
});

/// Error returned for a service name that cannot be used as a registry key,
/// a cache key prefix, or a URL path segment.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid service name {0:?}")]
pub struct InvalidServiceName(pub String);

/// Checks that `name` is usable as a registry key.
///
/// # Errors
///
/// Returns [`InvalidServiceName`] for empty names, names longer than 128
/// characters, or names containing characters outside `[A-Za-z0-9_.-]`.
pub fn validate_service_name(name: &str) -> Result<(), InvalidServiceName> {
    if SERVICE_NAME.is_match(name) {
        Ok(())
    } else {
        Err(InvalidServiceName(name.to_string()))
    }
}

/// `snake_case` service name to a human-readable title (`"ai_svc"` -> `"Ai Svc"`).
#[must_use]
pub fn default_display_name(name: &str) -> String {
    name.split(['_', '-'])
        .filter(|part| !part.is_empty())
        .map(|part| {
            let mut chars = part.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deserializes a field that is both optional (can be absent) and nullable
/// (can be null), keeping "absent" and "explicitly null" apart.
#[allow(clippy::option_option)]
fn deserialize_double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Ok(Some(Option::deserialize(deserializer)?))
}

// ---------------------------------------------------------------------------
// ServiceRecord
// ---------------------------------------------------------------------------

/// Persistent registry entry for one service.
///
/// Created on first discovery or explicit registration, soft-disabled (never
/// deleted) when discovery stops reporting it, reactivated when it reappears.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRecord {
    /// Unique key.
    pub name: String,
    pub display_name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// Operator or discovery intent. The effective mode is derived from it.
    pub preferred_mode: ConnectionMode,
    /// Base URL for remote dispatch, e.g. `http://10.0.0.7:8005`.
    #[serde(default)]
    pub remote_address: Option<String>,
    /// Whether a local dispatch target is registered for this service.
    #[serde(default)]
    pub has_local_target: bool,
    /// Operation names the service advertises.
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    pub is_active: bool,
    #[serde(default)]
    pub health_status: HealthStatus,
    /// Millis since epoch of the last health write.
    #[serde(default)]
    pub last_checked: Option<u64>,
    /// Listing order only (lower first); has no effect on execution scheduling.
    #[serde(default = "default_priority")]
    pub priority: i32,
    /// Fields pinned by an operator; discovery leaves these alone.
    #[serde(default)]
    pub overrides: BTreeSet<ConfigField>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

fn default_priority() -> i32 {
    DEFAULT_SERVICE_PRIORITY
}

impl ServiceRecord {
    /// Builds a fresh record from discovery metadata.
    ///
    /// The preferred mode defaults to `Local` when a local target exists and
    /// `Remote` otherwise. Health starts as `Unknown`.
    #[must_use]
    pub fn from_discovery(meta: &ServiceMetadata, now: u64) -> Self {
        Self {
            name: meta.name.clone(),
            display_name: meta
                .display_name
                .clone()
                .unwrap_or_else(|| default_display_name(&meta.name)),
            description: meta.description.clone(),
            preferred_mode: default_mode_for(meta.has_local_target),
            remote_address: meta.remote_address.clone(),
            has_local_target: meta.has_local_target,
            capabilities: meta.capabilities.clone(),
            is_active: true,
            health_status: HealthStatus::Unknown,
            last_checked: None,
            priority: meta.priority.unwrap_or(DEFAULT_SERVICE_PRIORITY),
            overrides: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// The mode calls should actually use, after applying health and
    /// availability to the preference:
    ///
    /// 1. inactive or preferred `Disabled` -> `Disabled`
    /// 2. preferred `Local`, local target present, health healthy/unknown -> `Local`
    /// 3. remote address present, health not down -> `Remote`
    /// 4. otherwise `Disabled`
    #[must_use]
    pub fn effective_mode(&self) -> ConnectionMode {
        if !self.is_active || self.preferred_mode == ConnectionMode::Disabled {
            return ConnectionMode::Disabled;
        }

        if self.preferred_mode == ConnectionMode::Local
            && self.has_local_target
            && self.health_status.permits_local()
        {
            return ConnectionMode::Local;
        }

        if self.remote_address.is_some() && self.health_status.permits_remote() {
            return ConnectionMode::Remote;
        }

        ConnectionMode::Disabled
    }

    #[must_use]
    pub fn is_healthy(&self) -> bool {
        self.is_active && self.health_status == HealthStatus::Healthy
    }

    #[must_use]
    pub fn is_overridden(&self, field: ConfigField) -> bool {
        self.overrides.contains(&field)
    }

    /// Merges rediscovered metadata into this record, leaving pinned fields
    /// untouched. Returns the names of the fields that changed; an empty list
    /// means the call was a no-op and `updated_at` is not touched.
    pub fn apply_discovery(&mut self, meta: &ServiceMetadata, now: u64) -> Vec<&'static str> {
        let mut changed = Vec::new();

        if !self.is_overridden(ConfigField::DisplayName) {
            let display = meta
                .display_name
                .clone()
                .unwrap_or_else(|| default_display_name(&meta.name));
            if self.display_name != display {
                self.display_name = display;
                changed.push("display_name");
            }
        }

        if !self.is_overridden(ConfigField::Description) && self.description != meta.description
        {
            self.description.clone_from(&meta.description);
            changed.push("description");
        }

        if !self.is_overridden(ConfigField::RemoteAddress)
            && self.remote_address != meta.remote_address
        {
            self.remote_address.clone_from(&meta.remote_address);
            changed.push("remote_address");
        }

        if self.has_local_target != meta.has_local_target {
            self.has_local_target = meta.has_local_target;
            changed.push("has_local_target");
        }

        if self.capabilities != meta.capabilities {
            self.capabilities.clone_from(&meta.capabilities);
            changed.push("capabilities");
        }

        if !self.is_overridden(ConfigField::PreferredMode) {
            let mode = default_mode_for(self.has_local_target);
            if self.preferred_mode != mode {
                self.preferred_mode = mode;
                changed.push("preferred_mode");
            }
        }

        if let Some(priority) = meta.priority {
            if !self.is_overridden(ConfigField::Priority) && self.priority != priority {
                self.priority = priority;
                changed.push("priority");
            }
        }

        if !self.is_active && !self.is_overridden(ConfigField::IsActive) {
            self.is_active = true;
            changed.push("is_active");
        }

        if !changed.is_empty() {
            self.updated_at = now;
        }
        changed
    }

    /// Records whether a local target is registered, following the flag with
    /// the preferred mode unless an operator pinned it. Returns `false` when
    /// nothing changed.
    pub fn set_local_target(&mut self, present: bool, now: u64) -> bool {
        if self.has_local_target == present {
            return false;
        }
        self.has_local_target = present;
        if !self.is_overridden(ConfigField::PreferredMode) {
            self.preferred_mode = default_mode_for(present);
        }
        self.updated_at = now;
        true
    }

    /// Applies an operator update and pins every supplied field.
    /// Returns the fields that were supplied.
    pub fn apply_config(&mut self, update: &ConfigUpdate, now: u64) -> Vec<ConfigField> {
        let mut touched = Vec::new();

        if let Some(mode) = update.preferred_mode {
            self.preferred_mode = mode;
            touched.push(ConfigField::PreferredMode);
        }
        if let Some(address) = &update.remote_address {
            self.remote_address.clone_from(address);
            touched.push(ConfigField::RemoteAddress);
        }
        if let Some(active) = update.is_active {
            self.is_active = active;
            touched.push(ConfigField::IsActive);
        }
        if let Some(priority) = update.priority {
            self.priority = priority;
            touched.push(ConfigField::Priority);
        }
        if let Some(display) = &update.display_name {
            self.display_name.clone_from(display);
            touched.push(ConfigField::DisplayName);
        }
        if let Some(description) = &update.description {
            self.description.clone_from(description);
            touched.push(ConfigField::Description);
        }

        if !touched.is_empty() {
            self.overrides.extend(touched.iter().copied());
            self.updated_at = now;
        }
        touched
    }
}

fn default_mode_for(has_local_target: bool) -> ConnectionMode {
    if has_local_target {
        ConnectionMode::Local
    } else {
        ConnectionMode::Remote
    }
}

// ---------------------------------------------------------------------------
// Discovery and configuration inputs
// ---------------------------------------------------------------------------

/// What discovery knows about a service. Also the entry format of a services
/// manifest file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceMetadata {
    pub name: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub remote_address: Option<String>,
    #[serde(default)]
    pub has_local_target: bool,
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub priority: Option<i32>,
}

impl ServiceMetadata {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_remote_address(mut self, address: impl Into<String>) -> Self {
        self.remote_address = Some(address.into());
        self
    }

    #[must_use]
    pub fn with_local_target(mut self) -> Self {
        self.has_local_target = true;
        self
    }

    #[must_use]
    pub fn with_display_name(mut self, display_name: impl Into<String>) -> Self {
        self.display_name = Some(display_name.into());
        self
    }

    #[must_use]
    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }
}

/// Allow-listed operator changes. `None` leaves a field alone; for the
/// nullable fields `Some(None)` clears the value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preferred_mode: Option<ConnectionMode>,
    #[allow(clippy::option_option)]
    #[serde(
        default,
        deserialize_with = "deserialize_double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub remote_address: Option<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_active: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[allow(clippy::option_option)]
    #[serde(
        default,
        deserialize_with = "deserialize_double_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub description: Option<Option<String>>,
}

impl ConfigUpdate {
    /// Update that only changes the preferred mode.
    #[must_use]
    pub fn mode(mode: ConnectionMode) -> Self {
        Self {
            preferred_mode: Some(mode),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self == &Self::default()
    }

    /// Whether applying this update can change the effective mode.
    #[must_use]
    pub fn affects_routing(&self) -> bool {
        self.preferred_mode.is_some() || self.remote_address.is_some() || self.is_active.is_some()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
