//! Registry change notifications.
//!
//! Defines [`RegistryObserver`] for reacting to committed registry mutations,
//! and [`CompositeRegistryObserver`] which fans out to several observers.

use std::sync::Arc;

use async_trait::async_trait;
use switchyard_core::{ConfigField, HealthStatus};

/// A committed mutation of one service record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryChange {
    /// First discovery or registration.
    Created { name: String },
    /// Rediscovery changed the listed auto-discovered fields.
    Discovered {
        name: String,
        fields: Vec<&'static str>,
    },
    /// Operator configuration pinned the listed fields.
    Configured {
        name: String,
        fields: Vec<ConfigField>,
    },
    /// Health write, emitted even when the status is unchanged.
    Health {
        name: String,
        previous: HealthStatus,
        current: HealthStatus,
    },
    LocalTarget { name: String, present: bool },
    /// Discovery no longer reports the service.
    Deactivated { name: String },
}

impl RegistryChange {
    /// Name of the service the change applies to.
    #[must_use]
    pub fn service(&self) -> &str {
        match self {
            Self::Created { name }
            | Self::Discovered { name, .. }
            | Self::Configured { name, .. }
            | Self::Health { name, .. }
            | Self::LocalTarget { name, .. }
            | Self::Deactivated { name } => name,
        }
    }

    /// Short label for logs.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Created { .. } => "created",
            Self::Discovered { .. } => "discovered",
            Self::Configured { .. } => "configured",
            Self::Health { .. } => "health",
            Self::LocalTarget { .. } => "local_target",
            Self::Deactivated { .. } => "deactivated",
        }
    }
}

/// Observer of registry mutations.
///
/// Called after the record is persisted and before the mutating registry
/// call returns, while the per-record lock is still held.
///
/// Used as `Arc<dyn RegistryObserver>`.
#[async_trait]
pub trait RegistryObserver: Send + Sync {
    async fn on_change(&self, change: &RegistryChange);
}

/// Fans each notification out to every registered observer, in order.
#[derive(Default, Clone)]
pub struct CompositeRegistryObserver {
    observers: Vec<Arc<dyn RegistryObserver>>,
}

impl CompositeRegistryObserver {
    #[must_use]
    pub fn new(observers: Vec<Arc<dyn RegistryObserver>>) -> Self {
        Self { observers }
    }

    pub fn add(&mut self, observer: Arc<dyn RegistryObserver>) {
        self.observers.push(observer);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.observers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }
}

#[async_trait]
impl RegistryObserver for CompositeRegistryObserver {
    async fn on_change(&self, change: &RegistryChange) {
        for observer in &self.observers {
            observer.on_change(change).await;
        }
    }
}
