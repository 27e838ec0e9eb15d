use std::any::{Any, TypeId};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use tracing::{info, warn};

use super::config::SwitchyardConfig;

// ---------------------------------------------------------------------------
// ComponentContext
// ---------------------------------------------------------------------------

/// Context handed to components during initialization.
#[derive(Debug, Clone)]
pub struct ComponentContext {
    pub config: Arc<SwitchyardConfig>,
}

// ---------------------------------------------------------------------------
// ManagedComponent trait
// ---------------------------------------------------------------------------

/// A long-lived runtime component with an explicit lifecycle.
///
/// Components are registered with a [`ComponentRegistry`], initialized in
/// registration order and shut down in reverse. The `Any` bound enables
/// lookup by concrete type.
#[async_trait]
pub trait ManagedComponent: Send + Sync + Any {
    /// Unique name, e.g. `"registry"` or `"health_monitor"`.
    fn name(&self) -> &'static str;

    async fn init(&self, ctx: &ComponentContext) -> anyhow::Result<()>;

    /// If `terminate` is true, skip graceful cleanup such as draining.
    async fn shutdown(&self, terminate: bool) -> anyhow::Result<()>;
}

// ---------------------------------------------------------------------------
// ComponentRegistry
// ---------------------------------------------------------------------------

/// Holds every lifecycle-managed component of a running instance.
///
/// Components stay shared: registration takes an `Arc` so the same instance
/// can also be wired into its collaborators.
pub struct ComponentRegistry {
    by_name: DashMap<&'static str, Arc<dyn ManagedComponent>>,
    by_type: DashMap<TypeId, Arc<dyn Any + Send + Sync>>,
    init_order: RwLock<Vec<&'static str>>,
}

impl ComponentRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            by_name: DashMap::new(),
            by_type: DashMap::new(),
            init_order: RwLock::new(Vec::new()),
        }
    }

    /// Registers `component`. Registration order determines init and
    /// shutdown sequencing.
    pub fn register<T: ManagedComponent>(&self, component: Arc<T>) {
        let name = component.name();
        self.by_name.insert(name, component.clone());
        self.by_type.insert(TypeId::of::<T>(), component);
        self.init_order.write().push(name);
    }

    pub fn get<T: ManagedComponent>(&self) -> Option<Arc<T>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.value().clone().downcast::<T>().ok())
    }

    pub fn get_by_name(&self, name: &str) -> Option<Arc<dyn ManagedComponent>> {
        self.by_name.get(name).map(|entry| entry.value().clone())
    }

    /// Names in registration order.
    #[must_use]
    pub fn names(&self) -> Vec<&'static str> {
        self.init_order.read().clone()
    }

    /// Initializes every component in registration order, stopping at the
    /// first failure.
    ///
    /// # Errors
    ///
    /// Returns the failing component's error, annotated with its name.
    pub async fn init_all(&self, ctx: &ComponentContext) -> anyhow::Result<()> {
        let order = self.init_order.read().clone();
        for name in &order {
            if let Some(component) = self.get_by_name(name) {
                component
                    .init(ctx)
                    .await
                    .map_err(|e| e.context(format!("failed to initialize {name}")))?;
                info!(component = name, "component initialized");
            }
        }
        Ok(())
    }

    /// Shuts every component down in reverse registration order.
    ///
    /// A failing component does not prevent the others from shutting down.
    ///
    /// # Errors
    ///
    /// Returns the first shutdown error encountered.
    pub async fn shutdown_all(&self, terminate: bool) -> anyhow::Result<()> {
        let order = self.init_order.read().clone();
        let mut first_error = None;
        for name in order.iter().rev() {
            if let Some(component) = self.get_by_name(name) {
                if let Err(e) = component.shutdown(terminate).await {
                    warn!(component = name, error = %e, "component shutdown failed");
                    first_error.get_or_insert(e);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}

impl Default for ComponentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
