//! Attaches and detaches in-process targets according to routing preference.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Serialize;
use switchyard_core::{ConnectionMode, ServiceRecord};
use tracing::{info, warn};

use super::LocalTarget;
use crate::cache::ConnectionCache;
use crate::error::StorageError;
use crate::registry::Registry;
use crate::service::lifecycle::{ComponentContext, ManagedComponent};

/// Outcome of one [`Mounter::reconcile`] pass. All lists are sorted.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MountReport {
    pub mounted: Vec<String>,
    pub unmounted: Vec<String>,
    /// Services that should be mounted but have no target in the catalog.
    pub missing: Vec<String>,
}

/// Catalog of available local targets plus the subset currently mounted.
///
/// Only mounted targets are visible to the router; a catalogued target of a
/// service that prefers Remote stays detached.
pub struct Mounter {
    registry: Arc<Registry>,
    cache: Arc<ConnectionCache>,
    catalog: DashMap<String, Arc<dyn LocalTarget>>,
    mounted: DashMap<String, Arc<dyn LocalTarget>>,
}

impl Mounter {
    #[must_use]
    pub fn new(registry: Arc<Registry>, cache: Arc<ConnectionCache>) -> Self {
        Self {
            registry,
            cache,
            catalog: DashMap::new(),
            mounted: DashMap::new(),
        }
    }

    /// Makes `target` available for `name` and flags the service as having a
    /// local target, mounting it at once if the service now prefers local
    /// mode. Returns `false` if the service is not registered yet; the target
    /// is catalogued either way.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the registry update fails.
    pub async fn register(
        &self,
        name: &str,
        target: Arc<dyn LocalTarget>,
    ) -> Result<bool, StorageError> {
        self.catalog.insert(name.to_string(), Arc::clone(&target));
        let known = self.registry.set_local_target(name, true).await?;
        if known {
            if let Some(record) = self.registry.get(name).await? {
                if wants_local_mount(&record) && !self.mounted.contains_key(name) {
                    self.mounted.insert(name.to_string(), target);
                    info!(service = name, "local target mounted");
                }
            }
        }
        Ok(known)
    }

    /// Removes `name` from the catalog, detaches it, and clears its local
    /// target flag.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the registry update fails.
    pub async fn unregister(&self, name: &str) -> Result<bool, StorageError> {
        self.catalog.remove(name);
        if self.mounted.remove(name).is_some() {
            info!(service = name, "local target unmounted");
        }
        self.registry.set_local_target(name, false).await
    }

    /// Mounts every service that should run locally and detaches the rest.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the registry cannot be listed.
    pub async fn reconcile(&self) -> Result<MountReport, StorageError> {
        let wanted = self.cache.services_for_local_mounting().await?;
        let mut report = MountReport::default();

        for name in &wanted {
            if self.mounted.contains_key(name) {
                continue;
            }
            let target = self.catalog.get(name).map(|t| Arc::clone(t.value()));
            match target {
                Some(target) => {
                    self.mounted.insert(name.clone(), target);
                    info!(service = %name, "local target mounted");
                    report.mounted.push(name.clone());
                }
                None => {
                    warn!(service = %name, "service prefers local mode but no target is registered");
                    report.missing.push(name.clone());
                }
            }
        }

        let stale: Vec<String> = self
            .mounted
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|name| !wanted.contains(name))
            .collect();
        for name in stale {
            self.mounted.remove(&name);
            info!(service = %name, "local target unmounted");
            report.unmounted.push(name);
        }

        report.mounted.sort();
        report.unmounted.sort();
        report.missing.sort();
        Ok(report)
    }

    /// The mounted target of `name`, if any.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<Arc<dyn LocalTarget>> {
        self.mounted.get(name).map(|t| Arc::clone(t.value()))
    }

    /// Names of mounted services, sorted.
    #[must_use]
    pub fn mounted(&self) -> Vec<String> {
        let mut names: Vec<String> = self.mounted.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    #[must_use]
    pub fn is_registered(&self, name: &str) -> bool {
        self.catalog.contains_key(name)
    }
}

fn wants_local_mount(record: &ServiceRecord) -> bool {
    record.is_active && record.preferred_mode == ConnectionMode::Local && record.has_local_target
}

#[async_trait]
impl ManagedComponent for Mounter {
    fn name(&self) -> &'static str {
        "mounter"
    }

    async fn init(&self, _ctx: &ComponentContext) -> anyhow::Result<()> {
        let report = self.reconcile().await?;
        info!(
            mounted = report.mounted.len(),
            missing = report.missing.len(),
            "local targets reconciled"
        );
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        self.mounted.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::{ConfigUpdate, ConnectionMode, ManualClock, ServiceMetadata};

    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::local::MethodTable;
    use crate::registry::MemoryRegistryStore;
    use crate::service::config::CacheConfig;

    fn setup() -> (Arc<Registry>, Mounter) {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(Registry::new(
            Arc::new(MemoryRegistryStore::new()),
            clock.clone(),
        ));
        let cache = Arc::new(ConnectionCache::new(
            Arc::new(MemoryCacheStore::new(clock)),
            Arc::clone(&registry),
            CacheConfig::default(),
        ));
        registry.add_observer(Arc::new(cache.invalidator()));
        let mounter = Mounter::new(Arc::clone(&registry), cache);
        (registry, mounter)
    }

    fn target() -> Arc<dyn LocalTarget> {
        Arc::new(MethodTable::new().method("ping", |_| async { Ok(serde_json::json!("pong")) }))
    }

    #[tokio::test]
    async fn register_flags_local_target() {
        let (registry, mounter) = setup();
        registry
            .upsert_discovered(&ServiceMetadata::new("ai_svc"))
            .await
            .unwrap();

        assert!(mounter.register("ai_svc", target()).await.unwrap());
        let record = registry.get("ai_svc").await.unwrap().unwrap();
        assert!(record.has_local_target);
        assert!(mounter.is_registered("ai_svc"));
    }

    #[tokio::test]
    async fn register_after_discovery_switches_to_local_and_mounts() {
        let (registry, mounter) = setup();
        registry
            .upsert_discovered(&ServiceMetadata::new("feeds").with_remote_address("http://feeds:8001"))
            .await
            .unwrap();
        assert!(mounter.get("feeds").is_none());

        assert!(mounter.register("feeds", target()).await.unwrap());
        let record = registry.get("feeds").await.unwrap().unwrap();
        assert_eq!(record.preferred_mode, ConnectionMode::Local);
        assert!(mounter.get("feeds").is_some());
        assert_eq!(mounter.mounted(), vec!["feeds".to_string()]);
    }

    #[tokio::test]
    async fn reconcile_follows_preferred_mode() {
        let (registry, mounter) = setup();
        registry
            .upsert_discovered(&ServiceMetadata::new("ai_svc").with_local_target())
            .await
            .unwrap();
        registry
            .upsert_discovered(&ServiceMetadata::new("ghost").with_local_target())
            .await
            .unwrap();
        mounter.register("ai_svc", target()).await.unwrap();
        assert!(mounter.get("ai_svc").is_some());

        let report = mounter.reconcile().await.unwrap();
        assert!(report.mounted.is_empty());
        assert_eq!(report.missing, vec!["ghost".to_string()]);
        assert!(mounter.get("ai_svc").is_some());

        registry
            .set_config("ai_svc", &ConfigUpdate::mode(ConnectionMode::Remote))
            .await
            .unwrap();
        let report = mounter.reconcile().await.unwrap();
        assert_eq!(report.unmounted, vec!["ai_svc".to_string()]);
        assert!(mounter.get("ai_svc").is_none());
        assert!(mounter.mounted().is_empty());
    }

    #[tokio::test]
    async fn unregister_detaches_and_clears_flag() {
        let (registry, mounter) = setup();
        registry
            .upsert_discovered(&ServiceMetadata::new("ai_svc").with_local_target())
            .await
            .unwrap();
        mounter.register("ai_svc", target()).await.unwrap();
        mounter.reconcile().await.unwrap();

        assert!(mounter.unregister("ai_svc").await.unwrap());
        assert!(mounter.get("ai_svc").is_none());
        let record = registry.get("ai_svc").await.unwrap().unwrap();
        assert!(!record.has_local_target);
    }
}
