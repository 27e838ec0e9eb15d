//! TTL cache of effective connection decisions and health snapshots.
//!
//! The cache is an optimisation only. When its store is unreachable every
//! lookup falls through to the [`Registry`], and no write is attempted.

pub mod store;

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use switchyard_core::{ConnectionMode, HealthStatus};
use tracing::{debug, info, warn};

pub use store::{cache_key, CacheStore, MemoryCacheStore};

use crate::error::StorageError;
use crate::registry::{Registry, RegistryChange, RegistryObserver};
use crate::service::config::CacheConfig;
use crate::service::lifecycle::{ComponentContext, ManagedComponent};

const MODE_SLOT: &str = "mode";
const HEALTH_SLOT: &str = "health";

/// Store handle plus its availability flag, shared between the cache and its
/// invalidator.
struct CacheTier {
    store: Arc<dyn CacheStore>,
    available: AtomicBool,
    /// Bumped before every eviction. A read-through that saw a different
    /// value when it started must not leave its entry behind.
    generation: AtomicU64,
}

impl CacheTier {
    fn is_available(&self) -> bool {
        self.available.load(Ordering::Acquire)
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::Acquire)
    }

    async fn invalidate(&self, service: &str) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if !self.is_available() {
            return;
        }
        if let Err(e) = self.store.delete_service(service).await {
            warn!(service, error = %e, "cache invalidation failed");
        }
    }

    async fn clear(&self) {
        self.generation.fetch_add(1, Ordering::AcqRel);
        if !self.is_available() {
            return;
        }
        if let Err(e) = self.store.clear().await {
            warn!(error = %e, "cache clear failed");
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    fallthroughs: AtomicU64,
}

/// Point-in-time cache counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub available: bool,
    pub hits: u64,
    pub misses: u64,
    /// Lookups served from the registry because the store was unavailable
    /// or failed.
    pub fallthroughs: u64,
}

// ---------------------------------------------------------------------------
// ConnectionCache
// ---------------------------------------------------------------------------

/// Read-through cache in front of the registry.
pub struct ConnectionCache {
    tier: Arc<CacheTier>,
    registry: Arc<Registry>,
    config: CacheConfig,
    counters: Counters,
}

impl ConnectionCache {
    /// Creates the cache. The store counts as available until [`init`]
    /// proves otherwise.
    ///
    /// [`init`]: ConnectionCache::init
    #[must_use]
    pub fn new(store: Arc<dyn CacheStore>, registry: Arc<Registry>, config: CacheConfig) -> Self {
        Self {
            tier: Arc::new(CacheTier {
                store,
                available: AtomicBool::new(true),
                generation: AtomicU64::new(0),
            }),
            registry,
            config,
            counters: Counters::default(),
        }
    }

    /// Observer that drops a service's entries whenever its record changes.
    /// Register it with the registry so invalidation is synchronous with
    /// every mutation.
    #[must_use]
    pub fn invalidator(&self) -> CacheInvalidator {
        CacheInvalidator {
            tier: Arc::clone(&self.tier),
        }
    }

    /// Pings the store. On failure the cache switches to registry-only mode.
    pub async fn init(&self) -> bool {
        match self.tier.store.ping().await {
            Ok(()) => {
                self.tier.available.store(true, Ordering::Release);
                info!("connection cache store available");
                true
            }
            Err(e) => {
                self.tier.available.store(false, Ordering::Release);
                warn!(error = %e, "connection cache store unavailable, serving from registry");
                false
            }
        }
    }

    #[must_use]
    pub fn is_available(&self) -> bool {
        self.tier.is_available()
    }

    /// The mode calls to `name` should use right now.
    ///
    /// Never fails: an unknown service or a registry failure resolves to
    /// `Disabled` and is logged.
    pub async fn effective_mode(&self, name: &str) -> ConnectionMode {
        let key = cache_key(name, MODE_SLOT);
        if let Some(mode) = self.cached::<ConnectionMode>(&key).await {
            return mode;
        }

        let generation = self.tier.generation();
        let mode = match self.registry.get(name).await {
            Ok(Some(record)) => record.effective_mode(),
            Ok(None) => {
                debug!(service = name, "effective mode requested for unknown service");
                return ConnectionMode::Disabled;
            }
            Err(e) => {
                warn!(service = name, error = %e, "registry lookup failed, treating service as disabled");
                return ConnectionMode::Disabled;
            }
        };

        self.populate(&key, mode.as_str(), self.config.mode_ttl, generation)
            .await;
        mode
    }

    /// Health snapshot of `name`, cached for the shorter health TTL.
    /// Unknown services and registry failures read as `Unknown`.
    pub async fn health(&self, name: &str) -> HealthStatus {
        let key = cache_key(name, HEALTH_SLOT);
        if let Some(status) = self.cached::<HealthStatus>(&key).await {
            return status;
        }

        let generation = self.tier.generation();
        let status = match self.registry.get(name).await {
            Ok(Some(record)) => record.health_status,
            Ok(None) => return HealthStatus::Unknown,
            Err(e) => {
                warn!(service = name, error = %e, "registry lookup failed for health snapshot");
                return HealthStatus::Unknown;
            }
        };

        self.populate(&key, status.as_str(), self.config.health_ttl, generation)
            .await;
        status
    }

    /// Drops every cached entry for `name`.
    pub async fn invalidate(&self, name: &str) {
        self.tier.invalidate(name).await;
        debug!(service = name, "cache entries invalidated");
    }

    pub async fn invalidate_all(&self) {
        self.tier.clear().await;
        info!("connection cache cleared");
    }

    /// Active services that want a local mount: preferred mode `Local` and a
    /// local target available.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the registry fails.
    pub async fn services_for_local_mounting(&self) -> Result<Vec<String>, StorageError> {
        Ok(self
            .registry
            .list_active()
            .await?
            .into_iter()
            .filter(|r| r.preferred_mode == ConnectionMode::Local && r.has_local_target)
            .map(|r| r.name)
            .collect())
    }

    #[must_use]
    pub fn stats(&self) -> CacheStats {
        CacheStats {
            available: self.is_available(),
            hits: self.counters.hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            fallthroughs: self.counters.fallthroughs.load(Ordering::Relaxed),
        }
    }

    async fn cached<T: FromStr>(&self, key: &str) -> Option<T> {
        if !self.tier.is_available() {
            self.counters.fallthroughs.fetch_add(1, Ordering::Relaxed);
            return None;
        }
        match self.tier.store.get(key).await {
            Ok(Some(raw)) => {
                if let Ok(value) = raw.parse() {
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    Some(value)
                } else {
                    warn!(key, value = %raw, "discarding unparseable cache entry");
                    self.counters.misses.fetch_add(1, Ordering::Relaxed);
                    None
                }
            }
            Ok(None) => {
                self.counters.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                warn!(key, error = %e, "cache read failed, falling through to registry");
                self.counters.fallthroughs.fetch_add(1, Ordering::Relaxed);
                None
            }
        }
    }

    /// Writes a value computed from a registry read that began at
    /// `generation`. If an eviction ran since, the write is skipped, or
    /// undone when the eviction raced the write itself.
    async fn populate(&self, key: &str, value: &str, ttl: Duration, generation: u64) {
        if !self.tier.is_available() || self.tier.generation() != generation {
            return;
        }
        if let Err(e) = self.tier.store.set_with_ttl(key, value.to_string(), ttl).await {
            warn!(key, error = %e, "cache write failed");
            return;
        }
        if self.tier.generation() != generation {
            debug!(key, "cache entry raced an invalidation, discarding");
            if let Err(e) = self.tier.store.delete(key).await {
                warn!(key, error = %e, "failed to discard raced cache entry");
            }
        }
    }
}

#[async_trait]
impl ManagedComponent for ConnectionCache {
    fn name(&self) -> &'static str {
        "connection_cache"
    }

    async fn init(&self, _ctx: &ComponentContext) -> anyhow::Result<()> {
        ConnectionCache::init(self).await;
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// CacheInvalidator
// ---------------------------------------------------------------------------

/// Registry observer that evicts a service's cache entries on every change.
///
/// Holds only the store, not the cache, so the registry never owns its own
/// reader.
pub struct CacheInvalidator {
    tier: Arc<CacheTier>,
}

#[async_trait]
impl RegistryObserver for CacheInvalidator {
    async fn on_change(&self, change: &RegistryChange) {
        self.tier.invalidate(change.service()).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use switchyard_core::{ConfigUpdate, ManualClock, ServiceMetadata};

    use super::*;
    use crate::error::CacheStoreError;
    use crate::registry::MemoryRegistryStore;

    struct DeadStore;

    #[async_trait]
    impl CacheStore for DeadStore {
        async fn ping(&self) -> Result<(), CacheStoreError> {
            Err(CacheStoreError("connection refused".to_string()))
        }
        async fn get(&self, _key: &str) -> Result<Option<String>, CacheStoreError> {
            Err(CacheStoreError("connection refused".to_string()))
        }
        async fn set_with_ttl(
            &self,
            _key: &str,
            _value: String,
            _ttl: Duration,
        ) -> Result<(), CacheStoreError> {
            Err(CacheStoreError("connection refused".to_string()))
        }
        async fn delete(&self, _key: &str) -> Result<(), CacheStoreError> {
            Err(CacheStoreError("connection refused".to_string()))
        }
        async fn delete_service(&self, _service: &str) -> Result<(), CacheStoreError> {
            Err(CacheStoreError("connection refused".to_string()))
        }
        async fn clear(&self) -> Result<(), CacheStoreError> {
            Err(CacheStoreError("connection refused".to_string()))
        }
    }

    struct Fixture {
        registry: Arc<Registry>,
        cache: ConnectionCache,
        store: Arc<MemoryCacheStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture(with_invalidator: bool) -> Fixture {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(Registry::new(
            Arc::new(MemoryRegistryStore::new()),
            clock.clone(),
        ));
        let store = Arc::new(MemoryCacheStore::new(clock.clone()));
        let cache = ConnectionCache::new(store.clone(), registry.clone(), CacheConfig::default());
        if with_invalidator {
            registry.add_observer(Arc::new(cache.invalidator()));
        }
        Fixture {
            registry,
            cache,
            store,
            clock,
        }
    }

    async fn register_local(registry: &Registry) {
        registry
            .upsert_discovered(
                &ServiceMetadata::new("ai_svc")
                    .with_local_target()
                    .with_remote_address("http://ai:8005"),
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn miss_then_hit() {
        let f = fixture(true);
        register_local(&f.registry).await;

        assert_eq!(f.cache.effective_mode("ai_svc").await, ConnectionMode::Local);
        assert_eq!(f.cache.effective_mode("ai_svc").await, ConnectionMode::Local);

        let stats = f.cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 1);
        assert_eq!(
            f.store.get("ai_svc:mode").await.unwrap().as_deref(),
            Some("local")
        );
    }

    /// Runs an eviction in the window between the registry read and the
    /// cache write of the first read-through.
    struct RacingStore {
        inner: MemoryCacheStore,
        evict_on_write: parking_lot::Mutex<Option<CacheInvalidator>>,
    }

    #[async_trait]
    impl CacheStore for RacingStore {
        async fn ping(&self) -> Result<(), CacheStoreError> {
            self.inner.ping().await
        }
        async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError> {
            self.inner.get(key).await
        }
        async fn set_with_ttl(
            &self,
            key: &str,
            value: String,
            ttl: Duration,
        ) -> Result<(), CacheStoreError> {
            let invalidator = self.evict_on_write.lock().take();
            if let Some(invalidator) = invalidator {
                invalidator
                    .on_change(&RegistryChange::Deactivated {
                        name: "ai_svc".to_string(),
                    })
                    .await;
            }
            self.inner.set_with_ttl(key, value, ttl).await
        }
        async fn delete(&self, key: &str) -> Result<(), CacheStoreError> {
            self.inner.delete(key).await
        }
        async fn delete_service(&self, service: &str) -> Result<(), CacheStoreError> {
            self.inner.delete_service(service).await
        }
        async fn clear(&self) -> Result<(), CacheStoreError> {
            self.inner.clear().await
        }
    }

    #[tokio::test]
    async fn read_through_racing_an_eviction_leaves_no_entry() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(Registry::new(
            Arc::new(MemoryRegistryStore::new()),
            clock.clone(),
        ));
        register_local(&registry).await;
        let store = Arc::new(RacingStore {
            inner: MemoryCacheStore::new(clock),
            evict_on_write: parking_lot::Mutex::new(None),
        });
        let cache = ConnectionCache::new(store.clone(), registry, CacheConfig::default());
        *store.evict_on_write.lock() = Some(cache.invalidator());

        assert_eq!(cache.effective_mode("ai_svc").await, ConnectionMode::Local);
        assert_eq!(store.get("ai_svc:mode").await.unwrap(), None);

        // Without a racing eviction the next read-through is cached as usual.
        assert_eq!(cache.effective_mode("ai_svc").await, ConnectionMode::Local);
        assert_eq!(
            store.get("ai_svc:mode").await.unwrap().as_deref(),
            Some("local")
        );
    }

    #[tokio::test]
    async fn health_write_invalidates_immediately() {
        let f = fixture(true);
        register_local(&f.registry).await;
        assert_eq!(f.cache.effective_mode("ai_svc").await, ConnectionMode::Local);

        f.registry
            .set_health("ai_svc", HealthStatus::Down, 10)
            .await
            .unwrap();

        assert_eq!(
            f.cache.effective_mode("ai_svc").await,
            ConnectionMode::Disabled
        );
        assert_eq!(f.cache.health("ai_svc").await, HealthStatus::Down);
    }

    #[tokio::test]
    async fn config_write_invalidates_immediately() {
        let f = fixture(true);
        register_local(&f.registry).await;
        assert_eq!(f.cache.effective_mode("ai_svc").await, ConnectionMode::Local);

        f.registry
            .set_config("ai_svc", &ConfigUpdate::mode(ConnectionMode::Remote))
            .await
            .unwrap();

        assert_eq!(f.cache.effective_mode("ai_svc").await, ConnectionMode::Remote);
    }

    #[tokio::test]
    async fn without_invalidation_entries_live_until_ttl() {
        let f = fixture(false);
        register_local(&f.registry).await;
        assert_eq!(f.cache.effective_mode("ai_svc").await, ConnectionMode::Local);

        f.registry
            .set_health("ai_svc", HealthStatus::Down, 10)
            .await
            .unwrap();
        assert_eq!(f.cache.effective_mode("ai_svc").await, ConnectionMode::Local);

        f.clock.advance(Duration::from_secs(300));
        assert_eq!(
            f.cache.effective_mode("ai_svc").await,
            ConnectionMode::Disabled
        );
    }

    #[tokio::test]
    async fn health_snapshot_expires_before_mode() {
        let f = fixture(false);
        register_local(&f.registry).await;
        assert_eq!(f.cache.health("ai_svc").await, HealthStatus::Unknown);
        assert_eq!(f.cache.effective_mode("ai_svc").await, ConnectionMode::Local);

        f.registry
            .set_health("ai_svc", HealthStatus::Degraded, 10)
            .await
            .unwrap();
        f.clock.advance(Duration::from_secs(60));

        assert_eq!(f.cache.health("ai_svc").await, HealthStatus::Degraded);
        assert_eq!(f.cache.effective_mode("ai_svc").await, ConnectionMode::Local);
    }

    #[tokio::test]
    async fn unknown_service_is_disabled() {
        let f = fixture(true);
        assert_eq!(
            f.cache.effective_mode("ghost").await,
            ConnectionMode::Disabled
        );
        assert_eq!(f.cache.health("ghost").await, HealthStatus::Unknown);
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn unavailable_store_falls_through_to_registry() {
        let clock = Arc::new(ManualClock::new(0));
        let registry = Arc::new(Registry::new(
            Arc::new(MemoryRegistryStore::new()),
            clock,
        ));
        let cache = ConnectionCache::new(Arc::new(DeadStore), registry.clone(), CacheConfig::default());
        registry.add_observer(Arc::new(cache.invalidator()));

        assert!(!cache.init().await);
        register_local(&registry).await;

        assert_eq!(cache.effective_mode("ai_svc").await, ConnectionMode::Local);
        registry
            .set_health("ai_svc", HealthStatus::Degraded, 1)
            .await
            .unwrap();
        assert_eq!(cache.effective_mode("ai_svc").await, ConnectionMode::Remote);

        let stats = cache.stats();
        assert!(!stats.available);
        assert_eq!(stats.fallthroughs, 2);
        assert_eq!(stats.hits, 0);
    }

    #[tokio::test]
    async fn invalidate_all_clears_everything() {
        let f = fixture(true);
        register_local(&f.registry).await;
        f.cache.effective_mode("ai_svc").await;
        f.cache.health("ai_svc").await;
        assert_eq!(f.store.len(), 2);

        f.cache.invalidate_all().await;
        assert!(f.store.is_empty());
    }

    #[tokio::test]
    async fn local_mounting_candidates() {
        let f = fixture(true);
        register_local(&f.registry).await;
        f.registry
            .upsert_discovered(&ServiceMetadata::new("remote_only").with_remote_address("http://r:1"))
            .await
            .unwrap();

        assert_eq!(
            f.cache.services_for_local_mounting().await.unwrap(),
            vec!["ai_svc"]
        );
    }
}
