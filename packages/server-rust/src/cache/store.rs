//! Key/value stores with per-entry expiry for the connection cache.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use switchyard_core::ClockSource;

use crate::error::CacheStoreError;

/// Builds the cache key of one slot of a service (`"{service}:{slot}"`).
#[must_use]
pub fn cache_key(service: &str, slot: &str) -> String {
    format!("{service}:{slot}")
}

/// TTL key/value store.
///
/// Values are plain strings so the trait maps onto any external cache.
/// Used as `Arc<dyn CacheStore>`.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Checks that the store is reachable.
    async fn ping(&self) -> Result<(), CacheStoreError>;

    /// Returns the value if present and unexpired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError>;

    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheStoreError>;

    async fn delete(&self, key: &str) -> Result<(), CacheStoreError>;

    /// Removes every key belonging to `service`.
    async fn delete_service(&self, service: &str) -> Result<(), CacheStoreError>;

    async fn clear(&self) -> Result<(), CacheStoreError>;
}

// ---------------------------------------------------------------------------
// MemoryCacheStore
// ---------------------------------------------------------------------------

struct Entry {
    value: String,
    expires_at: u64,
}

/// In-process store; expiry is evaluated lazily against a [`ClockSource`].
pub struct MemoryCacheStore {
    entries: DashMap<String, Entry>,
    clock: Arc<dyn ClockSource>,
}

impl MemoryCacheStore {
    #[must_use]
    pub fn new(clock: Arc<dyn ClockSource>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Number of stored entries, expired ones included until next touched.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn ping(&self) -> Result<(), CacheStoreError> {
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<String>, CacheStoreError> {
        let now = self.clock.now();
        let expired = match self.entries.get(key) {
            None => return Ok(None),
            Some(entry) if entry.expires_at > now => return Ok(Some(entry.value.clone())),
            Some(_) => true,
        };
        if expired {
            self.entries.remove_if(key, |_, e| e.expires_at <= now);
        }
        Ok(None)
    }

    #[allow(clippy::cast_possible_truncation)]
    async fn set_with_ttl(
        &self,
        key: &str,
        value: String,
        ttl: Duration,
    ) -> Result<(), CacheStoreError> {
        let expires_at = self.clock.now().saturating_add(ttl.as_millis() as u64);
        self.entries
            .insert(key.to_string(), Entry { value, expires_at });
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheStoreError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn delete_service(&self, service: &str) -> Result<(), CacheStoreError> {
        let prefix = format!("{service}:");
        self.entries.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheStoreError> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::ManualClock;

    use super::*;

    fn store() -> (MemoryCacheStore, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(0));
        (MemoryCacheStore::new(clock.clone()), clock)
    }

    #[tokio::test]
    async fn entries_expire_after_ttl() {
        let (store, clock) = store();
        store
            .set_with_ttl("svc:mode", "local".to_string(), Duration::from_secs(60))
            .await
            .unwrap();

        clock.advance(Duration::from_secs(59));
        assert_eq!(store.get("svc:mode").await.unwrap().as_deref(), Some("local"));

        clock.advance(Duration::from_secs(1));
        assert_eq!(store.get("svc:mode").await.unwrap(), None);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn delete_service_only_touches_that_service() {
        let (store, _) = store();
        let ttl = Duration::from_secs(60);
        for key in ["svc:mode", "svc:health", "svc2:mode"] {
            store.set_with_ttl(key, "x".to_string(), ttl).await.unwrap();
        }

        store.delete_service("svc").await.unwrap();

        assert_eq!(store.get("svc:mode").await.unwrap(), None);
        assert_eq!(store.get("svc:health").await.unwrap(), None);
        assert!(store.get("svc2:mode").await.unwrap().is_some());
    }

    #[test]
    fn cache_key_format() {
        assert_eq!(cache_key("ai_svc", "mode"), "ai_svc:mode");
    }
}
