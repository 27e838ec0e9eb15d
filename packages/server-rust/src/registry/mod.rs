//! Persistent source of truth for service records.
//!
//! The [`Registry`] owns every [`ServiceRecord`], serialises read-modify-write
//! per record, and notifies [`RegistryObserver`]s of each committed change so
//! caches can be invalidated before the mutating call returns.

pub mod observer;
#[cfg(feature = "redb")]
pub mod redb_store;
pub mod store;

use std::borrow::Cow;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::{DashMap, DashSet};
use parking_lot::RwLock;
use serde::Serialize;
use switchyard_core::{
    validate_service_name, ClockSource, ConfigField, ConfigUpdate, ConnectionMode, HealthStatus,
    ServiceMetadata, ServiceRecord,
};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

pub use observer::{CompositeRegistryObserver, RegistryChange, RegistryObserver};
#[cfg(feature = "redb")]
pub use redb_store::RedbRegistryStore;
pub use store::{MemoryRegistryStore, RegistryStore};

use crate::error::{RegistryError, StorageError};
use crate::service::lifecycle::{ComponentContext, ManagedComponent};

/// Result of reconciling the registry against a full discovery pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncSummary {
    pub created: Vec<String>,
    pub updated: Vec<String>,
    pub reactivated: Vec<String>,
    pub deactivated: Vec<String>,
    /// Discovered entries whose name failed validation.
    pub rejected: Vec<String>,
    pub unchanged: usize,
}

enum Upsert {
    Created,
    Updated(Vec<&'static str>),
    Unchanged,
}

enum Modified {
    Missing,
    Unchanged,
    Changed,
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// Service registry over a pluggable [`RegistryStore`].
///
/// Unknown-service mutations report `false` rather than failing; only
/// persistence failures surface as [`StorageError`].
pub struct Registry {
    store: Arc<dyn RegistryStore>,
    clock: Arc<dyn ClockSource>,
    locks: DashMap<String, Arc<Mutex<()>>>,
    /// Services with a registered local target. Discovery cannot clear the
    /// flag of these.
    local_targets: DashSet<String>,
    observers: RwLock<CompositeRegistryObserver>,
}

impl Registry {
    #[must_use]
    pub fn new(store: Arc<dyn RegistryStore>, clock: Arc<dyn ClockSource>) -> Self {
        Self {
            store,
            clock,
            locks: DashMap::new(),
            local_targets: DashSet::new(),
            observers: RwLock::new(CompositeRegistryObserver::default()),
        }
    }

    /// Subscribes `observer` to every subsequent change.
    pub fn add_observer(&self, observer: Arc<dyn RegistryObserver>) {
        self.observers.write().add(observer);
    }

    #[must_use]
    pub fn clock(&self) -> Arc<dyn ClockSource> {
        Arc::clone(&self.clock)
    }

    fn lock_for(&self, name: &str) -> Arc<Mutex<()>> {
        self.locks.entry(name.to_string()).or_default().clone()
    }

    /// Drops the lock of a name with no record, unless another task holds it.
    fn release_lock(&self, name: &str) {
        self.locks.remove_if(name, |_, lock| Arc::strong_count(lock) == 1);
    }

    async fn notify(&self, change: RegistryChange) {
        let observers = self.observers.read().clone();
        if !observers.is_empty() {
            observers.on_change(&change).await;
        }
    }

    // -- reads --------------------------------------------------------------

    /// Looks up one record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn get(&self, name: &str) -> Result<Option<ServiceRecord>, StorageError> {
        self.store.load(name).await
    }

    /// Every record, active or not, ordered by priority then name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn list_all(&self) -> Result<Vec<ServiceRecord>, StorageError> {
        let mut records = self.store.load_all().await?;
        records.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.name.cmp(&b.name)));
        Ok(records)
    }

    /// Active records ordered by priority then name.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn list_active(&self) -> Result<Vec<ServiceRecord>, StorageError> {
        let mut records = self.list_all().await?;
        records.retain(|r| r.is_active);
        Ok(records)
    }

    // -- discovery ----------------------------------------------------------

    /// Creates or refreshes a record from discovery metadata.
    ///
    /// Idempotent: identical metadata produces no write and no notification.
    /// Manually configured fields are never overwritten.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidName`] for unusable names and
    /// [`RegistryError::Storage`] if the backend fails.
    pub async fn upsert_discovered(
        &self,
        meta: &ServiceMetadata,
    ) -> Result<ServiceRecord, RegistryError> {
        let (record, _) = self.upsert(meta).await?;
        Ok(record)
    }

    async fn upsert(&self, meta: &ServiceMetadata) -> Result<(ServiceRecord, Upsert), RegistryError> {
        validate_service_name(&meta.name)?;

        let meta = if !meta.has_local_target && self.local_targets.contains(&meta.name) {
            Cow::Owned(ServiceMetadata {
                has_local_target: true,
                ..meta.clone()
            })
        } else {
            Cow::Borrowed(meta)
        };
        let meta: &ServiceMetadata = &meta;

        let lock = self.lock_for(&meta.name);
        let _guard = lock.lock().await;
        let now = self.clock.now();

        let Some(mut record) = self.store.load(&meta.name).await? else {
            let record = ServiceRecord::from_discovery(meta, now);
            self.store.store(&record).await?;
            info!(
                service = %record.name,
                mode = %record.preferred_mode,
                local = record.has_local_target,
                "service registered"
            );
            self.notify(RegistryChange::Created {
                name: record.name.clone(),
            })
            .await;
            return Ok((record, Upsert::Created));
        };

        let changed = record.apply_discovery(meta, now);
        if changed.is_empty() {
            return Ok((record, Upsert::Unchanged));
        }

        self.store.store(&record).await?;
        debug!(service = %record.name, fields = ?changed, "service rediscovered with changes");
        self.notify(RegistryChange::Discovered {
            name: record.name.clone(),
            fields: changed.clone(),
        })
        .await;
        Ok((record, Upsert::Updated(changed)))
    }

    /// Reconciles the registry with a complete discovery pass.
    ///
    /// Every discovered service is upserted. Active records missing from
    /// `discovered` are soft-disabled unless `is_active` was pinned by an
    /// operator; records are never deleted. Entries with invalid names are
    /// skipped and listed in [`SyncSummary::rejected`].
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn sync_discovered(
        &self,
        discovered: &[ServiceMetadata],
    ) -> Result<SyncSummary, StorageError> {
        let mut summary = SyncSummary::default();
        let mut seen = HashSet::new();

        for meta in discovered {
            let (record, outcome) = match self.upsert(meta).await {
                Ok(result) => result,
                Err(RegistryError::InvalidName(err)) => {
                    warn!(error = %err, "skipping discovered service");
                    summary.rejected.push(meta.name.clone());
                    continue;
                }
                Err(RegistryError::Storage(err)) => return Err(err),
            };
            seen.insert(record.name.clone());
            match outcome {
                Upsert::Created => summary.created.push(record.name),
                Upsert::Updated(fields) if fields.contains(&"is_active") => {
                    summary.reactivated.push(record.name);
                }
                Upsert::Updated(_) => summary.updated.push(record.name),
                Upsert::Unchanged => summary.unchanged += 1,
            }
        }

        for record in self.store.load_all().await? {
            if seen.contains(&record.name)
                || !record.is_active
                || record.is_overridden(ConfigField::IsActive)
            {
                continue;
            }
            let outcome = self
                .modify(&record.name, |r, now| {
                    if !r.is_active || r.is_overridden(ConfigField::IsActive) {
                        return None;
                    }
                    r.is_active = false;
                    r.updated_at = now;
                    Some(RegistryChange::Deactivated {
                        name: r.name.clone(),
                    })
                })
                .await?;
            if matches!(outcome, Modified::Changed) {
                info!(service = %record.name, "service no longer discovered, deactivated");
                summary.deactivated.push(record.name);
            }
        }
        summary.deactivated.sort();

        Ok(summary)
    }

    // -- mutations ----------------------------------------------------------

    /// Runs `f` against the stored record under its lock, persisting and
    /// notifying only when `f` reports a change.
    async fn modify<F>(&self, name: &str, f: F) -> Result<Modified, StorageError>
    where
        F: FnOnce(&mut ServiceRecord, u64) -> Option<RegistryChange> + Send,
    {
        let lock = self.lock_for(name);
        let guard = lock.lock().await;

        let Some(mut record) = self.store.load(name).await? else {
            drop(guard);
            drop(lock);
            self.release_lock(name);
            return Ok(Modified::Missing);
        };
        let Some(change) = f(&mut record, self.clock.now()) else {
            return Ok(Modified::Unchanged);
        };

        self.store.store(&record).await?;
        self.notify(change).await;
        Ok(Modified::Changed)
    }

    /// Applies an operator update and pins the supplied fields against
    /// future discovery.
    ///
    /// Returns `false` if the service is unknown or the update is empty.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn set_config(&self, name: &str, update: &ConfigUpdate) -> Result<bool, StorageError> {
        if update.is_empty() {
            return Ok(false);
        }
        let outcome = self
            .modify(name, |record, now| {
                let fields = record.apply_config(update, now);
                (!fields.is_empty()).then(|| RegistryChange::Configured {
                    name: record.name.clone(),
                    fields,
                })
            })
            .await?;

        match outcome {
            Modified::Changed => {
                info!(service = name, update = ?update, "service configuration updated");
                Ok(true)
            }
            Modified::Missing | Modified::Unchanged => Ok(false),
        }
    }

    /// Records a health observation. Does not pin any configuration.
    ///
    /// Always notifies observers, even when the status is unchanged, so
    /// cached decisions are recomputed from the fresh record.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn set_health(
        &self,
        name: &str,
        status: HealthStatus,
        timestamp: u64,
    ) -> Result<bool, StorageError> {
        let outcome = self
            .modify(name, |record, _| {
                let previous = record.health_status;
                record.health_status = status;
                record.last_checked = Some(timestamp);
                Some(RegistryChange::Health {
                    name: record.name.clone(),
                    previous,
                    current: status,
                })
            })
            .await?;
        Ok(!matches!(outcome, Modified::Missing))
    }

    /// Records whether a local target is registered for `name`.
    ///
    /// The flag survives rediscovery while the target stays registered, and
    /// an unpinned preferred mode follows it. Returns `false` if the service
    /// has no record yet; the registration still applies once it is
    /// discovered.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] if the backend fails.
    pub async fn set_local_target(&self, name: &str, present: bool) -> Result<bool, StorageError> {
        if present {
            self.local_targets.insert(name.to_string());
        } else {
            self.local_targets.remove(name);
        }
        let outcome = self
            .modify(name, |record, now| {
                if !record.set_local_target(present, now) {
                    return None;
                }
                Some(RegistryChange::LocalTarget {
                    name: record.name.clone(),
                    present,
                })
            })
            .await?;
        Ok(!matches!(outcome, Modified::Missing))
    }

    /// Sets the preferred mode of several services, reporting per service
    /// whether it was known.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError`] on the first backend failure.
    pub async fn bulk_set_mode<I>(&self, modes: I) -> Result<BTreeMap<String, bool>, StorageError>
    where
        I: IntoIterator<Item = (String, ConnectionMode)>,
    {
        let mut results = BTreeMap::new();
        for (name, mode) in modes {
            let ok = self.set_config(&name, &ConfigUpdate::mode(mode)).await?;
            results.insert(name, ok);
        }
        Ok(results)
    }
}

#[async_trait]
impl ManagedComponent for Registry {
    fn name(&self) -> &'static str {
        "registry"
    }

    async fn init(&self, _ctx: &ComponentContext) -> anyhow::Result<()> {
        self.store.initialize().await?;
        let records = self.store.load_all().await?;
        info!(services = records.len(), "registry loaded");
        Ok(())
    }

    async fn shutdown(&self, _terminate: bool) -> anyhow::Result<()> {
        self.store.close().await?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
