//! Persistence backends for service records.

use async_trait::async_trait;
use dashmap::DashMap;
use switchyard_core::ServiceRecord;

use crate::error::StorageError;

/// Durable home of [`ServiceRecord`]s, keyed by service name.
///
/// Implementations only persist and fetch whole records; read-modify-write
/// sequencing is the [`Registry`](super::Registry)'s job.
///
/// Used as `Arc<dyn RegistryStore>`.
#[async_trait]
pub trait RegistryStore: Send + Sync {
    /// Prepares the backend (create tables, open files). Called once at startup.
    async fn initialize(&self) -> Result<(), StorageError> {
        Ok(())
    }

    async fn load(&self, name: &str) -> Result<Option<ServiceRecord>, StorageError>;

    /// Every stored record, in no particular order.
    async fn load_all(&self) -> Result<Vec<ServiceRecord>, StorageError>;

    /// Inserts or replaces the record stored under `record.name`.
    async fn store(&self, record: &ServiceRecord) -> Result<(), StorageError>;

    /// Flushes and releases the backend. Called once at shutdown.
    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryRegistryStore
// ---------------------------------------------------------------------------

/// Non-durable store backed by a concurrent map.
#[derive(Debug, Default)]
pub struct MemoryRegistryStore {
    records: DashMap<String, ServiceRecord>,
}

impl MemoryRegistryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RegistryStore for MemoryRegistryStore {
    async fn load(&self, name: &str) -> Result<Option<ServiceRecord>, StorageError> {
        Ok(self.records.get(name).map(|entry| entry.value().clone()))
    }

    async fn load_all(&self) -> Result<Vec<ServiceRecord>, StorageError> {
        Ok(self
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect())
    }

    async fn store(&self, record: &ServiceRecord) -> Result<(), StorageError> {
        self.records.insert(record.name.clone(), record.clone());
        Ok(())
    }
}
