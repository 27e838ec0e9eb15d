//! File-backed registry store on `redb`.
//!
//! Records live in a single table keyed by service name, with JSON values so
//! the file stays readable across record schema additions. Every transaction
//! runs on the blocking pool.

use std::path::Path;
use std::sync::Arc;

use anyhow::Context as _;
use async_trait::async_trait;
use redb::{Database, ReadableTable, TableDefinition};
use switchyard_core::ServiceRecord;

use super::store::RegistryStore;
use crate::error::StorageError;

const SERVICES: TableDefinition<&str, &[u8]> = TableDefinition::new("services");

/// Registry store persisted to a single `redb` database file.
#[derive(Clone)]
pub struct RedbRegistryStore {
    db: Arc<Database>,
}

impl RedbRegistryStore {
    /// Opens (or creates) the database at `path` and ensures the table exists.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Backend`] if the file cannot be opened or the
    /// table cannot be created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref();
        let db = Database::create(path)
            .with_context(|| format!("opening registry database {}", path.display()))?;

        let txn = db.begin_write().context("begin write")?;
        {
            txn.open_table(SERVICES).context("create services table")?;
        }
        txn.commit().context("commit table creation")?;

        Ok(Self { db: Arc::new(db) })
    }

    async fn blocking<T, F>(&self, f: F) -> Result<T, StorageError>
    where
        T: Send + 'static,
        F: FnOnce(&Database) -> Result<T, StorageError> + Send + 'static,
    {
        let db = Arc::clone(&self.db);
        tokio::task::spawn_blocking(move || f(&db))
            .await
            .context("registry storage task failed")?
    }
}

fn decode(name: &str, bytes: &[u8]) -> Result<ServiceRecord, StorageError> {
    serde_json::from_slice(bytes).map_err(|e| StorageError::Corrupt {
        name: name.to_string(),
        reason: e.to_string(),
    })
}

#[async_trait]
impl RegistryStore for RedbRegistryStore {
    async fn load(&self, name: &str) -> Result<Option<ServiceRecord>, StorageError> {
        let name = name.to_string();
        self.blocking(move |db| {
            let txn = db.begin_read().context("begin read")?;
            let table = txn.open_table(SERVICES).context("open services table")?;
            let Some(value) = table.get(name.as_str()).context("read record")? else {
                return Ok(None);
            };
            let record = decode(&name, value.value())?;
            Ok(Some(record))
        })
        .await
    }

    async fn load_all(&self) -> Result<Vec<ServiceRecord>, StorageError> {
        self.blocking(|db| {
            let txn = db.begin_read().context("begin read")?;
            let table = txn.open_table(SERVICES).context("open services table")?;
            let mut records = Vec::new();
            for entry in table.iter().context("iterate services")? {
                let (key, value) = entry.context("read record")?;
                records.push(decode(key.value(), value.value())?);
            }
            Ok(records)
        })
        .await
    }

    async fn store(&self, record: &ServiceRecord) -> Result<(), StorageError> {
        let name = record.name.clone();
        let bytes = serde_json::to_vec(record).context("encode record")?;
        self.blocking(move |db| {
            let txn = db.begin_write().context("begin write")?;
            {
                let mut table = txn.open_table(SERVICES).context("open services table")?;
                table
                    .insert(name.as_str(), bytes.as_slice())
                    .context("write record")?;
            }
            txn.commit().context("commit record")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use switchyard_core::{ConnectionMode, HealthStatus, ServiceMetadata};

    use super::*;

    #[tokio::test]
    async fn records_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("registry.redb");

        {
            let store = RedbRegistryStore::open(&path).unwrap();
            let mut record = ServiceRecord::from_discovery(
                &ServiceMetadata::new("ai_svc").with_remote_address("http://ai:8005"),
                10,
            );
            record.health_status = HealthStatus::Degraded;
            store.store(&record).await.unwrap();
        }

        let store = RedbRegistryStore::open(&path).unwrap();
        let loaded = store.load("ai_svc").await.unwrap().unwrap();
        assert_eq!(loaded.preferred_mode, ConnectionMode::Remote);
        assert_eq!(loaded.health_status, HealthStatus::Degraded);
        assert_eq!(loaded.remote_address.as_deref(), Some("http://ai:8005"));
        assert!(store.load("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn load_all_returns_every_record() {
        let dir = tempfile::tempdir().unwrap();
        let store = RedbRegistryStore::open(dir.path().join("r.redb")).unwrap();

        for name in ["a", "b", "c"] {
            let record = ServiceRecord::from_discovery(&ServiceMetadata::new(name), 1);
            store.store(&record).await.unwrap();
        }

        let mut names: Vec<String> = store
            .load_all()
            .await
            .unwrap()
            .into_iter()
            .map(|r| r.name)
            .collect();
        names.sort();
        assert_eq!(names, vec!["a", "b", "c"]);
    }
}
