// # Memory Convergence Store
//
// In-memory implementation of ConvergenceStore.
//
// ## Purpose
//
// Fast, non-persistent log for tests and for deployments where losing the
// record history on restart is acceptable.
//
// ## Crash Behavior
//
// - The whole log is lost on restart
// - After a restart every interface reads as absent; a create re-applies it

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::RwLock;

use super::log::RecordLog;
use crate::Error;
use crate::config::StoreConfig;
use crate::model::{DesiredState, IdentityKey};
use crate::traits::{ConvergenceRecord, ConvergenceStore, ConvergenceStoreFactory, RecordId};

/// In-memory convergence store
///
/// Cloning shares the underlying log.
#[derive(Debug, Clone, Default)]
pub struct MemoryConvergenceStore {
    inner: Arc<RwLock<RecordLog>>,
}

impl MemoryConvergenceStore {
    /// Create a new empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of records, including superseded ones
    pub async fn len(&self) -> usize {
        self.inner.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Drop every record
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }
}

#[async_trait]
impl ConvergenceStore for MemoryConvergenceStore {
    async fn find_current(&self, key: &IdentityKey) -> Result<Option<ConvergenceRecord>, Error> {
        Ok(self.inner.read().await.find_current(key).cloned())
    }

    async fn latest_for_host(&self, host: &str) -> Result<Option<ConvergenceRecord>, Error> {
        Ok(self.inner.read().await.latest_for_host(host).cloned())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<ConvergenceRecord>, Error> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn history(&self, key: &IdentityKey) -> Result<Vec<ConvergenceRecord>, Error> {
        Ok(self.inner.read().await.history(key))
    }

    async fn list_current(&self) -> Result<Vec<ConvergenceRecord>, Error> {
        Ok(self.inner.read().await.list_current())
    }

    async fn append(&self, state: DesiredState) -> Result<ConvergenceRecord, Error> {
        self.inner.write().await.append(state)
    }

    async fn replace(
        &self,
        id: &RecordId,
        state: DesiredState,
    ) -> Result<ConvergenceRecord, Error> {
        self.inner.write().await.replace(id, state)
    }

    async fn remove(&self, id: &RecordId) -> Result<bool, Error> {
        Ok(self.inner.write().await.remove(id))
    }

    async fn flush(&self) -> Result<(), Error> {
        Ok(())
    }
}

/// Factory for [`MemoryConvergenceStore`], registered as "memory"
#[derive(Debug, Default)]
pub struct MemoryStoreFactory;

#[async_trait]
impl ConvergenceStoreFactory for MemoryStoreFactory {
    async fn create(&self, config: &StoreConfig) -> Result<Box<dyn ConvergenceStore>, Error> {
        match config {
            StoreConfig::Memory => Ok(Box::new(MemoryConvergenceStore::new())),
            other => Err(Error::config(format!(
                "Memory store factory cannot build a '{}' store",
                other.type_name()
            ))),
        }
    }
}
