// # File Convergence Store
//
// JSON-file implementation of ConvergenceStore with crash recovery.
//
// ## Crash Recovery
//
// - Atomic writes: the log is written to a `.tmp` sibling, then renamed
// - Automatic backup: the previous file is copied to `.backup` before rename
// - Recovery: a log that fails to parse is replaced by its backup
//
// ## File Format
//
// ```json
// {
//   "version": "1.0",
//   "records": [
//     {
//       "id": "01HZX3J6Y7K8M9N0P1Q2R3S4T5",
//       "host": "10.0.0.1:22",
//       "description": "",
//       "username": "admin",
//       "password": "admin",
//       "type": "GigabitEthernet",
//       "number": "0/1",
//       "shutdown": false
//     }
//   ]
// }
// ```
//
// Credentials are stored as submitted; protect the file accordingly.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::RwLock;

use super::log::RecordLog;
use crate::Error;
use crate::config::StoreConfig;
use crate::model::{DesiredState, IdentityKey};
use crate::traits::{ConvergenceRecord, ConvergenceStore, ConvergenceStoreFactory, RecordId};

/// Log file format version
const LOG_FILE_VERSION: &str = "1.0";

/// File-backed convergence store
///
/// Every mutation is written to disk before the call returns. The write lock
/// is held across the file write so that concurrent mutations reach the disk
/// in the same order they were applied in memory.
#[derive(Debug)]
pub struct FileConvergenceStore {
    path: PathBuf,
    log: Arc<RwLock<RecordLog>>,
}

#[derive(Debug, Serialize, Deserialize)]
struct LogFileFormat {
    version: String,
    records: Vec<ConvergenceRecord>,
}

/// Why a log file could not be loaded
enum LoadError {
    /// The file exists but does not parse
    Corrupt(Error),
    /// The file could not be read at all
    Unreadable(Error),
}

impl FileConvergenceStore {
    /// Create or load a file store
    ///
    /// 1. Create parent directories if needed
    /// 2. Load the existing log, if any
    /// 3. On corruption, fall back to the backup
    /// 4. If the backup is missing or corrupt too, start empty
    pub async fn new<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                fs::create_dir_all(parent).await.map_err(|e| {
                    Error::config(format!(
                        "Failed to create store directory {}: {}",
                        parent.display(),
                        e
                    ))
                })?;
            }
        }

        let log = Self::load_with_recovery(&path).await?;

        Ok(Self {
            path,
            log: Arc::new(RwLock::new(log)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn load_with_recovery(path: &Path) -> Result<RecordLog, Error> {
        let e = match Self::load(path).await {
            Ok(log) => {
                tracing::debug!("Loaded convergence log: {} records", log.len());
                return Ok(log);
            }
            Err(LoadError::Unreadable(e)) => return Err(e),
            Err(LoadError::Corrupt(e)) => e,
        };

        tracing::warn!(
            "Convergence log appears corrupted: {}. Attempting recovery from backup.",
            e
        );

        let backup_path = Self::backup_path(path);
        if !backup_path.exists() {
            tracing::warn!("No backup file found. Starting with an empty log.");
            return Ok(RecordLog::new());
        }

        match Self::load(&backup_path).await {
            Ok(log) => {
                tracing::info!("Recovered convergence log from backup: {} records", log.len());
                if let Err(restore_err) = fs::copy(&backup_path, path).await {
                    tracing::error!("Failed to restore log file from backup: {}", restore_err);
                }
                Ok(log)
            }
            Err(LoadError::Corrupt(backup_err)) | Err(LoadError::Unreadable(backup_err)) => {
                tracing::error!(
                    "Backup unusable too: {}. Starting with an empty log.",
                    backup_err
                );
                Ok(RecordLog::new())
            }
        }
    }

    async fn load(path: &Path) -> Result<RecordLog, LoadError> {
        if !path.exists() {
            tracing::debug!("Convergence log does not exist: {}", path.display());
            return Ok(RecordLog::new());
        }

        let content = fs::read_to_string(path).await.map_err(|e| {
            LoadError::Unreadable(Error::store(format!(
                "Failed to read log file {}: {}",
                path.display(),
                e
            )))
        })?;

        let file: LogFileFormat = serde_json::from_str(&content).map_err(|e| {
            LoadError::Corrupt(Error::store(format!(
                "Failed to parse log file {}: {}",
                path.display(),
                e
            )))
        })?;

        if file.version != LOG_FILE_VERSION {
            tracing::warn!(
                "Log file version mismatch: expected {}, got {}. Attempting to load anyway.",
                LOG_FILE_VERSION,
                file.version
            );
        }

        Ok(RecordLog::from_records(file.records))
    }

    /// Write `log` atomically; the caller holds the write lock
    async fn persist(&self, log: &RecordLog) -> Result<(), Error> {
        let file = LogFileFormat {
            version: LOG_FILE_VERSION.to_string(),
            records: log.to_vec(),
        };
        let json = serde_json::to_string_pretty(&file)
            .map_err(|e| Error::store(format!("Failed to serialize log: {}", e)))?;

        let temp_path = self.temp_path();
        {
            let mut out = fs::File::create(&temp_path).await.map_err(|e| {
                Error::store(format!(
                    "Failed to create temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            out.write_all(json.as_bytes()).await.map_err(|e| {
                Error::store(format!(
                    "Failed to write temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
            out.flush().await.map_err(|e| {
                Error::store(format!(
                    "Failed to flush temp file {}: {}",
                    temp_path.display(),
                    e
                ))
            })?;
        }

        if self.path.exists() {
            let backup_path = Self::backup_path(&self.path);
            if let Err(e) = fs::copy(&self.path, &backup_path).await {
                tracing::warn!("Failed to create backup: {}", e);
            }
        }

        fs::rename(&temp_path, &self.path).await.map_err(|e| {
            Error::store(format!(
                "Failed to rename {} to {}: {}",
                temp_path.display(),
                self.path.display(),
                e
            ))
        })?;

        tracing::trace!("Convergence log written to {}", self.path.display());
        Ok(())
    }

    /// Apply `mutate` to a copy of the log and keep the copy once it is on disk
    ///
    /// A failed write leaves the in-memory log as it was.
    async fn mutate<T, F>(&self, mutate: F) -> Result<T, Error>
    where
        F: FnOnce(&mut RecordLog) -> Result<T, Error> + Send,
        T: Send,
    {
        let mut guard = self.log.write().await;
        let mut next = guard.clone();
        let value = mutate(&mut next)?;
        self.persist(&next).await?;
        *guard = next;
        Ok(value)
    }

    fn temp_path(&self) -> PathBuf {
        let mut temp = self.path.clone();
        temp.set_extension("tmp");
        temp
    }

    fn backup_path(path: &Path) -> PathBuf {
        let mut backup = path.to_path_buf();
        backup.set_extension("backup");
        backup
    }
}

#[async_trait]
impl ConvergenceStore for FileConvergenceStore {
    async fn find_current(&self, key: &IdentityKey) -> Result<Option<ConvergenceRecord>, Error> {
        Ok(self.log.read().await.find_current(key).cloned())
    }

    async fn latest_for_host(&self, host: &str) -> Result<Option<ConvergenceRecord>, Error> {
        Ok(self.log.read().await.latest_for_host(host).cloned())
    }

    async fn get(&self, id: &RecordId) -> Result<Option<ConvergenceRecord>, Error> {
        Ok(self.log.read().await.get(id).cloned())
    }

    async fn history(&self, key: &IdentityKey) -> Result<Vec<ConvergenceRecord>, Error> {
        Ok(self.log.read().await.history(key))
    }

    async fn list_current(&self) -> Result<Vec<ConvergenceRecord>, Error> {
        Ok(self.log.read().await.list_current())
    }

    async fn append(&self, state: DesiredState) -> Result<ConvergenceRecord, Error> {
        self.mutate(|log| log.append(state)).await
    }

    async fn replace(
        &self,
        id: &RecordId,
        state: DesiredState,
    ) -> Result<ConvergenceRecord, Error> {
        self.mutate(|log| log.replace(id, state)).await
    }

    async fn remove(&self, id: &RecordId) -> Result<bool, Error> {
        if self.log.read().await.get(id).is_none() {
            return Ok(false);
        }
        self.mutate(|log| Ok(log.remove(id))).await
    }

    async fn flush(&self) -> Result<(), Error> {
        // Nothing is pending; mutations are on disk before they return
        Ok(())
    }
}

/// Factory for [`FileConvergenceStore`], registered as "file"
#[derive(Debug, Default)]
pub struct FileStoreFactory;

#[async_trait]
impl ConvergenceStoreFactory for FileStoreFactory {
    async fn create(&self, config: &StoreConfig) -> Result<Box<dyn ConvergenceStore>, Error> {
        match config {
            StoreConfig::File { path } => Ok(Box::new(FileConvergenceStore::new(path).await?)),
            other => Err(Error::config(format!(
                "File store factory cannot build a '{}' store",
                other.type_name()
            ))),
        }
    }
}
