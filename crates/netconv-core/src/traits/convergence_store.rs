// # Convergence Store Trait
//
// Defines the interface for the append-only log of applied desired states.
//
// ## Purpose
//
// The store is the source of truth for "does this interface exist" and
// "what was last applied to it". Records are never edited: the current state
// of an identity key is the record with the highest ID sharing that key.
//
// ## Implementations
//
// - Memory: `MemoryConvergenceStore`
// - File: `FileConvergenceStore` (JSON log with atomic writes)

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::config::StoreConfig;
use crate::model::{DesiredState, IdentityKey};

/// Opaque record identifier, ordered by insertion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RecordId(Ulid);

impl RecordId {
    pub(crate) fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }

    pub(crate) fn as_ulid(&self) -> Ulid {
        self.0
    }

    /// Insertion time encoded in the identifier
    pub fn timestamp(&self) -> DateTime<Utc> {
        let millis = i64::try_from(self.0.timestamp_ms()).unwrap_or(i64::MAX);
        DateTime::from_timestamp_millis(millis).unwrap_or_default()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for RecordId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ulid::from_string(s)
            .map(Self)
            .map_err(|e| crate::Error::validation(format!("Invalid record id '{}': {}", s, e)))
    }
}

/// Immutable snapshot of an applied desired state
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConvergenceRecord {
    id: RecordId,
    #[serde(flatten)]
    state: DesiredState,
}

impl ConvergenceRecord {
    /// Create a new convergence record
    ///
    /// # Visibility
    ///
    /// This is `pub(crate)` so that record IDs are only ever minted by a
    /// store, which guarantees their ordering.
    pub(crate) fn new(id: RecordId, state: DesiredState) -> Self {
        Self { id, state }
    }

    pub fn id(&self) -> RecordId {
        self.id
    }

    pub fn state(&self) -> &DesiredState {
        &self.state
    }

    pub fn into_state(self) -> DesiredState {
        self.state
    }

    pub fn key(&self) -> IdentityKey {
        self.state.identity_key()
    }

    /// When the record was first appended
    pub fn recorded_at(&self) -> DateTime<Utc> {
        self.id.timestamp()
    }
}

/// Trait for convergence store implementations
///
/// # Thread Safety
///
/// All methods must be safe to call concurrently from multiple tasks. Each
/// call is atomic on its own; read-then-write sequences spanning several calls
/// are serialized by the engine, not by the store.
///
/// ## Allowed Capabilities
/// - ✅ Perform I/O for persistent storage
/// - ✅ Implement locking for thread safety
///
/// ## Forbidden Capabilities
/// - ❌ Contact devices (owned by `SessionDriver`)
/// - ❌ Decide whether a change is committed (owned by `ConvergenceEngine`)
#[async_trait]
pub trait ConvergenceStore: Send + Sync {
    /// Most recent record for an identity key
    ///
    /// # Returns
    ///
    /// - `Ok(Some(record))`: The current record
    /// - `Ok(None)`: No record for this key (a normal outcome)
    /// - `Err(Error)`: Storage error
    async fn find_current(
        &self,
        key: &IdentityKey,
    ) -> Result<Option<ConvergenceRecord>, crate::Error>;

    /// Most recent record for any interface on `host`
    async fn latest_for_host(&self, host: &str)
    -> Result<Option<ConvergenceRecord>, crate::Error>;

    /// Direct lookup by record ID
    async fn get(&self, id: &RecordId) -> Result<Option<ConvergenceRecord>, crate::Error>;

    /// All records for a key, newest first
    async fn history(&self, key: &IdentityKey) -> Result<Vec<ConvergenceRecord>, crate::Error>;

    /// Current record of every identity key, ordered by key
    async fn list_current(&self) -> Result<Vec<ConvergenceRecord>, crate::Error>;

    /// Persist `state` under a fresh record ID
    async fn append(&self, state: DesiredState) -> Result<ConvergenceRecord, crate::Error>;

    /// Replace the fields of an existing record, keeping its ID
    ///
    /// Returns `Error::NotFound` if `id` is not in the store.
    async fn replace(
        &self,
        id: &RecordId,
        state: DesiredState,
    ) -> Result<ConvergenceRecord, crate::Error>;

    /// Delete exactly one record
    ///
    /// # Returns
    ///
    /// - `Ok(true)`: The record was removed
    /// - `Ok(false)`: No record with this ID
    async fn remove(&self, id: &RecordId) -> Result<bool, crate::Error>;

    /// Persist any pending changes
    async fn flush(&self) -> Result<(), crate::Error>;
}

/// Helper trait for constructing convergence stores from configuration
#[async_trait]
pub trait ConvergenceStoreFactory: Send + Sync {
    /// Create a ConvergenceStore instance from configuration
    async fn create(
        &self,
        config: &StoreConfig,
    ) -> Result<Box<dyn ConvergenceStore>, crate::Error>;
}
