//! Resource operations engine
//!
//! The ConvergenceEngine is responsible for:
//! - Validating desired states before any device is contacted
//! - Rendering apply/remove command sequences
//! - Dispatching them to the target device
//! - Committing the outcome to the ConvergenceStore
//!
//! ## Architecture
//!
//! ```text
//!                      ┌───────────────────┐
//!   DesiredState ────▶ │ ConvergenceEngine │ ────▶ ConvergenceRecord
//!                      └───────────────────┘
//!                                │
//!      ┌──────────────────┬──────┴───────────┬──────────────────┐
//!      ▼                  ▼                  ▼                  ▼
//! ┌──────────┐     ┌────────────┐     ┌──────────────┐    ┌──────────┐
//! │ Renderer │     │ Dispatcher │     │ Convergence  │    │  Events  │
//! │          │     │            │     │ Store        │    │ (notify) │
//! └──────────┘     └────────────┘     └──────────────┘    └──────────┘
//! ```
//!
//! ## Operation Stages
//!
//! `Received → Rendered → Dispatched → Committed`, or `Failed` from any stage.
//!
//! - Create: validate → render apply → dispatch → append
//! - Read: find current; absence is `Ok(None)`
//! - Update: find current (absent is `NotFound`) → render apply → dispatch →
//!   replace the current record in place
//! - Delete: find current (absent is `NotFound`) → render remove → dispatch →
//!   remove the current record and its superseded history
//!
//! Whether a failed dispatch still commits is decided by [`CommitPolicy`].

mod locks;

use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{OwnedMutexGuard, mpsc};
use tracing::{debug, info, warn};

use crate::config::{CommitPolicy, EngineConfig};
use crate::dispatch::{DispatchResult, Dispatcher};
use crate::error::{Error, Result};
use crate::model::{DesiredState, IdentityKey};
use crate::render::{CommandRenderer, TemplateKind};
use crate::traits::{ConvergenceRecord, ConvergenceStore, RecordId, SessionDriver};
use locks::KeyLocks;

/// Mutating resource operation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Create,
    Update,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Operation::Create => "create",
            Operation::Update => "update",
            Operation::Delete => "delete",
        })
    }
}

/// Events emitted by the ConvergenceEngine
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// Request accepted for processing
    Received {
        operation: Operation,
        key: IdentityKey,
    },

    /// Command sequence rendered
    Rendered {
        operation: Operation,
        key: IdentityKey,
        commands: usize,
    },

    /// Every target host reported
    Dispatched {
        operation: Operation,
        key: IdentityKey,
        completed: bool,
    },

    /// Store change written
    Committed {
        operation: Operation,
        key: IdentityKey,
        record_id: RecordId,
    },

    /// Operation abandoned
    Failed {
        operation: Operation,
        key: IdentityKey,
        error: String,
    },
}

/// Explicitly constructed service context for all resource operations
///
/// Cheap to share behind an `Arc`; every operation takes `&self`.
pub struct ConvergenceEngine {
    renderer: CommandRenderer,
    dispatcher: Dispatcher,
    store: Arc<dyn ConvergenceStore>,
    commit_policy: CommitPolicy,
    key_locks: Option<KeyLocks>,
    event_tx: mpsc::Sender<EngineEvent>,
}

impl ConvergenceEngine {
    /// Create a new engine
    ///
    /// # Returns
    ///
    /// A tuple of (engine, event_receiver) where event_receiver yields engine events
    pub fn new(
        renderer: CommandRenderer,
        driver: Arc<dyn SessionDriver>,
        store: Arc<dyn ConvergenceStore>,
        config: &EngineConfig,
    ) -> Result<(Self, mpsc::Receiver<EngineEvent>)> {
        config.validate()?;

        let (tx, rx) = mpsc::channel(config.event_channel_capacity);

        let engine = Self {
            renderer,
            dispatcher: Dispatcher::new(driver),
            store,
            commit_policy: config.commit_policy,
            key_locks: config.serialize_per_key.then(KeyLocks::new),
            event_tx: tx,
        };

        Ok((engine, rx))
    }

    /// Apply `state` to its device and record it
    pub async fn create(&self, state: DesiredState) -> Result<ConvergenceRecord> {
        let key = state.identity_key();
        let started = self.begin(Operation::Create, &key);
        let result = self.create_inner(state, &key).await;
        self.finish(Operation::Create, &key, started, result)
    }

    async fn create_inner(&self, state: DesiredState, key: &IdentityKey) -> Result<ConvergenceRecord> {
        state.validate()?;
        let _guard = self.lock(key).await;

        self.push(Operation::Create, key, &state, TemplateKind::Apply)
            .await?;

        let record = self.store.append(state).await?;
        self.emit_event(EngineEvent::Committed {
            operation: Operation::Create,
            key: key.clone(),
            record_id: record.id(),
        });
        Ok(record)
    }

    /// Current record for an identity key
    ///
    /// Absence is `Ok(None)`, not an error.
    pub async fn read(&self, key: &IdentityKey) -> Result<Option<ConvergenceRecord>> {
        self.store.find_current(key).await
    }

    /// Most recent record for any interface on `host`
    pub async fn read_host(&self, host: &str) -> Result<Option<ConvergenceRecord>> {
        self.store.latest_for_host(host).await
    }

    /// Current record of every identity key
    pub async fn list(&self) -> Result<Vec<ConvergenceRecord>> {
        self.store.list_current().await
    }

    /// Every record kept for an identity key, newest first
    pub async fn history(&self, key: &IdentityKey) -> Result<Vec<ConvergenceRecord>> {
        self.store.history(key).await
    }

    /// Converge an existing interface onto `state`
    ///
    /// `name` is the host the caller addressed; it must equal `state.host`.
    /// The current record keeps its ID and takes the new fields.
    pub async fn update(&self, name: &str, state: DesiredState) -> Result<ConvergenceRecord> {
        let key = state.identity_key();
        let started = self.begin(Operation::Update, &key);
        let result = self.update_inner(name, state, &key).await;
        self.finish(Operation::Update, &key, started, result)
    }

    async fn update_inner(
        &self,
        name: &str,
        state: DesiredState,
        key: &IdentityKey,
    ) -> Result<ConvergenceRecord> {
        check_name(name, &state)?;
        state.validate()?;
        let _guard = self.lock(key).await;

        let current = self.require_current(key).await?;
        self.push(Operation::Update, key, &state, TemplateKind::Apply)
            .await?;

        let record = self.store.replace(&current.id(), state).await?;
        self.emit_event(EngineEvent::Committed {
            operation: Operation::Update,
            key: key.clone(),
            record_id: record.id(),
        });
        Ok(record)
    }

    /// Reset an existing interface to its defaults and forget it
    ///
    /// `state` carries the credentials and the interface key. Returns the
    /// confirmation text.
    pub async fn delete(&self, name: &str, state: DesiredState) -> Result<String> {
        let key = state.identity_key();
        let started = self.begin(Operation::Delete, &key);
        let result = self.delete_inner(name, state, &key).await;
        self.finish(Operation::Delete, &key, started, result)
    }

    async fn delete_inner(&self, name: &str, state: DesiredState, key: &IdentityKey) -> Result<String> {
        check_name(name, &state)?;
        state.validate()?;
        let _guard = self.lock(key).await;

        let current = self.require_current(key).await?;
        self.push(Operation::Delete, key, &state, TemplateKind::Remove)
            .await?;

        // Oldest first: the current record goes last, so a failed removal
        // never promotes a superseded record to current
        for older in self.store.history(key).await?.iter().rev() {
            if older.id() != current.id() {
                self.store.remove(&older.id()).await?;
            }
        }
        if !self.store.remove(&current.id()).await? {
            return Err(Error::not_found(format!("record {} for {}", current.id(), key)));
        }

        self.emit_event(EngineEvent::Committed {
            operation: Operation::Delete,
            key: key.clone(),
            record_id: current.id(),
        });
        Ok(format!("Deleted item with name {}", name))
    }

    /// Flush the store (called on shutdown)
    pub async fn flush(&self) -> Result<()> {
        self.store.flush().await
    }

    async fn lock(&self, key: &IdentityKey) -> Option<OwnedMutexGuard<()>> {
        match &self.key_locks {
            Some(locks) => Some(locks.acquire(key).await),
            None => None,
        }
    }

    async fn require_current(&self, key: &IdentityKey) -> Result<ConvergenceRecord> {
        self.store
            .find_current(key)
            .await?
            .ok_or_else(|| Error::not_found(format!("No item for {}", key)))
    }

    /// Render, dispatch and apply the commit policy
    async fn push(
        &self,
        operation: Operation,
        key: &IdentityKey,
        state: &DesiredState,
        kind: TemplateKind,
    ) -> Result<DispatchResult> {
        let commands = self.renderer.render(state, kind)?;
        self.emit_event(EngineEvent::Rendered {
            operation,
            key: key.clone(),
            commands: commands.len(),
        });

        let dispatch = self
            .dispatcher
            .dispatch(std::slice::from_ref(&state.host), &commands, &state.credentials)
            .await;
        self.emit_event(EngineEvent::Dispatched {
            operation,
            key: key.clone(),
            completed: dispatch.all_completed(),
        });

        self.check_commit(operation, key, &dispatch)?;
        Ok(dispatch)
    }

    fn check_commit(
        &self,
        operation: Operation,
        key: &IdentityKey,
        dispatch: &DispatchResult,
    ) -> Result<()> {
        if dispatch.all_completed() {
            return Ok(());
        }

        match self.commit_policy {
            CommitPolicy::RecordIntent => {
                warn!(
                    "{} {}: device push incomplete on {:?}; recording intent anyway",
                    operation,
                    key,
                    dispatch.failed_hosts()
                );
                Ok(())
            }
            CommitPolicy::RequireSuccess => Err(dispatch
                .first_error()
                .unwrap_or_else(|| Error::Other("dispatch incomplete".to_string()))),
        }
    }

    fn begin(&self, operation: Operation, key: &IdentityKey) -> Instant {
        debug!("{} {} received", operation, key);
        self.emit_event(EngineEvent::Received {
            operation,
            key: key.clone(),
        });
        Instant::now()
    }

    fn finish<T>(
        &self,
        operation: Operation,
        key: &IdentityKey,
        started: Instant,
        result: Result<T>,
    ) -> Result<T> {
        let elapsed = started.elapsed();
        match &result {
            Ok(_) => info!("{} {} took {:?}", operation, key, elapsed),
            Err(e) => {
                warn!("{} {} failed after {:?}: {}", operation, key, elapsed, e);
                self.emit_event(EngineEvent::Failed {
                    operation,
                    key: key.clone(),
                    error: e.to_string(),
                });
            }
        }
        result
    }

    fn emit_event(&self, event: EngineEvent) {
        if self.event_tx.try_send(event).is_err() {
            warn!("Event channel full, dropping event. Consider increasing event_channel_capacity.");
        }
    }
}

impl fmt::Debug for ConvergenceEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConvergenceEngine")
            .field("dispatcher", &self.dispatcher)
            .field("commit_policy", &self.commit_policy)
            .field("serialize_per_key", &self.key_locks.is_some())
            .finish()
    }
}

fn check_name(name: &str, state: &DesiredState) -> Result<()> {
    if name != state.host {
        return Err(Error::validation(format!(
            "Item name '{}' does not match host '{}'",
            name, state.host
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Credentials, InterfaceType};
    use crate::session::SessionOutcome;
    use crate::store::MemoryConvergenceStore;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Driver that records every command sequence and completes
    #[derive(Default)]
    struct RecordingDriver {
        sent: Mutex<Vec<Vec<String>>>,
    }

    #[async_trait]
    impl SessionDriver for RecordingDriver {
        async fn execute(
            &self,
            _host: &str,
            _credentials: &Credentials,
            commands: &[String],
        ) -> Result<SessionOutcome> {
            self.sent.lock().unwrap().push(commands.to_vec());
            Ok(SessionOutcome {
                transcript: "R1#".to_string(),
                status: crate::session::SessionStatus::Completed,
                commands_sent: commands.len(),
                pager_advances: 0,
            })
        }

        fn driver_name(&self) -> &'static str {
            "recording"
        }
    }

    /// Memory store whose removals fail once `removals_left` runs out
    struct FailingRemoveStore {
        inner: MemoryConvergenceStore,
        removals_left: AtomicUsize,
    }

    #[async_trait]
    impl ConvergenceStore for FailingRemoveStore {
        async fn find_current(&self, key: &IdentityKey) -> Result<Option<ConvergenceRecord>> {
            self.inner.find_current(key).await
        }

        async fn latest_for_host(&self, host: &str) -> Result<Option<ConvergenceRecord>> {
            self.inner.latest_for_host(host).await
        }

        async fn get(&self, id: &RecordId) -> Result<Option<ConvergenceRecord>> {
            self.inner.get(id).await
        }

        async fn history(&self, key: &IdentityKey) -> Result<Vec<ConvergenceRecord>> {
            self.inner.history(key).await
        }

        async fn list_current(&self) -> Result<Vec<ConvergenceRecord>> {
            self.inner.list_current().await
        }

        async fn append(&self, state: DesiredState) -> Result<ConvergenceRecord> {
            self.inner.append(state).await
        }

        async fn replace(&self, id: &RecordId, state: DesiredState) -> Result<ConvergenceRecord> {
            self.inner.replace(id, state).await
        }

        async fn remove(&self, id: &RecordId) -> Result<bool> {
            let left = self.removals_left.load(Ordering::SeqCst);
            if left == 0 {
                return Err(Error::store("disk full"));
            }
            self.removals_left.store(left - 1, Ordering::SeqCst);
            self.inner.remove(id).await
        }

        async fn flush(&self) -> Result<()> {
            Ok(())
        }
    }

    fn engine(
        driver: Arc<RecordingDriver>,
    ) -> (ConvergenceEngine, mpsc::Receiver<EngineEvent>) {
        ConvergenceEngine::new(
            CommandRenderer::builtin().unwrap(),
            driver,
            Arc::new(MemoryConvergenceStore::new()),
            &EngineConfig::default(),
        )
        .unwrap()
    }

    fn state() -> DesiredState {
        DesiredState::new("10.0.0.1:22", InterfaceType::GigabitEthernet, "0/1")
    }

    #[tokio::test]
    async fn test_create_emits_stages_in_order() {
        let (engine, mut events) = engine(Arc::new(RecordingDriver::default()));
        let record = engine.create(state()).await.unwrap();
        let key = state().identity_key();

        let mut seen = Vec::new();
        while let Ok(event) = events.try_recv() {
            seen.push(event);
        }
        assert_eq!(
            seen,
            vec![
                EngineEvent::Received {
                    operation: Operation::Create,
                    key: key.clone()
                },
                EngineEvent::Rendered {
                    operation: Operation::Create,
                    key: key.clone(),
                    commands: 4
                },
                EngineEvent::Dispatched {
                    operation: Operation::Create,
                    key: key.clone(),
                    completed: true
                },
                EngineEvent::Committed {
                    operation: Operation::Create,
                    key,
                    record_id: record.id()
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_update_keeps_record_id() {
        let driver = Arc::new(RecordingDriver::default());
        let (engine, _events) = engine(driver.clone());

        let created = engine.create(state()).await.unwrap();
        let updated = engine
            .update("10.0.0.1:22", state().with_mtu(9000))
            .await
            .unwrap();

        assert_eq!(updated.id(), created.id());
        assert_eq!(updated.state().mtu, Some(9000));
        assert_eq!(engine.history(&state().identity_key()).await.unwrap().len(), 1);
        assert!(driver.sent.lock().unwrap()[1].contains(&" mtu 9000".to_string()));
    }

    #[tokio::test]
    async fn test_name_must_match_host() {
        let driver = Arc::new(RecordingDriver::default());
        let (engine, mut events) = engine(driver.clone());
        engine.create(state()).await.unwrap();
        while events.try_recv().is_ok() {}

        let result = engine.update("10.0.0.2:22", state()).await;
        assert!(matches!(result, Err(Error::Validation(_))));
        assert_eq!(driver.sent.lock().unwrap().len(), 1);

        // Received, then Failed
        assert!(matches!(events.try_recv(), Ok(EngineEvent::Received { .. })));
        assert!(matches!(events.try_recv(), Ok(EngineEvent::Failed { .. })));
    }

    #[tokio::test]
    async fn test_delete_clears_history() {
        let driver = Arc::new(RecordingDriver::default());
        let (engine, _events) = engine(driver.clone());

        engine.create(state()).await.unwrap();
        engine.create(state().with_description("again")).await.unwrap();

        let message = engine.delete("10.0.0.1:22", state()).await.unwrap();
        assert_eq!(message, "Deleted item with name 10.0.0.1:22");
        assert_eq!(engine.read(&state().identity_key()).await.unwrap(), None);
        assert!(engine.list().await.unwrap().is_empty());

        let sent = driver.sent.lock().unwrap();
        assert_eq!(
            sent.last().unwrap(),
            &vec![
                "configure terminal".to_string(),
                "default interface GigabitEthernet0/1".to_string(),
                "end".to_string()
            ]
        );
    }

    #[tokio::test]
    async fn test_failed_delete_keeps_current_record() {
        let store = Arc::new(FailingRemoveStore {
            inner: MemoryConvergenceStore::new(),
            removals_left: AtomicUsize::new(1),
        });
        let (engine, _events) = ConvergenceEngine::new(
            CommandRenderer::builtin().unwrap(),
            Arc::new(RecordingDriver::default()),
            store.clone(),
            &EngineConfig::default(),
        )
        .unwrap();

        engine.create(state()).await.unwrap();
        let current = engine.create(state().with_description("again")).await.unwrap();

        // The superseded record goes, the removal of the current one fails
        let result = engine.delete("10.0.0.1:22", state()).await;
        assert!(matches!(result, Err(Error::Store(_))));

        let key = state().identity_key();
        assert_eq!(engine.read(&key).await.unwrap(), Some(current.clone()));
        assert_eq!(engine.history(&key).await.unwrap(), vec![current]);
    }

    #[tokio::test]
    async fn test_full_event_channel_drops_events() {
        let config = EngineConfig {
            event_channel_capacity: 1,
            ..EngineConfig::default()
        };
        let (engine, mut events) = ConvergenceEngine::new(
            CommandRenderer::builtin().unwrap(),
            Arc::new(RecordingDriver::default()),
            Arc::new(MemoryConvergenceStore::new()),
            &config,
        )
        .unwrap();

        // Operation still succeeds with a full channel
        engine.create(state()).await.unwrap();
        assert!(matches!(events.try_recv(), Ok(EngineEvent::Received { .. })));
        assert!(events.try_recv().is_err());
    }
}
