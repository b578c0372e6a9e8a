//! Test doubles and common utilities for contract tests
//!
//! The doubles stand in for real devices: they never open a network
//! connection, but they count and record every call so tests can assert on
//! what the engine attempted.

#![allow(dead_code)]

use async_trait::async_trait;
use netconv_core::config::EngineConfig;
use netconv_core::error::{Error, Result};
use netconv_core::model::{Credentials, DesiredState, InterfaceType};
use netconv_core::session::{PlaybackOptions, SessionOutcome, SessionStatus, run_commands};
use netconv_core::traits::{ConvergenceStore, SessionDriver, ShellChannel};
use netconv_core::{CommandRenderer, ConvergenceEngine, EngineEvent, MemoryConvergenceStore};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// How a fake device behaves
#[derive(Debug, Clone)]
pub enum HostBehavior {
    /// Answer every command with a prompt
    Complete,
    /// Answer command `index` with a syntax error
    RejectAt(usize),
    /// Refuse the connection
    Unreachable,
}

/// A SessionDriver double with per-host behavior and delay
pub struct FakeSessionDriver {
    behaviors: Arc<Mutex<HashMap<String, (HostBehavior, Duration)>>>,
    execute_count: Arc<AtomicUsize>,
    calls: Arc<Mutex<Vec<(String, Vec<String>)>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl FakeSessionDriver {
    pub fn new() -> Self {
        Self {
            behaviors: Arc::new(Mutex::new(HashMap::new())),
            execute_count: Arc::new(AtomicUsize::new(0)),
            calls: Arc::new(Mutex::new(Vec::new())),
            in_flight: Arc::new(AtomicUsize::new(0)),
            max_in_flight: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Create a driver that shares behaviors and counters with an existing one
    pub fn sharing_counters_with(other: &Self) -> Self {
        Self {
            behaviors: Arc::clone(&other.behaviors),
            execute_count: Arc::clone(&other.execute_count),
            calls: Arc::clone(&other.calls),
            in_flight: Arc::clone(&other.in_flight),
            max_in_flight: Arc::clone(&other.max_in_flight),
        }
    }

    /// Set how `host` behaves; unknown hosts complete immediately
    pub fn set_behavior(&self, host: &str, behavior: HostBehavior, delay: Duration) {
        self.behaviors
            .lock()
            .unwrap()
            .insert(host.to_string(), (behavior, delay));
    }

    pub fn execute_count(&self) -> usize {
        self.execute_count.load(Ordering::SeqCst)
    }

    /// Every (host, commands) pair received, in call order
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }

    /// Highest number of sessions that were open at the same time
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionDriver for FakeSessionDriver {
    async fn execute(
        &self,
        host: &str,
        _credentials: &Credentials,
        commands: &[String],
    ) -> Result<SessionOutcome> {
        self.execute_count.fetch_add(1, Ordering::SeqCst);
        self.calls
            .lock()
            .unwrap()
            .push((host.to_string(), commands.to_vec()));

        let (behavior, delay) = self
            .behaviors
            .lock()
            .unwrap()
            .get(host)
            .cloned()
            .unwrap_or((HostBehavior::Complete, Duration::ZERO));

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match behavior {
            HostBehavior::Complete => Ok(SessionOutcome {
                transcript: format!("{}#", host),
                status: SessionStatus::Completed,
                commands_sent: commands.len(),
                pager_advances: 0,
            }),
            HostBehavior::RejectAt(index) => {
                let index = index.min(commands.len().saturating_sub(1));
                Ok(SessionOutcome {
                    transcript: "% syntax error".to_string(),
                    status: SessionStatus::Rejected {
                        command_index: index,
                        command: commands.get(index).cloned().unwrap_or_default(),
                    },
                    commands_sent: index + 1,
                    pager_advances: 0,
                })
            }
            HostBehavior::Unreachable => Err(Error::session(host, "connection refused")),
        }
    }

    fn driver_name(&self) -> &'static str {
        "fake"
    }
}

/// Shell that replays canned output chunks and records every write
pub struct ScriptedShell {
    chunks: VecDeque<String>,
    writes: Arc<Mutex<Vec<String>>>,
}

#[async_trait]
impl ShellChannel for ScriptedShell {
    async fn send(&mut self, data: &[u8]) -> Result<()> {
        self.writes
            .lock()
            .unwrap()
            .push(String::from_utf8_lossy(data).into_owned());
        Ok(())
    }

    async fn receive(&mut self) -> Result<Vec<u8>> {
        self.chunks
            .pop_front()
            .map(String::into_bytes)
            .ok_or_else(|| Error::session("scripted", "connection reset"))
    }
}

/// A SessionDriver that plays the real protocol loop over a scripted shell
///
/// Every host sees the same canned output.
pub struct ScriptedShellDriver {
    chunks: Vec<String>,
    options: PlaybackOptions,
    writes: Arc<Mutex<Vec<String>>>,
}

impl ScriptedShellDriver {
    pub fn new(chunks: &[&str]) -> Self {
        Self {
            chunks: chunks.iter().map(|c| c.to_string()).collect(),
            options: PlaybackOptions {
                read_delay: Duration::ZERO,
                ..PlaybackOptions::default()
            },
            writes: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Everything written to any shell
    pub fn writes(&self) -> Vec<String> {
        self.writes.lock().unwrap().clone()
    }

    pub fn pager_writes(&self) -> usize {
        self.writes().iter().filter(|w| w.as_str() == " ").count()
    }
}

#[async_trait]
impl SessionDriver for ScriptedShellDriver {
    async fn execute(
        &self,
        _host: &str,
        _credentials: &Credentials,
        commands: &[String],
    ) -> Result<SessionOutcome> {
        let mut shell = ScriptedShell {
            chunks: self.chunks.iter().cloned().collect(),
            writes: Arc::clone(&self.writes),
        };
        Ok(run_commands(&mut shell, commands, &self.options).await)
    }

    fn driver_name(&self) -> &'static str {
        "scripted"
    }
}

/// A store whose writes always fail
pub struct BrokenStore;

#[async_trait]
impl ConvergenceStore for BrokenStore {
    async fn find_current(
        &self,
        _key: &netconv_core::IdentityKey,
    ) -> Result<Option<netconv_core::ConvergenceRecord>> {
        Ok(None)
    }

    async fn latest_for_host(&self, _host: &str) -> Result<Option<netconv_core::ConvergenceRecord>> {
        Ok(None)
    }

    async fn get(
        &self,
        _id: &netconv_core::RecordId,
    ) -> Result<Option<netconv_core::ConvergenceRecord>> {
        Ok(None)
    }

    async fn history(
        &self,
        _key: &netconv_core::IdentityKey,
    ) -> Result<Vec<netconv_core::ConvergenceRecord>> {
        Ok(Vec::new())
    }

    async fn list_current(&self) -> Result<Vec<netconv_core::ConvergenceRecord>> {
        Ok(Vec::new())
    }

    async fn append(&self, _state: DesiredState) -> Result<netconv_core::ConvergenceRecord> {
        Err(Error::store("disk full"))
    }

    async fn replace(
        &self,
        _id: &netconv_core::RecordId,
        _state: DesiredState,
    ) -> Result<netconv_core::ConvergenceRecord> {
        Err(Error::store("disk full"))
    }

    async fn remove(&self, _id: &netconv_core::RecordId) -> Result<bool> {
        Err(Error::store("disk full"))
    }

    async fn flush(&self) -> Result<()> {
        Ok(())
    }
}

/// Engine over a memory store with the given driver and config
pub fn engine_with(
    driver: FakeSessionDriver,
    config: EngineConfig,
) -> (ConvergenceEngine, mpsc::Receiver<EngineEvent>) {
    ConvergenceEngine::new(
        CommandRenderer::builtin().expect("built-in templates parse"),
        Arc::new(driver),
        Arc::new(MemoryConvergenceStore::new()),
        &config,
    )
    .expect("engine construction succeeds")
}

/// Minimal desired state for `host` GigabitEthernet0/1
pub fn interface(host: &str) -> DesiredState {
    DesiredState::new(host, InterfaceType::GigabitEthernet, "0/1")
}

/// Drain every event currently queued
pub fn drain(events: &mut mpsc::Receiver<EngineEvent>) -> Vec<EngineEvent> {
    let mut out = Vec::new();
    while let Ok(event) = events.try_recv() {
        out.push(event);
    }
    out
}
