//! Concurrent multi-host dispatcher
//!
//! Fans one command sequence out to every target host, one session per host,
//! and fans the outcomes back in.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌────────────┐
//!                 │ Dispatcher │
//!                 └────────────┘
//!                       │ spawn one task per distinct host (JoinSet)
//!        ┌──────────────┼──────────────┐
//!        ▼              ▼              ▼
//!  ┌───────────┐  ┌───────────┐  ┌───────────┐
//!  │ session A │  │ session B │  │ session C │
//!  └───────────┘  └───────────┘  └───────────┘
//!        │              │              │
//!        └──── mpsc (capacity = host count) ────┐
//!                                               ▼
//!                                     join barrier, then
//!                                     DispatchResult + audit log
//! ```
//!
//! One host's failure never cancels another host. There is no retry.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::error::Error;
use crate::model::Credentials;
use crate::session::SessionOutcome;
use crate::traits::SessionDriver;

/// Tracing target for device transcripts
pub const AUDIT_TARGET: &str = "netconv::audit";

/// Per-host outcomes of one dispatch, exactly one entry per distinct host
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchResult {
    outcomes: BTreeMap<String, SessionOutcome>,
}

impl DispatchResult {
    pub fn get(&self, host: &str) -> Option<&SessionOutcome> {
        self.outcomes.get(host)
    }

    /// Transcript captured for `host`
    pub fn transcript(&self, host: &str) -> Option<&str> {
        self.outcomes.get(host).map(|o| o.transcript.as_str())
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Hosts in key order
    pub fn hosts(&self) -> impl Iterator<Item = &str> {
        self.outcomes.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &SessionOutcome)> {
        self.outcomes.iter().map(|(host, outcome)| (host.as_str(), outcome))
    }

    /// True if every host completed its whole command sequence
    pub fn all_completed(&self) -> bool {
        self.outcomes.values().all(SessionOutcome::is_completed)
    }

    /// Hosts that did not complete
    pub fn failed_hosts(&self) -> Vec<&str> {
        self.iter()
            .filter(|(_, outcome)| !outcome.is_completed())
            .map(|(host, _)| host)
            .collect()
    }

    /// Error for the first host (in key order) that did not complete
    pub fn first_error(&self) -> Option<Error> {
        self.iter().find_map(|(host, outcome)| outcome.to_error(host))
    }
}

/// Runs command sequences against many hosts concurrently
#[derive(Clone)]
pub struct Dispatcher {
    driver: Arc<dyn SessionDriver>,
}

impl Dispatcher {
    pub fn new(driver: Arc<dyn SessionDriver>) -> Self {
        Self { driver }
    }

    pub fn driver_name(&self) -> &'static str {
        self.driver.driver_name()
    }

    /// Play `commands` against every host in `hosts`
    ///
    /// Duplicate hosts are contacted once. Blocks until every launched session
    /// has reported; a driver error or a panicked session task is recorded as
    /// a `Failed` outcome for that host.
    pub async fn dispatch(
        &self,
        hosts: &[String],
        commands: &[String],
        credentials: &Credentials,
    ) -> DispatchResult {
        let targets = distinct_hosts(hosts);
        if targets.is_empty() {
            return DispatchResult::default();
        }

        debug!(
            "Dispatching {} command(s) to {} host(s) via {}",
            commands.len(),
            targets.len(),
            self.driver.driver_name()
        );

        let (tx, mut rx) = mpsc::channel(targets.len());
        let commands: Arc<[String]> = Arc::from(commands);
        let mut sessions = JoinSet::new();

        for host in &targets {
            let tx = tx.clone();
            let driver = Arc::clone(&self.driver);
            let commands = Arc::clone(&commands);
            let credentials = credentials.clone();
            let host = host.clone();

            sessions.spawn(async move {
                let outcome = match driver.execute(&host, &credentials, &commands).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        warn!("Session to {} failed: {}", host, e);
                        SessionOutcome::failed(failure_reason(e))
                    }
                };
                // Capacity equals the host count, so this never waits
                let _ = tx.send((host, outcome)).await;
            });
        }
        drop(tx);

        while let Some(joined) = sessions.join_next().await {
            if let Err(e) = joined {
                warn!("Session task did not finish: {}", e);
            }
        }

        let mut outcomes = BTreeMap::new();
        while let Some((host, outcome)) = rx.recv().await {
            outcomes.insert(host, outcome);
        }
        for host in targets {
            outcomes
                .entry(host)
                .or_insert_with(|| SessionOutcome::failed("session task panicked"));
        }

        let result = DispatchResult { outcomes };
        audit(&result);
        result
    }
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("driver", &self.driver.driver_name())
            .finish()
    }
}

/// Reason recorded for a driver error; `to_error` adds the host back
fn failure_reason(err: Error) -> String {
    match err {
        Error::Session { message, .. } => message,
        other => other.to_string(),
    }
}

/// Hosts in first-occurrence order, duplicates dropped
fn distinct_hosts(hosts: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    hosts
        .iter()
        .filter(|host| seen.insert(host.as_str()))
        .cloned()
        .collect()
}

fn audit(result: &DispatchResult) {
    for (host, outcome) in result.iter() {
        info!(
            target: AUDIT_TARGET,
            host = %host,
            status = ?outcome.status,
            commands_sent = outcome.commands_sent,
            pager_advances = outcome.pager_advances,
            "{}",
            outcome.transcript
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::SessionStatus;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Driver that fails hosts containing "down" and panics on "panic"
    #[derive(Default)]
    struct EchoDriver {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SessionDriver for EchoDriver {
        async fn execute(
            &self,
            host: &str,
            _credentials: &Credentials,
            commands: &[String],
        ) -> Result<SessionOutcome, Error> {
            self.calls.lock().unwrap().push(host.to_string());
            if host.contains("panic") {
                panic!("driver bug");
            }
            if host.contains("down") {
                return Err(Error::session(host, "connection refused"));
            }
            Ok(SessionOutcome {
                transcript: format!("{}> {}", host, commands.join(";")),
                status: SessionStatus::Completed,
                commands_sent: commands.len(),
                pager_advances: 0,
            })
        }

        fn driver_name(&self) -> &'static str {
            "echo"
        }
    }

    fn hosts(list: &[&str]) -> Vec<String> {
        list.iter().map(|h| h.to_string()).collect()
    }

    #[tokio::test]
    async fn test_one_entry_per_host_with_failures() {
        let dispatcher = Dispatcher::new(Arc::new(EchoDriver::default()));
        let result = dispatcher
            .dispatch(
                &hosts(&["a:22", "down:22", "b:22"]),
                &["end".to_string()],
                &Credentials::default(),
            )
            .await;

        assert_eq!(result.len(), 3);
        assert_eq!(result.transcript("a:22"), Some("a:22> end"));
        assert!(!result.all_completed());
        assert_eq!(result.failed_hosts(), vec!["down:22"]);
        assert_eq!(
            result.first_error().unwrap().to_string(),
            "Session error (down:22): connection refused"
        );
    }

    #[test]
    fn test_failure_reason_keeps_other_errors_whole() {
        assert_eq!(
            failure_reason(Error::session("a:22", "auth failed")),
            "auth failed"
        );
        assert_eq!(
            failure_reason(Error::config("no key")),
            "Configuration error: no key"
        );
    }

    #[tokio::test]
    async fn test_duplicate_hosts_contacted_once() {
        let driver = Arc::new(EchoDriver::default());
        let dispatcher = Dispatcher::new(driver.clone());
        let result = dispatcher
            .dispatch(&hosts(&["a:22", "a:22", "b:22"]), &[], &Credentials::default())
            .await;

        assert_eq!(result.len(), 2);
        assert_eq!(driver.calls.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_panicked_session_still_reported() {
        let dispatcher = Dispatcher::new(Arc::new(EchoDriver::default()));
        let result = dispatcher
            .dispatch(&hosts(&["panic:22", "ok:22"]), &[], &Credentials::default())
            .await;

        assert_eq!(result.len(), 2);
        assert!(matches!(
            result.get("panic:22").unwrap().status,
            SessionStatus::Failed { .. }
        ));
        assert!(result.get("ok:22").unwrap().is_completed());
    }

    #[tokio::test]
    async fn test_no_hosts() {
        let dispatcher = Dispatcher::new(Arc::new(EchoDriver::default()));
        let result = dispatcher.dispatch(&[], &[], &Credentials::default()).await;
        assert!(result.is_empty());
        assert!(result.all_completed());
    }
}
