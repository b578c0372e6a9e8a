//! Contract Test: Commit Policy and Per-Key Serialization
//!
//! Constraints verified:
//! - RecordIntent commits even when the device push did not complete
//! - RequireSuccess refuses to commit and leaves the store unchanged
//! - Store failures surface to the caller after dispatch
//! - With per-key serialization, operations on one identity never overlap;
//!   without it, they race

mod common;

use common::*;
use netconv_core::config::{CommitPolicy, EngineConfig};
use netconv_core::error::Error;
use netconv_core::{CommandRenderer, ConvergenceEngine, EngineEvent};
use std::sync::Arc;
use std::time::Duration;

fn policy(commit_policy: CommitPolicy) -> EngineConfig {
    EngineConfig {
        commit_policy,
        ..EngineConfig::default()
    }
}

#[tokio::test]
async fn record_intent_commits_despite_rejection() {
    let driver = FakeSessionDriver::new();
    driver.set_behavior("10.0.0.1:22", HostBehavior::RejectAt(2), Duration::ZERO);
    let (engine, mut events) = engine_with(driver, policy(CommitPolicy::RecordIntent));

    let record = engine.create(interface("10.0.0.1:22")).await.unwrap();

    assert_eq!(
        engine.read(&record.key()).await.unwrap(),
        Some(record.clone())
    );
    let events = drain(&mut events);
    assert!(events.contains(&EngineEvent::Dispatched {
        operation: netconv_core::Operation::Create,
        key: record.key(),
        completed: false,
    }));
    assert!(matches!(events.last(), Some(EngineEvent::Committed { .. })));
}

#[tokio::test]
async fn record_intent_commits_when_unreachable() {
    let driver = FakeSessionDriver::new();
    driver.set_behavior("10.0.0.1:22", HostBehavior::Unreachable, Duration::ZERO);
    let (engine, _events) = engine_with(driver, EngineConfig::default());

    assert_eq!(EngineConfig::default().commit_policy, CommitPolicy::RecordIntent);
    assert!(engine.create(interface("10.0.0.1:22")).await.is_ok());
    assert_eq!(engine.list().await.unwrap().len(), 1);
}

#[tokio::test]
async fn require_success_refuses_rejected_push() {
    let driver = FakeSessionDriver::new();
    driver.set_behavior("10.0.0.1:22", HostBehavior::RejectAt(1), Duration::ZERO);
    let (engine, _events) = engine_with(driver, policy(CommitPolicy::RequireSuccess));

    let result = engine.create(interface("10.0.0.1:22")).await;

    match result {
        Err(Error::DeviceRejected { host, command }) => {
            assert_eq!(host, "10.0.0.1:22");
            assert_eq!(command, "interface GigabitEthernet0/1");
        }
        other => panic!("expected DeviceRejected, got {:?}", other.map(|r| r.id())),
    }
    assert!(engine.list().await.unwrap().is_empty());
}

#[tokio::test]
async fn require_success_leaves_record_untouched_on_failed_update() {
    let driver = FakeSessionDriver::new();
    let control = FakeSessionDriver::sharing_counters_with(&driver);
    let (engine, _events) = engine_with(driver, policy(CommitPolicy::RequireSuccess));

    let created = engine.create(interface("10.0.0.1:22")).await.unwrap();

    control.set_behavior("10.0.0.1:22", HostBehavior::Unreachable, Duration::ZERO);
    let result = engine
        .update("10.0.0.1:22", interface("10.0.0.1:22").with_mtu(9000))
        .await;
    match result {
        Err(err @ Error::Session { .. }) => assert_eq!(
            err.to_string(),
            "Session error (10.0.0.1:22): connection refused"
        ),
        other => panic!("expected Session, got {:?}", other.map(|r| r.id())),
    }

    let current = engine.read(&created.key()).await.unwrap().unwrap();
    assert_eq!(current, created);
    assert_eq!(current.state().mtu, None);

    let result = engine.delete("10.0.0.1:22", interface("10.0.0.1:22")).await;
    assert!(matches!(result, Err(Error::Session { .. })));
    assert_eq!(engine.read(&created.key()).await.unwrap(), Some(created));
}

#[tokio::test]
async fn store_failure_surfaces_after_dispatch() {
    let driver = FakeSessionDriver::new();
    let spy = FakeSessionDriver::sharing_counters_with(&driver);
    let (engine, _events) = ConvergenceEngine::new(
        CommandRenderer::builtin().unwrap(),
        Arc::new(driver),
        Arc::new(BrokenStore),
        &EngineConfig::default(),
    )
    .unwrap();

    let result = engine.create(interface("10.0.0.1:22")).await;

    assert!(matches!(result, Err(Error::Store(_))));
    assert_eq!(spy.execute_count(), 1);
}

async fn concurrent_updates(serialize_per_key: bool) -> usize {
    let driver = FakeSessionDriver::new();
    let spy = FakeSessionDriver::sharing_counters_with(&driver);
    let config = EngineConfig {
        serialize_per_key,
        ..EngineConfig::default()
    };
    let (engine, _events) = engine_with(driver, config);
    engine.create(interface("10.0.0.1:22")).await.unwrap();

    spy.set_behavior(
        "10.0.0.1:22",
        HostBehavior::Complete,
        Duration::from_millis(50),
    );
    let (a, b) = tokio::join!(
        engine.update("10.0.0.1:22", interface("10.0.0.1:22").with_mtu(1500)),
        engine.update("10.0.0.1:22", interface("10.0.0.1:22").with_mtu(9000)),
    );
    a.unwrap();
    b.unwrap();

    // Exactly one current record whichever update landed last
    assert_eq!(engine.list().await.unwrap().len(), 1);
    spy.max_in_flight()
}

#[tokio::test]
async fn serialized_updates_never_overlap() {
    assert_eq!(concurrent_updates(true).await, 1);
}

#[tokio::test]
async fn unserialized_updates_race() {
    assert_eq!(concurrent_updates(false).await, 2);
}
