//! Integration tests for signal persistence
//!
//! These tests verify that:
//! - Signals written through the pipeline survive a reopen of the database
//! - Transition detection works off the persisted history
//! - Retention cleanup removes old signals only

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use pretty_assertions::assert_eq;
use tempfile::tempdir;
use vigil::alarm::MemoryAlarmRepository;
use vigil::pipeline::CheckPipeline;
use vigil::sentinel::SentinelRegistry;
use vigil::signal::{Signal, Status};
use vigil::storage::SignalStore;
use vigil::storage::sqlite::SqliteSignalStore;
use vigil::tasks::{MemoryQueue, TaskKind};

use crate::helpers::endpoint_alarm;

#[tokio::test]
async fn test_signals_survive_reopen() {
    let temp_dir = tempdir().unwrap();
    let db_path = temp_dir.path().join("signals.db");

    let store = Arc::new(SqliteSignalStore::new(&db_path).await.unwrap());
    let pipeline = CheckPipeline::new(
        Arc::new(MemoryAlarmRepository::with_alarms(vec![endpoint_alarm(
            "api",
            "http://127.0.0.1:9",
        )])),
        Arc::new(SentinelRegistry::with_builtins()),
        store.clone(),
        Arc::new(MemoryQueue::new()),
        Duration::from_secs(5),
    );

    let base = Utc::now() - chrono::Duration::minutes(5);
    let first = pipeline
        .write(Signal::healthy("api", "ok").at(base))
        .await
        .unwrap();
    assert!(first.transitioned);

    let second = pipeline
        .write(Signal::unhealthy("api", "down").at(base + chrono::Duration::seconds(60)))
        .await
        .unwrap();
    assert!(second.transitioned);
    assert_eq!(second.enqueued, vec![TaskKind::DashboardNotify]);

    store.close().await.unwrap();
    drop(pipeline);

    let reopened = SqliteSignalStore::new(&db_path).await.unwrap();
    let latest = reopened.latest("api", 10).await.unwrap();
    assert_eq!(latest.len(), 2);
    assert_eq!(latest[0].message, "down");
    assert_eq!(reopened.health("api").await.unwrap(), Status::Unhealthy);
}

#[tokio::test]
async fn test_retention_cleanup() {
    let temp_dir = tempdir().unwrap();
    let store = SqliteSignalStore::with_retention_days(temp_dir.path().join("signals.db"), 14)
        .await
        .unwrap();

    let old = Signal::healthy("api", "old").at(Utc::now() - chrono::Duration::days(20));
    let fresh = Signal::healthy("api", "fresh");
    store.save(&old).await.unwrap();
    store.save(&fresh).await.unwrap();

    assert_eq!(store.clean_old().await.unwrap(), 1);

    let latest = store.latest("api", 10).await.unwrap();
    assert_eq!(latest.len(), 1);
    assert_eq!(latest[0].message, "fresh");
}
