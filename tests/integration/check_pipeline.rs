//! Check pipeline against a live HTTP endpoint
//!
//! These tests verify that:
//! - Every check stores a signal
//! - Only status transitions cascade follow-up tasks
//! - Notification tasks are only produced for alarms with a channel

use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use pretty_assertions::assert_eq;
use serde_json::json;
use vigil::signal::Status;
use vigil::storage::SignalStore;
use vigil::tasks::{TaskError, TaskKind, TaskQueue};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{endpoint_alarm, fixture, with_chat};

async fn respond(server: &MockServer, status: u16) {
    server.reset().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(status))
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_transitions_drive_the_cascade() {
    let server = MockServer::start().await;
    respond(&server, 200).await;

    let alarm = with_chat(
        endpoint_alarm("api", &format!("{}/health", server.uri())),
        "http://127.0.0.1:9/hook",
    );
    let fx = fixture(vec![alarm]);

    // first signal of an alarm is always a transition
    let outcome = fx.pipeline.check("api").await.unwrap();
    assert_eq!(outcome.signal.status, Status::Healthy);
    assert!(outcome.transitioned);
    assert_eq!(
        outcome.enqueued,
        vec![TaskKind::DashboardNotify, TaskKind::AlarmNotify]
    );

    // signals are keyed by timestamp, keep them apart
    tokio::time::sleep(Duration::from_millis(5)).await;

    // same status again
    let outcome = fx.pipeline.check("api").await.unwrap();
    assert!(!outcome.transitioned);
    assert!(outcome.enqueued.is_empty());

    respond(&server, 503).await;
    tokio::time::sleep(Duration::from_millis(5)).await;
    let outcome = fx.pipeline.check("api").await.unwrap();
    assert_eq!(outcome.signal.status, Status::Unhealthy);
    assert_eq!(outcome.signal.message, "expected status 200, got 503");
    assert!(outcome.transitioned);

    let stored = fx.store.latest("api", 10).await.unwrap();
    assert_eq!(stored.len(), 3);
    assert_eq!(fx.store.health("api").await.unwrap(), Status::Unhealthy);

    let kinds: Vec<TaskKind> = fx
        .queue
        .drain()
        .await
        .into_iter()
        .map(|delivery| delivery.task.kind)
        .collect();
    assert_eq!(kinds.len(), 4);
    assert_eq!(
        kinds.iter().filter(|kind| **kind == TaskKind::AlarmNotify).count(),
        2
    );
}

#[tokio::test]
async fn test_alarm_without_channels_only_updates_dashboard() {
    let server = MockServer::start().await;
    respond(&server, 200).await;

    let fx = fixture(vec![endpoint_alarm(
        "api",
        &format!("{}/health", server.uri()),
    )]);

    let outcome = fx.pipeline.check("api").await.unwrap();
    assert_eq!(outcome.enqueued, vec![TaskKind::DashboardNotify]);
}

#[tokio::test]
async fn test_unreachable_endpoint_is_unhealthy() {
    let fx = fixture(vec![endpoint_alarm("api", "http://127.0.0.1:9/health")]);

    let outcome = fx.pipeline.check("api").await.unwrap();
    assert_eq!(outcome.signal.status, Status::Unhealthy);
    assert!(outcome.signal.message.starts_with("error checking endpoint"));
}

#[tokio::test]
async fn test_unresolvable_host_is_unhealthy() {
    let fx = fixture(vec![endpoint_alarm("api", "http://vigil-nowhere.invalid/health")]);

    let outcome = fx.pipeline.check("api").await.unwrap();
    assert_eq!(outcome.signal.status, Status::Unhealthy);
    assert_eq!(fx.store.health("api").await.unwrap(), Status::Unhealthy);
}

#[tokio::test]
async fn test_slow_endpoint_is_unhealthy_after_its_timeout() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(5)))
        .mount(&server)
        .await;

    let mut alarm = endpoint_alarm("api", &format!("{}/health", server.uri()));
    alarm.config.insert("timeout".to_string(), json!(1));
    let fx = fixture(vec![alarm]);

    let started = Instant::now();
    let outcome = fx.pipeline.check("api").await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(4));
    assert_eq!(outcome.signal.status, Status::Unhealthy);
    assert_eq!(outcome.signal.message, "check timed out after 1s");
}

#[tokio::test]
async fn test_misconfigured_alarm_records_unknown() {
    let mut alarm = endpoint_alarm("api", "http://127.0.0.1:9/health");
    alarm.config.remove("url");
    let fx = fixture(vec![alarm]);

    let err = fx.pipeline.check("api").await.unwrap_err();
    assert_matches!(err, TaskError::Permanent(_));

    let stored = fx.store.latest("api", 1).await.unwrap();
    assert_eq!(stored[0].status, Status::Unknown);
    assert!(fx.queue.is_empty().await);
}

#[tokio::test]
async fn test_check_task_round_trip_through_queue() {
    let server = MockServer::start().await;
    respond(&server, 200).await;

    let fx = fixture(vec![endpoint_alarm(
        "api",
        &format!("{}/health", server.uri()),
    )]);

    fx.queue
        .enqueue(vigil::tasks::Task::check("api").unwrap())
        .await
        .unwrap();
    let delivery = fx.queue.dequeue().await.unwrap();

    use vigil::tasks::TaskHandler;
    fx.pipeline.handle(&delivery.task).await.unwrap();

    assert_eq!(fx.store.health("api").await.unwrap(), Status::Healthy);
}
