//! End-to-end task flow through the worker pool
//!
//! A single `alarm:check` enqueued by hand must end in a stored signal, a
//! chat webhook call and a dashboard update, with no task dropped.

use std::sync::Arc;
use std::time::Duration;

use vigil::actors::{TaskRouter, WorkerPoolHandle, WorkerSettings};
use vigil::dashboard::{BroadcastPublisher, DASHBOARD_CHANNEL, DashboardPublisher};
use vigil::notification::{Dispatcher, NotificationHandler};
use vigil::signal::Status;
use vigil::storage::SignalStore;
use vigil::tasks::{Task, TaskKind, TaskQueue};
use wiremock::matchers::{body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{Fixture, endpoint_alarm, fixture, wait_until, with_chat};

fn router(fx: &Fixture, publisher: BroadcastPublisher) -> TaskRouter {
    let notifier = Arc::new(NotificationHandler::new(
        fx.alarms.clone(),
        Dispatcher::new(None),
    ));
    let dashboard = Arc::new(DashboardPublisher::new(
        fx.alarms.clone(),
        fx.store.clone(),
        Arc::new(publisher),
    ));

    TaskRouter::new()
        .route(TaskKind::AlarmCheck, fx.pipeline.clone())
        .route(TaskKind::SignalWrite, fx.pipeline.clone())
        .route(TaskKind::CleanSignals, fx.pipeline.clone())
        .route(TaskKind::AlarmNotify, notifier)
        .route(TaskKind::DashboardNotify, dashboard)
}

fn settings() -> WorkerSettings {
    WorkerSettings {
        concurrency: 2,
        retry_backoff: Duration::from_millis(10),
    }
}

#[tokio::test]
async fn test_failing_check_notifies_chat_and_dashboard() {
    let target = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&target)
        .await;

    let chat = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hook"))
        .and(body_string_contains("expected status 200, got 500"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&chat)
        .await;

    let alarm = with_chat(
        endpoint_alarm("api", &format!("{}/health", target.uri())),
        &format!("{}/hook", chat.uri()),
    );
    let fx = fixture(vec![alarm]);

    let publisher = BroadcastPublisher::new(16);
    let mut updates = publisher.subscribe();

    let workers = WorkerPoolHandle::spawn(fx.queue.clone(), router(&fx, publisher), settings());
    fx.queue.enqueue(Task::check("api").unwrap()).await.unwrap();

    let update = tokio::time::timeout(Duration::from_secs(5), updates.recv())
        .await
        .expect("no dashboard update")
        .unwrap();
    assert_eq!(update.channel, DASHBOARD_CHANNEL);
    assert!(update.payload.contains("\"health\":\"unhealthy\""));

    wait_until(Duration::from_secs(5), || async {
        workers.stats().await.unwrap().completed == 3
    })
    .await;

    let stats = workers.stats().await.unwrap();
    assert_eq!(stats.dropped, 0);
    assert_eq!(stats.retried, 0);
    assert_eq!(fx.store.health("api").await.unwrap(), Status::Unhealthy);

    workers.shutdown().await.unwrap();
    chat.verify().await;
}

#[tokio::test]
async fn test_chat_failure_does_not_retry_the_notification() {
    let chat = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&chat)
        .await;

    // nothing listens on port 9, so the check itself fails and transitions
    let alarm = with_chat(
        endpoint_alarm("api", "http://127.0.0.1:9/health"),
        &format!("{}/hook", chat.uri()),
    );
    let fx = fixture(vec![alarm]);

    let workers = WorkerPoolHandle::spawn(
        fx.queue.clone(),
        router(&fx, BroadcastPublisher::new(4)),
        settings(),
    );
    fx.queue.enqueue(Task::check("api").unwrap()).await.unwrap();

    wait_until(Duration::from_secs(5), || async {
        workers.stats().await.unwrap().completed == 3
    })
    .await;

    // give a wrongly scheduled retry the chance to show up
    tokio::time::sleep(Duration::from_millis(100)).await;

    let stats = workers.stats().await.unwrap();
    assert_eq!(stats.completed, 3);
    assert_eq!(stats.retried, 0);

    workers.shutdown().await.unwrap();
    chat.verify().await;
}

#[tokio::test]
async fn test_unroutable_task_is_dropped() {
    let fx = fixture(vec![]);

    let workers = WorkerPoolHandle::spawn(fx.queue.clone(), TaskRouter::new(), settings());
    fx.queue.enqueue(Task::clean_signals()).await.unwrap();

    wait_until(Duration::from_secs(5), || async {
        workers.stats().await.unwrap().dropped == 1
    })
    .await;

    workers.shutdown().await.unwrap();
}
