//! Scheduler actor driving real cron triggers

use std::sync::Arc;
use std::time::Duration;

use vigil::actors::{SchedulerHandle, SchedulerSettings};
use vigil::alarm::{AlarmRepository, Trigger};
use vigil::tasks::{CheckPayload, CronTriggers, PeriodicTriggers, TaskKind, TaskQueue};

use crate::helpers::{endpoint_alarm, fixture};

fn every_second(id: &str) -> vigil::alarm::Alarm {
    let mut alarm = endpoint_alarm(id, "http://127.0.0.1:9/health");
    alarm.interval = Some("1s".to_string());
    alarm
}

#[tokio::test]
async fn test_interval_alarm_enqueues_checks() {
    let fx = fixture(vec![every_second("api")]);
    let triggers = Arc::new(CronTriggers::start(fx.queue.clone()).await.unwrap());

    let scheduler = SchedulerHandle::spawn(
        fx.alarms.clone(),
        triggers.clone(),
        SchedulerSettings {
            sync_interval: Duration::from_secs(3600),
            cleanup: Trigger::Every(Duration::from_secs(3600)),
        },
    );
    let report = scheduler.sync_now().await.unwrap();
    assert_eq!(report.skipped, 0);
    assert_eq!(scheduler.scheduled().await.unwrap(), vec!["api"]);

    let delivery = tokio::time::timeout(Duration::from_secs(5), fx.queue.dequeue())
        .await
        .expect("trigger never fired")
        .unwrap();
    assert_eq!(delivery.task.kind, TaskKind::AlarmCheck);
    let payload: CheckPayload = delivery.task.decode().unwrap();
    assert_eq!(payload.alarm_id, "api");

    scheduler.shutdown().await.unwrap();
    triggers.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_deleted_alarm_stops_firing() {
    let fx = fixture(vec![every_second("api")]);
    let triggers = Arc::new(CronTriggers::start(fx.queue.clone()).await.unwrap());

    let scheduler = SchedulerHandle::spawn(
        fx.alarms.clone(),
        triggers.clone(),
        SchedulerSettings {
            sync_interval: Duration::from_secs(3600),
            cleanup: Trigger::Every(Duration::from_secs(3600)),
        },
    );
    scheduler.sync_now().await.unwrap();

    fx.alarms.delete_alarm("api").await.unwrap();
    let report = scheduler.sync_now().await.unwrap();
    assert_eq!(report.removed, 1);
    assert!(scheduler.scheduled().await.unwrap().is_empty());

    // anything fired before the removal is discarded
    tokio::time::sleep(Duration::from_millis(1200)).await;
    fx.queue.drain().await;

    tokio::time::sleep(Duration::from_millis(1500)).await;
    assert!(fx.queue.is_empty().await);

    scheduler.shutdown().await.unwrap();
    triggers.shutdown().await.unwrap();
}
