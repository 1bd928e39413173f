//! Shared fixtures for integration tests

#![allow(dead_code)]

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Value, json};
use vigil::alarm::{Alarm, MemoryAlarmRepository, Notifications};
use vigil::pipeline::CheckPipeline;
use vigil::sentinel::SentinelRegistry;
use vigil::storage::MemorySignalStore;
use vigil::tasks::MemoryQueue;

/// Alarm checked by the endpoint sentinel every minute
pub fn endpoint_alarm(id: &str, url: &str) -> Alarm {
    alarm(id, "endpoint-checker", json!({ "url": url, "timeout": 2 }))
}

pub fn alarm(id: &str, sentinel_type: &str, config: Value) -> Alarm {
    Alarm {
        id: id.to_string(),
        name: format!("{id} alarm"),
        description: String::new(),
        path: vec![],
        sentinel_type: sentinel_type.to_string(),
        config: serde_json::from_value(config).unwrap(),
        cron: None,
        interval: Some("1m".to_string()),
        notifications: Notifications::default(),
    }
}

pub fn with_chat(mut alarm: Alarm, webhook_url: &str) -> Alarm {
    alarm.notifications.chat.webhook_url = Some(webhook_url.to_string());
    alarm
}

/// In-memory wiring of the check pipeline
pub struct Fixture {
    pub alarms: Arc<MemoryAlarmRepository>,
    pub store: Arc<MemorySignalStore>,
    pub queue: Arc<MemoryQueue>,
    pub pipeline: Arc<CheckPipeline>,
}

pub fn fixture(alarms: Vec<Alarm>) -> Fixture {
    let alarms = Arc::new(MemoryAlarmRepository::with_alarms(alarms));
    let store = Arc::new(MemorySignalStore::new());
    let queue = Arc::new(MemoryQueue::new());

    let pipeline = Arc::new(CheckPipeline::new(
        alarms.clone(),
        Arc::new(SentinelRegistry::with_builtins()),
        store.clone(),
        queue.clone(),
        Duration::from_secs(5),
    ));

    Fixture {
        alarms,
        store,
        queue,
        pipeline,
    }
}

/// Poll `condition` until it holds, panicking after `limit`
pub async fn wait_until<F, Fut>(limit: Duration, mut condition: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let result = tokio::time::timeout(limit, async {
        while !condition().await {
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    })
    .await;

    assert!(result.is_ok(), "condition not met within {limit:?}");
}
