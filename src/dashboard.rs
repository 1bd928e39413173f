//! Dashboard updates
//!
//! A `dashboard:notify` task recomputes the snapshot of every alarm and its
//! latest signal and publishes it on [`DASHBOARD_CHANNEL`]. Live clients
//! subscribe to that channel; how they are served is not this module's
//! concern.

use std::sync::Arc;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::{debug, instrument, trace, warn};

use crate::alarm::{Alarm, AlarmRepository};
use crate::signal::{Signal, Status};
use crate::storage::SignalStore;
use crate::tasks::{SignalPayload, Task, TaskError, TaskHandler, TaskKind, TaskResult};

pub const DASHBOARD_CHANNEL: &str = "dashboard:updates";

/// Pub/sub sink
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` on `channel`, returning how many subscribers received it
    async fn publish(&self, channel: &str, payload: String) -> anyhow::Result<usize>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishedMessage {
    pub channel: String,
    pub payload: String,
}

/// In-process [`Publisher`] over a tokio broadcast channel
#[derive(Debug, Clone)]
pub struct BroadcastPublisher {
    sender: broadcast::Sender<PublishedMessage>,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PublishedMessage> {
        self.sender.subscribe()
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    async fn publish(&self, channel: &str, payload: String) -> anyhow::Result<usize> {
        let message = PublishedMessage {
            channel: channel.to_string(),
            payload,
        };

        // no subscriber is not an error, there is just nobody watching
        Ok(self.sender.send(message).unwrap_or(0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AlarmSnapshot {
    /// Alarm with sensitive config values masked
    pub alarm: Alarm,
    pub health: Status,
    pub latest: Option<Signal>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DashboardSnapshot {
    pub generated_at: DateTime<Utc>,
    pub alarms: Vec<AlarmSnapshot>,
}

pub struct DashboardPublisher {
    alarms: Arc<dyn AlarmRepository>,
    store: Arc<dyn SignalStore>,
    publisher: Arc<dyn Publisher>,
}

impl DashboardPublisher {
    pub fn new(
        alarms: Arc<dyn AlarmRepository>,
        store: Arc<dyn SignalStore>,
        publisher: Arc<dyn Publisher>,
    ) -> Self {
        Self {
            alarms,
            store,
            publisher,
        }
    }

    pub async fn snapshot(&self) -> anyhow::Result<DashboardSnapshot> {
        let mut alarms = Vec::new();

        for alarm in self.alarms.get_alarms().await? {
            let latest = self
                .store
                .latest(&alarm.id, 1)
                .await
                .with_context(|| format!("failed to read latest signal of {}", alarm.id))?
                .into_iter()
                .next();

            let health = self
                .store
                .health(&alarm.id)
                .await
                .with_context(|| format!("failed to read health of {}", alarm.id))?;

            alarms.push(AlarmSnapshot {
                alarm: alarm.masked(),
                health,
                latest,
            });
        }

        Ok(DashboardSnapshot {
            generated_at: Utc::now(),
            alarms,
        })
    }

    #[instrument(skip(self))]
    pub async fn publish(&self) -> anyhow::Result<()> {
        let snapshot = self.snapshot().await?;
        let payload = serde_json::to_string(&snapshot).context("failed to encode snapshot")?;

        let receivers = self.publisher.publish(DASHBOARD_CHANNEL, payload).await?;
        trace!(
            "published snapshot of {} alarms to {receivers} subscribers",
            snapshot.alarms.len()
        );
        Ok(())
    }
}

#[async_trait]
impl TaskHandler for DashboardPublisher {
    async fn handle(&self, task: &Task) -> TaskResult {
        if task.kind != TaskKind::DashboardNotify {
            return Err(TaskError::Permanent(anyhow!(
                "dashboard publisher cannot handle {} tasks",
                task.kind
            )));
        }

        let payload: SignalPayload = task.decode()?;
        debug!("refreshing dashboard after {} signal", payload.alarm_id);

        // fire and forget: the next transition publishes a fresh snapshot anyway
        if let Err(e) = self.publish().await {
            warn!("failed to publish dashboard update: {e:#}");
        }

        Ok(())
    }
}
