//! Notification fan-out
//!
//! An `alarm:notify` task turns into one [`Notification`] per enabled
//! channel. Channels are built and sent concurrently; every failure is
//! collected and none of them stops the other channels.
//!
//! Every send is bounded by the dispatcher's send timeout; a channel that
//! does not answer in time counts as a failed send.

pub mod chat;
pub mod email;

use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use futures::future::join_all;
use tracing::{error, info, instrument};

use crate::alarm::{Alarm, AlarmRepository};
use crate::signal::Signal;
use crate::tasks::{SignalPayload, Task, TaskError, TaskHandler, TaskKind, TaskResult};

pub use chat::ChatNotification;
pub use email::{EmailNotification, Mailer, SmtpMailer};

/// Upper bound for delivering one notification
pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NotificationError {
    #[error("{channel}: failed to build message: {reason}")]
    Build { channel: &'static str, reason: String },

    #[error("{channel}: failed to send message: {reason}")]
    Send { channel: &'static str, reason: String },

    #[error("{channel}: message was sent before it was built")]
    NotBuilt { channel: &'static str },

    #[error("{channel}: channel is not configured on this hub")]
    Unavailable { channel: &'static str },
}

/// One message on one channel
#[async_trait]
pub trait Notification: Send + Sync {
    fn channel(&self) -> &'static str;

    /// Render the message for `signal`
    fn build(&mut self, alarm: &Alarm, signal: &Signal) -> Result<(), NotificationError>;

    /// Deliver the built message
    async fn send(&self) -> Result<(), NotificationError>;
}

/// Builds the enabled channels of an alarm and sends them concurrently
#[derive(Clone)]
pub struct Dispatcher {
    mailer: Option<Arc<dyn Mailer>>,
    http: reqwest::Client,
    send_timeout: Duration,
}

impl Dispatcher {
    pub fn new(mailer: Option<Arc<dyn Mailer>>) -> Self {
        Self::with_client(mailer, reqwest::Client::new())
    }

    pub fn with_client(mailer: Option<Arc<dyn Mailer>>, http: reqwest::Client) -> Self {
        Self {
            mailer,
            http,
            send_timeout: DEFAULT_SEND_TIMEOUT,
        }
    }

    pub fn with_send_timeout(mut self, send_timeout: Duration) -> Self {
        self.send_timeout = send_timeout;
        self
    }

    /// One notification per channel with a destination
    fn notifications(
        &self,
        alarm: &Alarm,
    ) -> Vec<Result<Box<dyn Notification>, NotificationError>> {
        let mut notifications: Vec<Result<Box<dyn Notification>, NotificationError>> = Vec::new();

        if alarm.notifications.email_enabled() {
            notifications.push(match &self.mailer {
                Some(mailer) => Ok(Box::new(EmailNotification::new(mailer.clone()))),
                None => Err(NotificationError::Unavailable {
                    channel: email::CHANNEL,
                }),
            });
        }

        if alarm.notifications.chat_enabled() {
            notifications.push(Ok(Box::new(ChatNotification::new(self.http.clone()))));
        }

        notifications
    }

    /// Send every enabled channel and return the errors of those that failed
    #[instrument(skip(self, alarm, signal), fields(alarm_id = %alarm.id))]
    pub async fn dispatch(&self, alarm: &Alarm, signal: &Signal) -> Vec<NotificationError> {
        let send_timeout = self.send_timeout;
        let deliveries = self.notifications(alarm).into_iter().map(|notification| async move {
            let mut notification = notification?;
            notification.build(alarm, signal)?;
            tokio::time::timeout(send_timeout, notification.send())
                .await
                .map_err(|_| NotificationError::Send {
                    channel: notification.channel(),
                    reason: format!("no answer within {send_timeout:?}"),
                })??;
            Ok::<_, NotificationError>(notification.channel())
        });

        let mut errors = Vec::new();
        for result in join_all(deliveries).await {
            match result {
                Ok(channel) => info!("sent {channel} notification for {}", alarm.id),
                Err(e) => errors.push(e),
            }
        }
        errors
    }
}

/// Handles `alarm:notify` tasks
pub struct NotificationHandler {
    alarms: Arc<dyn AlarmRepository>,
    dispatcher: Dispatcher,
}

impl NotificationHandler {
    pub fn new(alarms: Arc<dyn AlarmRepository>, dispatcher: Dispatcher) -> Self {
        Self { alarms, dispatcher }
    }
}

#[async_trait]
impl TaskHandler for NotificationHandler {
    async fn handle(&self, task: &Task) -> TaskResult {
        if task.kind != TaskKind::AlarmNotify {
            return Err(TaskError::Permanent(anyhow!(
                "notification handler cannot handle {} tasks",
                task.kind
            )));
        }

        let payload: SignalPayload = task.decode()?;
        let alarm = self
            .alarms
            .get_alarm(&payload.alarm_id)
            .await
            .map_err(TaskError::Transient)?
            .ok_or_else(|| TaskError::Permanent(anyhow!("alarm {} not found", payload.alarm_id)))?;

        // partial delivery is not retried; a broken channel needs an operator
        for e in self.dispatcher.dispatch(&alarm, &payload.signal).await {
            error!("notification for {} failed: {e}", alarm.id);
        }

        Ok(())
    }
}
