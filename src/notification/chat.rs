//! Chat webhook channel (Slack-compatible incoming webhooks)

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::trace;

use crate::alarm::Alarm;
use crate::signal::Signal;

use super::{Notification, NotificationError};

pub(crate) const CHANNEL: &str = "chat";

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatMessage {
    pub text: String,
}

impl ChatMessage {
    pub fn new(alarm: &Alarm, signal: &Signal) -> Self {
        Self {
            text: format!(
                "*Alert:* {} (*{}*)\n*Signal:* {}",
                alarm.name, signal.status, signal.message
            ),
        }
    }
}

pub struct ChatNotification {
    client: Client,
    webhook_url: Option<String>,
    message: Option<ChatMessage>,
}

impl ChatNotification {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            webhook_url: None,
            message: None,
        }
    }
}

#[async_trait]
impl Notification for ChatNotification {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn build(&mut self, alarm: &Alarm, signal: &Signal) -> Result<(), NotificationError> {
        let url = alarm
            .notifications
            .chat
            .webhook_url
            .clone()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| NotificationError::Build {
                channel: CHANNEL,
                reason: "no webhook url configured".to_string(),
            })?;

        self.webhook_url = Some(url);
        self.message = Some(ChatMessage::new(alarm, signal));
        Ok(())
    }

    async fn send(&self) -> Result<(), NotificationError> {
        let (Some(url), Some(message)) = (&self.webhook_url, &self.message) else {
            return Err(NotificationError::NotBuilt { channel: CHANNEL });
        };

        let send_error = |reason: String| NotificationError::Send {
            channel: CHANNEL,
            reason,
        };

        let response = self
            .client
            .post(url)
            .json(message)
            .send()
            .await
            .map_err(|e| send_error(e.to_string()))?;

        let status = response.status();
        trace!("chat webhook answered {status}");

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(send_error(format!("webhook returned {status}: {body}")));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alarm::Notifications;

    #[test]
    fn test_message_text() {
        let alarm = Alarm {
            id: "queue".to_string(),
            name: "Jobs queue".to_string(),
            description: String::new(),
            path: vec![],
            sentinel_type: "sqs-count-checker".to_string(),
            config: Default::default(),
            cron: None,
            interval: Some("5m".to_string()),
            notifications: Notifications::default(),
        };
        let signal = Signal::unhealthy("queue", "queue has 12 messages");

        assert_eq!(
            ChatMessage::new(&alarm, &signal).text,
            "*Alert:* Jobs queue (*unhealthy*)\n*Signal:* queue has 12 messages"
        );
    }
}
