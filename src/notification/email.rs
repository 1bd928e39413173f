//! Email channel over an SMTP relay

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use lettre::message::Mailbox;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use crate::alarm::Alarm;
use crate::config::SmtpConfig;
use crate::signal::Signal;

use super::{DEFAULT_SEND_TIMEOUT, Notification, NotificationError};

pub(crate) const CHANNEL: &str = "email";

/// Port on which the relay expects TLS from the first byte
const IMPLICIT_TLS_PORT: u16 = 465;

/// Delivers a finished message
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, message: Message) -> anyhow::Result<()>;

    /// Sender address of every message
    fn sender(&self) -> Mailbox;
}

pub struct SmtpMailer {
    transport: AsyncSmtpTransport<Tokio1Executor>,
    from: Mailbox,
}

impl SmtpMailer {
    pub fn from_config(config: &SmtpConfig) -> anyhow::Result<Self> {
        let builder = if config.port == IMPLICIT_TLS_PORT {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
        }
        .with_context(|| format!("invalid SMTP relay {}", config.host))?
        .port(config.port)
        .timeout(Some(DEFAULT_SEND_TIMEOUT));

        let builder = match (&config.user, &config.password) {
            (Some(user), Some(password)) => {
                builder.credentials(Credentials::new(user.clone(), password.clone()))
            }
            _ => builder,
        };

        let from = config
            .from
            .parse()
            .with_context(|| format!("invalid sender address {}", config.from))?;

        Ok(Self {
            transport: builder.build(),
            from,
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, message: Message) -> anyhow::Result<()> {
        let response = self.transport.send(message).await?;
        debug!("smtp relay answered {:?}", response.code());
        Ok(())
    }

    fn sender(&self) -> Mailbox {
        self.from.clone()
    }
}

/// Subject `{name} is {status}`, body is the signal message
pub struct EmailNotification {
    mailer: Arc<dyn Mailer>,
    message: Option<Message>,
}

impl EmailNotification {
    pub fn new(mailer: Arc<dyn Mailer>) -> Self {
        Self {
            mailer,
            message: None,
        }
    }
}

pub fn subject(alarm: &Alarm, signal: &Signal) -> String {
    format!("{} is {}", alarm.name, signal.status)
}

#[async_trait]
impl Notification for EmailNotification {
    fn channel(&self) -> &'static str {
        CHANNEL
    }

    fn build(&mut self, alarm: &Alarm, signal: &Signal) -> Result<(), NotificationError> {
        let build_error = |reason: String| NotificationError::Build {
            channel: CHANNEL,
            reason,
        };

        let mut builder = Message::builder()
            .from(self.mailer.sender())
            .subject(subject(alarm, signal))
            .header(ContentType::TEXT_PLAIN);

        for recipient in &alarm.notifications.email.to {
            let mailbox: Mailbox = recipient
                .parse()
                .map_err(|e| build_error(format!("invalid recipient {recipient}: {e}")))?;
            builder = builder.to(mailbox);
        }

        let message = builder
            .body(signal.message.clone())
            .map_err(|e| build_error(e.to_string()))?;

        self.message = Some(message);
        Ok(())
    }

    async fn send(&self) -> Result<(), NotificationError> {
        let message = self
            .message
            .clone()
            .ok_or(NotificationError::NotBuilt { channel: CHANNEL })?;

        self.mailer
            .send(message)
            .await
            .map_err(|e| NotificationError::Send {
                channel: CHANNEL,
                reason: format!("{e:#}"),
            })
    }
}
