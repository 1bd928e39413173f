//! Message queue depth checker
//!
//! Compares the approximate number of messages waiting in a queue against a
//! threshold. The queue API is reached through [`QueueDepthClient`]; the
//! production client talks to SQS.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, trace};

use crate::alarm::ConfigMap;
use crate::signal::Signal;

use super::config::{required_int, required_str};
use super::{CheckContext, Sentinel, SentinelError};

/// Reads the approximate depth of a queue
#[async_trait]
pub trait QueueDepthClient: Send + Sync {
    async fn approximate_depth(&self, queue_url: &str) -> anyhow::Result<i64>;
}

/// Builds a client for a region; called once per check
pub type ClientFactory = Arc<dyn Fn(&str) -> Arc<dyn QueueDepthClient> + Send + Sync>;

#[cfg(feature = "sqs-checker")]
pub use sqs::SqsDepthClient;

#[cfg(feature = "sqs-checker")]
mod sqs {
    use anyhow::{Context, anyhow};
    use async_trait::async_trait;
    use aws_config::{BehaviorVersion, Region};
    use aws_sdk_sqs::error::DisplayErrorContext;
    use aws_sdk_sqs::types::QueueAttributeName;

    use super::QueueDepthClient;

    /// SQS client resolving credentials from the default provider chain
    pub struct SqsDepthClient {
        region: String,
    }

    impl SqsDepthClient {
        pub fn new(region: impl Into<String>) -> Self {
            Self {
                region: region.into(),
            }
        }
    }

    #[async_trait]
    impl QueueDepthClient for SqsDepthClient {
        async fn approximate_depth(&self, queue_url: &str) -> anyhow::Result<i64> {
            let config = aws_config::defaults(BehaviorVersion::latest())
                .region(Region::new(self.region.clone()))
                .load()
                .await;
            let client = aws_sdk_sqs::Client::new(&config);

            let output = client
                .get_queue_attributes()
                .queue_url(queue_url)
                .attribute_names(QueueAttributeName::ApproximateNumberOfMessages)
                .send()
                .await
                .map_err(|e| anyhow!("{}", DisplayErrorContext(&e)))?;

            let raw = output
                .attributes()
                .and_then(|attributes| {
                    attributes.get(&QueueAttributeName::ApproximateNumberOfMessages)
                })
                .ok_or_else(|| anyhow!("queue attributes did not include the message count"))?;

            raw.trim()
                .parse::<i64>()
                .with_context(|| format!("invalid message count '{raw}'"))
        }
    }
}

fn default_factory() -> Option<ClientFactory> {
    #[cfg(feature = "sqs-checker")]
    {
        Some(Arc::new(|region: &str| -> Arc<dyn QueueDepthClient> {
            Arc::new(SqsDepthClient::new(region))
        }))
    }

    #[cfg(not(feature = "sqs-checker"))]
    {
        None
    }
}

#[derive(Debug, Clone)]
struct QueueSettings {
    queue_url: String,
    max_message_count: i64,
    region: String,
}

pub struct QueueDepthChecker {
    factory: Option<ClientFactory>,
    settings: Option<QueueSettings>,
}

impl QueueDepthChecker {
    pub fn new() -> Self {
        Self {
            factory: default_factory(),
            settings: None,
        }
    }

    /// Use the same client for every region
    pub fn with_client(client: Arc<dyn QueueDepthClient>) -> Self {
        Self {
            factory: Some(Arc::new(move |_region: &str| client.clone())),
            settings: None,
        }
    }
}

impl Default for QueueDepthChecker {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Sentinel for QueueDepthChecker {
    fn configure(&mut self, config: &ConfigMap) -> Result<(), SentinelError> {
        if self.factory.is_none() {
            return Err(SentinelError::Unsupported(
                "queue depth checks are not enabled in this build".to_string(),
            ));
        }

        let max_message_count = required_int(config, "max_message_count")?;
        if max_message_count < 0 {
            return Err(SentinelError::invalid("max_message_count", "a non-negative integer"));
        }

        self.settings = Some(QueueSettings {
            queue_url: required_str(config, "queue_url")?,
            max_message_count,
            region: required_str(config, "aws_region")?,
        });

        Ok(())
    }

    #[instrument(skip(self, ctx))]
    async fn check(&self, ctx: &CheckContext, alarm_id: &str) -> Result<Signal, SentinelError> {
        let (Some(settings), Some(factory)) = (self.settings.as_ref(), self.factory.as_ref()) else {
            return Err(SentinelError::NotConfigured);
        };

        trace!("reading depth of {}", settings.queue_url);

        let client = factory(&settings.region);
        let depth =
            tokio::time::timeout(ctx.remaining(), client.approximate_depth(&settings.queue_url)).await;

        let count = match depth {
            Err(_) => {
                return Ok(Signal::unhealthy(
                    alarm_id,
                    format!("check timed out after {}s", ctx.timeout().as_secs()),
                ));
            }
            Ok(Err(e)) => {
                return Ok(Signal::unknown(
                    alarm_id,
                    format!("failed to read queue attributes: {e:#}"),
                ));
            }
            Ok(Ok(count)) => count,
        };

        let limit = settings.max_message_count;
        let signal = if count <= limit {
            Signal::healthy(
                alarm_id,
                format!("queue has {count} messages, which is within the limit of {limit}"),
            )
        } else {
            Signal::unhealthy(
                alarm_id,
                format!("queue has {count} messages, which exceeds the limit of {limit}"),
            )
        };

        Ok(signal)
    }
}
