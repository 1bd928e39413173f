//! Periodic triggers: recurring enqueues of a fixed task

use std::sync::Arc;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{trace, warn};
use uuid::Uuid;

use crate::alarm::Trigger;

use super::{Task, TaskQueue};

pub type TriggerId = Uuid;

/// Registers tasks to be enqueued on a recurring schedule
#[async_trait]
pub trait PeriodicTriggers: Send + Sync {
    async fn register(&self, trigger: &Trigger, task: Task) -> anyhow::Result<TriggerId>;

    async fn deregister(&self, id: TriggerId) -> anyhow::Result<()>;

    /// Stop firing every trigger
    async fn shutdown(&self) -> anyhow::Result<()>;
}

/// [`PeriodicTriggers`] backed by `tokio-cron-scheduler`
#[derive(Clone)]
pub struct CronTriggers {
    scheduler: JobScheduler,
    queue: Arc<dyn TaskQueue>,
}

impl CronTriggers {
    /// Create and start the underlying job scheduler
    pub async fn start(queue: Arc<dyn TaskQueue>) -> anyhow::Result<Self> {
        let scheduler = JobScheduler::new()
            .await
            .map_err(|e| anyhow!("failed to create job scheduler: {e}"))?;
        scheduler
            .start()
            .await
            .map_err(|e| anyhow!("failed to start job scheduler: {e}"))?;

        Ok(Self { scheduler, queue })
    }
}

#[async_trait]
impl PeriodicTriggers for CronTriggers {
    async fn register(&self, trigger: &Trigger, task: Task) -> anyhow::Result<TriggerId> {
        let queue = self.queue.clone();

        let fire = move |_id: Uuid, _scheduler: JobScheduler| {
            let queue = queue.clone();
            let task = task.clone();
            Box::pin(async move {
                trace!("trigger fired for {}", task.kind);
                if let Err(e) = queue.enqueue(task).await {
                    warn!("failed to enqueue scheduled task: {e}");
                }
            }) as std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send>>
        };

        let job = match trigger {
            Trigger::Cron(expression) => Job::new_async(expression.as_str(), fire),
            Trigger::Every(interval) => Job::new_repeated_async(*interval, fire),
        }
        .map_err(|e| anyhow!("invalid trigger {trigger}: {e}"))?;

        self.scheduler
            .add(job)
            .await
            .map_err(|e| anyhow!("failed to register trigger {trigger}: {e}"))
    }

    async fn deregister(&self, id: TriggerId) -> anyhow::Result<()> {
        self.scheduler
            .remove(&id)
            .await
            .map_err(|e| anyhow!("failed to remove trigger {id}: {e}"))
    }

    async fn shutdown(&self) -> anyhow::Result<()> {
        let mut scheduler = self.scheduler.clone();
        scheduler
            .shutdown()
            .await
            .map_err(|e| anyhow!("failed to stop job scheduler: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::{MemoryQueue, TaskKind};
    use std::time::Duration;

    #[tokio::test]
    async fn test_every_trigger_enqueues_task() {
        let queue = MemoryQueue::new();
        let triggers = CronTriggers::start(Arc::new(queue.clone())).await.unwrap();

        let id = triggers
            .register(&Trigger::Every(Duration::from_secs(1)), Task::check("a").unwrap())
            .await
            .unwrap();

        let delivery = tokio::time::timeout(Duration::from_secs(5), queue.dequeue())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(delivery.task.kind, TaskKind::AlarmCheck);

        triggers.deregister(id).await.unwrap();
        triggers.shutdown().await.unwrap();
    }
}
