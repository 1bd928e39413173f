//! WorkerPool - executes queued tasks
//!
//! ## Message Flow
//!
//! ```text
//! TaskQueue::dequeue → TaskRouter → TaskHandler
//!                                       │
//!            Ok ────────────────────────┤ completed
//!            Permanent ─────────────────┤ dropped
//!            Transient, retries left ───┤ TaskQueue::retry (exponential backoff)
//!            Transient, exhausted ──────┘ dropped
//! ```
//!
//! Shutdown closes the queue and lets every worker finish the task it is
//! running; tasks still waiting in the queue are not started.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use anyhow::anyhow;
use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, instrument, trace, warn};

use crate::tasks::{Delivery, Task, TaskError, TaskHandler, TaskKind, TaskQueue, TaskResult};

use super::messages::{WorkerCommand, WorkerStats};

/// Upper bound for the delay between two attempts of a task
pub const MAX_RETRY_BACKOFF: Duration = Duration::from_secs(300);

/// Dispatches each task to the handler registered for its kind
#[derive(Default, Clone)]
pub struct TaskRouter {
    handlers: HashMap<TaskKind, Arc<dyn TaskHandler>>,
}

impl TaskRouter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, kind: TaskKind, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(kind, handler);
        self
    }

    pub fn handles(&self, kind: TaskKind) -> bool {
        self.handlers.contains_key(&kind)
    }
}

#[async_trait]
impl TaskHandler for TaskRouter {
    async fn handle(&self, task: &Task) -> TaskResult {
        match self.handlers.get(&task.kind) {
            Some(handler) => handler.handle(task).await,
            None => Err(TaskError::Permanent(anyhow!(
                "no handler registered for {}",
                task.kind
            ))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    /// Number of tasks executed concurrently
    pub concurrency: usize,

    /// Delay before the first retry, doubled on every further attempt
    pub retry_backoff: Duration,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 4,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Default)]
struct Counters {
    completed: AtomicU64,
    retried: AtomicU64,
    dropped: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> WorkerStats {
        WorkerStats {
            completed: self.completed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
        }
    }
}

/// State shared by every worker task
struct Worker {
    queue: Arc<dyn TaskQueue>,
    router: Arc<TaskRouter>,
    retry_backoff: Duration,
    counters: Arc<Counters>,
}

impl Worker {
    async fn run(self: Arc<Self>, index: usize, mut stop: watch::Receiver<bool>) {
        trace!("worker {index} started");

        loop {
            let delivery = tokio::select! {
                biased;

                _ = stop.changed() => break,

                delivery = self.queue.dequeue() => match delivery {
                    Some(delivery) => delivery,
                    None => break,
                },
            };

            self.process(delivery).await;

            if *stop.borrow() {
                break;
            }
        }

        trace!("worker {index} stopped");
    }

    async fn process(&self, delivery: Delivery) {
        let kind = delivery.task.kind;
        trace!("running {kind} (attempt {})", delivery.attempt + 1);

        match self.router.handle(&delivery.task).await {
            Ok(()) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(TaskError::Permanent(e)) => {
                error!("{kind} failed permanently, dropping task: {e:#}");
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
            Err(TaskError::Transient(e)) if delivery.can_retry() => {
                let backoff = self.backoff(delivery.attempt);
                warn!(
                    "{kind} failed (attempt {}), retrying in {backoff:?}: {e:#}",
                    delivery.attempt + 1
                );

                match self.queue.retry(delivery, backoff).await {
                    Ok(()) => {
                        self.counters.retried.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        warn!("could not requeue {kind}, dropping task: {e}");
                        self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }
            Err(TaskError::Transient(e)) => {
                error!(
                    "{kind} failed after {} attempts, dropping task: {e:#}",
                    delivery.attempt + 1
                );
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
            .min(MAX_RETRY_BACKOFF)
    }
}

pub struct WorkerPool {
    worker: Arc<Worker>,
    concurrency: usize,
    command_rx: mpsc::Receiver<WorkerCommand>,
}

impl WorkerPool {
    pub fn new(
        queue: Arc<dyn TaskQueue>,
        router: TaskRouter,
        settings: WorkerSettings,
        command_rx: mpsc::Receiver<WorkerCommand>,
    ) -> Self {
        Self {
            worker: Arc::new(Worker {
                queue,
                router: Arc::new(router),
                retry_backoff: settings.retry_backoff,
                counters: Arc::new(Counters::default()),
            }),
            concurrency: settings.concurrency.max(1),
            command_rx,
        }
    }

    #[instrument(skip(self), fields(concurrency = self.concurrency))]
    pub async fn run(mut self) {
        debug!("starting worker pool");

        let (stop_tx, stop_rx) = watch::channel(false);
        let mut workers = JoinSet::new();
        for index in 0..self.concurrency {
            workers.spawn(self.worker.clone().run(index, stop_rx.clone()));
        }

        let mut shutdown_ack: Option<oneshot::Sender<()>> = None;

        loop {
            tokio::select! {
                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        WorkerCommand::GetStats { respond_to } => {
                            let _ = respond_to.send(self.worker.counters.snapshot());
                        }
                        WorkerCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command");
                            shutdown_ack = Some(respond_to);
                            break;
                        }
                    }
                }

                Some(joined) = workers.join_next() => {
                    if let Err(e) = joined {
                        error!("worker task ended abnormally: {e}");
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        let _ = stop_tx.send(true);
        self.worker.queue.close().await;

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!("worker task ended abnormally: {e}");
            }
        }

        let stats = self.worker.counters.snapshot();
        debug!(
            "worker pool stopped ({} completed, {} retried, {} dropped)",
            stats.completed, stats.retried, stats.dropped
        );

        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }
    }
}

/// Handle for controlling a WorkerPool
#[derive(Clone)]
pub struct WorkerPoolHandle {
    sender: mpsc::Sender<WorkerCommand>,
}

impl WorkerPoolHandle {
    pub fn spawn(queue: Arc<dyn TaskQueue>, router: TaskRouter, settings: WorkerSettings) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let pool = WorkerPool::new(queue, router, settings, cmd_rx);
        tokio::spawn(pool.run());

        Self { sender: cmd_tx }
    }

    pub async fn stats(&self) -> anyhow::Result<WorkerStats> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerCommand::GetStats { respond_to: tx })
            .await
            .map_err(|_| anyhow!("worker pool is not running"))?;

        Ok(rx.await?)
    }

    /// Close the queue and wait for the running tasks to finish
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(WorkerCommand::Shutdown { respond_to: tx })
            .await
            .map_err(|_| anyhow!("worker pool is not running"))?;

        Ok(rx.await?)
    }
}
