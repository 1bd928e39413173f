//! Task queue contract and the in-process implementation
//!
//! Delivery is at-least-once: a task handed out by [`TaskQueue::dequeue`] is
//! either completed, dropped by the worker, or handed back through
//! [`TaskQueue::retry`].

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{Mutex, Notify};
use tracing::{debug, trace};

use super::{QueuePriority, Task};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("queue is closed")]
    Closed,

    #[error("queue backend error: {0}")]
    Backend(String),
}

/// A task handed to a worker
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub task: Task,

    /// Number of failed attempts before this one
    pub attempt: u32,
}

impl Delivery {
    pub fn new(task: Task) -> Self {
        Self { task, attempt: 0 }
    }

    /// Whether another attempt is allowed after this one fails
    pub fn can_retry(&self) -> bool {
        self.attempt < self.task.max_retries
    }
}

#[async_trait]
pub trait TaskQueue: Send + Sync {
    async fn enqueue(&self, task: Task) -> Result<(), QueueError>;

    /// Wait for the next task, highest priority first
    ///
    /// Returns `None` once the queue is closed and drained.
    async fn dequeue(&self) -> Option<Delivery>;

    /// Hand a failed delivery back, visible again after `backoff`
    async fn retry(&self, delivery: Delivery, backoff: Duration) -> Result<(), QueueError>;

    /// Stop accepting tasks and wake every waiting consumer
    async fn close(&self);
}

#[derive(Debug, Default)]
struct QueueState {
    ready: BTreeMap<QueuePriority, VecDeque<Delivery>>,
    closed: bool,
}

impl QueueState {
    fn pop(&mut self) -> Option<Delivery> {
        // BTreeMap iterates critical → default → low
        self.ready.values_mut().find_map(VecDeque::pop_front)
    }

    fn len(&self) -> usize {
        self.ready.values().map(VecDeque::len).sum()
    }
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<QueueState>,
    available: Notify,
}

impl Shared {
    async fn push(&self, delivery: Delivery) -> Result<(), QueueError> {
        let mut state = self.state.lock().await;
        if state.closed {
            return Err(QueueError::Closed);
        }
        state
            .ready
            .entry(delivery.task.queue)
            .or_default()
            .push_back(delivery);
        drop(state);

        self.available.notify_one();
        Ok(())
    }
}

/// In-process priority queue with delayed retries
///
/// Cheap to clone; all clones share the same queues.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    shared: Arc<Shared>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks ready for delivery (excludes pending retries)
    pub async fn len(&self) -> usize {
        self.shared.state.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Remove and return every ready task without waiting
    pub async fn drain(&self) -> Vec<Delivery> {
        let mut state = self.shared.state.lock().await;
        let mut drained = Vec::with_capacity(state.len());
        while let Some(delivery) = state.pop() {
            drained.push(delivery);
        }
        drained
    }
}

#[async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, task: Task) -> Result<(), QueueError> {
        trace!("enqueue {} on {:?} queue", task.kind, task.queue);
        self.shared.push(Delivery::new(task)).await
    }

    async fn dequeue(&self) -> Option<Delivery> {
        loop {
            // registered before inspecting the state so a wakeup in between is not lost
            let available = self.shared.available.notified();

            {
                let mut state = self.shared.state.lock().await;
                if let Some(delivery) = state.pop() {
                    return Some(delivery);
                }
                if state.closed {
                    return None;
                }
            }

            available.await;
        }
    }

    async fn retry(&self, mut delivery: Delivery, backoff: Duration) -> Result<(), QueueError> {
        if self.shared.state.lock().await.closed {
            return Err(QueueError::Closed);
        }

        delivery.attempt += 1;

        if backoff.is_zero() {
            return self.shared.push(delivery).await;
        }

        let shared = self.shared.clone();
        tokio::spawn(async move {
            tokio::time::sleep(backoff).await;
            let kind = delivery.task.kind;
            if shared.push(delivery).await.is_err() {
                debug!("queue closed before {kind} retry became due, dropping it");
            }
        });

        Ok(())
    }

    async fn close(&self) {
        self.shared.state.lock().await.closed = true;
        self.shared.available.notify_waiters();
    }
}
