//! Message types for actor communication
//!
//! Every actor owns an mpsc command channel; request/response commands carry
//! a oneshot `respond_to` sender.

use tokio::sync::oneshot;

/// Commands that can be sent to the SchedulerActor
#[derive(Debug)]
pub enum SchedulerCommand {
    /// Reconcile triggers against the alarm repository immediately
    SyncNow {
        respond_to: oneshot::Sender<anyhow::Result<SyncReport>>,
    },

    /// Ids of the alarms that currently have a trigger
    GetScheduled {
        respond_to: oneshot::Sender<Vec<String>>,
    },

    /// Deregister every trigger and stop
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// What one reconciliation changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Alarms that got a trigger for the first time
    pub added: usize,

    /// Alarms whose schedule changed
    pub replaced: usize,

    /// Alarms that disappeared from the repository
    pub removed: usize,

    /// Alarms left out because their schedule is invalid
    pub skipped: usize,
}

impl SyncReport {
    pub fn is_noop(&self) -> bool {
        self.added == 0 && self.replaced == 0 && self.removed == 0
    }
}

/// Commands that can be sent to the WorkerPool
#[derive(Debug)]
pub enum WorkerCommand {
    GetStats {
        respond_to: oneshot::Sender<WorkerStats>,
    },

    /// Stop taking new tasks and wait for the running ones
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// Task counters since the pool started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WorkerStats {
    pub completed: u64,

    /// Transient failures handed back to the queue
    pub retried: u64,

    /// Permanent failures, exhausted retries and unroutable tasks
    pub dropped: u64,
}
