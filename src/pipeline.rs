//! Check pipeline - what happens to one `alarm:check` task
//!
//! ```text
//! Scheduled ─▶ Checking ─▶ Persisted ─┬─▶ NoTransition
//!                                     └─▶ Transitioned ─┬─▶ DashboardQueued
//!                                                       └─▶ NotifyQueued
//! ```
//!
//! ## Failure classification
//!
//! | failure | outcome |
//! |---|---|
//! | alarm missing | permanent, nothing written |
//! | unknown type / invalid config | `unknown` signal written, permanent |
//! | configuration error raised by the check | `unknown` signal written, permanent |
//! | other sentinel function error | transient, nothing written |
//! | check deadline exceeded | `unhealthy` signal |
//! | signal write / history read | handed off to a `signal:write` task |
//!
//! ## Cascade
//!
//! The follow-up tasks of a persisted signal are the edges in [`CASCADE`].
//! Each edge is enqueued iff its guard holds. The transition is recomputed
//! from stored history on every execution, so a redelivered write never
//! produces a second notification for the same change.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, anyhow};
use async_trait::async_trait;
use tracing::{debug, info, instrument, warn};

use crate::alarm::{Alarm, AlarmRepository};
use crate::sentinel::{CheckContext, SentinelError, SentinelRegistry};
use crate::signal::{Signal, Status, has_changed_status};
use crate::storage::SignalStore;
use crate::tasks::{
    CheckPayload, Task, TaskError, TaskHandler, TaskKind, TaskQueue, TaskResult, WritePayload,
};

/// Attempts at saving a signal inside the check task before handing it off
pub const SIGNAL_WRITE_ATTEMPTS: u32 = 3;

/// Delay before the second inline write attempt; doubles after every failure
const SIGNAL_WRITE_BACKOFF: Duration = Duration::from_millis(100);

/// What a follow-up edge can look at
#[derive(Debug, Clone, Copy)]
pub struct CascadeContext<'a> {
    pub alarm: &'a Alarm,
    pub signal: &'a Signal,
    pub transitioned: bool,
}

/// One edge `alarm:check → target`
#[derive(Clone, Copy)]
pub struct CascadeEdge {
    pub target: TaskKind,
    pub guard: fn(&CascadeContext<'_>) -> bool,
    pub build: fn(&Signal) -> anyhow::Result<Task>,
}

impl std::fmt::Debug for CascadeEdge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CascadeEdge")
            .field("target", &self.target)
            .finish_non_exhaustive()
    }
}

/// Follow-up tasks of a persisted signal, in enqueue order
pub const CASCADE: [CascadeEdge; 2] = [
    CascadeEdge {
        target: TaskKind::DashboardNotify,
        guard: on_transition,
        build: Task::dashboard,
    },
    CascadeEdge {
        target: TaskKind::AlarmNotify,
        guard: should_notify,
        build: Task::notify,
    },
];

pub fn on_transition(ctx: &CascadeContext<'_>) -> bool {
    ctx.transitioned
}

/// Transition, a channel to send to, and a status worth sending
pub fn should_notify(ctx: &CascadeContext<'_>) -> bool {
    ctx.transitioned
        && ctx.alarm.notifications.has_channels()
        && (ctx.signal.status != Status::Unknown || ctx.alarm.notifications.notify_missing_signals)
}

/// Result of a completed pipeline run
#[derive(Debug, Clone, PartialEq)]
pub struct CheckOutcome {
    pub signal: Signal,
    pub transitioned: bool,

    /// Follow-up tasks enqueued, in order
    pub enqueued: Vec<TaskKind>,
}

#[derive(Clone)]
pub struct CheckPipeline {
    alarms: Arc<dyn AlarmRepository>,
    registry: Arc<SentinelRegistry>,
    store: Arc<dyn SignalStore>,
    queue: Arc<dyn TaskQueue>,
    check_timeout: Duration,
}

impl CheckPipeline {
    pub fn new(
        alarms: Arc<dyn AlarmRepository>,
        registry: Arc<SentinelRegistry>,
        store: Arc<dyn SignalStore>,
        queue: Arc<dyn TaskQueue>,
        check_timeout: Duration,
    ) -> Self {
        Self {
            alarms,
            registry,
            store,
            queue,
            check_timeout,
        }
    }

    /// Run one `alarm:check`
    #[instrument(skip(self))]
    pub async fn check(&self, alarm_id: &str) -> Result<CheckOutcome, TaskError> {
        let alarm = self
            .alarms
            .get_alarm(alarm_id)
            .await
            .map_err(TaskError::Transient)?
            .ok_or_else(|| TaskError::Permanent(anyhow!("alarm {alarm_id} not found")))?;

        let sentinel = match self.registry.build(&alarm) {
            Ok(sentinel) => sentinel,
            Err(e) => return Err(self.misconfigured(alarm_id, e).await),
        };

        let ctx = CheckContext::new(self.check_timeout);
        let signal = match tokio::time::timeout(self.check_timeout, sentinel.check(&ctx, alarm_id)).await {
            Err(_) => Signal::unhealthy(
                alarm_id,
                format!("check timed out after {}s", self.check_timeout.as_secs()),
            ),
            Ok(Err(e)) if e.is_configuration() => {
                return Err(self.misconfigured(alarm_id, e).await);
            }
            Ok(Err(e)) => {
                return Err(TaskError::Transient(
                    anyhow!(e).context(format!("check of {alarm_id} failed")),
                ));
            }
            Ok(Ok(signal)) => signal,
        };

        debug!("alarm {alarm_id} is {}: {}", signal.status, signal.message);

        match self.save_with_retries(&signal).await {
            Ok(()) => {}
            Err(e) => {
                warn!("deferring write of {alarm_id} signal: {e:#}");
                return self.hand_off(signal).await;
            }
        }

        match self.cascade(&alarm, &signal).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                warn!("deferring cascade of {alarm_id} signal: {e:#}");
                self.hand_off(signal).await
            }
        }
    }

    /// Run one `signal:write`: persist, then cascade like a check would
    #[instrument(skip(self, signal), fields(alarm_id = %signal.alarm_id))]
    pub async fn write(&self, signal: Signal) -> Result<CheckOutcome, TaskError> {
        let alarm = self
            .alarms
            .get_alarm(&signal.alarm_id)
            .await
            .map_err(TaskError::Transient)?
            .ok_or_else(|| TaskError::Permanent(anyhow!("alarm {} not found", signal.alarm_id)))?;

        self.store
            .save(&signal)
            .await
            .map_err(|e| TaskError::Transient(anyhow!(e).context("failed to save signal")))?;

        self.cascade(&alarm, &signal).await.map_err(TaskError::Transient)
    }

    /// Delete signals past the retention window
    pub async fn clean_signals(&self) -> TaskResult {
        let deleted = self
            .store
            .clean_old()
            .await
            .map_err(|e| TaskError::Transient(anyhow!(e).context("signal cleanup failed")))?;
        info!("retention cleanup deleted {deleted} signals");
        Ok(())
    }

    /// Record an `unknown` signal for an alarm that cannot be checked as configured
    async fn misconfigured(&self, alarm_id: &str, err: SentinelError) -> TaskError {
        warn!("alarm {alarm_id} cannot be checked: {err}");
        let signal = Signal::unknown(alarm_id, err.to_string());
        if let Err(write_error) = self.save_with_retries(&signal).await {
            warn!("failed to record configuration error of {alarm_id}: {write_error:#}");
        }
        TaskError::Permanent(anyhow!(err))
    }

    async fn save_with_retries(&self, signal: &Signal) -> anyhow::Result<()> {
        let mut backoff = SIGNAL_WRITE_BACKOFF;
        let mut attempt = 1;

        loop {
            match self.store.save(signal).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt >= SIGNAL_WRITE_ATTEMPTS => {
                    return Err(anyhow!(e).context(format!(
                        "failed to save signal after {SIGNAL_WRITE_ATTEMPTS} attempts"
                    )));
                }
                Err(e) => {
                    debug!("signal write attempt {attempt} failed: {e}");
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                    attempt += 1;
                }
            }
        }
    }

    /// Queue the signal for a `signal:write`, which saves it again and cascades
    async fn hand_off(&self, signal: Signal) -> Result<CheckOutcome, TaskError> {
        let task = Task::write_signal(signal.clone()).map_err(TaskError::Permanent)?;
        self.queue
            .enqueue(task)
            .await
            .map_err(|e| TaskError::Transient(anyhow!(e).context("failed to hand off signal")))?;

        Ok(CheckOutcome {
            signal,
            transitioned: false,
            enqueued: vec![TaskKind::SignalWrite],
        })
    }

    /// Decide the transition from stored history and enqueue the guarded edges
    async fn cascade(&self, alarm: &Alarm, signal: &Signal) -> anyhow::Result<CheckOutcome> {
        let latest = self
            .store
            .latest(&signal.alarm_id, 2)
            .await
            .context("failed to read signal history")?;

        let transitioned = is_transition(signal, &latest);
        let ctx = CascadeContext {
            alarm,
            signal,
            transitioned,
        };

        let mut enqueued = Vec::new();
        for edge in CASCADE.iter().filter(|edge| (edge.guard)(&ctx)) {
            let task = (edge.build)(signal)?;
            self.queue
                .enqueue(task)
                .await
                .with_context(|| format!("failed to enqueue {}", edge.target))?;
            enqueued.push(edge.target);
        }

        if transitioned {
            info!(
                "alarm {} transitioned to {}, enqueued {:?}",
                alarm.id, signal.status, enqueued
            );
        }

        Ok(CheckOutcome {
            signal: signal.clone(),
            transitioned,
            enqueued,
        })
    }
}

/// Whether `signal` is the newest stored signal and differs from the one before it
///
/// A signal that is no longer the newest leaves the decision to the write
/// that superseded it.
fn is_transition(signal: &Signal, latest: &[Signal]) -> bool {
    let is_newest = latest
        .first()
        .is_some_and(|newest| newest.timestamp.timestamp_millis() == signal.timestamp.timestamp_millis());
    is_newest && has_changed_status(latest)
}

#[async_trait]
impl TaskHandler for CheckPipeline {
    async fn handle(&self, task: &Task) -> TaskResult {
        match task.kind {
            TaskKind::AlarmCheck => {
                let payload: CheckPayload = task.decode()?;
                self.check(&payload.alarm_id).await.map(|_| ())
            }
            TaskKind::SignalWrite => {
                let payload: WritePayload = task.decode()?;
                self.write(payload.signal).await.map(|_| ())
            }
            TaskKind::CleanSignals => self.clean_signals().await,
            other => Err(TaskError::Permanent(anyhow!(
                "check pipeline cannot handle {other} tasks"
            ))),
        }
    }
}
