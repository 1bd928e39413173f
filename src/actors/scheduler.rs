//! SchedulerActor - keeps one periodic trigger per alarm
//!
//! ## Reconciliation
//!
//! Every `sync_interval` the actor reads the full alarm set and converges
//! the registered triggers towards it:
//!
//! ```text
//! in repository, not registered      → register
//! registered, schedule changed       → deregister + register
//! registered, not in repository      → deregister
//! invalid schedule                   → skipped (logged), others unaffected
//! ```
//!
//! Triggers enqueue `alarm:check` tasks carrying only the alarm id, so edits
//! that leave the schedule alone need no re-registration.
//!
//! One extra trigger enqueues `backoffice:clean-signals` on a fixed cadence.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, instrument, trace, warn};

use crate::alarm::{AlarmRepository, Trigger};
use crate::tasks::{PeriodicTriggers, Task, TriggerId};

use super::messages::{SchedulerCommand, SyncReport};

/// Shortest accepted reconciliation period
pub const MIN_SYNC_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    pub sync_interval: Duration,

    /// Cadence of the retention cleanup
    pub cleanup: Trigger,
}

#[derive(Debug, Clone)]
struct Registration {
    trigger: Trigger,
    id: TriggerId,
}

pub struct SchedulerActor {
    alarms: Arc<dyn AlarmRepository>,
    triggers: Arc<dyn PeriodicTriggers>,
    settings: SchedulerSettings,

    /// Alarm id → its live trigger
    registered: HashMap<String, Registration>,

    cleanup_id: Option<TriggerId>,

    command_rx: mpsc::Receiver<SchedulerCommand>,
}

impl SchedulerActor {
    pub fn new(
        alarms: Arc<dyn AlarmRepository>,
        triggers: Arc<dyn PeriodicTriggers>,
        settings: SchedulerSettings,
        command_rx: mpsc::Receiver<SchedulerCommand>,
    ) -> Self {
        Self {
            alarms,
            triggers,
            settings,
            registered: HashMap::new(),
            cleanup_id: None,
            command_rx,
        }
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(
            "starting scheduler (sync every {:?}, cleanup {})",
            self.settings.sync_interval, self.settings.cleanup
        );

        match self
            .triggers
            .register(&self.settings.cleanup, Task::clean_signals())
            .await
        {
            Ok(id) => self.cleanup_id = Some(id),
            Err(e) => error!("failed to register retention cleanup: {e:#}"),
        }

        let mut ticker = time::interval(self.settings.sync_interval.max(MIN_SYNC_INTERVAL));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut shutdown_ack: Option<oneshot::Sender<()>> = None;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    trace!("periodic trigger sync");
                    if let Err(e) = self.sync().await {
                        warn!("trigger sync failed, keeping current triggers: {e:#}");
                    }
                }

                Some(cmd) = self.command_rx.recv() => {
                    match cmd {
                        SchedulerCommand::SyncNow { respond_to } => {
                            let _ = respond_to.send(self.sync().await);
                        }
                        SchedulerCommand::GetScheduled { respond_to } => {
                            let mut ids: Vec<String> = self.registered.keys().cloned().collect();
                            ids.sort();
                            let _ = respond_to.send(ids);
                        }
                        SchedulerCommand::Shutdown { respond_to } => {
                            debug!("received shutdown command");
                            shutdown_ack = Some(respond_to);
                            break;
                        }
                    }
                }

                else => {
                    warn!("command channel closed, shutting down");
                    break;
                }
            }
        }

        self.deregister_all().await;

        if let Some(ack) = shutdown_ack {
            let _ = ack.send(());
        }

        debug!("scheduler stopped");
    }

    /// Converge registered triggers towards the current alarm set
    async fn sync(&mut self) -> anyhow::Result<SyncReport> {
        let alarms = self.alarms.get_alarms().await?;
        let mut report = SyncReport::default();

        let mut desired: HashMap<String, Trigger> = HashMap::with_capacity(alarms.len());
        for alarm in alarms {
            match alarm.trigger() {
                Ok(trigger) => {
                    desired.insert(alarm.id, trigger);
                }
                Err(e) => {
                    warn!("skipping alarm {}: {e}", alarm.id);
                    report.skipped += 1;
                }
            }
        }

        let stale: Vec<String> = self
            .registered
            .iter()
            .filter(|(id, registration)| desired.get(*id) != Some(&registration.trigger))
            .map(|(id, _)| id.clone())
            .collect();

        let mut replacing = HashSet::new();
        for id in stale {
            let Some(registration) = self.registered.remove(&id) else {
                continue;
            };
            if let Err(e) = self.triggers.deregister(registration.id).await {
                warn!("failed to deregister trigger of {id}: {e:#}");
            }
            if desired.contains_key(&id) {
                replacing.insert(id);
            } else {
                debug!("alarm {id} removed, trigger deregistered");
                report.removed += 1;
            }
        }

        for (id, trigger) in desired {
            if self.registered.contains_key(&id) {
                continue;
            }

            let registered = match Task::check(id.clone()) {
                Ok(task) => self.triggers.register(&trigger, task).await,
                Err(e) => Err(e),
            };

            match registered {
                Ok(trigger_id) => {
                    trace!("scheduled {id} with {trigger}");
                    self.registered.insert(
                        id.clone(),
                        Registration {
                            trigger,
                            id: trigger_id,
                        },
                    );
                    if replacing.contains(&id) {
                        report.replaced += 1;
                    } else {
                        report.added += 1;
                    }
                }
                Err(e) => {
                    warn!("failed to schedule alarm {id}: {e:#}");
                    report.skipped += 1;
                }
            }
        }

        if !report.is_noop() {
            info!(
                "triggers synced: {} added, {} replaced, {} removed, {} skipped",
                report.added, report.replaced, report.removed, report.skipped
            );
        }

        Ok(report)
    }

    async fn deregister_all(&mut self) {
        let ids = self
            .registered
            .drain()
            .map(|(_, registration)| registration.id)
            .chain(self.cleanup_id.take());

        for id in ids.collect::<Vec<_>>() {
            if let Err(e) = self.triggers.deregister(id).await {
                warn!("failed to deregister trigger {id}: {e:#}");
            }
        }
    }
}

/// Handle for controlling a SchedulerActor
#[derive(Clone)]
pub struct SchedulerHandle {
    sender: mpsc::Sender<SchedulerCommand>,
}

impl SchedulerHandle {
    pub fn spawn(
        alarms: Arc<dyn AlarmRepository>,
        triggers: Arc<dyn PeriodicTriggers>,
        settings: SchedulerSettings,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(32);

        let actor = SchedulerActor::new(alarms, triggers, settings, cmd_rx);
        tokio::spawn(actor.run());

        Self { sender: cmd_tx }
    }

    pub async fn sync_now(&self) -> anyhow::Result<SyncReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::SyncNow { respond_to: tx })
            .await
            .map_err(|_| anyhow!("scheduler is not running"))?;

        rx.await?
    }

    pub async fn scheduled(&self) -> anyhow::Result<Vec<String>> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::GetScheduled { respond_to: tx })
            .await
            .map_err(|_| anyhow!("scheduler is not running"))?;

        Ok(rx.await?)
    }

    /// Deregister every trigger and wait for the actor to stop
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(SchedulerCommand::Shutdown { respond_to: tx })
            .await
            .map_err(|_| anyhow!("scheduler is not running"))?;

        Ok(rx.await?)
    }
}
