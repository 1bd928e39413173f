//! Tasks - units of work moved through the queue
//!
//! Every interaction with the pipeline is a task. A task carries only what
//! cannot be re-read at execution time: a check carries the alarm id, never
//! the alarm config, since the config may change between scheduling and
//! execution.
//!
//! | kind | payload | queue | retries |
//! |---|---|---|---|
//! | `alarm:check` | `{alarm_id}` | default | 1 |
//! | `alarm:notify` | `{alarm_id, signal}` | critical | 1 |
//! | `dashboard:notify` | `{alarm_id, signal}` | low | 1 |
//! | `backoffice:clean-signals` | `{}` | low | 3 |
//! | `signal:write` | `{signal}` | critical | 5 |

pub mod queue;
pub mod triggers;

use std::fmt;
use std::str::FromStr;

use anyhow::Context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::signal::Signal;

pub use queue::{Delivery, MemoryQueue, QueueError, TaskQueue};
pub use triggers::{CronTriggers, PeriodicTriggers, TriggerId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "alarm:check")]
    AlarmCheck,
    #[serde(rename = "alarm:notify")]
    AlarmNotify,
    #[serde(rename = "dashboard:notify")]
    DashboardNotify,
    #[serde(rename = "backoffice:clean-signals")]
    CleanSignals,
    #[serde(rename = "signal:write")]
    SignalWrite,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::AlarmCheck,
        TaskKind::AlarmNotify,
        TaskKind::DashboardNotify,
        TaskKind::CleanSignals,
        TaskKind::SignalWrite,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskKind::AlarmCheck => "alarm:check",
            TaskKind::AlarmNotify => "alarm:notify",
            TaskKind::DashboardNotify => "dashboard:notify",
            TaskKind::CleanSignals => "backoffice:clean-signals",
            TaskKind::SignalWrite => "signal:write",
        }
    }

    pub fn queue(&self) -> QueuePriority {
        match self {
            TaskKind::AlarmNotify | TaskKind::SignalWrite => QueuePriority::Critical,
            TaskKind::AlarmCheck => QueuePriority::Default,
            TaskKind::DashboardNotify | TaskKind::CleanSignals => QueuePriority::Low,
        }
    }

    pub fn max_retries(&self) -> u32 {
        match self {
            TaskKind::AlarmCheck | TaskKind::AlarmNotify | TaskKind::DashboardNotify => 1,
            TaskKind::CleanSignals => 3,
            TaskKind::SignalWrite => 5,
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| anyhow::anyhow!("unknown task type: {s}"))
    }
}

/// Queues are drained strictly in this order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueuePriority {
    Critical,
    Default,
    Low,
}

impl QueuePriority {
    pub const ALL: [QueuePriority; 3] = [
        QueuePriority::Critical,
        QueuePriority::Default,
        QueuePriority::Low,
    ];
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckPayload {
    pub alarm_id: String,
}

/// Payload of `alarm:notify` and `dashboard:notify`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignalPayload {
    pub alarm_id: String,
    pub signal: Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WritePayload {
    pub signal: Signal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    #[serde(rename = "type")]
    pub kind: TaskKind,
    pub payload: serde_json::Value,
    pub max_retries: u32,
    pub queue: QueuePriority,
}

impl Task {
    fn with_payload<P: Serialize>(kind: TaskKind, payload: &P) -> anyhow::Result<Self> {
        let payload = serde_json::to_value(payload)
            .with_context(|| format!("failed to encode {kind} payload"))?;

        Ok(Self {
            kind,
            payload,
            max_retries: kind.max_retries(),
            queue: kind.queue(),
        })
    }

    pub fn check(alarm_id: impl Into<String>) -> anyhow::Result<Self> {
        Self::with_payload(
            TaskKind::AlarmCheck,
            &CheckPayload {
                alarm_id: alarm_id.into(),
            },
        )
    }

    pub fn notify(signal: &Signal) -> anyhow::Result<Self> {
        Self::with_payload(TaskKind::AlarmNotify, &SignalPayload::from(signal))
    }

    pub fn dashboard(signal: &Signal) -> anyhow::Result<Self> {
        Self::with_payload(TaskKind::DashboardNotify, &SignalPayload::from(signal))
    }

    pub fn clean_signals() -> Self {
        Self {
            kind: TaskKind::CleanSignals,
            payload: serde_json::Value::Object(Default::default()),
            max_retries: TaskKind::CleanSignals.max_retries(),
            queue: TaskKind::CleanSignals.queue(),
        }
    }

    pub fn write_signal(signal: Signal) -> anyhow::Result<Self> {
        Self::with_payload(TaskKind::SignalWrite, &WritePayload { signal })
    }

    /// Decode the payload; a payload that does not decode never will
    pub fn decode<P: DeserializeOwned>(&self) -> Result<P, TaskError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            TaskError::Permanent(anyhow::anyhow!("malformed {} payload: {e}", self.kind))
        })
    }
}

impl From<&Signal> for SignalPayload {
    fn from(signal: &Signal) -> Self {
        Self {
            alarm_id: signal.alarm_id.clone(),
            signal: signal.clone(),
        }
    }
}

/// How a failed task should be treated by the worker pool
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    /// Will fail the same way on every attempt; dropped without retry
    #[error("permanent failure: {0:#}")]
    Permanent(anyhow::Error),

    /// May succeed later; retried up to the task's `max_retries`
    #[error("transient failure: {0:#}")]
    Transient(anyhow::Error),
}

impl TaskError {
    pub fn is_permanent(&self) -> bool {
        matches!(self, TaskError::Permanent(_))
    }
}

pub type TaskResult = Result<(), TaskError>;

/// Executes one kind of task
#[async_trait::async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &Task) -> TaskResult;
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_kind_wire_names() {
        for kind in TaskKind::ALL {
            assert_eq!(kind.as_str().parse::<TaskKind>().unwrap(), kind);
            assert_eq!(
                serde_json::to_value(kind).unwrap(),
                serde_json::Value::String(kind.as_str().to_string())
            );
        }
    }

    #[test]
    fn test_priorities_and_retries() {
        let signal = Signal::healthy("a", "ok");

        let write = Task::write_signal(signal.clone()).unwrap();
        assert_eq!(write.queue, QueuePriority::Critical);
        assert_eq!(write.max_retries, 5);

        let check = Task::check("a").unwrap();
        assert_eq!(check.queue, QueuePriority::Default);
        assert_eq!(check.max_retries, 1);

        let clean = Task::clean_signals();
        assert_eq!(clean.queue, QueuePriority::Low);
        assert_eq!(clean.max_retries, 3);

        assert!(QueuePriority::Critical < QueuePriority::Default);
        assert!(QueuePriority::Default < QueuePriority::Low);
    }

    #[test]
    fn test_check_payload_carries_only_the_id() {
        let task = Task::check("api-health").unwrap();
        assert_eq!(task.payload, serde_json::json!({ "alarm_id": "api-health" }));

        let payload: CheckPayload = task.decode().unwrap();
        assert_eq!(payload.alarm_id, "api-health");
    }

    #[test]
    fn test_malformed_payload_is_permanent() {
        let mut task = Task::check("a").unwrap();
        task.payload = serde_json::json!({ "id": 3 });
        let err = task.decode::<CheckPayload>().unwrap_err();
        assert!(err.is_permanent());
    }
}
