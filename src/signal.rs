//! Signals - immutable outcomes of a single check execution
//!
//! A signal records what a sentinel observed for one alarm at one point in
//! time. Signals are append-only; the current health of an alarm is always
//! derived from the most recent one.
//!
//! ## Transitions
//!
//! A status transition is never stored. It is recomputed from the two most
//! recent signals every time a decision has to be made:
//!
//! ```text
//! []                    → no transition
//! [s0]                  → transition (first signal ever)
//! [s0, s1, ...]         → transition iff s0.status != s1.status
//! ```

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health status reported by a sentinel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Healthy,
    Unhealthy,
    Unknown,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Healthy => "healthy",
            Status::Unhealthy => "unhealthy",
            Status::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "healthy" => Ok(Status::Healthy),
            "unhealthy" => Ok(Status::Unhealthy),
            "unknown" => Ok(Status::Unknown),
            other => Err(anyhow::anyhow!("invalid signal status: {other}")),
        }
    }
}

/// One outcome of one check execution
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signal {
    /// Alarm this signal belongs to
    pub alarm_id: String,

    pub status: Status,

    /// When the check was executed (not when it was written)
    pub timestamp: DateTime<Utc>,

    /// Human-readable cause, e.g. "expected status 200, got 503"
    pub message: String,
}

impl Signal {
    pub fn new(alarm_id: impl Into<String>, status: Status, message: impl Into<String>) -> Self {
        Self {
            alarm_id: alarm_id.into(),
            status,
            timestamp: Utc::now(),
            message: message.into(),
        }
    }

    pub fn healthy(alarm_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(alarm_id, Status::Healthy, message)
    }

    pub fn unhealthy(alarm_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(alarm_id, Status::Unhealthy, message)
    }

    pub fn unknown(alarm_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(alarm_id, Status::Unknown, message)
    }

    /// Override the execution timestamp
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }
}

/// Decide whether the newest signal is a status transition
///
/// `latest` must be ordered newest first, as returned by
/// [`SignalStore::latest`](crate::storage::SignalStore::latest).
pub fn has_changed_status(latest: &[Signal]) -> bool {
    match latest {
        [] => false,
        [_] => true,
        [newest, previous, ..] => newest.status != previous.status,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signal(status: Status, age_secs: i64) -> Signal {
        Signal::new("alarm", status, "msg").at(Utc::now() - Duration::seconds(age_secs))
    }

    #[test]
    fn test_no_signals_is_not_a_transition() {
        assert!(!has_changed_status(&[]));
    }

    #[test]
    fn test_first_signal_is_a_transition() {
        assert!(has_changed_status(&[signal(Status::Healthy, 0)]));
    }

    #[test]
    fn test_same_status_is_not_a_transition() {
        let latest = vec![signal(Status::Unhealthy, 0), signal(Status::Unhealthy, 60)];
        assert!(!has_changed_status(&latest));
    }

    #[test]
    fn test_changed_status_is_a_transition() {
        let latest = vec![signal(Status::Healthy, 0), signal(Status::Unknown, 60)];
        assert!(has_changed_status(&latest));
    }

    #[test]
    fn test_status_round_trips_through_str() {
        for status in [Status::Healthy, Status::Unhealthy, Status::Unknown] {
            assert_eq!(status.as_str().parse::<Status>().unwrap(), status);
        }
        assert!("degraded".parse::<Status>().is_err());
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let json = serde_json::to_string(&Status::Unhealthy).unwrap();
        assert_eq!(json, "\"unhealthy\"");
    }
}
