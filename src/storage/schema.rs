//! Row layout shared by the SQL and Redis signal stores
//!
//! Two tables back every SQL store:
//!
//! - `signals`: the append-only log, unique on `(alarm_id, timestamp)` so a
//!   redelivered write of the same check replaces instead of duplicating
//! - `last_signals`: one row per alarm mirroring the newest log entry, used
//!   for constant-time health lookups
//!
//! Timestamps are stored as Unix milliseconds.

use chrono::{DateTime, Utc};

use crate::signal::{Signal, Status};

use super::error::{StorageError, StorageResult};

/// A signal as stored in SQL (and encoded as a Redis set member)
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SignalRow {
    pub alarm_id: String,
    pub status: String,
    pub message: String,
    pub timestamp: i64,
}

impl SignalRow {
    pub fn from_signal(signal: &Signal) -> Self {
        Self {
            alarm_id: signal.alarm_id.clone(),
            status: signal.status.as_str().to_string(),
            message: signal.message.clone(),
            timestamp: timestamp_to_millis(&signal.timestamp),
        }
    }

    pub fn into_signal(self) -> StorageResult<Signal> {
        let status: Status = self
            .status
            .parse()
            .map_err(|e: anyhow::Error| StorageError::CorruptRow(e.to_string()))?;

        Ok(Signal {
            alarm_id: self.alarm_id,
            status,
            timestamp: millis_to_timestamp(self.timestamp),
            message: self.message,
        })
    }
}

/// Convert a timestamp to Unix milliseconds for storage
pub fn timestamp_to_millis(dt: &DateTime<Utc>) -> i64 {
    dt.timestamp_millis()
}

/// Convert stored Unix milliseconds back to a timestamp
pub fn millis_to_timestamp(millis: i64) -> DateTime<Utc> {
    DateTime::from_timestamp_millis(millis).unwrap_or_else(Utc::now)
}
