//! Signal store trait definition

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::signal::{Signal, Status};

use super::error::StorageResult;

/// Default retention window for stored signals
pub const DEFAULT_RETENTION_DAYS: u32 = 14;

/// Health status of the storage backend
#[derive(Debug, Clone)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Append-only per-alarm signal history
///
/// Every implementation (in memory, SQLite, MySQL, ...) must behave the same
/// way; they differ only in persistence and query performance.
///
/// ## Ordering
///
/// "Latest" is always by recorded timestamp, never by insertion order, so
/// overlapping executions for the same alarm still read back consistently.
///
/// ## Idempotence
///
/// A signal is identified by `(alarm_id, timestamp)`. Saving the same signal
/// twice leaves a single entry.
///
/// ## Thread Safety
///
/// Implementations must be `Send + Sync`; workers save and query
/// concurrently, and cleanup may run at the same time.
#[async_trait]
pub trait SignalStore: Send + Sync {
    /// Append a signal and refresh the alarm's last-signal entry
    async fn save(&self, signal: &Signal) -> StorageResult<()>;

    /// Up to `limit` most recent signals of an alarm, newest first
    async fn latest(&self, alarm_id: &str, limit: usize) -> StorageResult<Vec<Signal>>;

    /// Status of the most recent signal, `Unknown` if there is none
    async fn health(&self, alarm_id: &str) -> StorageResult<Status>;

    /// Delete signals recorded before `before`
    ///
    /// Returns the number of signals deleted.
    async fn clean_before(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    /// Retention window applied by [`SignalStore::clean_old`]
    fn retention(&self) -> chrono::Duration;

    /// Delete signals older than the retention window
    async fn clean_old(&self) -> StorageResult<usize> {
        self.clean_before(Utc::now() - self.retention()).await
    }

    /// Check backend health
    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}

pub(crate) fn retention_from_days(days: u32) -> chrono::Duration {
    chrono::Duration::days(i64::from(days))
}
