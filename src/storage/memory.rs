//! In-memory signal store (no persistence)
//!
//! Useful for tests and for running a hub without a database. All data is
//! lost on restart.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use crate::signal::{Signal, Status};

use super::backend::{DEFAULT_RETENTION_DAYS, HealthStatus, SignalStore, retention_from_days};
use super::error::StorageResult;
use super::schema::{millis_to_timestamp, timestamp_to_millis};

#[derive(Debug, Default)]
struct Signals {
    /// Per-alarm log, ordered by timestamp (oldest first)
    log: HashMap<String, Vec<Signal>>,

    /// Newest signal per alarm
    last: HashMap<String, Signal>,
}

/// In-memory signal store
#[derive(Debug)]
pub struct MemorySignalStore {
    signals: RwLock<Signals>,
    retention: chrono::Duration,
}

impl MemorySignalStore {
    pub fn new() -> Self {
        Self::with_retention_days(DEFAULT_RETENTION_DAYS)
    }

    pub fn with_retention_days(days: u32) -> Self {
        Self {
            signals: RwLock::new(Signals::default()),
            retention: retention_from_days(days),
        }
    }

    /// Total number of signals held across all alarms
    pub async fn len(&self) -> usize {
        self.signals.read().await.log.values().map(Vec::len).sum()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

impl Default for MemorySignalStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl SignalStore for MemorySignalStore {
    async fn save(&self, signal: &Signal) -> StorageResult<()> {
        // same precision as the SQL stores
        let mut signal = signal.clone();
        signal.timestamp = millis_to_timestamp(timestamp_to_millis(&signal.timestamp));

        let mut signals = self.signals.write().await;

        let log = signals.log.entry(signal.alarm_id.clone()).or_default();
        let index = log.partition_point(|stored| stored.timestamp < signal.timestamp);
        match log.get_mut(index) {
            Some(stored) if stored.timestamp == signal.timestamp => *stored = signal.clone(),
            _ => log.insert(index, signal.clone()),
        }

        let newer = signals
            .last
            .get(&signal.alarm_id)
            .is_none_or(|last| signal.timestamp >= last.timestamp);
        if newer {
            signals.last.insert(signal.alarm_id.clone(), signal);
        }

        Ok(())
    }

    async fn latest(&self, alarm_id: &str, limit: usize) -> StorageResult<Vec<Signal>> {
        debug!("querying latest {} signals for {}", limit, alarm_id);

        let signals = self.signals.read().await;
        Ok(signals
            .log
            .get(alarm_id)
            .map(|log| log.iter().rev().take(limit).cloned().collect())
            .unwrap_or_default())
    }

    async fn health(&self, alarm_id: &str) -> StorageResult<Status> {
        let signals = self.signals.read().await;
        Ok(signals
            .last
            .get(alarm_id)
            .map(|signal| signal.status)
            .unwrap_or(Status::Unknown))
    }

    async fn clean_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let mut signals = self.signals.write().await;

        let mut deleted = 0;
        for log in signals.log.values_mut() {
            let expired = log.partition_point(|signal| signal.timestamp < before);
            log.drain(..expired);
            deleted += expired;
        }
        signals.log.retain(|_, log| !log.is_empty());
        signals.last.retain(|_, signal| signal.timestamp >= before);

        debug!("deleted {} signals older than {}", deleted, before);
        Ok(deleted)
    }

    fn retention(&self) -> chrono::Duration {
        self.retention
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let signals = self.signals.read().await;
        Ok(HealthStatus {
            healthy: true,
            message: "In-memory signal store operational".to_string(),
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("alarms".to_string(), signals.log.len().to_string()),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory signal store (no-op)");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn signal_at(status: Status, age: Duration) -> Signal {
        let timestamp = millis_to_timestamp(timestamp_to_millis(&(Utc::now() - age)));
        Signal::new("alarm", status, status.as_str()).at(timestamp)
    }

    #[tokio::test]
    async fn test_latest_is_ordered_by_timestamp_not_insertion() {
        let store = MemorySignalStore::new();
        let older = signal_at(Status::Healthy, Duration::minutes(5));
        let newer = signal_at(Status::Unhealthy, Duration::minutes(1));

        store.save(&newer).await.unwrap();
        store.save(&older).await.unwrap();

        let latest = store.latest("alarm", 10).await.unwrap();
        assert_eq!(latest, vec![newer.clone(), older]);
        assert_eq!(store.health("alarm").await.unwrap(), Status::Unhealthy);
    }

    #[tokio::test]
    async fn test_duplicate_save_keeps_single_entry() {
        let store = MemorySignalStore::new();
        let signal = signal_at(Status::Healthy, Duration::zero());

        store.save(&signal).await.unwrap();
        store.save(&signal).await.unwrap();

        assert_eq!(store.len().await, 1);
        assert_eq!(store.latest("alarm", 1).await.unwrap(), vec![signal]);
    }

    #[tokio::test]
    async fn test_same_millisecond_is_the_same_signal() {
        let store = MemorySignalStore::new();
        let base = millis_to_timestamp(1_700_000_000_123);
        let first = Signal::healthy("alarm", "ok").at(base + Duration::microseconds(100));
        let second = Signal::unhealthy("alarm", "down").at(base + Duration::microseconds(900));

        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        assert_eq!(store.len().await, 1);
        let latest = store.latest("alarm", 5).await.unwrap();
        assert_eq!(latest[0].timestamp, base);
        assert_eq!(latest[0].status, Status::Unhealthy);
    }

    #[tokio::test]
    async fn test_health_unknown_without_signals() {
        let store = MemorySignalStore::new();
        assert_eq!(store.health("missing").await.unwrap(), Status::Unknown);
        assert!(store.latest("missing", 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clean_old_respects_retention() {
        let store = MemorySignalStore::with_retention_days(14);
        let expired = signal_at(Status::Unhealthy, Duration::days(20));
        let recent = signal_at(Status::Healthy, Duration::days(1));

        store.save(&expired).await.unwrap();
        store.save(&recent).await.unwrap();

        let deleted = store.clean_old().await.unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.latest("alarm", 10).await.unwrap(), vec![recent]);
    }

    #[tokio::test]
    async fn test_clean_drops_stale_last_signal() {
        let store = MemorySignalStore::with_retention_days(14);
        store
            .save(&signal_at(Status::Healthy, Duration::days(30)))
            .await
            .unwrap();

        store.clean_old().await.unwrap();

        assert_eq!(store.health("alarm").await.unwrap(), Status::Unknown);
        assert!(store.is_empty().await);
    }
}
