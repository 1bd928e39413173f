//! MySQL signal store
//!
//! Shared relational store for multi-node deployments. Same schema and
//! semantics as the SQLite store; the last-signal upsert keeps whichever row
//! carries the newer timestamp.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::{MySql, Pool, Row};
use tracing::{debug, info, instrument, warn};

use crate::signal::{Signal, Status};

use super::backend::{DEFAULT_RETENTION_DAYS, HealthStatus, SignalStore, retention_from_days};
use super::error::{StorageError, StorageResult};
use super::schema::{SignalRow, timestamp_to_millis};

pub struct MySqlSignalStore {
    pool: Pool<MySql>,
    retention: chrono::Duration,
}

impl MySqlSignalStore {
    pub async fn new(url: &str) -> StorageResult<Self> {
        Self::with_retention_days(url, DEFAULT_RETENTION_DAYS).await
    }

    #[instrument(skip_all)]
    pub async fn with_retention_days(url: &str, retention_days: u32) -> StorageResult<Self> {
        let options: MySqlConnectOptions = url
            .parse()
            .map_err(|e: sqlx::Error| StorageError::InvalidConfig(e.to_string()))?;

        info!("initializing MySQL signal store");

        let pool = MySqlPoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations/mysql").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            retention: retention_from_days(retention_days),
        })
    }
}

#[async_trait]
impl SignalStore for MySqlSignalStore {
    #[instrument(skip(self, signal), fields(alarm_id = %signal.alarm_id))]
    async fn save(&self, signal: &Signal) -> StorageResult<()> {
        let row = SignalRow::from_signal(signal);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO signals (alarm_id, status, message, timestamp)
            VALUES (?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                status = VALUES(status),
                message = VALUES(message)
            "#,
        )
        .bind(&row.alarm_id)
        .bind(&row.status)
        .bind(&row.message)
        .bind(row.timestamp)
        .execute(&mut *tx)
        .await?;

        // timestamp must be assigned last, the other columns compare against the old value
        sqlx::query(
            r#"
            INSERT INTO last_signals (alarm_id, status, message, timestamp)
            VALUES (?, ?, ?, ?)
            ON DUPLICATE KEY UPDATE
                status = IF(VALUES(timestamp) >= timestamp, VALUES(status), status),
                message = IF(VALUES(timestamp) >= timestamp, VALUES(message), message),
                timestamp = GREATEST(timestamp, VALUES(timestamp))
            "#,
        )
        .bind(&row.alarm_id)
        .bind(&row.status)
        .bind(&row.message)
        .bind(row.timestamp)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!("saved {} signal", row.status);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest(&self, alarm_id: &str, limit: usize) -> StorageResult<Vec<Signal>> {
        let rows = sqlx::query(
            r#"
            SELECT alarm_id, status, message, timestamp
            FROM signals
            WHERE alarm_id = ?
            ORDER BY timestamp DESC
            LIMIT ?
            "#,
        )
        .bind(alarm_id)
        .bind(u64::try_from(limit).unwrap_or(u64::MAX))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|row| {
                SignalRow {
                    alarm_id: row.get("alarm_id"),
                    status: row.get("status"),
                    message: row.get("message"),
                    timestamp: row.get("timestamp"),
                }
                .into_signal()
            })
            .collect()
    }

    #[instrument(skip(self))]
    async fn health(&self, alarm_id: &str) -> StorageResult<Status> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM last_signals WHERE alarm_id = ?")
                .bind(alarm_id)
                .fetch_optional(&self.pool)
                .await?;

        match status {
            Some(status) => status
                .parse()
                .map_err(|e: anyhow::Error| StorageError::CorruptRow(e.to_string())),
            None => Ok(Status::Unknown),
        }
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn clean_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let before_millis = timestamp_to_millis(&before);

        info!("cleaning up signals older than {}", before);

        let result = sqlx::query("DELETE FROM signals WHERE timestamp < ?")
            .bind(before_millis)
            .execute(&self.pool)
            .await?;

        sqlx::query("DELETE FROM last_signals WHERE timestamp < ?")
            .bind(before_millis)
            .execute(&self.pool)
            .await?;

        let deleted = result.rows_affected() as usize;
        info!("deleted {} old signals", deleted);

        Ok(deleted)
    }

    fn retention(&self) -> chrono::Duration {
        self.retention
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        match sqlx::query("SELECT 1").fetch_one(&self.pool).await {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "MySQL signal store operational".to_string(),
                metadata: HashMap::from([("backend".to_string(), "mysql".to_string())]),
            }),
            Err(e) => {
                warn!("health check failed: {}", e);
                Ok(HealthStatus {
                    healthy: false,
                    message: format!("health check failed: {}", e),
                    metadata: HashMap::new(),
                })
            }
        }
    }

    async fn close(&self) -> StorageResult<()> {
        info!("closing MySQL signal store");
        self.pool.close().await;
        Ok(())
    }
}
