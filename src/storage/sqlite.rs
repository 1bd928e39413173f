//! SQLite signal store
//!
//! Embedded, file-backed store for single-node deployments.
//!
//! ## Features
//!
//! - **WAL mode**: readers are not blocked while a worker writes
//! - **Connection pooling**: shared by all workers
//! - **Migrations**: schema managed by sqlx (`migrations/sqlite`)

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Pool, Row, Sqlite};
use tracing::{debug, info, instrument, warn};

use crate::signal::{Signal, Status};

use super::backend::{DEFAULT_RETENTION_DAYS, HealthStatus, SignalStore, retention_from_days};
use super::error::{StorageError, StorageResult};
use super::schema::{SignalRow, timestamp_to_millis};

/// SQLite signal store
pub struct SqliteSignalStore {
    pool: Pool<Sqlite>,
    db_path: String,
    retention: chrono::Duration,
}

impl SqliteSignalStore {
    /// Open (or create) the database at `db_path` and run migrations
    ///
    /// ```no_run
    /// # use vigil::storage::sqlite::SqliteSignalStore;
    /// # async fn example() -> anyhow::Result<()> {
    /// let store = SqliteSignalStore::new("./signals.db").await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(db_path: impl AsRef<Path>) -> StorageResult<Self> {
        Self::with_retention_days(db_path, DEFAULT_RETENTION_DAYS).await
    }

    #[instrument(skip_all)]
    pub async fn with_retention_days(
        db_path: impl AsRef<Path>,
        retention_days: u32,
    ) -> StorageResult<Self> {
        let db_path_str = db_path.as_ref().to_string_lossy().to_string();

        info!("initializing SQLite signal store at: {}", db_path_str);

        let options = SqliteConnectOptions::new()
            .filename(&db_path_str)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        debug!("running database migrations");
        sqlx::migrate!("./migrations/sqlite").run(&pool).await?;
        info!("database migrations complete");

        Ok(Self {
            pool,
            db_path: db_path_str,
            retention: retention_from_days(retention_days),
        })
    }
}

#[async_trait]
impl SignalStore for SqliteSignalStore {
    #[instrument(skip(self, signal), fields(alarm_id = %signal.alarm_id))]
    async fn save(&self, signal: &Signal) -> StorageResult<()> {
        let row = SignalRow::from_signal(signal);

        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO signals (alarm_id, status, message, timestamp)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (alarm_id, timestamp) DO UPDATE SET
                status = excluded.status,
                message = excluded.message
            "#,
        )
        .bind(&row.alarm_id)
        .bind(&row.status)
        .bind(&row.message)
        .bind(row.timestamp)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"
            INSERT INTO last_signals (alarm_id, status, message, timestamp)
            VALUES (?, ?, ?, ?)
            ON CONFLICT (alarm_id) DO UPDATE SET
                status = excluded.status,
                message = excluded.message,
                timestamp = excluded.timestamp
            WHERE excluded.timestamp >= last_signals.timestamp
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
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
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
                message: "SQLite signal store operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "sqlite".to_string()),
                    ("db_path".to_string(), self.db_path.clone()),
                ]),
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
        info!("closing SQLite signal store");
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    async fn store() -> (tempfile::TempDir, SqliteSignalStore) {
        let temp_dir = tempfile::tempdir().unwrap();
        let store = SqliteSignalStore::new(temp_dir.path().join("signals.db"))
            .await
            .unwrap();
        (temp_dir, store)
    }

    fn signal(status: Status, age: Duration) -> Signal {
        Signal::new("db-count", status, status.as_str()).at(Utc::now() - age)
    }

    #[tokio::test]
    async fn test_save_and_latest() {
        let (_dir, store) = store().await;
        let first = signal(Status::Healthy, Duration::minutes(2));
        let second = signal(Status::Unhealthy, Duration::minutes(1));

        store.save(&first).await.unwrap();
        store.save(&second).await.unwrap();

        let latest = store.latest("db-count", 2).await.unwrap();
        assert_eq!(latest.len(), 2);
        assert_eq!(latest[0].status, Status::Unhealthy);
        assert_eq!(latest[1].status, Status::Healthy);
    }

    #[tokio::test]
    async fn test_health_tracks_newest_timestamp() {
        let (_dir, store) = store().await;

        store.save(&signal(Status::Unhealthy, Duration::zero())).await.unwrap();
        // a late write of an older execution must not replace the head
        store.save(&signal(Status::Healthy, Duration::minutes(5))).await.unwrap();

        assert_eq!(store.health("db-count").await.unwrap(), Status::Unhealthy);
        assert_eq!(store.health("other").await.unwrap(), Status::Unknown);
    }

    #[tokio::test]
    async fn test_duplicate_save_is_idempotent() {
        let (_dir, store) = store().await;
        let signal = signal(Status::Healthy, Duration::zero());

        store.save(&signal).await.unwrap();
        store.save(&signal).await.unwrap();

        assert_eq!(store.latest("db-count", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_clean_old() {
        let (_dir, store) = store().await;
        store.save(&signal(Status::Healthy, Duration::days(30))).await.unwrap();
        store.save(&signal(Status::Healthy, Duration::days(1))).await.unwrap();

        let deleted = store.clean_old().await.unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(store.latest("db-count", 10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_health_check() {
        let (_dir, store) = store().await;
        let health = store.health_check().await.unwrap();
        assert!(health.healthy);
        assert_eq!(health.metadata.get("backend").unwrap(), "sqlite");
    }
}
