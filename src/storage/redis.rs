//! Redis signal store
//!
//! Sorted-set layout, shared by every hub pointing at the same server:
//!
//! ```text
//! signals:{alarm_id}   ZSET  score = Unix millis, member = JSON row
//! last:{alarm_id}      STRING  JSON row of the newest signal
//! ```
//!
//! A save replaces whatever was stored under the same millisecond and only
//! moves `last:` forward in time. Both happen in one server-side script, so
//! concurrent workers never observe half a write.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::AsyncCommands;
use redis::aio::ConnectionManager;
use tracing::{debug, info, instrument, warn};

use crate::signal::{Signal, Status};

use super::backend::{DEFAULT_RETENTION_DAYS, HealthStatus, SignalStore, retention_from_days};
use super::error::{StorageError, StorageResult};
use super::schema::{SignalRow, timestamp_to_millis};

const SIGNALS_PREFIX: &str = "signals:";
const LAST_PREFIX: &str = "last:";

const SCAN_BATCH: usize = 100;

/// KEYS: log, last. ARGV: timestamp millis, encoded row.
const SAVE_SCRIPT: &str = r#"
redis.call('ZREMRANGEBYSCORE', KEYS[1], ARGV[1], ARGV[1])
redis.call('ZADD', KEYS[1], ARGV[1], ARGV[2])
local last = redis.call('GET', KEYS[2])
if (not last) or tonumber(cjson.decode(last).timestamp) <= tonumber(ARGV[1]) then
    redis.call('SET', KEYS[2], ARGV[2])
end
return 1
"#;

/// KEYS: last. ARGV: cutoff millis. Drops the entry if it predates the cutoff.
const EXPIRE_LAST_SCRIPT: &str = r#"
local last = redis.call('GET', KEYS[1])
if last and tonumber(cjson.decode(last).timestamp) < tonumber(ARGV[1]) then
    return redis.call('DEL', KEYS[1])
end
return 0
"#;

fn signals_key(alarm_id: &str) -> String {
    format!("{SIGNALS_PREFIX}{alarm_id}")
}

fn last_key(alarm_id: &str) -> String {
    format!("{LAST_PREFIX}{alarm_id}")
}

/// Score bound matching everything strictly older than `millis`
fn older_than(millis: i64) -> String {
    format!("({millis}")
}

fn encode(row: &SignalRow) -> StorageResult<String> {
    serde_json::to_string(row).map_err(|e| StorageError::QueryFailed(e.to_string()))
}

fn decode(member: &str) -> StorageResult<Signal> {
    serde_json::from_str::<SignalRow>(member)
        .map_err(|e| StorageError::CorruptRow(e.to_string()))?
        .into_signal()
}

/// Redis signal store
pub struct RedisSignalStore {
    conn: ConnectionManager,
    url: String,
    save_script: redis::Script,
    expire_last_script: redis::Script,
    retention: chrono::Duration,
}

impl RedisSignalStore {
    pub async fn new(url: &str) -> StorageResult<Self> {
        Self::with_retention_days(url, DEFAULT_RETENTION_DAYS).await
    }

    #[instrument(skip_all)]
    pub async fn with_retention_days(url: &str, retention_days: u32) -> StorageResult<Self> {
        let client = redis::Client::open(url)
            .map_err(|e| StorageError::InvalidConfig(format!("invalid redis url: {e}")))?;

        let host = client.get_connection_info().addr.to_string();
        info!("initializing Redis signal store at: {}", host);

        let mut conn = ConnectionManager::new(client)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        let _: String = redis::cmd("PING")
            .query_async(&mut conn)
            .await
            .map_err(|e| StorageError::ConnectionFailed(e.to_string()))?;

        Ok(Self {
            conn,
            url: host,
            save_script: redis::Script::new(SAVE_SCRIPT),
            expire_last_script: redis::Script::new(EXPIRE_LAST_SCRIPT),
            retention: retention_from_days(retention_days),
        })
    }

    async fn signal_keys(&self) -> StorageResult<Vec<String>> {
        let mut conn = self.conn.clone();
        let mut keys = Vec::new();
        let mut cursor: u64 = 0;

        loop {
            let (next, batch): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(format!("{SIGNALS_PREFIX}*"))
                .arg("COUNT")
                .arg(SCAN_BATCH)
                .query_async(&mut conn)
                .await?;

            keys.extend(batch);
            if next == 0 {
                return Ok(keys);
            }
            cursor = next;
        }
    }
}

#[async_trait]
impl SignalStore for RedisSignalStore {
    #[instrument(skip(self, signal), fields(alarm_id = %signal.alarm_id))]
    async fn save(&self, signal: &Signal) -> StorageResult<()> {
        let row = SignalRow::from_signal(signal);
        let member = encode(&row)?;

        let mut conn = self.conn.clone();
        let _: i64 = self
            .save_script
            .key(signals_key(&row.alarm_id))
            .key(last_key(&row.alarm_id))
            .arg(row.timestamp)
            .arg(member)
            .invoke_async(&mut conn)
            .await?;

        debug!("saved {} signal", row.status);
        Ok(())
    }

    #[instrument(skip(self))]
    async fn latest(&self, alarm_id: &str, limit: usize) -> StorageResult<Vec<Signal>> {
        if limit == 0 {
            return Ok(vec![]);
        }

        let stop = isize::try_from(limit - 1).unwrap_or(isize::MAX);
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.zrevrange(signals_key(alarm_id), 0, stop).await?;

        members.iter().map(|member| decode(member)).collect()
    }

    #[instrument(skip(self))]
    async fn health(&self, alarm_id: &str) -> StorageResult<Status> {
        let mut conn = self.conn.clone();
        let last: Option<String> = conn.get(last_key(alarm_id)).await?;

        match last {
            Some(last) => Ok(decode(&last)?.status),
            None => Ok(self
                .latest(alarm_id, 1)
                .await?
                .first()
                .map(|signal| signal.status)
                .unwrap_or(Status::Unknown)),
        }
    }

    #[instrument(skip(self), fields(before = %before))]
    async fn clean_before(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        let before_millis = timestamp_to_millis(&before);

        info!("cleaning up signals older than {}", before);

        let mut conn = self.conn.clone();
        let mut deleted = 0;
        for key in self.signal_keys().await? {
            let removed: usize = conn.zrembyscore(&key, "-inf", older_than(before_millis)).await?;
            deleted += removed;

            if let Some(alarm_id) = key.strip_prefix(SIGNALS_PREFIX) {
                let _: i64 = self
                    .expire_last_script
                    .key(last_key(alarm_id))
                    .arg(before_millis)
                    .invoke_async(&mut conn)
                    .await?;
            }
        }

        info!("deleted {} old signals", deleted);
        Ok(deleted)
    }

    fn retention(&self) -> chrono::Duration {
        self.retention
    }

    #[instrument(skip(self))]
    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let mut conn = self.conn.clone();
        let pong: redis::RedisResult<String> = redis::cmd("PING").query_async(&mut conn).await;

        match pong {
            Ok(_) => Ok(HealthStatus {
                healthy: true,
                message: "Redis signal store operational".to_string(),
                metadata: HashMap::from([
                    ("backend".to_string(), "redis".to_string()),
                    ("host".to_string(), self.url.clone()),
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
        // the connection manager closes with its last clone
        info!("closing Redis signal store");
        Ok(())
    }
}
