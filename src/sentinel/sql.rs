//! SQL sentinels (MySQL / Postgres)
//!
//! Both checkers run a single query and look at the first column of the
//! first row:
//!
//! - [`SqlCountChecker`] expects an integer equal to `expected`
//! - [`SqlValueChecker`] compares the value's string form against `expected`
//!
//! ```text
//! connect/tunnel failure   → unhealthy "failed to connect: ..."
//! query failure            → unknown   "failed to execute query: ..."
//! ```

use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use crate::alarm::ConfigMap;
use crate::connections::{ConnectionError, DatabaseConfig, DbDriver, ScalarValue};
use crate::signal::Signal;

use super::config::{required_int, required_map, required_scalar, required_str};
use super::{CheckContext, Sentinel, SentinelError};

/// Outcome of running one query
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SqlError {
    #[error("failed to connect: {0}")]
    Connect(String),

    #[error("failed to execute query: {0}")]
    Query(String),
}

impl From<ConnectionError> for SqlError {
    fn from(err: ConnectionError) -> Self {
        match err {
            ConnectionError::Connect(reason) => SqlError::Connect(reason),
            other => SqlError::Connect(other.to_string()),
        }
    }
}

/// Runs a query against one database
///
/// Implementations must not keep a connection open between calls.
#[async_trait]
pub trait SqlExecutor: Send + Sync {
    /// First column of the first row, `None` when there are no rows
    async fn query_scalar(&self, query: &str) -> Result<Option<ScalarValue>, SqlError>;
}

/// Executor that opens a scoped connection per query
#[cfg(feature = "sql-checkers")]
pub struct ManagedSqlExecutor {
    manager: crate::connections::ConnectionManager,
    config: DatabaseConfig,
}

#[cfg(feature = "sql-checkers")]
impl ManagedSqlExecutor {
    pub fn new(manager: crate::connections::ConnectionManager, config: DatabaseConfig) -> Self {
        Self { manager, config }
    }
}

#[cfg(feature = "sql-checkers")]
#[async_trait]
impl SqlExecutor for ManagedSqlExecutor {
    async fn query_scalar(&self, query: &str) -> Result<Option<ScalarValue>, SqlError> {
        let query = query.to_string();
        self.manager
            .with_connection(&self.config, move |connection| {
                Box::pin(async move { connection.query_scalar(&query).await })
            })
            .await
            .map_err(SqlError::from)?
            .map_err(|e| SqlError::Query(e.to_string()))
    }
}

fn default_executor(config: DatabaseConfig) -> Result<Arc<dyn SqlExecutor>, SentinelError> {
    #[cfg(feature = "sql-checkers")]
    {
        Ok(Arc::new(ManagedSqlExecutor::new(
            crate::connections::ConnectionManager::new(),
            config,
        )))
    }

    #[cfg(not(feature = "sql-checkers"))]
    {
        let _ = config;
        Err(SentinelError::Unsupported(
            "sql checkers are not enabled in this build".to_string(),
        ))
    }
}

/// Shared configure step: connection map + query
struct SqlTarget {
    executor: Arc<dyn SqlExecutor>,
    query: String,
}

impl SqlTarget {
    fn configure(
        driver: DbDriver,
        injected: Option<&Arc<dyn SqlExecutor>>,
        config: &ConfigMap,
    ) -> Result<Self, SentinelError> {
        let connection = DatabaseConfig::from_map(driver, required_map(config, "connection")?)?;
        let query = required_str(config, "query")?;

        let executor = match injected {
            Some(executor) => executor.clone(),
            None => default_executor(connection)?,
        };

        Ok(Self { executor, query })
    }

    /// Run the query, turning failures into the signal they stand for
    async fn run(&self, ctx: &CheckContext, alarm_id: &str) -> Result<Option<ScalarValue>, Signal> {
        let result = tokio::time::timeout(ctx.remaining(), self.executor.query_scalar(&self.query)).await;

        match result {
            Err(_) => Err(Signal::unhealthy(
                alarm_id,
                format!("check timed out after {}s", ctx.timeout().as_secs()),
            )),
            Ok(Err(e @ SqlError::Connect(_))) => Err(Signal::unhealthy(alarm_id, e.to_string())),
            Ok(Err(e @ SqlError::Query(_))) => Err(Signal::unknown(alarm_id, e.to_string())),
            Ok(Ok(value)) => Ok(value),
        }
    }
}

/// Compares an integer query result (usually `COUNT(*)`) against `expected`
pub struct SqlCountChecker {
    driver: DbDriver,
    executor: Option<Arc<dyn SqlExecutor>>,
    target: Option<SqlTarget>,
    expected: i64,
}

impl SqlCountChecker {
    pub fn new(driver: DbDriver) -> Self {
        Self {
            driver,
            executor: None,
            target: None,
            expected: 0,
        }
    }

    pub fn with_executor(driver: DbDriver, executor: Arc<dyn SqlExecutor>) -> Self {
        Self {
            executor: Some(executor),
            ..Self::new(driver)
        }
    }
}

#[async_trait]
impl Sentinel for SqlCountChecker {
    fn configure(&mut self, config: &ConfigMap) -> Result<(), SentinelError> {
        self.expected = required_int(config, "expected")?;
        self.target = Some(SqlTarget::configure(
            self.driver,
            self.executor.as_ref(),
            config,
        )?);
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(driver = %self.driver))]
    async fn check(&self, ctx: &CheckContext, alarm_id: &str) -> Result<Signal, SentinelError> {
        let target = self.target.as_ref().ok_or(SentinelError::NotConfigured)?;

        let value = match target.run(ctx, alarm_id).await {
            Ok(Some(value)) => value,
            Ok(None) => return Ok(Signal::unknown(alarm_id, "query returned no rows")),
            Err(signal) => return Ok(signal),
        };

        let Some(count) = value.as_int() else {
            return Ok(Signal::unknown(
                alarm_id,
                format!("query returned non-numeric value {value}"),
            ));
        };

        let signal = if count == self.expected {
            Signal::healthy(alarm_id, format!("query returned {count}"))
        } else {
            Signal::unhealthy(
                alarm_id,
                format!("query returned {count}, expected {}", self.expected),
            )
        };

        Ok(signal)
    }
}

/// Compares the string form of a query result against `expected`
pub struct SqlValueChecker {
    driver: DbDriver,
    executor: Option<Arc<dyn SqlExecutor>>,
    target: Option<SqlTarget>,
    expected: String,
}

impl SqlValueChecker {
    pub fn new(driver: DbDriver) -> Self {
        Self {
            driver,
            executor: None,
            target: None,
            expected: String::new(),
        }
    }

    pub fn with_executor(driver: DbDriver, executor: Arc<dyn SqlExecutor>) -> Self {
        Self {
            executor: Some(executor),
            ..Self::new(driver)
        }
    }
}

#[async_trait]
impl Sentinel for SqlValueChecker {
    fn configure(&mut self, config: &ConfigMap) -> Result<(), SentinelError> {
        self.expected = required_scalar(config, "expected")?;
        self.target = Some(SqlTarget::configure(
            self.driver,
            self.executor.as_ref(),
            config,
        )?);
        Ok(())
    }

    #[instrument(skip(self, ctx), fields(driver = %self.driver))]
    async fn check(&self, ctx: &CheckContext, alarm_id: &str) -> Result<Signal, SentinelError> {
        let target = self.target.as_ref().ok_or(SentinelError::NotConfigured)?;

        let value = match target.run(ctx, alarm_id).await {
            Ok(Some(value)) => value.to_string(),
            Ok(None) => return Ok(Signal::unhealthy(alarm_id, "query returned no rows")),
            Err(signal) => return Ok(signal),
        };

        let signal = if value == self.expected {
            Signal::healthy(alarm_id, format!("query returned {value}"))
        } else {
            Signal::unhealthy(
                alarm_id,
                format!("query returned {value}, expected {}", self.expected),
            )
        };

        Ok(signal)
    }
}
