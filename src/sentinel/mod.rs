//! Sentinels - pluggable check strategies
//!
//! A sentinel is built fresh for every check: the registry constructs it,
//! [`Sentinel::configure`] validates the alarm's config map, and
//! [`Sentinel::check`] probes the target once.
//!
//! ## Outcome vs. error
//!
//! ```text
//! target answered, but wrongly     → Ok(Signal { status: Unhealthy, .. })
//! target unreachable / timed out   → Ok(Signal { status: Unhealthy, .. })
//! result could not be interpreted  → Ok(Signal { status: Unknown, .. })
//! sentinel itself unusable         → Err(SentinelError)
//! ```
//!
//! A problem with the monitored target is never a function error.

pub mod config;
pub mod endpoint;
pub mod queue_depth;
pub mod registry;
pub mod sql;

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::alarm::ConfigMap;
use crate::signal::Signal;

pub use registry::SentinelRegistry;

/// Errors raised by sentinels
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SentinelError {
    #[error("unknown sentinel type: {0}")]
    UnknownType(String),

    #[error("missing required config key '{0}'")]
    MissingKey(String),

    #[error("config key '{key}' must be {expected}")]
    InvalidKey { key: String, expected: &'static str },

    #[error("invalid config: {0}")]
    InvalidConfig(String),

    #[error("sentinel was not configured before checking")]
    NotConfigured,

    #[error("{0}")]
    Unsupported(String),
}

impl SentinelError {
    pub(crate) fn invalid(key: &str, expected: &'static str) -> Self {
        SentinelError::InvalidKey {
            key: key.to_string(),
            expected,
        }
    }

    /// Errors that stay the same no matter how often the check is retried
    pub fn is_configuration(&self) -> bool {
        !matches!(self, SentinelError::NotConfigured)
    }
}

/// Execution context of one check
///
/// Carries the deadline every network call of the check has to respect.
#[derive(Debug, Clone, Copy)]
pub struct CheckContext {
    started: Instant,
    timeout: Duration,
}

impl CheckContext {
    pub fn new(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Time left before the check is cancelled
    pub fn remaining(&self) -> Duration {
        self.timeout.saturating_sub(self.started.elapsed())
    }

    /// Bound a sentinel-specific timeout by the remaining check budget
    pub fn bound(&self, timeout: Duration) -> Duration {
        timeout.min(self.remaining())
    }
}

/// A check strategy
#[async_trait]
pub trait Sentinel: Send + Sync {
    /// Validate and store the alarm's config; no network I/O
    fn configure(&mut self, config: &ConfigMap) -> Result<(), SentinelError>;

    /// Probe the target once
    ///
    /// All resources acquired during the check are released before this
    /// returns, including when the future is dropped on timeout.
    async fn check(&self, ctx: &CheckContext, alarm_id: &str) -> Result<Signal, SentinelError>;
}

/// The closed set of built-in sentinels
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SentinelKind {
    Endpoint,
    MySqlCount,
    PostgresCount,
    MySqlQuery,
    PostgresQuery,
    SqsCount,
}

impl SentinelKind {
    pub const ALL: [SentinelKind; 6] = [
        SentinelKind::Endpoint,
        SentinelKind::MySqlCount,
        SentinelKind::PostgresCount,
        SentinelKind::MySqlQuery,
        SentinelKind::PostgresQuery,
        SentinelKind::SqsCount,
    ];

    /// Registry name used in alarm definitions
    pub fn name(&self) -> &'static str {
        match self {
            SentinelKind::Endpoint => "endpoint-checker",
            SentinelKind::MySqlCount => "mysql-count-checker",
            SentinelKind::PostgresCount => "postgres-count-checker",
            SentinelKind::MySqlQuery => "mysql-query-checker",
            SentinelKind::PostgresQuery => "postgres-query-checker",
            SentinelKind::SqsCount => "sqs-count-checker",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.name() == name)
    }

    /// Fresh, unconfigured instance of this sentinel
    pub fn build(&self) -> Box<dyn Sentinel> {
        use crate::connections::DbDriver;

        match self {
            SentinelKind::Endpoint => Box::new(endpoint::EndpointChecker::new()),
            SentinelKind::MySqlCount => Box::new(sql::SqlCountChecker::new(DbDriver::MySql)),
            SentinelKind::PostgresCount => Box::new(sql::SqlCountChecker::new(DbDriver::Postgres)),
            SentinelKind::MySqlQuery => Box::new(sql::SqlValueChecker::new(DbDriver::MySql)),
            SentinelKind::PostgresQuery => Box::new(sql::SqlValueChecker::new(DbDriver::Postgres)),
            SentinelKind::SqsCount => Box::new(queue_depth::QueueDepthChecker::new()),
        }
    }
}
