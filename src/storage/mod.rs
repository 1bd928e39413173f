//! Signal stores
//!
//! Every check outcome ends up here. The [`SignalStore`] trait is the only
//! contract the pipeline, the dashboard publisher and the cleanup task rely
//! on.
//!
//! ## Backends
//!
//! - **In-Memory**: no persistence, for tests or throwaway hubs
//! - **SQLite** (default): embedded, single node
//! - **MySQL**: shared database for several hubs
//! - **Redis**: sorted sets per alarm, shared between hubs
//!
//! ## Usage
//!
//! ```no_run
//! use vigil::config::StorageConfig;
//! use vigil::storage::create_signal_store;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let store = create_signal_store(&StorageConfig::default()).await?;
//!     let health = store.health("api-health").await?;
//!     Ok(())
//! }
//! ```

pub mod backend;
pub mod error;
pub mod memory;
pub mod schema;

#[cfg(feature = "storage-mysql")]
pub mod mysql;
#[cfg(feature = "storage-redis")]
pub mod redis;
#[cfg(feature = "storage-sqlite")]
pub mod sqlite;

use std::sync::Arc;

use tracing::info;

pub use backend::{DEFAULT_RETENTION_DAYS, HealthStatus, SignalStore};
pub use error::{StorageError, StorageResult};
pub use memory::MemorySignalStore;

use crate::config::StorageConfig;

/// Build the signal store selected in the configuration
pub async fn create_signal_store(config: &StorageConfig) -> StorageResult<Arc<dyn SignalStore>> {
    match config {
        StorageConfig::None { retention_days } => {
            info!("using in-memory signal store (no persistence)");
            Ok(Arc::new(MemorySignalStore::with_retention_days(*retention_days)))
        }

        #[cfg(feature = "storage-sqlite")]
        StorageConfig::Sqlite {
            path,
            retention_days,
        } => Ok(Arc::new(
            sqlite::SqliteSignalStore::with_retention_days(path, *retention_days).await?,
        )),

        #[cfg(feature = "storage-mysql")]
        StorageConfig::Mysql {
            url,
            retention_days,
        } => Ok(Arc::new(
            mysql::MySqlSignalStore::with_retention_days(url, *retention_days).await?,
        )),

        #[cfg(feature = "storage-redis")]
        StorageConfig::Redis {
            url,
            retention_days,
        } => Ok(Arc::new(
            self::redis::RedisSignalStore::with_retention_days(url, *retention_days).await?,
        )),

        #[allow(unreachable_patterns)]
        other => Err(StorageError::InvalidConfig(format!(
            "storage backend {other:?} is not enabled in this build"
        ))),
    }
}
