//! Scoped database connections

use std::time::Duration;

use futures::future::BoxFuture;
use sqlx::mysql::{MySqlConnectOptions, MySqlConnection, MySqlRow};
use sqlx::postgres::{PgConnectOptions, PgConnection, PgRow, PgSslMode};
use sqlx::{Column, Connection, Row, TypeInfo};
use tracing::{debug, instrument, trace};

use super::tunnel::SshTunnel;
use super::{ConnectionError, DatabaseConfig, DbDriver, ScalarValue};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Opens connections described by a [`DatabaseConfig`]
///
/// Stateless and cheap to clone; every connection it hands out belongs to
/// exactly one caller.
#[derive(Debug, Clone, Default)]
pub struct ConnectionManager;

impl ConnectionManager {
    pub fn new() -> Self {
        Self
    }

    /// Open a connection, tunnelled when the config carries a tunnel
    ///
    /// Prefer [`ConnectionManager::with_connection`], which guarantees the
    /// graceful close.
    #[instrument(skip(self, config), fields(driver = %config.driver, host = %config.host))]
    pub async fn open(&self, config: &DatabaseConfig) -> Result<ScopedConnection, ConnectionError> {
        let tunnel = match &config.tunnel {
            Some(tunnel_config) => {
                Some(SshTunnel::open(tunnel_config, &config.host, config.port).await?)
            }
            None => None,
        };

        let (host, port) = match &tunnel {
            Some(tunnel) => ("127.0.0.1".to_string(), tunnel.local_addr().port()),
            None => (config.host.clone(), config.port),
        };

        // on failure the tunnel is dropped here, which stops its forwarder
        let connection = tokio::time::timeout(CONNECT_TIMEOUT, connect(config, &host, port))
            .await
            .map_err(|_| {
                ConnectionError::Connect(format!(
                    "timed out after {}s connecting to {}",
                    CONNECT_TIMEOUT.as_secs(),
                    config.host
                ))
            })??;

        debug!("connected to {} database {}", config.driver, config.database);

        Ok(ScopedConnection {
            connection: Some(connection),
            tunnel,
        })
    }

    /// Run `f` with an open connection and close it afterwards, whatever `f` returned
    pub async fn with_connection<T, F>(
        &self,
        config: &DatabaseConfig,
        f: F,
    ) -> Result<T, ConnectionError>
    where
        F: for<'c> FnOnce(&'c mut DbConnection) -> BoxFuture<'c, T> + Send,
    {
        let mut scoped = self.open(config).await?;
        let result = match scoped.connection.as_mut() {
            Some(connection) => Ok(f(connection).await),
            None => Err(ConnectionError::Connect("connection already closed".to_string())),
        };
        scoped.close().await;
        result
    }
}

async fn connect(
    config: &DatabaseConfig,
    host: &str,
    port: u16,
) -> Result<DbConnection, ConnectionError> {
    let connection = match config.driver {
        DbDriver::MySql => {
            let options = MySqlConnectOptions::new()
                .host(host)
                .port(port)
                .username(&config.user)
                .password(&config.password)
                .database(&config.database);
            let mut connection = MySqlConnection::connect_with(&options)
                .await
                .map_err(|e| ConnectionError::Connect(e.to_string()))?;
            connection
                .ping()
                .await
                .map_err(|e| ConnectionError::Connect(e.to_string()))?;
            DbConnection::MySql(connection)
        }
        DbDriver::Postgres => {
            let mut options = PgConnectOptions::new()
                .host(host)
                .port(port)
                .username(&config.user)
                .password(&config.password)
                .database(&config.database);
            if let Some(mode) = &config.ssl_mode {
                let mode: PgSslMode = mode
                    .parse()
                    .map_err(|e: sqlx::Error| ConnectionError::Connect(e.to_string()))?;
                options = options.ssl_mode(mode);
            }
            if let Some(cert) = &config.ssl_root_cert {
                options = options.ssl_root_cert(cert.as_str());
            }
            let mut connection = PgConnection::connect_with(&options)
                .await
                .map_err(|e| ConnectionError::Connect(e.to_string()))?;
            connection
                .ping()
                .await
                .map_err(|e| ConnectionError::Connect(e.to_string()))?;
            DbConnection::Postgres(connection)
        }
    };

    Ok(connection)
}

/// A live database connection and the tunnel it runs through
///
/// Dropping it without [`ScopedConnection::close`] still releases the
/// sockets, just without a graceful goodbye.
pub struct ScopedConnection {
    connection: Option<DbConnection>,
    tunnel: Option<SshTunnel>,
}

impl ScopedConnection {
    pub fn connection(&mut self) -> Option<&mut DbConnection> {
        self.connection.as_mut()
    }

    /// Close the database connection, then the tunnel
    pub async fn close(mut self) {
        if let Some(connection) = self.connection.take() {
            if let Err(e) = connection.close().await {
                trace!("database close failed: {e}");
            }
        }
        if let Some(tunnel) = self.tunnel.take() {
            tunnel.close().await;
        }
    }
}

pub enum DbConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
}

impl DbConnection {
    /// First column of the first row, `None` when the query returned no rows
    pub async fn query_scalar(&mut self, query: &str) -> Result<Option<ScalarValue>, sqlx::Error> {
        match self {
            DbConnection::MySql(connection) => {
                let row = sqlx::query(query).fetch_optional(&mut *connection).await?;
                row.map(|row| mysql_scalar(&row)).transpose()
            }
            DbConnection::Postgres(connection) => {
                let row = sqlx::query(query).fetch_optional(&mut *connection).await?;
                row.map(|row| postgres_scalar(&row)).transpose()
            }
        }
    }

    async fn close(self) -> Result<(), sqlx::Error> {
        match self {
            DbConnection::MySql(connection) => connection.close().await,
            DbConnection::Postgres(connection) => connection.close().await,
        }
    }
}

/// Try each Rust type in turn until one is compatible with the column
macro_rules! decode_first_column {
    ($row:expr, $($ty:ty => $convert:expr),+ $(,)?) => {{
        if $row.columns().is_empty() {
            return Err(sqlx::Error::ColumnNotFound("0".to_string()));
        }
        $(
            if let Ok(value) = $row.try_get::<Option<$ty>, _>(0) {
                return Ok(value.map($convert).unwrap_or(ScalarValue::Null));
            }
        )+
        let type_name = $row.column(0).type_info().name().to_string();
        Err(sqlx::Error::Decode(
            format!("unsupported column type {type_name}").into(),
        ))
    }};
}

fn mysql_scalar(row: &MySqlRow) -> Result<ScalarValue, sqlx::Error> {
    decode_first_column!(
        row,
        i64 => ScalarValue::Int,
        i32 => |n: i32| ScalarValue::Int(n.into()),
        i16 => |n: i16| ScalarValue::Int(n.into()),
        i8 => |n: i8| ScalarValue::Int(n.into()),
        u64 => |n: u64| i64::try_from(n).map(ScalarValue::Int).unwrap_or(ScalarValue::Text(n.to_string())),
        u32 => |n: u32| ScalarValue::Int(n.into()),
        f64 => ScalarValue::Float,
        f32 => |n: f32| ScalarValue::Float(n.into()),
        bool => ScalarValue::Bool,
        String => ScalarValue::Text,
    )
}

fn postgres_scalar(row: &PgRow) -> Result<ScalarValue, sqlx::Error> {
    decode_first_column!(
        row,
        i64 => ScalarValue::Int,
        i32 => |n: i32| ScalarValue::Int(n.into()),
        i16 => |n: i16| ScalarValue::Int(n.into()),
        f64 => ScalarValue::Float,
        f32 => |n: f32| ScalarValue::Float(n.into()),
        bool => ScalarValue::Bool,
        String => ScalarValue::Text,
    )
}
