//! Database connections for SQL sentinels
//!
//! A connection is opened for exactly one check and closed at the end of it,
//! whatever the outcome. When a tunnel is configured the database is only
//! ever reached through it; there is no silent fallback to a direct
//! connection.
//!
//! ```text
//! DatabaseConfig ──open──▶ [SshTunnel] ──▶ DbConnection ──query──▶ ScalarValue
//!                                 ▲               │
//!                                 └─── close ◀────┘   (always, even on error)
//! ```

#[cfg(feature = "sql-checkers")]
pub mod manager;
#[cfg(feature = "sql-checkers")]
pub mod tunnel;

use std::fmt;

use crate::alarm::ConfigMap;
use crate::sentinel::SentinelError;
use crate::sentinel::config::{optional_int, optional_map, optional_str, required_str};

#[cfg(feature = "sql-checkers")]
pub use manager::{ConnectionManager, ScopedConnection};

const DEFAULT_TUNNEL_PORT: u16 = 22;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DbDriver {
    MySql,
    Postgres,
}

impl DbDriver {
    pub fn default_port(&self) -> u16 {
        match self {
            DbDriver::MySql => 3306,
            DbDriver::Postgres => 5432,
        }
    }
}

impl fmt::Display for DbDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbDriver::MySql => f.write_str("mysql"),
            DbDriver::Postgres => f.write_str("postgres"),
        }
    }
}

/// Errors raised while opening a connection
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("ssh tunnel failed: {0}")]
    Tunnel(String),

    #[error("database connection failed: {0}")]
    Connect(String),

    #[error("{0}")]
    Unsupported(String),
}

/// SSH credentials
#[derive(Clone, PartialEq, Eq)]
pub enum TunnelAuth {
    Password(String),

    /// PEM/OpenSSH encoded private key
    PrivateKey(String),
}

impl fmt::Debug for TunnelAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TunnelAuth::Password(_) => f.write_str("Password(****)"),
            TunnelAuth::PrivateKey(_) => f.write_str("PrivateKey(****)"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TunnelConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub auth: TunnelAuth,
}

#[derive(Clone, PartialEq, Eq)]
pub struct DatabaseConfig {
    pub driver: DbDriver,
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub database: String,

    /// Postgres only: disable, allow, prefer, require, verify-ca, verify-full
    pub ssl_mode: Option<String>,

    /// Postgres only: CA certificate file for verify-ca/verify-full
    pub ssl_root_cert: Option<String>,

    pub tunnel: Option<TunnelConfig>,
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("driver", &self.driver)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("database", &self.database)
            .field("ssl_mode", &self.ssl_mode)
            .field("tunnel", &self.tunnel)
            .finish_non_exhaustive()
    }
}

impl DatabaseConfig {
    /// Validate a `connection` map; purely local, no network I/O
    pub fn from_map(driver: DbDriver, config: &ConfigMap) -> Result<Self, SentinelError> {
        let port = port(config, "port", driver.default_port())?;

        let tunnel = optional_map(config, "tunnel")?
            .map(TunnelConfig::from_map)
            .transpose()?;

        let (ssl_mode, ssl_root_cert) = match driver {
            DbDriver::Postgres => (
                optional_str(config, "sslmode")?,
                optional_str(config, "sslrootcert")?,
            ),
            DbDriver::MySql => (None, None),
        };

        Ok(Self {
            driver,
            host: required_str(config, "host")?,
            port,
            user: required_str(config, "user")?,
            password: required_str(config, "password")?,
            database: required_str(config, "database")?,
            ssl_mode,
            ssl_root_cert,
            tunnel,
        })
    }
}

impl TunnelConfig {
    pub fn from_map(config: &ConfigMap) -> Result<Self, SentinelError> {
        let password = optional_str(config, "password")?.filter(|p| !p.is_empty());
        let private_key = optional_str(config, "private_key_base64")?.filter(|k| !k.is_empty());

        let auth = match (password, private_key) {
            (_, Some(encoded)) => TunnelAuth::PrivateKey(decode_private_key(&encoded)?),
            (Some(password), None) => TunnelAuth::Password(password),
            (None, None) => {
                return Err(SentinelError::InvalidConfig(
                    "tunnel requires either password or private_key_base64".to_string(),
                ));
            }
        };

        Ok(Self {
            host: required_str(config, "host")?,
            port: port(config, "port", DEFAULT_TUNNEL_PORT)?,
            user: required_str(config, "user")?,
            auth,
        })
    }
}

fn port(config: &ConfigMap, key: &str, default: u16) -> Result<u16, SentinelError> {
    let port = optional_int(config, key, default.into())?;
    u16::try_from(port)
        .ok()
        .filter(|port| *port != 0)
        .ok_or_else(|| SentinelError::invalid(key, "a port number"))
}

#[cfg(feature = "sql-checkers")]
fn decode_private_key(encoded: &str) -> Result<String, SentinelError> {
    use base64::Engine;

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .map_err(|_| SentinelError::invalid("private_key_base64", "base64 encoded"))?;
    String::from_utf8(bytes)
        .map_err(|_| SentinelError::invalid("private_key_base64", "a base64 encoded PEM key"))
}

#[cfg(not(feature = "sql-checkers"))]
fn decode_private_key(_encoded: &str) -> Result<String, SentinelError> {
    Err(SentinelError::Unsupported(
        "ssh tunnels are not enabled in this build".to_string(),
    ))
}

/// First column of the first row of a query
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl ScalarValue {
    /// Integer view used by count checks
    pub fn as_int(&self) -> Option<i64> {
        match self {
            ScalarValue::Int(n) => Some(*n),
            ScalarValue::Float(f) if f.fract() == 0.0 && f.is_finite() => Some(*f as i64),
            ScalarValue::Text(text) => text.trim().parse().ok(),
            _ => None,
        }
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScalarValue::Null => f.write_str("NULL"),
            ScalarValue::Bool(flag) => write!(f, "{flag}"),
            ScalarValue::Int(n) => write!(f, "{n}"),
            ScalarValue::Float(value) if value.fract() == 0.0 && value.is_finite() => {
                write!(f, "{}", *value as i64)
            }
            ScalarValue::Float(value) => write!(f, "{value}"),
            ScalarValue::Text(text) => f.write_str(text),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: serde_json::Value) -> ConfigMap {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_default_ports() {
        let config = map(json!({
            "host": "db", "user": "u", "password": "p", "database": "app"
        }));

        let mysql = DatabaseConfig::from_map(DbDriver::MySql, &config).unwrap();
        let postgres = DatabaseConfig::from_map(DbDriver::Postgres, &config).unwrap();

        assert_eq!(mysql.port, 3306);
        assert_eq!(postgres.port, 5432);
        assert!(mysql.tunnel.is_none());
    }

    #[test]
    fn test_missing_field_fails_locally() {
        let config = map(json!({ "host": "db", "user": "u", "database": "app" }));
        let err = DatabaseConfig::from_map(DbDriver::MySql, &config).unwrap_err();
        assert_eq!(err, SentinelError::MissingKey("password".to_string()));
    }

    #[test]
    fn test_tunnel_requires_credentials() {
        let config = map(json!({
            "host": "db", "user": "u", "password": "p", "database": "app",
            "tunnel": { "host": "bastion", "user": "ops" }
        }));
        assert!(matches!(
            DatabaseConfig::from_map(DbDriver::Postgres, &config),
            Err(SentinelError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_tunnel_with_password() {
        let config = map(json!({
            "host": "db", "port": 6543.0, "user": "u", "password": "p", "database": "app",
            "sslmode": "require",
            "tunnel": { "host": "bastion", "user": "ops", "password": "pw" }
        }));

        let db = DatabaseConfig::from_map(DbDriver::Postgres, &config).unwrap();
        let tunnel = db.tunnel.clone().unwrap();

        assert_eq!(db.port, 6543);
        assert_eq!(db.ssl_mode.as_deref(), Some("require"));
        assert_eq!(tunnel.port, 22);
        assert_eq!(tunnel.auth, TunnelAuth::Password("pw".to_string()));
    }

    #[test]
    fn test_debug_hides_secrets() {
        let config = map(json!({
            "host": "db", "user": "u", "password": "hunter2", "database": "app",
            "tunnel": { "host": "bastion", "user": "ops", "password": "hunter3" }
        }));
        let db = DatabaseConfig::from_map(DbDriver::MySql, &config).unwrap();
        let debug = format!("{db:?}");
        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("hunter3"));
    }

    #[test]
    fn test_scalar_display_and_int_view() {
        assert_eq!(ScalarValue::Float(3.0).to_string(), "3");
        assert_eq!(ScalarValue::Float(2.5).to_string(), "2.5");
        assert_eq!(ScalarValue::Text("42".to_string()).as_int(), Some(42));
        assert_eq!(ScalarValue::Null.as_int(), None);
        assert_eq!(ScalarValue::Bool(true).to_string(), "true");
    }
}
