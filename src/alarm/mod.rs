//! Alarm definitions
//!
//! An alarm declares what to probe (sentinel type + free-form config), when to
//! probe it (cron expression or plain interval) and whom to tell when its
//! health changes.
//!
//! ## Schedules
//!
//! Exactly one of `cron` and `interval` must be set. Both are normalised into a
//! [`Trigger`] at load time:
//!
//! ```text
//! cron = "*/5 * * * *"     → Trigger::Cron("0 */5 * * * *")
//! interval = "1h30m"       → Trigger::Every(5400s)   (displayed "@every 1h30m0s")
//! ```

pub mod loader;
pub mod repository;

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::util::{format_duration, parse_duration};

pub use repository::{AlarmRepository, MemoryAlarmRepository};

/// Free-form checker configuration, consumed only by the matching sentinel
pub type ConfigMap = serde_json::Map<String, Value>;

/// Replacement for sensitive configuration values in exposed views
pub const MASK: &str = "****";

const SENSITIVE_KEY_PARTS: [&str; 4] = ["password", "secret", "token", "key"];

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_lowercase();
    SENSITIVE_KEY_PARTS.iter().any(|part| key.contains(part))
}

/// Errors raised while validating an alarm definition
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AlarmError {
    #[error("alarm {0} is required")]
    MissingField(&'static str),

    #[error("interval or cron is required")]
    MissingSchedule,

    #[error("interval and cron cannot both be set")]
    ConflictingSchedule,

    #[error("invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    #[error("invalid interval '{interval}': {reason}")]
    InvalidInterval { interval: String, reason: String },
}

/// A monitored target's declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alarm {
    #[serde(default)]
    pub id: String,

    pub name: String,

    #[serde(default)]
    pub description: String,

    /// Grouping segments, derived from the directory an alarm file lives in
    #[serde(default)]
    pub path: Vec<String>,

    /// Registry name of the sentinel that checks this alarm
    #[serde(rename = "type")]
    pub sentinel_type: String,

    #[serde(default)]
    pub config: ConfigMap,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub interval: Option<String>,

    #[serde(default)]
    pub notifications: Notifications,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notifications {
    #[serde(default)]
    pub email: EmailSettings,

    #[serde(default, alias = "slack")]
    pub chat: ChatSettings,

    /// Also notify when a check ends in `unknown`
    #[serde(default)]
    pub notify_missing_signals: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailSettings {
    #[serde(default)]
    pub to: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatSettings {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,
}

impl Notifications {
    pub fn email_enabled(&self) -> bool {
        !self.email.to.is_empty()
    }

    pub fn chat_enabled(&self) -> bool {
        self.chat.webhook_url.as_deref().is_some_and(|url| !url.is_empty())
    }

    /// At least one channel has a destination
    pub fn has_channels(&self) -> bool {
        self.email_enabled() || self.chat_enabled()
    }
}

/// Validated, normalised schedule of an alarm
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Trigger {
    /// Seconds-first cron expression
    Cron(String),

    /// Fixed interval
    Every(Duration),
}

impl Trigger {
    /// Parse a cron expression, accepting 5-field, 6/7-field and `@every <duration>` forms
    pub fn cron(expression: &str) -> Result<Self, AlarmError> {
        let expression = expression.trim();

        if let Some(interval) = expression.strip_prefix("@every ") {
            return Self::every(interval);
        }

        let normalized = if expression.split_whitespace().count() == 5 {
            format!("0 {expression}")
        } else {
            expression.to_string()
        };

        cron::Schedule::from_str(&normalized).map_err(|e| AlarmError::InvalidCron {
            expression: expression.to_string(),
            reason: e.to_string(),
        })?;

        Ok(Trigger::Cron(normalized))
    }

    pub fn every(interval: &str) -> Result<Self, AlarmError> {
        parse_duration(interval)
            .map(Trigger::Every)
            .map_err(|e| AlarmError::InvalidInterval {
                interval: interval.to_string(),
                reason: e.to_string(),
            })
    }

    /// Cron-style rendering, `@every <duration>` for intervals
    pub fn expression(&self) -> String {
        match self {
            Trigger::Cron(expression) => expression.clone(),
            Trigger::Every(duration) => format!("@every {}", format_duration(*duration)),
        }
    }
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.expression())
    }
}

impl Alarm {
    /// Validate the alarm and derive its trigger
    pub fn trigger(&self) -> Result<Trigger, AlarmError> {
        if self.id.trim().is_empty() {
            return Err(AlarmError::MissingField("id"));
        }
        if self.sentinel_type.trim().is_empty() {
            return Err(AlarmError::MissingField("type"));
        }

        let cron = self.cron.as_deref().filter(|c| !c.trim().is_empty());
        let interval = self.interval.as_deref().filter(|i| !i.trim().is_empty());

        match (cron, interval) {
            (Some(_), Some(_)) => Err(AlarmError::ConflictingSchedule),
            (None, None) => Err(AlarmError::MissingSchedule),
            (Some(cron), None) => Trigger::cron(cron),
            (None, Some(interval)) => Trigger::every(interval),
        }
    }

    /// Copy of this alarm with sensitive config values masked
    pub fn masked(&self) -> Alarm {
        Alarm {
            config: mask_config(&self.config),
            ..self.clone()
        }
    }
}

/// Replace every value whose key looks sensitive, recursively through nested maps
pub fn mask_config(config: &ConfigMap) -> ConfigMap {
    config
        .iter()
        .map(|(key, value)| {
            let value = if is_sensitive_key(key) {
                Value::String(MASK.to_string())
            } else {
                mask_value(value)
            };
            (key.clone(), value)
        })
        .collect()
}

fn mask_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(mask_config(map)),
        Value::Array(items) => Value::Array(items.iter().map(mask_value).collect()),
        other => other.clone(),
    }
}
