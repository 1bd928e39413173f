//! Typed access to loosely-typed sentinel configuration
//!
//! Alarm config maps come from generic deserialization, so an integer may
//! arrive as `200`, `200.0` or `"200"`. Every sentinel reads its settings
//! through these helpers so that coercion happens in exactly one place.

use serde_json::Value;

use crate::alarm::ConfigMap;

use super::SentinelError;

/// Coerce a JSON value into an integer
///
/// Accepts integers, floats without a fractional part and numeric strings.
pub fn as_int(value: &Value) -> Option<i64> {
    match value {
        Value::Number(number) => number
            .as_i64()
            .or_else(|| number.as_u64().and_then(|n| i64::try_from(n).ok()))
            .or_else(|| number.as_f64().and_then(float_to_int)),
        Value::String(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().and_then(float_to_int))
        }
        _ => None,
    }
}

fn float_to_int(value: f64) -> Option<i64> {
    if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

/// Canonical string form of a scalar (`3.0` → `"3"`, `"up"` → `"up"`)
pub fn as_scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(text) => Some(text.clone()),
        Value::Bool(flag) => Some(flag.to_string()),
        Value::Number(_) => Some(
            as_int(value)
                .map(|n| n.to_string())
                .unwrap_or_else(|| value.to_string()),
        ),
        _ => None,
    }
}

pub fn required_str(config: &ConfigMap, key: &str) -> Result<String, SentinelError> {
    match config.get(key) {
        None | Some(Value::Null) => Err(SentinelError::MissingKey(key.to_string())),
        Some(Value::String(text)) if text.trim().is_empty() => {
            Err(SentinelError::MissingKey(key.to_string()))
        }
        Some(Value::String(text)) => Ok(text.clone()),
        Some(_) => Err(SentinelError::invalid(key, "a string")),
    }
}

pub fn optional_str(config: &ConfigMap, key: &str) -> Result<Option<String>, SentinelError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) => Ok(Some(text.clone())),
        Some(_) => Err(SentinelError::invalid(key, "a string")),
    }
}

pub fn required_int(config: &ConfigMap, key: &str) -> Result<i64, SentinelError> {
    match config.get(key) {
        None | Some(Value::Null) => Err(SentinelError::MissingKey(key.to_string())),
        Some(value) => as_int(value).ok_or_else(|| SentinelError::invalid(key, "an integer")),
    }
}

pub fn optional_int(config: &ConfigMap, key: &str, default: i64) -> Result<i64, SentinelError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(value) => as_int(value).ok_or_else(|| SentinelError::invalid(key, "an integer")),
    }
}

pub fn optional_bool(config: &ConfigMap, key: &str, default: bool) -> Result<bool, SentinelError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(Value::Bool(flag)) => Ok(*flag),
        Some(Value::String(text)) => text
            .trim()
            .parse()
            .map_err(|_| SentinelError::invalid(key, "a boolean")),
        Some(_) => Err(SentinelError::invalid(key, "a boolean")),
    }
}

pub fn required_map<'a>(config: &'a ConfigMap, key: &str) -> Result<&'a ConfigMap, SentinelError> {
    match config.get(key) {
        None | Some(Value::Null) => Err(SentinelError::MissingKey(key.to_string())),
        Some(Value::Object(map)) => Ok(map),
        Some(_) => Err(SentinelError::invalid(key, "a map")),
    }
}

pub fn optional_map<'a>(
    config: &'a ConfigMap,
    key: &str,
) -> Result<Option<&'a ConfigMap>, SentinelError> {
    match config.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(SentinelError::invalid(key, "a map")),
    }
}

/// A non-empty scalar compared by its string form
pub fn required_scalar(config: &ConfigMap, key: &str) -> Result<String, SentinelError> {
    match config.get(key) {
        None | Some(Value::Null) => Err(SentinelError::MissingKey(key.to_string())),
        Some(value) => match as_scalar_string(value) {
            Some(text) if text.is_empty() => Err(SentinelError::MissingKey(key.to_string())),
            Some(text) => Ok(text),
            None => Err(SentinelError::invalid(key, "a string or number")),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn map(value: Value) -> ConfigMap {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_as_int_accepts_loose_numbers() {
        assert_eq!(as_int(&json!(200)), Some(200));
        assert_eq!(as_int(&json!(200.0)), Some(200));
        assert_eq!(as_int(&json!("200")), Some(200));
        assert_eq!(as_int(&json!("1e3")), Some(1000));
        assert_eq!(as_int(&json!(-5)), Some(-5));
    }

    #[test]
    fn test_as_int_rejects_fractions_and_non_numbers() {
        assert_eq!(as_int(&json!(200.5)), None);
        assert_eq!(as_int(&json!("abc")), None);
        assert_eq!(as_int(&json!(true)), None);
        assert_eq!(as_int(&json!(null)), None);
        assert_eq!(as_int(&json!(u64::MAX)), None);
    }

    #[test]
    fn test_required_str() {
        let config = map(json!({ "url": "https://x", "empty": "", "number": 3 }));
        assert_eq!(required_str(&config, "url").unwrap(), "https://x");
        assert!(matches!(required_str(&config, "empty"), Err(SentinelError::MissingKey(_))));
        assert!(matches!(required_str(&config, "missing"), Err(SentinelError::MissingKey(_))));
        assert!(matches!(required_str(&config, "number"), Err(SentinelError::InvalidKey { .. })));
    }

    #[test]
    fn test_required_scalar_canonical_form() {
        let config = map(json!({ "a": 3.0, "b": "ok", "c": 2.5, "d": "", "e": [] }));
        assert_eq!(required_scalar(&config, "a").unwrap(), "3");
        assert_eq!(required_scalar(&config, "b").unwrap(), "ok");
        assert_eq!(required_scalar(&config, "c").unwrap(), "2.5");
        assert!(required_scalar(&config, "d").is_err());
        assert!(required_scalar(&config, "e").is_err());
    }

    #[test]
    fn test_optional_helpers_defaults() {
        let config = map(json!({ "port": 5433.0, "verify": "true" }));
        assert_eq!(optional_int(&config, "port", 5432).unwrap(), 5433);
        assert_eq!(optional_int(&config, "missing", 5432).unwrap(), 5432);
        assert!(optional_bool(&config, "verify", false).unwrap());
        assert!(optional_map(&config, "tunnel").unwrap().is_none());
        assert!(required_map(&config, "port").is_err());
    }
}
