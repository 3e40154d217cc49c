//! Tolerant field decoders for platform payloads.
//!
//! The platform is inconsistent about shapes: ids arrive as strings or
//! numbers, authors and channels as a bare name or an object.

use serde::de::Error;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

/// String or number; `null` becomes empty
pub fn string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        Value::Null => Ok(String::new()),
        other => Err(D::Error::custom(format!(
            "expected string or number, got {}",
            other
        ))),
    }
}

/// String or number; `null` and empty strings become `None`
pub fn opt_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    })
}

/// Bare name, or an object carrying `name`, `username` or `display_name`
pub fn name<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(name_of(&Value::deserialize(deserializer)?))
}

pub fn name_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Object(map) => ["name", "username", "display_name"]
            .iter()
            .find_map(|key| map.get(*key).and_then(Value::as_str))
            .unwrap_or_default()
            .to_string(),
        _ => String::new(),
    }
}

/// A count given as a number, a numeric string or the list itself
pub fn count<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    Ok(match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_u64().unwrap_or(0),
        Value::Array(items) => items.len() as u64,
        Value::String(s) => s.trim().parse().unwrap_or(0),
        _ => 0,
    })
}
