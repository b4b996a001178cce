//! Lenient field decoders for server JSON
//!
//! The server is not strict about scalar types: ids may arrive as numbers or
//! numeric strings, and flags as booleans or `0`/`1`.

use serde::{Deserialize, Deserializer};
use serde_json::Value;

fn value_as_i64(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| n.as_f64().map(|f| f as i64)),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub(crate) fn i64_or_string<'de, D>(deserializer: D) -> Result<i64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_as_i64(&value)
        .ok_or_else(|| serde::de::Error::custom(format!("expected integer, got {value}")))
}

pub(crate) fn opt_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(value.as_ref().and_then(value_as_i64))
}

pub(crate) fn u64_or_string<'de, D>(deserializer: D) -> Result<u64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    value_as_i64(&value)
        .and_then(|n| u64::try_from(n).ok())
        .ok_or_else(|| serde::de::Error::custom(format!("expected size, got {value}")))
}

/// `true`, `1` and `"1"` are all truthy; anything else is false
pub(crate) fn flag<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Bool(b)) => b,
        Some(ref v) => value_as_i64(v) == Some(1) || v.as_str() == Some("true"),
        None => false,
    })
}
