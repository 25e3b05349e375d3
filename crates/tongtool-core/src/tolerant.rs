//! Tolerant decoding of loosely-typed wire scalars.
//!
//! The open API returns numbers as strings, booleans as numbers and `null`
//! for absent values, sometimes within the same endpoint. Each target type
//! gets an explicit coercion dispatching on the observed JSON kind:
//!
//! | Target | String | Bool | Number | Null |
//! |--------|--------|------|--------|------|
//! | numeric | trimmed decimal, empty is zero | `1` / `0` | as is | zero |
//! | `bool` | literal, case-insensitive, empty is `false` | as is | nonzero is `true` | `false` |
//!
//! Use the serde adapters on fields:
//!
//! ```rust
//! use serde::Deserialize;
//!
//! #[derive(Deserialize)]
//! struct Sku {
//!     #[serde(default, deserialize_with = "tongtool_core::tolerant::deserialize")]
//!     price: f64,
//!     #[serde(default, deserialize_with = "tongtool_core::tolerant::deserialize")]
//!     enabled: bool,
//! }
//!
//! let sku: Sku = serde_json::from_str(r#"{"price": " 3.50 ", "enabled": 1}"#).unwrap();
//! assert_eq!(sku.price, 3.5);
//! assert!(sku.enabled);
//! ```

use serde::de::Error as DeError;
use serde::{Deserialize, Deserializer};
use serde_json::Value;
use thiserror::Error;

/// Coercion failure for a wire value.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("cannot parse {text:?} as {target}")]
    Unparseable { text: String, target: &'static str },

    #[error("{value} is out of range for {target}")]
    OutOfRange { value: String, target: &'static str },

    #[error("cannot coerce a JSON {found} into {target}")]
    UnexpectedKind {
        found: &'static str,
        target: &'static str,
    },
}

/// Scalar types that accept any coercible wire representation.
pub trait Tolerant: Sized {
    fn coerce(value: &Value) -> Result<Self, DecodeError>;
}

const fn kind_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn unparseable(text: &str, target: &'static str) -> DecodeError {
    DecodeError::Unparseable {
        text: text.to_owned(),
        target,
    }
}

pub fn coerce_f64(value: &Value) -> Result<f64, DecodeError> {
    match value {
        Value::Null => Ok(0.0),
        Value::Bool(flag) => Ok(if *flag { 1.0 } else { 0.0 }),
        Value::Number(number) => number
            .as_f64()
            .ok_or_else(|| unparseable(&number.to_string(), "f64")),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(0.0);
            }
            trimmed
                .parse::<f64>()
                .ok()
                .filter(|parsed| parsed.is_finite())
                .ok_or_else(|| unparseable(trimmed, "f64"))
        }
        other => Err(DecodeError::UnexpectedKind {
            found: kind_name(other),
            target: "f64",
        }),
    }
}

/// Integral value of a float, if it has no fractional part and fits in `i64`.
fn integral(value: f64) -> Option<i64> {
    if value.fract() == 0.0 && value >= i64::MIN as f64 && value < i64::MAX as f64 {
        Some(value as i64)
    } else {
        None
    }
}

pub fn coerce_i64(value: &Value) -> Result<i64, DecodeError> {
    match value {
        Value::Null => Ok(0),
        Value::Bool(flag) => Ok(i64::from(*flag)),
        Value::Number(number) => {
            if let Some(value) = number.as_i64() {
                Ok(value)
            } else if number.is_u64() {
                Err(DecodeError::OutOfRange {
                    value: number.to_string(),
                    target: "i64",
                })
            } else {
                number
                    .as_f64()
                    .and_then(integral)
                    .ok_or_else(|| unparseable(&number.to_string(), "i64"))
            }
        }
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(0);
            }
            trimmed
                .parse::<i64>()
                .ok()
                .or_else(|| trimmed.parse::<f64>().ok().and_then(integral))
                .ok_or_else(|| unparseable(trimmed, "i64"))
        }
        other => Err(DecodeError::UnexpectedKind {
            found: kind_name(other),
            target: "i64",
        }),
    }
}

pub fn coerce_u64(value: &Value) -> Result<u64, DecodeError> {
    if let Value::Number(number) = value {
        if let Some(value) = number.as_u64() {
            return Ok(value);
        }
    }
    if let Value::String(text) = value {
        if let Ok(value) = text.trim().parse::<u64>() {
            return Ok(value);
        }
    }

    let signed = coerce_i64(value).map_err(|error| match error {
        DecodeError::Unparseable { text, .. } => DecodeError::Unparseable { text, target: "u64" },
        DecodeError::OutOfRange { value, .. } => DecodeError::OutOfRange { value, target: "u64" },
        DecodeError::UnexpectedKind { found, .. } => {
            DecodeError::UnexpectedKind { found, target: "u64" }
        }
    })?;
    u64::try_from(signed).map_err(|_| DecodeError::OutOfRange {
        value: signed.to_string(),
        target: "u64",
    })
}

pub fn coerce_bool(value: &Value) -> Result<bool, DecodeError> {
    match value {
        Value::Null => Ok(false),
        Value::Bool(flag) => Ok(*flag),
        Value::Number(number) => Ok(number.as_f64().is_some_and(|value| value != 0.0)),
        Value::String(text) => {
            let trimmed = text.trim();
            if trimmed.is_empty() {
                return Ok(false);
            }
            match trimmed.to_ascii_lowercase().as_str() {
                "true" | "t" | "1" => Ok(true),
                "false" | "f" | "0" => Ok(false),
                _ => Err(unparseable(trimmed, "bool")),
            }
        }
        other => Err(DecodeError::UnexpectedKind {
            found: kind_name(other),
            target: "bool",
        }),
    }
}

impl Tolerant for f64 {
    fn coerce(value: &Value) -> Result<Self, DecodeError> {
        coerce_f64(value)
    }
}

impl Tolerant for f32 {
    fn coerce(value: &Value) -> Result<Self, DecodeError> {
        coerce_f64(value).map(|value| value as f32)
    }
}

impl Tolerant for i64 {
    fn coerce(value: &Value) -> Result<Self, DecodeError> {
        coerce_i64(value)
    }
}

impl Tolerant for i32 {
    fn coerce(value: &Value) -> Result<Self, DecodeError> {
        let wide = coerce_i64(value)?;
        i32::try_from(wide).map_err(|_| DecodeError::OutOfRange {
            value: wide.to_string(),
            target: "i32",
        })
    }
}

impl Tolerant for u64 {
    fn coerce(value: &Value) -> Result<Self, DecodeError> {
        coerce_u64(value)
    }
}

impl Tolerant for u32 {
    fn coerce(value: &Value) -> Result<Self, DecodeError> {
        let wide = coerce_u64(value)?;
        u32::try_from(wide).map_err(|_| DecodeError::OutOfRange {
            value: wide.to_string(),
            target: "u32",
        })
    }
}

impl Tolerant for bool {
    fn coerce(value: &Value) -> Result<Self, DecodeError> {
        coerce_bool(value)
    }
}

/// serde `deserialize_with` adapter for any [`Tolerant`] field.
///
/// Pair it with `#[serde(default)]` so a missing field also yields zero.
pub fn deserialize<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Tolerant,
{
    let value = Value::deserialize(deserializer)?;
    T::coerce(&value).map_err(D::Error::custom)
}

/// Like [`deserialize`] but keeps `null` and blank strings as `None`.
pub fn deserialize_option<'de, D, T>(deserializer: D) -> Result<Option<T>, D::Error>
where
    D: Deserializer<'de>,
    T: Tolerant,
{
    match Option::<Value>::deserialize(deserializer)? {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => Ok(None),
        Some(value) => T::coerce(&value).map(Some).map_err(D::Error::custom),
    }
}
