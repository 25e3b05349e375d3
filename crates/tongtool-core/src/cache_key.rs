//! Canonical cache keys for request parameters.
//!
//! Parameters are lowered into a closed set of [`ParamValue`] variants and then
//! encoded recursively:
//!
//! | Variant | Encoding |
//! |---------|----------|
//! | `Null` | nothing |
//! | `Str` | the literal text (empty contributes nothing) |
//! | `Bool` | `true` / `false` |
//! | `Int` / `UInt` | decimal text |
//! | `Float` | decimal text with two fractional digits |
//! | `Seq` | element encodings concatenated in order |
//! | `Map` / `Record` | keys sorted, then `key + encode(value)` concatenated |
//!
//! Map and record ordering never affects the key; sequence ordering does. The
//! encoding is structural, not a hash: distinct values whose concatenated text
//! happens to coincide (`["ab", "c"]` and `["a", "bc"]`) share a key.

use std::collections::{BTreeMap, HashMap};

use serde_json::Value;

/// Parameter value lowered for canonical encoding.
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    UInt(u64),
    Float(f64),
    Str(String),
    Seq(Vec<ParamValue>),
    Map(BTreeMap<String, ParamValue>),
    Record(Vec<(String, ParamValue)>),
}

impl ParamValue {
    /// Builds a record from explicitly enumerated fields.
    pub fn record<'a>(fields: impl IntoIterator<Item = (&'a str, ParamValue)>) -> Self {
        Self::Record(
            fields
                .into_iter()
                .map(|(name, value)| (name.to_owned(), value))
                .collect(),
        )
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        self.encode_into(&mut out);
        out
    }

    pub fn encode_into(&self, out: &mut String) {
        match self {
            Self::Null => {}
            Self::Bool(value) => out.push_str(if *value { "true" } else { "false" }),
            Self::Int(value) => out.push_str(&value.to_string()),
            Self::UInt(value) => out.push_str(&value.to_string()),
            Self::Float(value) => {
                // -0.0 and 0.0 must not produce different keys
                let value = if *value == 0.0 { 0.0 } else { *value };
                out.push_str(&format!("{value:.2}"));
            }
            Self::Str(value) => out.push_str(value),
            Self::Seq(items) => {
                for item in items {
                    item.encode_into(out);
                }
            }
            Self::Map(entries) => {
                for (key, value) in entries {
                    out.push_str(key);
                    value.encode_into(out);
                }
            }
            Self::Record(fields) => {
                let mut sorted: Vec<&(String, ParamValue)> = fields.iter().collect();
                sorted.sort_by(|left, right| left.0.cmp(&right.0));
                for (name, value) in sorted {
                    out.push_str(name);
                    value.encode_into(out);
                }
            }
        }
    }
}

impl From<&Value> for ParamValue {
    fn from(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(value) => Self::Bool(*value),
            Value::Number(number) => {
                if let Some(value) = number.as_i64() {
                    Self::Int(value)
                } else if let Some(value) = number.as_u64() {
                    Self::UInt(value)
                } else {
                    Self::Float(number.as_f64().unwrap_or_default())
                }
            }
            Value::String(value) => Self::Str(value.clone()),
            Value::Array(items) => Self::Seq(items.iter().map(Self::from).collect()),
            Value::Object(entries) => Self::Map(
                entries
                    .iter()
                    .map(|(key, value)| (key.clone(), Self::from(value)))
                    .collect(),
            ),
        }
    }
}

/// Types that can describe themselves as canonical request parameters.
///
/// Request structs implement this by listing their fields with
/// [`ParamValue::record`], using the same names they carry on the wire.
pub trait CanonicalParams {
    fn to_param(&self) -> ParamValue;

    fn canonical_key(&self) -> String {
        self.to_param().encode()
    }
}

/// Cache key for one remote operation: the endpoint path followed by the
/// canonical parameter encoding.
pub fn request_key<P>(path: &str, params: &P) -> String
where
    P: CanonicalParams + ?Sized,
{
    let mut key = String::with_capacity(path.len() + 32);
    key.push_str(path);
    key.push('?');
    params.to_param().encode_into(&mut key);
    key
}

/// [`request_key`] prefixed with the account it was made for, so one cache
/// can be shared between sessions without serving one account's data to
/// another. The scope is length-prefixed to keep distinct scopes apart.
pub fn scoped_request_key<P>(scope: &str, path: &str, params: &P) -> String
where
    P: CanonicalParams + ?Sized,
{
    format!("{}:{scope}{}", scope.len(), request_key(path, params))
}

impl CanonicalParams for ParamValue {
    fn to_param(&self) -> ParamValue {
        self.clone()
    }
}

impl CanonicalParams for Value {
    fn to_param(&self) -> ParamValue {
        ParamValue::from(self)
    }
}

impl CanonicalParams for bool {
    fn to_param(&self) -> ParamValue {
        ParamValue::Bool(*self)
    }
}

macro_rules! signed_params {
    ($($ty:ty),*) => {
        $(impl CanonicalParams for $ty {
            fn to_param(&self) -> ParamValue {
                ParamValue::Int(i64::from(*self))
            }
        })*
    };
}

macro_rules! unsigned_params {
    ($($ty:ty),*) => {
        $(impl CanonicalParams for $ty {
            fn to_param(&self) -> ParamValue {
                ParamValue::UInt(u64::from(*self))
            }
        })*
    };
}

signed_params!(i8, i16, i32, i64);
unsigned_params!(u8, u16, u32, u64);

impl CanonicalParams for usize {
    fn to_param(&self) -> ParamValue {
        ParamValue::UInt(*self as u64)
    }
}

impl CanonicalParams for f32 {
    fn to_param(&self) -> ParamValue {
        ParamValue::Float(f64::from(*self))
    }
}

impl CanonicalParams for f64 {
    fn to_param(&self) -> ParamValue {
        ParamValue::Float(*self)
    }
}

impl CanonicalParams for str {
    fn to_param(&self) -> ParamValue {
        ParamValue::Str(self.to_owned())
    }
}

impl CanonicalParams for String {
    fn to_param(&self) -> ParamValue {
        ParamValue::Str(self.clone())
    }
}

impl<T: CanonicalParams + ?Sized> CanonicalParams for &T {
    fn to_param(&self) -> ParamValue {
        (**self).to_param()
    }
}

impl<T: CanonicalParams> CanonicalParams for Option<T> {
    fn to_param(&self) -> ParamValue {
        self.as_ref().map_or(ParamValue::Null, T::to_param)
    }
}

impl<T: CanonicalParams> CanonicalParams for [T] {
    fn to_param(&self) -> ParamValue {
        ParamValue::Seq(self.iter().map(T::to_param).collect())
    }
}

impl<T: CanonicalParams> CanonicalParams for Vec<T> {
    fn to_param(&self) -> ParamValue {
        self.as_slice().to_param()
    }
}

impl<V: CanonicalParams> CanonicalParams for BTreeMap<String, V> {
    fn to_param(&self) -> ParamValue {
        ParamValue::Map(
            self.iter()
                .map(|(key, value)| (key.clone(), value.to_param()))
                .collect(),
        )
    }
}

impl<V: CanonicalParams, S> CanonicalParams for HashMap<String, V, S> {
    fn to_param(&self) -> ParamValue {
        ParamValue::Map(
            self.iter()
                .map(|(key, value)| (key.clone(), value.to_param()))
                .collect(),
        )
    }
}
