//! Response envelope shared by the auth and business endpoints.

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

use crate::error::{error_wrap, ApiError};
use crate::tolerant;

/// Uniform `{code, message, datas}` wrapper around every remote response.
///
/// Auth endpoints add a `success` flag; business endpoints omit it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(bound(deserialize = "T: Deserialize<'de>"))]
pub struct RemoteEnvelope<T> {
    #[serde(default, deserialize_with = "tolerant::deserialize")]
    pub code: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    pub message: String,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "tolerant::deserialize_option"
    )]
    pub success: Option<bool>,
    #[serde(default = "none")]
    pub datas: Option<T>,
}

fn none<T>() -> Option<T> {
    None
}

impl<T> RemoteEnvelope<T> {
    /// Classified error for a non-OK code.
    pub fn check(&self) -> Result<(), ApiError> {
        error_wrap(self.code, &self.message)
    }
}

/// Application/session record returned by the session exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationRecord {
    #[serde(default, deserialize_with = "null_as_default")]
    pub partner_open_id: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Deserializes `null` as the type's default.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}
