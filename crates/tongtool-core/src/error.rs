//! Error types and the remote code table.
//!
//! Remote codes map to [`ApiErrorKind`]; a blank remote message falls back
//! to the local description for the code.

use thiserror::Error;

use crate::http_client::HttpError;

/// Envelope code signalling success.
pub const CODE_OK: i64 = 200;
pub const CODE_SIGNATURE_ERROR: i64 = 519;
pub const CODE_TOKEN_EXPIRED: i64 = 523;
pub const CODE_UNAUTHORIZED: i64 = 524;
pub const CODE_INVALID_PARAMETERS: i64 = 525;
/// Rate-limit sentinel returned inside an otherwise successful HTTP response.
pub const CODE_TOO_MANY_REQUESTS: i64 = 526;
pub const CODE_SYSTEM_ERROR: i64 = 527;
pub const CODE_ACCOUNT_EXPIRED: i64 = 999_999;

/// Local message for a documented envelope code, used when the remote side
/// leaves `message` blank.
pub const fn fallback_message(code: i64) -> &'static str {
    match code {
        CODE_OK => "OK",
        CODE_SIGNATURE_ERROR => "签名错误",
        CODE_TOKEN_EXPIRED => "Token 已过期",
        CODE_UNAUTHORIZED => "未授权",
        CODE_INVALID_PARAMETERS => "无效的参数",
        CODE_TOO_MANY_REQUESTS => "请求太频繁",
        CODE_SYSTEM_ERROR => "系统错误",
        CODE_ACCOUNT_EXPIRED => "账号已过期",
        _ => "未知错误",
    }
}

/// The remote message, or the local fallback when it is blank.
pub fn resolve_message(code: i64, message: &str) -> String {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        fallback_message(code).to_owned()
    } else {
        trimmed.to_owned()
    }
}

/// Translates an envelope `code`/`message` pair into a classified error.
///
/// `200` is the only success code. A blank remote message is replaced by the
/// local fallback text for the code.
pub fn error_wrap(code: i64, message: &str) -> Result<(), ApiError> {
    if code == CODE_OK {
        return Ok(());
    }

    let message = resolve_message(code, message);
    if code == CODE_TOO_MANY_REQUESTS {
        Err(ApiError::RateLimited { code, message })
    } else {
        Err(ApiError::Remote { code, message })
    }
}

/// Failures while acquiring or refreshing the session credential.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CredentialError {
    #[error("application key and secret must be configured")]
    MissingKeys,

    #[error("authentication rejected: {code}: {message}")]
    Rejected { code: i64, message: String },

    #[error("token exchange returned an empty token")]
    EmptyToken,

    #[error("authentication returned no application record")]
    NoApplication,

    #[error("authentication transport error: {0}")]
    Transport(HttpError),

    #[error("authentication response could not be decoded ({status}): {message}")]
    Decode { status: String, message: String },
}

impl CredentialError {
    /// Fatal errors need a configuration change; retrying cannot help.
    ///
    /// A rejection carrying the rate-limit or system-error code is transient.
    pub const fn is_fatal(&self) -> bool {
        match self {
            Self::MissingKeys | Self::EmptyToken | Self::NoApplication => true,
            Self::Rejected { code, .. } => {
                !matches!(*code, CODE_TOO_MANY_REQUESTS | CODE_SYSTEM_ERROR)
            }
            Self::Transport(_) | Self::Decode { .. } => false,
        }
    }
}

/// Coarse classification used for retry decisions and CLI exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiErrorKind {
    Authentication,
    Transport,
    RateLimited,
    Remote,
    Decode,
    Serialization,
    Config,
}

/// Top-level error for executor operations.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error("transport error: {0}")]
    Transport(#[from] HttpError),

    #[error("{code}: {message}")]
    RateLimited { code: i64, message: String },

    #[error("{code}: {message}")]
    Remote { code: i64, message: String },

    #[error("malformed response ({status}): {message}")]
    Decode { status: String, message: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl ApiError {
    pub const fn kind(&self) -> ApiErrorKind {
        match self {
            Self::Credential(_) => ApiErrorKind::Authentication,
            Self::Transport(_) => ApiErrorKind::Transport,
            Self::RateLimited { .. } => ApiErrorKind::RateLimited,
            Self::Remote { .. } => ApiErrorKind::Remote,
            Self::Decode { .. } => ApiErrorKind::Decode,
            Self::Serialization(_) => ApiErrorKind::Serialization,
            Self::Config(_) => ApiErrorKind::Config,
        }
    }

    /// Envelope or HTTP code carried by remote-originated errors.
    pub const fn code(&self) -> Option<i64> {
        match self {
            Self::RateLimited { code, .. } | Self::Remote { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// The resolved human-readable message without the code prefix.
    pub fn message(&self) -> String {
        match self {
            Self::RateLimited { message, .. }
            | Self::Remote { message, .. }
            | Self::Decode { message, .. }
            | Self::Config(message) => message.clone(),
            Self::Transport(error) => error.message().to_owned(),
            Self::Credential(error) => error.to_string(),
            Self::Serialization(error) => error.to_string(),
        }
    }

    /// Transport failures flagged retryable and rate limiting are transient.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport(error) => error.retryable(),
            Self::RateLimited { .. } => true,
            _ => false,
        }
    }

    /// Remote codes that mean the attached credential is no longer accepted.
    pub const fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            Self::Remote {
                code: CODE_SIGNATURE_ERROR | CODE_TOKEN_EXPIRED | CODE_UNAUTHORIZED,
                ..
            }
        )
    }
}
