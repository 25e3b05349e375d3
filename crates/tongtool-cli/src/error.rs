use thiserror::Error;
use tongtool_core::{ApiError, ApiErrorKind};

/// CLI-level error categories mapped to exit codes.
#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Api(#[from] ApiError),

    #[error("command error: {0}")]
    Command(String),

    #[error(transparent)]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl CliError {
    pub const fn exit_code(&self) -> u8 {
        match self {
            Self::Api(error) => match error.kind() {
                ApiErrorKind::Config => 2,
                ApiErrorKind::Authentication => 3,
                ApiErrorKind::RateLimited => 4,
                ApiErrorKind::Remote => 5,
                ApiErrorKind::Transport | ApiErrorKind::Decode => 6,
                ApiErrorKind::Serialization => 7,
            },
            Self::Command(_) => 2,
            Self::Serialization(_) => 7,
            Self::Io(_) => 10,
        }
    }
}
