use crate::protocol::StatusCode;
use std::path::PathBuf;

/// Central error type for opendeck.
#[derive(Debug, thiserror::Error)]
pub enum DeviceError {
    /// The device does not provide the requested capability.
    #[error("unimplemented: {0}")]
    Unimplemented(String),

    /// The request referenced something outside the device's current state.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The service is shutting down and no longer accepts the call.
    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("config file not found: {0}")]
    ConfigNotFound(PathBuf),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("image error: {path}: {source}")]
    Image {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("transport error: {0}")]
    Transport(String),

    #[error("line framing error: {0}")]
    Framing(#[from] tokio_util::codec::LinesCodecError),

    /// An error status reported by the remote end of a connection.
    #[error("remote error ({code}): {message}")]
    Remote { code: StatusCode, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl DeviceError {
    /// The wire status code a caller should see for this error.
    #[must_use]
    pub fn code(&self) -> StatusCode {
        match self {
            Self::Unimplemented(_) => StatusCode::Unimplemented,
            Self::InvalidArgument(_) => StatusCode::InvalidArgument,
            Self::Unavailable(_) => StatusCode::Unavailable,
            Self::Remote { code, .. } => *code,
            _ => StatusCode::Internal,
        }
    }

    /// Rebuild a typed error from a status received over the wire.
    #[must_use]
    pub fn from_status(code: StatusCode, message: String) -> Self {
        match code {
            StatusCode::Unimplemented => Self::Unimplemented(message),
            StatusCode::InvalidArgument => Self::InvalidArgument(message),
            StatusCode::Unavailable => Self::Unavailable(message),
            StatusCode::Internal => Self::Remote { code, message },
        }
    }
}

pub type Result<T> = std::result::Result<T, DeviceError>;
