//! Line-delimited JSON messages exchanged over a connection.

use crate::error::DeviceError;
use crate::event::Event;
use crate::protocol::{ButtonImage, ButtonPosition, DeviceMetadata, Size, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::net::tcp::OwnedReadHalf;
use tokio_util::codec::{FramedRead, LinesCodec};

/// Longest line either side accepts. Leaves room for a 256x256 RGBA image
/// written as a JSON byte array.
pub const MAX_LINE_LENGTH: usize = 4 * 1024 * 1024;

/// Incoming half of a connection, split into lines of at most
/// [`MAX_LINE_LENGTH`] bytes.
pub type LineReader = FramedRead<OwnedReadHalf, LinesCodec>;

pub fn line_reader(reader: OwnedReadHalf) -> LineReader {
    FramedRead::new(reader, LinesCodec::new_with_max_length(MAX_LINE_LENGTH))
}

/// A call sent by a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "call", rename_all = "snake_case")]
pub enum Request {
    GetMeta,
    SetButtonLabel {
        button: ButtonPosition,
        label: String,
    },
    SetButtonImage {
        button: ButtonPosition,
        image: ButtonImage,
    },
    SetGridSize {
        size: Size,
    },
    /// Switches the connection into server-push mode.
    GetEventStream,
}

/// A line sent by the server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "reply", rename_all = "snake_case")]
pub enum Reply {
    Meta { meta: DeviceMetadata },
    Done,
    Event { event: Event },
    Error { code: StatusCode, message: String },
}

impl From<&DeviceError> for Reply {
    fn from(err: &DeviceError) -> Self {
        let message = match err {
            DeviceError::Unimplemented(m)
            | DeviceError::InvalidArgument(m)
            | DeviceError::Unavailable(m) => m.clone(),
            other => other.to_string(),
        };
        Self::Error {
            code: err.code(),
            message,
        }
    }
}

/// Serialize a message as one line, newline included.
///
/// # Errors
/// Returns `DeviceError::Json` if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> crate::error::Result<String> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}
