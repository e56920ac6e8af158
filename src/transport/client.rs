use super::wire::{encode, line_reader, LineReader, Reply, Request};
use crate::error::{DeviceError, Result};
use crate::event::Event;
use crate::protocol::{ButtonImage, ButtonPosition, DeviceMetadata, GridSize};
use futures::StreamExt;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpStream, ToSocketAddrs};

/// Client for a device protocol server.
///
/// Calls are sequential on one connection. Event streams need a connection
/// of their own, see [`DeviceClient::event_stream`].
pub struct DeviceClient {
    lines: LineReader,
    writer: OwnedWriteHalf,
}

impl DeviceClient {
    /// # Errors
    /// Returns `DeviceError::Io` if the connection cannot be established.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let (reader, writer) = stream.into_split();
        Ok(Self {
            lines: line_reader(reader),
            writer,
        })
    }

    pub async fn get_meta(&mut self) -> Result<DeviceMetadata> {
        match self.call(&Request::GetMeta).await? {
            Reply::Meta { meta } => Ok(meta),
            other => Err(unexpected(&other)),
        }
    }

    pub async fn set_button_label(&mut self, button: ButtonPosition, label: &str) -> Result<()> {
        let request = Request::SetButtonLabel {
            button,
            label: label.to_string(),
        };
        self.expect_done(&request).await
    }

    pub async fn set_button_image(
        &mut self,
        button: ButtonPosition,
        image: ButtonImage,
    ) -> Result<()> {
        self.expect_done(&Request::SetButtonImage { button, image })
            .await
    }

    pub async fn set_grid_size(&mut self, size: GridSize) -> Result<()> {
        self.expect_done(&Request::SetGridSize { size }).await
    }

    /// Turn this connection into an event stream.
    ///
    /// # Errors
    /// Returns `DeviceError::Io` if the request cannot be sent.
    pub async fn event_stream(mut self) -> Result<RemoteEventStream> {
        self.send(&Request::GetEventStream).await?;
        Ok(RemoteEventStream {
            lines: self.lines,
            _writer: self.writer,
        })
    }

    async fn expect_done(&mut self, request: &Request) -> Result<()> {
        match self.call(request).await? {
            Reply::Done => Ok(()),
            other => Err(unexpected(&other)),
        }
    }

    async fn call(&mut self, request: &Request) -> Result<Reply> {
        self.send(request).await?;
        match read_reply(&mut self.lines).await? {
            Some(Reply::Error { code, message }) => Err(DeviceError::from_status(code, message)),
            Some(reply) => Ok(reply),
            None => Err(DeviceError::Transport("server closed the connection".into())),
        }
    }

    async fn send(&mut self, request: &Request) -> Result<()> {
        self.writer.write_all(encode(request)?.as_bytes()).await?;
        Ok(())
    }
}

/// Events pushed by the server on a dedicated connection.
///
/// Dropping it closes the connection, which ends the stream server-side.
pub struct RemoteEventStream {
    lines: LineReader,
    _writer: OwnedWriteHalf,
}

impl RemoteEventStream {
    /// Next event, or `Ok(None)` once the server ends the stream.
    ///
    /// # Errors
    /// Returns the server's error status if it refused the stream, or
    /// `DeviceError::Framing`/`DeviceError::Json` on a broken connection.
    pub async fn next(&mut self) -> Result<Option<Event>> {
        match read_reply(&mut self.lines).await? {
            None => Ok(None),
            Some(Reply::Event { event }) => Ok(Some(event)),
            Some(Reply::Error { code, message }) => Err(DeviceError::from_status(code, message)),
            Some(other) => Err(unexpected(&other)),
        }
    }
}

async fn read_reply(lines: &mut LineReader) -> Result<Option<Reply>> {
    while let Some(line) = lines.next().await {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        return Ok(Some(serde_json::from_str(&line)?));
    }
    Ok(None)
}

fn unexpected(reply: &Reply) -> DeviceError {
    DeviceError::Transport(format!("unexpected reply: {reply:?}"))
}
