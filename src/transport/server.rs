use super::wire::{encode, line_reader, LineReader, Reply, Request, MAX_LINE_LENGTH};
use crate::error::{DeviceError, Result};
use crate::protocol::StatusCode;
use crate::service::DeviceService;
use futures::StreamExt;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::{TcpListener, TcpStream};
use tokio_util::codec::LinesCodecError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Accept connections until `cancel` fires, then shut the service down.
///
/// Each connection is served by its own task and sees `cancel` too, so
/// open event streams end as soon as the server stops.
///
/// # Errors
/// Returns `DeviceError::Io` if accepting fails.
pub async fn serve(
    listener: TcpListener,
    service: Arc<DeviceService>,
    cancel: CancellationToken,
) -> Result<()> {
    if let Ok(addr) = listener.local_addr() {
        info!("device protocol listening on {addr}");
    }

    let result = loop {
        let (stream, peer) = tokio::select! {
            () = cancel.cancelled() => break Ok(()),
            accepted = listener.accept() => match accepted {
                Ok(conn) => conn,
                Err(e) => break Err(DeviceError::from(e)),
            },
        };

        let conn_service = Arc::clone(&service);
        let conn_cancel = cancel.child_token();
        tokio::spawn(async move {
            debug!("client {peer} connected");
            if let Err(e) = handle_connection(stream, peer, &conn_service, conn_cancel).await {
                warn!("client {peer}: {e}");
            }
            debug!("client {peer} disconnected");
        });
    };

    service.shutdown();
    info!("device protocol server stopped");
    result
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    service: &DeviceService,
    cancel: CancellationToken,
) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = line_reader(reader);

    loop {
        let line = tokio::select! {
            () = cancel.cancelled() => return Ok(()),
            line = lines.next() => line,
        };
        let line = match line {
            None => return Ok(()),
            Some(Ok(line)) => line,
            // The framed reader ends after a codec error, so report and hang up.
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                warn!("client {peer}: request line exceeds {MAX_LINE_LENGTH} bytes");
                let reply = Reply::Error {
                    code: StatusCode::InvalidArgument,
                    message: format!("request line exceeds {MAX_LINE_LENGTH} bytes"),
                };
                writer.write_all(encode(&reply)?.as_bytes()).await?;
                return Ok(());
            }
            Some(Err(e)) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }

        let request = match serde_json::from_str::<Request>(&line) {
            Ok(request) => request,
            Err(e) => {
                warn!("client {peer}: malformed request: {e}");
                let reply = Reply::Error {
                    code: StatusCode::InvalidArgument,
                    message: format!("malformed request: {e}"),
                };
                writer.write_all(encode(&reply)?.as_bytes()).await?;
                continue;
            }
        };

        if request == Request::GetEventStream {
            return stream_events(service, peer, &mut lines, &mut writer, &cancel).await;
        }

        let reply = dispatch(service, request);
        writer.write_all(encode(&reply)?.as_bytes()).await?;
    }
}

/// Run one request/response call against the service.
pub fn dispatch(service: &DeviceService, request: Request) -> Reply {
    let result = match request {
        Request::GetMeta => {
            return Reply::Meta {
                meta: service.get_metadata(),
            }
        }
        Request::SetButtonLabel { button, label } => service.set_button_label(button, &label),
        Request::SetButtonImage { button, image } => service.set_button_image(button, &image),
        Request::SetGridSize { size } => service.set_grid_size(size),
        Request::GetEventStream => Err(DeviceError::InvalidArgument(
            "event streams are not a unary call".into(),
        )),
    };

    match result {
        Ok(()) => Reply::Done,
        Err(e) => {
            debug!("call rejected: {e}");
            Reply::from(&e)
        }
    }
}

/// Push events to the client until it hangs up, the stream ends, or the
/// server stops. The subscription is released on every exit path.
async fn stream_events(
    service: &DeviceService,
    peer: SocketAddr,
    lines: &mut LineReader,
    writer: &mut OwnedWriteHalf,
    cancel: &CancellationToken,
) -> Result<()> {
    let events = match service.stream_events() {
        Ok(events) => events.into_stream(),
        Err(e) => {
            writer.write_all(encode(&Reply::from(&e))?.as_bytes()).await?;
            return Ok(());
        }
    };
    let mut events = std::pin::pin!(events);
    info!("client {peer} opened an event stream");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => break,
            line = lines.next() => match line {
                Some(Ok(_)) => {}
                None | Some(Err(_)) => break,
            },
            event = events.next() => {
                let Some(event) = event else { break };
                let line = encode(&Reply::Event { event })?;
                if let Err(e) = writer.write_all(line.as_bytes()).await {
                    debug!("client {peer}: event write failed: {e}");
                    break;
                }
            }
        }
    }

    info!("client {peer} event stream closed");
    Ok(())
}
