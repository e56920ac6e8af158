//! JSON-lines over TCP binding for [`DeviceService`](crate::service::DeviceService).
//!
//! Every request is one JSON object on one line, answered by exactly one reply
//! line. A `get_event_stream` request turns the connection into a push
//! channel: the server writes one `event` reply per button event until the
//! client disconnects or the server stops.

pub mod client;
pub mod server;
pub mod wire;

pub use client::{DeviceClient, RemoteEventStream};
pub use server::serve;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{build_service, VirtualDeck};
    use crate::error::DeviceError;
    use crate::event::Event;
    use crate::protocol::{ButtonImage, ButtonPosition, Feature, PixelFormat, Size};
    use crate::service::DeviceService;
    use std::net::SocketAddr;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::{TcpListener, TcpStream};
    use tokio_util::sync::CancellationToken;

    struct Harness {
        addr: SocketAddr,
        deck: Arc<VirtualDeck>,
        service: Arc<DeviceService>,
        cancel: CancellationToken,
        server: tokio::task::JoinHandle<crate::error::Result<()>>,
    }

    async fn start(extra: &str) -> Harness {
        let config =
            crate::config::parse(&format!("[device]\nid = \"tmp-id\"\n{extra}")).unwrap();
        let deck = Arc::new(VirtualDeck::from_config(&config));
        let service = Arc::new(build_service(&deck, &config).unwrap());

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let cancel = CancellationToken::new();
        let server = tokio::spawn(serve(listener, Arc::clone(&service), cancel.clone()));

        Harness {
            addr,
            deck,
            service,
            cancel,
            server,
        }
    }

    async fn wait_for_streams(service: &DeviceService, n: usize) {
        tokio::time::timeout(Duration::from_secs(2), async {
            while service.active_streams() != n {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
    }

    #[tokio::test]
    async fn label_only_device_over_tcp() {
        let h = start("[label]\nmax_length = 20\n").await;
        let mut client = DeviceClient::connect(h.addr).await.unwrap();

        let meta = client.get_meta().await.unwrap();
        assert_eq!(meta.device_id, "tmp-id");
        assert_eq!(meta.grid_size, Size::new(4, 3));
        assert_eq!(meta.features, vec![Feature::Label { max_length: 20 }]);

        let image = ButtonImage {
            pixel_data: vec![0; 4],
            format: PixelFormat::Rgba32,
            size: Size::new(1, 1),
        };
        assert!(matches!(
            client.set_button_image(ButtonPosition::new(0, 0), image).await,
            Err(DeviceError::Unimplemented(_))
        ));
        assert!(matches!(
            client.set_button_label(ButtonPosition::new(5, 0), "x").await,
            Err(DeviceError::InvalidArgument(_))
        ));
        assert!(matches!(
            client.set_grid_size(Size::new(1, 1)).await,
            Err(DeviceError::Unimplemented(_))
        ));

        client
            .set_button_label(ButtonPosition::new(1, 1), "abcdefghijklmnopqrstuvwxy")
            .await
            .unwrap();
        assert_eq!(
            h.deck.button(ButtonPosition::new(1, 1)).unwrap().label.as_deref(),
            Some("abcdefghijklmnopqrst")
        );

        h.cancel.cancel();
        h.server.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn grid_resize_over_tcp_is_clamped() {
        let h = start("[custom_grid]\nmin = { width = 2, height = 2 }\nmax = { width = 6, height = 4 }\n")
            .await;
        let mut client = DeviceClient::connect(h.addr).await.unwrap();

        client.set_grid_size(Size::new(0, 100)).await.unwrap();
        assert_eq!(client.get_meta().await.unwrap().grid_size, Size::new(2, 4));
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn events_reach_remote_streams() {
        let h = start("").await;
        let mut first = DeviceClient::connect(h.addr)
            .await
            .unwrap()
            .event_stream()
            .await
            .unwrap();
        let mut second = DeviceClient::connect(h.addr)
            .await
            .unwrap()
            .event_stream()
            .await
            .unwrap();
        wait_for_streams(&h.service, 2).await;

        let pos = ButtonPosition::new(2, 1);
        h.deck.press(pos);

        for stream in [&mut first, &mut second] {
            assert_eq!(
                stream.next().await.unwrap(),
                Some(Event::ButtonDown { button: pos })
            );
            assert_eq!(
                stream.next().await.unwrap(),
                Some(Event::ButtonUp { button: pos })
            );
            assert_eq!(
                stream.next().await.unwrap(),
                Some(Event::ButtonClick { button: pos })
            );
        }

        drop(first);
        wait_for_streams(&h.service, 1).await;

        h.cancel.cancel();
        assert_eq!(second.next().await.unwrap(), None);
        h.server.await.unwrap().unwrap();
        assert_eq!(h.service.active_streams(), 0);
        assert!(matches!(
            h.service.stream_events(),
            Err(DeviceError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn malformed_request_keeps_connection_open() {
        let h = start("").await;
        let stream = TcpStream::connect(h.addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"{not json}\n").await.unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert!(reply.contains("\"code\":\"invalid_argument\""));

        writer.write_all(b"{\"call\":\"get_meta\"}\n").await.unwrap();
        let reply = lines.next_line().await.unwrap().unwrap();
        assert!(reply.starts_with("{\"reply\":\"meta\""));
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn oversized_image_declaration_is_ignored() {
        let h = start("[display]\n").await;
        let mut client = DeviceClient::connect(h.addr).await.unwrap();

        let image = ButtonImage {
            pixel_data: Vec::new(),
            format: PixelFormat::Rgba32,
            size: Size::new(u32::MAX, u32::MAX),
        };
        client
            .set_button_image(ButtonPosition::new(0, 0), image)
            .await
            .unwrap();
        let state = h.deck.button(ButtonPosition::new(0, 0));
        assert!(state.and_then(|state| state.image).is_none());

        assert_eq!(client.get_meta().await.unwrap().device_id, "tmp-id");
        h.cancel.cancel();
    }

    #[tokio::test]
    async fn overlong_request_line_is_refused() {
        let h = start("").await;
        let stream = TcpStream::connect(h.addr).await.unwrap();
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        // One byte past the limit and no newline: the server must give up
        // without waiting for the end of the line.
        let line = vec![b'x'; wire::MAX_LINE_LENGTH + 1];
        writer.write_all(&line).await.unwrap();

        let reply = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(reply.contains("\"code\":\"invalid_argument\""));
        assert_eq!(lines.next_line().await.unwrap(), None);

        let mut client = DeviceClient::connect(h.addr).await.unwrap();
        assert_eq!(client.get_meta().await.unwrap().device_id, "tmp-id");
        h.cancel.cancel();
    }
}
