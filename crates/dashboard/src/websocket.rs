use std::time::Duration;

use async_trait::async_trait;
use futures::{future, SinkExt, StreamExt};
use tokio_tungstenite::{
    connect_async,
    tungstenite::{Error as WsError, Message},
};

use tracing::warn;

use crate::transport::{LinkChannel, LinkTransport, TransportError};

/// WebSocket client transport for the dashboard collector.
///
/// Text frames carry JSON envelopes in both directions. Binary frames from the
/// collector are handed on only when they are valid UTF-8; anything else is
/// logged and skipped without closing the connection.
#[derive(Clone, Debug, Default)]
pub struct WebSocketTransport {
    handshake_timeout: Option<Duration>,
}

impl WebSocketTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bound the opening handshake. The link itself leaves this unset and
    /// relies on the socket's own defaults; one-shot probes set it.
    pub fn with_handshake_timeout(mut self, timeout: Duration) -> Self {
        self.handshake_timeout = Some(timeout);
        self
    }
}

#[async_trait]
impl LinkTransport for WebSocketTransport {
    async fn connect(&self, url: &str) -> Result<LinkChannel, TransportError> {
        let handshake = connect_async(url);
        let (stream, _response) = match self.handshake_timeout {
            Some(timeout) => tokio::time::timeout(timeout, handshake).await.map_err(|_| {
                TransportError::Connect(format!("handshake timed out after {timeout:?}"))
            })?,
            None => handshake.await,
        }
        .map_err(|error| TransportError::Connect(error.to_string()))?;

        let (write, read) = stream.split();

        let outbound = write
            .with(|text: String| future::ready(Ok::<_, WsError>(Message::Text(text))))
            .sink_map_err(|error: WsError| TransportError::Send(error.to_string()));

        let inbound = read.filter_map(|frame| {
            future::ready(match frame {
                Ok(Message::Text(text)) => Some(Ok(text)),
                Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                    Ok(text) => Some(Ok(text)),
                    Err(error) => {
                        warn!(
                            event_name = "dashboard.transport.binary_discarded",
                            error = %error,
                            "binary frame from collector is not valid UTF-8; discarding"
                        );
                        None
                    }
                },
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Close(_) | Message::Frame(_)) => {
                    None
                }
                Err(error) => Some(Err(TransportError::Receive(error.to_string()))),
            })
        });

        Ok(LinkChannel { outbound: Box::pin(outbound), inbound: Box::pin(inbound) })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures::{SinkExt, StreamExt};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message};

    use super::WebSocketTransport;
    use crate::transport::{LinkTransport, TransportError};

    /// Accepts one client, sends `frames`, then closes cleanly.
    async fn serve_frames(frames: Vec<Message>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");

        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.expect("accept");
            let mut socket = accept_async(tcp).await.expect("server handshake");
            for frame in frames {
                socket.send(frame).await.expect("server send");
            }
            socket.close(None).await.expect("server close");
            while socket.next().await.is_some() {}
        });

        format!("ws://{address}/ws")
    }

    #[tokio::test]
    async fn refused_connection_surfaces_connect_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.expect("bind");
        let address = listener.local_addr().expect("local addr");
        drop(listener);

        let transport = WebSocketTransport::new().with_handshake_timeout(Duration::from_secs(5));
        let result = transport.connect(&format!("ws://{address}/ws")).await;

        assert!(matches!(result, Err(TransportError::Connect(_))));
    }

    #[tokio::test]
    async fn text_and_utf8_binary_frames_are_delivered_until_close() {
        let url = serve_frames(vec![
            Message::Text(r#"{"type":"ping"}"#.to_owned()),
            Message::Binary(br#"{"type":"notice"}"#.to_vec()),
        ])
        .await;

        let mut channel = WebSocketTransport::new().connect(&url).await.expect("connect");

        assert_eq!(channel.inbound.next().await, Some(Ok(r#"{"type":"ping"}"#.to_owned())));
        assert_eq!(channel.inbound.next().await, Some(Ok(r#"{"type":"notice"}"#.to_owned())));
        assert_eq!(channel.inbound.next().await, None, "close frame should end the stream");
    }

    #[tokio::test]
    async fn invalid_utf8_binary_frame_is_skipped() {
        let url = serve_frames(vec![
            Message::Binary(b"{\"type\":\"x\xff\"}".to_vec()),
            Message::Text(r#"{"type":"after"}"#.to_owned()),
        ])
        .await;

        let mut channel = WebSocketTransport::new().connect(&url).await.expect("connect");

        assert_eq!(channel.inbound.next().await, Some(Ok(r#"{"type":"after"}"#.to_owned())));
        assert_eq!(channel.inbound.next().await, None);
    }

    #[tokio::test]
    async fn malformed_url_surfaces_connect_error() {
        let result = WebSocketTransport::new().connect("not a url").await;
        assert!(matches!(result, Err(TransportError::Connect(_))));
    }
}
