//! Socket abstraction under the streaming transport.
//!
//! The connection actor only needs to send and receive text frames, so the
//! socket is hidden behind [`Connector`] and [`Socket`]. Production code
//! uses [`WebSocketConnector`]; tests plug in an in-memory connector.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use super::protocol::WireProtocol;
use crate::error::{LinkError, Result};
use crate::headers::HeaderSet;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Everything needed to open one socket.
#[derive(Clone, Debug)]
pub struct SocketRequest {
    /// The socket URL (`ws://` or `wss://`).
    pub url: String,
    /// Headers sent with the upgrade request.
    pub headers: HeaderSet,
    /// The dialect to negotiate via `Sec-WebSocket-Protocol`.
    pub protocol: WireProtocol,
}

/// An open, bidirectional text-frame socket.
///
/// `recv` must be cancel-safe: the connection actor polls it inside
/// `tokio::select!` and drops the future when another branch wins.
#[async_trait]
pub trait Socket: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<()>;

    /// Receive the next text frame. `None` means the peer closed the socket.
    async fn recv(&mut self) -> Option<Result<String>>;

    /// Close the socket. Errors are ignored.
    async fn close(&mut self);
}

/// Opens sockets for the streaming transport.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    /// Open a socket. Each call is one connection attempt.
    async fn connect(&self, request: &SocketRequest) -> Result<Box<dyn Socket>>;
}

/// Connector backed by `tokio-tungstenite`.
#[derive(Clone, Copy, Debug, Default)]
pub struct WebSocketConnector;

impl WebSocketConnector {
    /// Create a new WebSocket connector.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(&self, request: &SocketRequest) -> Result<Box<dyn Socket>> {
        let mut upgrade = request
            .url
            .as_str()
            .into_client_request()
            .map_err(|e| LinkError::InvalidUrl(e.to_string()))?;

        let headers = upgrade.headers_mut();
        headers.extend(request.headers.to_header_map()?);
        headers.insert(
            "Sec-WebSocket-Protocol",
            http::HeaderValue::from_static(request.protocol.subprotocol()),
        );

        tracing::debug!(
            target: "horizon_lattice_link::streaming",
            url = %request.url,
            protocol = request.protocol.subprotocol(),
            "opening socket"
        );
        let (stream, _response) = tokio_tungstenite::connect_async(upgrade).await?;
        Ok(Box::new(WebSocketSocket { stream }))
    }
}

struct WebSocketSocket {
    stream: WsStream,
}

#[async_trait]
impl Socket for WebSocketSocket {
    async fn send(&mut self, text: String) -> Result<()> {
        self.stream.send(Message::Text(text.into())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    tracing::debug!(
                        target: "horizon_lattice_link::streaming",
                        ?frame,
                        "peer closed socket"
                    );
                    return None;
                }
                // tungstenite answers pings itself; binary frames are not
                // part of either dialect.
                Ok(_) => continue,
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
