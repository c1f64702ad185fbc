//! In-memory socket harness shared by the integration tests.
//!
//! [`MockConnector`] hands every accepted connection to the test as a
//! [`ServerSide`], which plays the GraphQL server over a pair of channels.

#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use horizon_lattice_link::transport::{
    Connector, ReconnectConfig, Socket, SocketRequest, StreamingConfig, WireProtocol,
};
use horizon_lattice_link::{LinkError, Result, SubscriptionMessage};
use serde_json::{Value, json};
use tokio::sync::mpsc;

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(2);

/// Streaming settings tuned for tests: short backoff, no jitter, no pings.
pub fn test_config() -> StreamingConfig {
    StreamingConfig {
        reconnect: ReconnectConfig::new()
            .initial_delay(Duration::from_millis(20))
            .max_delay(Duration::from_millis(100))
            .without_jitter(),
        connection_timeout: Duration::from_secs(1),
        keep_alive_interval: None,
        ..StreamingConfig::default()
    }
}

/// Await `future`, failing the test if it takes longer than [`WAIT`].
pub async fn within<F: std::future::Future>(future: F) -> F::Output {
    tokio::time::timeout(WAIT, future)
        .await
        .expect("timed out waiting")
}

/// The payload of a `Data` message, or a panic naming what arrived instead.
pub fn expect_data(message: Option<SubscriptionMessage>) -> Value {
    match message {
        Some(SubscriptionMessage::Data(response)) => response.data.unwrap_or(Value::Null),
        other => panic!("expected data, got {other:?}"),
    }
}

pub struct MockConnector {
    attempts: AtomicU32,
    refuse: AtomicBool,
    accepted: mpsc::UnboundedSender<ServerSide>,
}

impl MockConnector {
    /// Create a connector and the queue its accepted connections land on.
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<ServerSide>) {
        let (accepted, queue) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            attempts: AtomicU32::new(0),
            refuse: AtomicBool::new(false),
            accepted,
        });
        (connector, queue)
    }

    /// Number of `connect` calls so far, refused ones included.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Refuse (or accept again) every following connection attempt.
    pub fn refuse(&self, refuse: bool) {
        self.refuse.store(refuse, Ordering::SeqCst);
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(&self, request: &SocketRequest) -> Result<Box<dyn Socket>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.refuse.load(Ordering::SeqCst) {
            return Err(LinkError::Network("connection refused".into()));
        }

        let (to_client, client_incoming) = mpsc::unbounded_channel();
        let (to_server, server_incoming) = mpsc::unbounded_channel();
        let server = ServerSide {
            request: request.clone(),
            incoming: server_incoming,
            outgoing: to_client,
        };
        self.accepted
            .send(server)
            .map_err(|_| LinkError::Network("test harness gone".into()))?;

        Ok(Box::new(MockSocket {
            incoming: client_incoming,
            outgoing: to_server,
        }))
    }
}

struct MockSocket {
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Socket for MockSocket {
    async fn send(&mut self, text: String) -> Result<()> {
        self.outgoing
            .send(text)
            .map_err(|_| LinkError::Network("peer closed".into()))
    }

    async fn recv(&mut self) -> Option<Result<String>> {
        self.incoming.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.incoming.close();
    }
}

/// The server end of one accepted connection. Dropping it drops the socket.
pub struct ServerSide {
    pub request: SocketRequest,
    incoming: mpsc::UnboundedReceiver<String>,
    outgoing: mpsc::UnboundedSender<String>,
}

impl ServerSide {
    fn legacy(&self) -> bool {
        self.request.protocol == WireProtocol::SubscriptionsTransportWs
    }

    /// Next frame from the client, decoded.
    pub async fn recv(&mut self) -> Value {
        let text = within(self.incoming.recv())
            .await
            .expect("client closed the socket");
        serde_json::from_str(&text).expect("client sent invalid JSON")
    }

    /// Next frame from the client, or `None` if the socket ended first.
    pub async fn try_recv(&mut self) -> Option<Value> {
        let text = within(self.incoming.recv()).await?;
        Some(serde_json::from_str(&text).expect("client sent invalid JSON"))
    }

    /// Assert the client stays quiet for `period`.
    pub async fn expect_silence(&mut self, period: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(period, self.incoming.recv()).await {
            panic!("unexpected frame from client: {frame}");
        }
    }

    pub fn send(&self, frame: Value) {
        // The client may have closed already.
        let _ = self.outgoing.send(frame.to_string());
    }

    /// Wait for `connection_init` and return its payload.
    pub async fn expect_init(&mut self) -> Value {
        let frame = self.recv().await;
        assert_eq!(frame["type"], "connection_init");
        frame["payload"].clone()
    }

    pub fn ack(&self) {
        self.send(json!({"type": "connection_ack"}));
    }

    /// Complete the handshake and return the `connection_init` payload.
    pub async fn accept(&mut self) -> Value {
        let payload = self.expect_init().await;
        self.ack();
        payload
    }

    /// Wait for a subscribe (or legacy `start`) frame; returns id and payload.
    pub async fn expect_subscribe(&mut self) -> (String, Value) {
        let frame = self.recv().await;
        let expected = if self.legacy() { "start" } else { "subscribe" };
        assert_eq!(frame["type"], expected, "unexpected frame {frame}");
        let id = frame["id"].as_str().expect("id is a string").to_string();
        (id, frame["payload"].clone())
    }

    /// Wait for the client to stop a subscription; returns its id.
    pub async fn expect_stop(&mut self) -> String {
        let frame = self.recv().await;
        let expected = if self.legacy() { "stop" } else { "complete" };
        assert_eq!(frame["type"], expected, "unexpected frame {frame}");
        frame["id"].as_str().expect("id is a string").to_string()
    }

    /// Emit one result for subscription `id`.
    pub fn next(&self, id: &str, data: Value) {
        let kind = if self.legacy() { "data" } else { "next" };
        self.send(json!({"type": kind, "id": id, "payload": {"data": data}}));
    }

    pub fn complete(&self, id: &str) {
        self.send(json!({"type": "complete", "id": id}));
    }

    pub fn error(&self, id: &str, message: &str) {
        self.send(json!({"type": "error", "id": id, "payload": [{"message": message}]}));
    }

    pub fn ping(&self) {
        self.send(json!({"type": "ping"}));
    }

    /// Drop the socket from the server side.
    pub fn disconnect(self) {}
}
