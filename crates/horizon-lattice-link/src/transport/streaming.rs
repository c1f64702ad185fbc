//! The streaming transport: one persistent socket, many subscriptions.
//!
//! Each [`Connection`] is driven by a single tokio task, the connection
//! actor, which owns the socket and the registration table. Handles talk to
//! it over an unbounded command channel and receive results over their own
//! unbounded channel, so the actor never waits on a slow consumer.
//!
//! On a transport-level disconnect the actor backs off, reconnects, repeats
//! the `connection_init` handshake with the same header set, and replays
//! every registration in registration order under its original id. Each
//! replayed handle first receives [`SubscriptionMessage::Restarted`].
//!
//! A failed attempt that is not [transient](LinkError::is_transient), such
//! as a `connection_error` rejection of the handshake, is not retried: every
//! handle receives that error and the connection closes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use super::protocol::{self, ClientMessage, ServerMessage, WireProtocol};
use super::reconnect::{IdlePolicy, ReconnectConfig};
use super::socket::{Connector, Socket, SocketRequest, WebSocketConnector};
use super::subscription::{SubscriptionMessage, SubscriptionStream};
use crate::error::{LinkError, Result};
use crate::headers::HeaderSet;
use crate::operation::{GraphQLError, Operation};

const TARGET: &str = "horizon_lattice_link::streaming";

/// Configuration for the streaming transport.
#[derive(Clone, Debug)]
pub struct StreamingConfig {
    /// Reconnect policy.
    pub reconnect: ReconnectConfig,
    /// What to do once the last subscription is gone.
    pub idle: IdlePolicy,
    /// Deadline for opening the socket and receiving `connection_ack`.
    pub connection_timeout: Duration,
    /// Client ping interval (`graphql-transport-ws` only).
    pub keep_alive_interval: Option<Duration>,
    /// Wire dialect.
    pub protocol: WireProtocol,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            reconnect: ReconnectConfig::default(),
            idle: IdlePolicy::default(),
            connection_timeout: Duration::from_secs(10),
            keep_alive_interval: Some(Duration::from_secs(30)),
            protocol: WireProtocol::default(),
        }
    }
}

/// Lifecycle of a streaming connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    /// Opening the first socket.
    Connecting,
    /// Handshake complete; subscriptions are live.
    Connected,
    /// The socket was lost and the connection is retrying.
    Reconnecting,
    /// Terminal. Either closed on request, idle, or out of retries.
    Closed,
}

/// Instructions from handles to the connection actor.
#[derive(Debug)]
pub(crate) enum Command {
    Subscribe {
        id: u64,
        operation: Operation,
        sink: mpsc::UnboundedSender<SubscriptionMessage>,
    },
    Unsubscribe {
        id: u64,
    },
    Close,
}

/// Owns at most one live [`Connection`] and multiplexes handles over it.
pub struct StreamingTransport {
    config: StreamingConfig,
    connector: Arc<dyn Connector>,
    current: Mutex<Option<Connection>>,
}

impl StreamingTransport {
    /// Create a transport that opens sockets through `connector`.
    pub fn new(config: StreamingConfig, connector: Arc<dyn Connector>) -> Self {
        Self {
            config,
            connector,
            current: Mutex::new(None),
        }
    }

    /// Create a transport backed by real WebSockets.
    pub fn websocket(config: StreamingConfig) -> Self {
        Self::new(config, Arc::new(WebSocketConnector::new()))
    }

    /// The transport configuration.
    pub fn config(&self) -> &StreamingConfig {
        &self.config
    }

    /// Open (or reuse) the connection to `endpoint`.
    ///
    /// While the current connection is not [`Closed`](ConnectionState::Closed)
    /// and was opened for the same endpoint and headers, it is returned as-is.
    /// A closed connection is replaced. Opening a different endpoint or
    /// header set closes the previous connection first.
    ///
    /// Returns immediately; the socket is opened in the background. Must be
    /// called from within a Tokio runtime.
    pub fn open(&self, endpoint: &str, headers: &HeaderSet) -> Connection {
        let mut current = self.current.lock();
        if let Some(existing) = current.as_ref()
            && !existing.is_closed()
        {
            if existing.endpoint() == endpoint && existing.headers() == headers {
                return existing.clone();
            }
            tracing::info!(
                target: TARGET,
                from = existing.endpoint(),
                to = endpoint,
                "replacing streaming connection"
            );
            existing.close();
        }

        let connection = Connection::spawn(
            self.config.clone(),
            self.connector.clone(),
            endpoint.to_string(),
            headers.clone(),
        );
        *current = Some(connection.clone());
        connection
    }

    /// Register `operation` on `connection`.
    pub fn subscribe(&self, connection: &Connection, operation: Operation) -> SubscriptionStream {
        connection.subscribe(operation)
    }

    /// Deregister a handle. Idempotent.
    pub fn unsubscribe(&self, handle: &mut SubscriptionStream) {
        handle.unsubscribe();
    }

    /// The current connection, if one was opened.
    pub fn current(&self) -> Option<Connection> {
        self.current.lock().clone()
    }
}

impl std::fmt::Debug for StreamingTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamingTransport")
            .field("config", &self.config)
            .field("current", &self.current.lock().as_ref().map(Connection::state))
            .finish()
    }
}

/// A cloneable handle to one logical streaming connection.
#[derive(Clone)]
pub struct Connection {
    shared: Arc<ConnectionShared>,
}

struct ConnectionShared {
    endpoint: String,
    headers: HeaderSet,
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    next_id: AtomicU64,
}

impl Connection {
    fn spawn(
        config: StreamingConfig,
        connector: Arc<dyn Connector>,
        endpoint: String,
        headers: HeaderSet,
    ) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);

        let actor = Actor {
            request: SocketRequest {
                url: endpoint.clone(),
                headers: headers.clone(),
                protocol: config.protocol,
            },
            init_payload: headers.to_json(),
            idle_since: Some(Instant::now()),
            config,
            connector,
            commands: commands_rx,
            state: state_tx,
            registrations: BTreeMap::new(),
        };
        tokio::spawn(actor.run());

        Self {
            shared: Arc::new(ConnectionShared {
                endpoint,
                headers,
                commands: commands_tx,
                state: state_rx,
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// The socket endpoint.
    pub fn endpoint(&self) -> &str {
        &self.shared.endpoint
    }

    /// The header set sent on every handshake.
    pub fn headers(&self) -> &HeaderSet {
        &self.shared.headers
    }

    /// The current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state.borrow()
    }

    /// Whether the connection is closed for good.
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Closed || self.shared.commands.is_closed()
    }

    /// Wait until the connection reaches `target`.
    ///
    /// Returns `false` if the connection shut down without reaching it.
    pub async fn wait_for(&self, target: ConnectionState) -> bool {
        let mut state = self.shared.state.clone();
        match state.wait_for(|s| *s == target || *s == ConnectionState::Closed).await {
            Ok(reached) => *reached == target,
            Err(_) => target == ConnectionState::Closed,
        }
    }

    /// Register a subscription.
    ///
    /// The returned stream is live until the server completes it, it is
    /// unsubscribed, or the connection gives up.
    pub fn subscribe(&self, operation: Operation) -> SubscriptionStream {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (sink, receiver) = mpsc::unbounded_channel();

        tracing::debug!(target: TARGET, id, operation = %operation.identity(), "subscribe");
        let command = Command::Subscribe {
            id,
            operation,
            sink,
        };
        if let Err(mpsc::error::SendError(Command::Subscribe { sink, .. })) =
            self.shared.commands.send(command)
        {
            let _ = sink.send(SubscriptionMessage::Error(LinkError::Network(
                "streaming connection is closed".into(),
            )));
        }

        SubscriptionStream::new(id, receiver, self.shared.commands.clone())
    }

    /// Close the connection. Open handles end without a terminal message.
    pub fn close(&self) {
        let _ = self.shared.commands.send(Command::Close);
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("endpoint", &self.shared.endpoint)
            .field("state", &self.state())
            .finish()
    }
}

struct Registration {
    payload: Value,
    sink: mpsc::UnboundedSender<SubscriptionMessage>,
    started: bool,
}

enum Flow {
    Continue,
    Shutdown,
}

enum Exit {
    Disconnected,
    Shutdown,
    Idle,
}

struct Actor {
    config: StreamingConfig,
    connector: Arc<dyn Connector>,
    request: SocketRequest,
    init_payload: Value,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    registrations: BTreeMap<u64, Registration>,
    idle_since: Option<Instant>,
}

impl Actor {
    async fn run(mut self) {
        let mut failed: u32 = 0;
        let mut reconnecting = false;

        loop {
            if reconnecting {
                let delay = self.config.reconnect.delay_for_attempt(failed);
                tracing::debug!(target: TARGET, ?delay, failed, "waiting before reconnect");
                if let Flow::Shutdown = self.pause(delay).await {
                    break;
                }
            }

            let attempt = handshake(
                self.connector.clone(),
                self.request.clone(),
                self.init_payload.clone(),
                self.config.connection_timeout,
            );
            tokio::pin!(attempt);

            let outcome = loop {
                tokio::select! {
                    result = &mut attempt => break Some(result),
                    command = self.commands.recv() => match command {
                        Some(command) => {
                            if let Flow::Shutdown = self.apply(command, None).await {
                                break None;
                            }
                        }
                        None => break None,
                    },
                }
            };

            let socket = match outcome {
                None => break,
                Some(Ok(socket)) => socket,
                Some(Err(e)) => {
                    failed += 1;
                    tracing::warn!(
                        target: TARGET,
                        url = %self.request.url,
                        attempt = failed,
                        error = %e,
                        "streaming connection attempt failed"
                    );
                    if !e.is_transient() {
                        self.fail_all(e);
                        break;
                    }
                    if self.config.reconnect.exhausted(failed) {
                        self.fail_all(LinkError::ConnectionFailed { attempts: failed });
                        break;
                    }
                    self.set_state(ConnectionState::Reconnecting);
                    reconnecting = true;
                    continue;
                }
            };

            failed = 0;
            self.set_state(ConnectionState::Connected);
            tracing::debug!(target: TARGET, url = %self.request.url, "connection acknowledged");

            match self.serve(socket, reconnecting).await {
                Exit::Disconnected => {
                    if self.registrations.is_empty()
                        && matches!(self.config.idle, IdlePolicy::CloseWhenIdle { .. })
                    {
                        tracing::debug!(target: TARGET, "socket lost while idle; closing");
                        break;
                    }
                    tracing::warn!(
                        target: TARGET,
                        url = %self.request.url,
                        subscriptions = self.registrations.len(),
                        "streaming connection lost; reconnecting"
                    );
                    self.set_state(ConnectionState::Reconnecting);
                    reconnecting = true;
                }
                Exit::Shutdown | Exit::Idle => break,
            }
        }

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Subscribe { sink, .. } = command {
                let _ = sink.send(SubscriptionMessage::Error(LinkError::Network(
                    "streaming connection is closed".into(),
                )));
            }
        }
        self.registrations.clear();
        self.set_state(ConnectionState::Closed);
        tracing::debug!(target: TARGET, url = %self.request.url, "connection closed");
    }

    /// Drive a live socket until it drops or the connection shuts down.
    async fn serve(&mut self, mut socket: Box<dyn Socket>, restarted: bool) -> Exit {
        if let Err(e) = self.replay(socket.as_mut(), restarted).await {
            tracing::warn!(target: TARGET, error = %e, "failed to replay subscriptions");
            return Exit::Disconnected;
        }

        let mut keep_alive = self
            .config
            .keep_alive_interval
            .filter(|_| self.config.protocol.supports_client_ping())
            .map(|period| {
                let mut interval = tokio::time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });

        loop {
            let idle_deadline = self.idle_deadline();
            tokio::select! {
                frame = socket.recv() => match frame {
                    Some(Ok(text)) => {
                        if let Err(e) = self.on_frame(socket.as_mut(), &text).await {
                            tracing::warn!(target: TARGET, error = %e, "dropping socket");
                            return Exit::Disconnected;
                        }
                    }
                    Some(Err(e)) => {
                        tracing::debug!(target: TARGET, error = %e, "socket error");
                        return Exit::Disconnected;
                    }
                    None => return Exit::Disconnected,
                },
                command = self.commands.recv() => {
                    let flow = match command {
                        Some(command) => self.apply(command, Some(socket.as_mut())).await,
                        None => Flow::Shutdown,
                    };
                    if let Flow::Shutdown = flow {
                        send(self.config.protocol, socket.as_mut(), ClientMessage::Terminate).await.ok();
                        socket.close().await;
                        return Exit::Shutdown;
                    }
                },
                _ = tick(&mut keep_alive) => {
                    if let Err(e) = send(self.config.protocol, socket.as_mut(), ClientMessage::Ping).await {
                        tracing::debug!(target: TARGET, error = %e, "keep-alive ping failed");
                        return Exit::Disconnected;
                    }
                },
                _ = sleep_until(idle_deadline) => {
                    tracing::debug!(target: TARGET, url = %self.request.url, "closing idle connection");
                    send(self.config.protocol, socket.as_mut(), ClientMessage::Terminate).await.ok();
                    socket.close().await;
                    return Exit::Idle;
                },
            }
        }
    }

    /// Start every registration on a fresh socket, in registration order.
    async fn replay(&mut self, socket: &mut dyn Socket, restarted: bool) -> Result<()> {
        let protocol = self.config.protocol;
        for (id, registration) in self.registrations.iter_mut() {
            if restarted && registration.started {
                let _ = registration.sink.send(SubscriptionMessage::Restarted);
            }
            let frame = protocol::encode(
                protocol,
                ClientMessage::Subscribe {
                    id: id.to_string(),
                    payload: registration.payload.clone(),
                },
            )?;
            if let Some(frame) = frame {
                socket.send(frame).await?;
            }
            registration.started = true;
        }
        if restarted && !self.registrations.is_empty() {
            tracing::info!(
                target: TARGET,
                count = self.registrations.len(),
                "resubscribed after reconnect"
            );
        }
        Ok(())
    }

    async fn apply(&mut self, command: Command, socket: Option<&mut dyn Socket>) -> Flow {
        match command {
            Command::Subscribe {
                id,
                operation,
                sink,
            } => {
                let payload = match subscribe_payload(&operation) {
                    Ok(payload) => payload,
                    Err(e) => {
                        let _ = sink.send(SubscriptionMessage::Error(e));
                        return Flow::Continue;
                    }
                };
                let mut registration = Registration {
                    payload,
                    sink,
                    started: false,
                };
                if let Some(socket) = socket {
                    let frame = ClientMessage::Subscribe {
                        id: id.to_string(),
                        payload: registration.payload.clone(),
                    };
                    // A failed send surfaces as a disconnect on the next
                    // recv; the registration is replayed then.
                    registration.started = send(self.config.protocol, socket, frame).await.is_ok();
                }
                self.registrations.insert(id, registration);
                self.idle_since = None;
            }
            Command::Unsubscribe { id } => {
                if self.registrations.remove(&id).is_none() {
                    return Flow::Continue;
                }
                tracing::debug!(target: TARGET, id, "unsubscribe");
                if let Some(socket) = socket {
                    send(
                        self.config.protocol,
                        socket,
                        ClientMessage::Stop { id: id.to_string() },
                    )
                    .await
                    .ok();
                }
                self.mark_idle();
            }
            Command::Close => return Flow::Shutdown,
        }
        Flow::Continue
    }

    async fn on_frame(&mut self, socket: &mut dyn Socket, text: &str) -> Result<()> {
        let message = match protocol::decode(self.config.protocol, text) {
            Ok(message) => message,
            Err(e) => {
                tracing::debug!(target: TARGET, error = %e, "ignoring undecodable frame");
                return Ok(());
            }
        };

        match message {
            ServerMessage::Next { id, payload } => {
                if let Some(registration) = self.registration(&id) {
                    let _ = registration.sink.send(SubscriptionMessage::Data(payload));
                }
            }
            ServerMessage::Error { id, errors } => {
                if let Some(registration) = self.take_registration(&id) {
                    tracing::debug!(target: TARGET, id = %id, "subscription error from server");
                    let _ = registration
                        .sink
                        .send(SubscriptionMessage::Error(LinkError::Server(errors)));
                }
            }
            ServerMessage::Complete { id } => {
                if let Some(registration) = self.take_registration(&id) {
                    tracing::debug!(target: TARGET, id = %id, "subscription complete");
                    let _ = registration.sink.send(SubscriptionMessage::Complete);
                }
            }
            ServerMessage::Ping => send(self.config.protocol, socket, ClientMessage::Pong).await?,
            ServerMessage::ConnectionError(payload) => {
                return Err(LinkError::Network(format!("connection error: {payload}")));
            }
            ServerMessage::Pong | ServerMessage::KeepAlive | ServerMessage::ConnectionAck => {
                tracing::trace!(target: TARGET, "keep-alive");
            }
        }
        Ok(())
    }

    fn registration(&self, id: &str) -> Option<&Registration> {
        id.parse::<u64>()
            .ok()
            .and_then(|id| self.registrations.get(&id))
    }

    fn take_registration(&mut self, id: &str) -> Option<Registration> {
        let registration = id
            .parse::<u64>()
            .ok()
            .and_then(|id| self.registrations.remove(&id));
        if registration.is_some() {
            self.mark_idle();
        }
        registration
    }

    /// Sleep for `delay` while still serving commands.
    async fn pause(&mut self, delay: Duration) -> Flow {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                _ = &mut sleep => return Flow::Continue,
                command = self.commands.recv() => match command {
                    Some(command) => {
                        if let Flow::Shutdown = self.apply(command, None).await {
                            return Flow::Shutdown;
                        }
                    }
                    None => return Flow::Shutdown,
                },
            }
        }
    }

    /// End every registration with `error` and give up on the connection.
    fn fail_all(&mut self, error: LinkError) {
        tracing::error!(
            target: TARGET,
            url = %self.request.url,
            subscriptions = self.registrations.len(),
            error = %error,
            "streaming connection failed; giving up"
        );
        for (_, registration) in std::mem::take(&mut self.registrations) {
            let _ = registration
                .sink
                .send(SubscriptionMessage::Error(error.clone()));
        }
    }

    fn mark_idle(&mut self) {
        if self.registrations.is_empty() {
            self.idle_since = Some(Instant::now());
        }
    }

    fn idle_deadline(&self) -> Option<Instant> {
        match (self.config.idle, self.idle_since) {
            (IdlePolicy::CloseWhenIdle { grace }, Some(since)) if self.registrations.is_empty() => {
                Some(since + grace)
            }
            _ => None,
        }
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        if previous != state {
            tracing::trace!(target: TARGET, ?previous, ?state, "state change");
        }
    }
}

async fn send(protocol: WireProtocol, socket: &mut dyn Socket, message: ClientMessage) -> Result<()> {
    if let Some(frame) = protocol::encode(protocol, message)? {
        socket.send(frame).await?;
    }
    Ok(())
}

/// Open a socket and complete the `connection_init` / `connection_ack`
/// exchange within `timeout`.
async fn handshake(
    connector: Arc<dyn Connector>,
    request: SocketRequest,
    init_payload: Value,
    timeout: Duration,
) -> Result<Box<dyn Socket>> {
    tokio::time::timeout(timeout, connect_and_init(connector, request, init_payload))
        .await
        .map_err(|_| LinkError::Timeout)?
}

async fn connect_and_init(
    connector: Arc<dyn Connector>,
    request: SocketRequest,
    init_payload: Value,
) -> Result<Box<dyn Socket>> {
    let protocol = request.protocol;
    let mut socket = connector.connect(&request).await?;
    send(
        protocol,
        socket.as_mut(),
        ClientMessage::ConnectionInit {
            payload: init_payload,
        },
    )
    .await?;

    loop {
        let Some(frame) = socket.recv().await else {
            return Err(LinkError::Network(
                "socket closed before connection_ack".into(),
            ));
        };
        match protocol::decode(protocol, &frame?)? {
            ServerMessage::ConnectionAck => return Ok(socket),
            ServerMessage::ConnectionError(payload) => {
                let mut error = GraphQLError::new("connection rejected");
                error.extensions = Some(payload);
                return Err(LinkError::Server(vec![error]));
            }
            ServerMessage::Ping => send(protocol, socket.as_mut(), ClientMessage::Pong).await?,
            other => {
                tracing::debug!(target: TARGET, ?other, "ignoring frame before ack");
            }
        }
    }
}

/// The subscribe payload for `operation`, with per-call headers in
/// `extensions.headers`.
fn subscribe_payload(operation: &Operation) -> Result<Value> {
    let mut payload = serde_json::to_value(operation)?;
    if operation.headers().is_empty() {
        return Ok(payload);
    }
    if let Value::Object(fields) = &mut payload {
        let extensions = fields
            .entry("extensions")
            .or_insert_with(|| Value::Object(Default::default()));
        if extensions.is_null() {
            *extensions = Value::Object(Default::default());
        }
        match extensions {
            Value::Object(extensions) => {
                extensions.insert("headers".into(), operation.headers().to_json());
            }
            _ => {
                return Err(LinkError::Json(
                    "operation extensions must be an object to carry headers".into(),
                ));
            }
        }
    }
    Ok(payload)
}

async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
