//! Wire codecs for GraphQL over WebSocket.
//!
//! Two dialects are supported:
//!
//! - `graphql-transport-ws` (the graphql-ws library's protocol, default).
//!   See: https://github.com/enisdenjo/graphql-ws/blob/master/PROTOCOL.md
//! - `graphql-ws`, the legacy subscriptions-transport-ws protocol with
//!   `start`/`data`/`stop` and server keep-alive (`ka`) frames.
//!
//! The streaming connection speaks in [`ClientMessage`] / [`ServerMessage`]
//! and never sees dialect-specific frame names.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{LinkError, Result};
use crate::operation::{GraphQLError, GraphQLResponse};

/// The GraphQL-over-WebSocket dialect spoken on the streaming connection.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WireProtocol {
    /// `graphql-transport-ws`.
    #[default]
    GraphqlTransportWs,
    /// Legacy `subscriptions-transport-ws` (subprotocol `graphql-ws`).
    SubscriptionsTransportWs,
}

impl WireProtocol {
    /// The `Sec-WebSocket-Protocol` value for this dialect.
    pub fn subprotocol(self) -> &'static str {
        match self {
            Self::GraphqlTransportWs => "graphql-transport-ws",
            Self::SubscriptionsTransportWs => "graphql-ws",
        }
    }

    /// Whether the client may send keep-alive pings.
    pub fn supports_client_ping(self) -> bool {
        matches!(self, Self::GraphqlTransportWs)
    }
}

/// A message from client to server.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ClientMessage {
    ConnectionInit { payload: Value },
    Subscribe { id: String, payload: Value },
    Stop { id: String },
    Ping,
    Pong,
    Terminate,
}

/// A message from server to client.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ServerMessage {
    ConnectionAck,
    ConnectionError(Value),
    Next { id: String, payload: GraphQLResponse },
    Error { id: String, errors: Vec<GraphQLError> },
    Complete { id: String },
    Ping,
    Pong,
    KeepAlive,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TransportWsFrame {
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Ping {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    Subscribe {
        id: String,
        payload: Value,
    },
    Next {
        id: String,
        payload: GraphQLResponse,
    },
    Error {
        id: String,
        payload: Vec<GraphQLError>,
    },
    Complete {
        id: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum LegacyFrame {
    ConnectionInit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    ConnectionAck {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        payload: Option<Value>,
    },
    ConnectionError {
        #[serde(default)]
        payload: Value,
    },
    ConnectionTerminate,
    #[serde(rename = "ka")]
    KeepAlive,
    Start {
        id: String,
        payload: Value,
    },
    Stop {
        id: String,
    },
    Data {
        id: String,
        payload: GraphQLResponse,
    },
    Error {
        id: String,
        payload: LegacyErrors,
    },
    Complete {
        id: String,
    },
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(untagged)]
enum LegacyErrors {
    Many(Vec<GraphQLError>),
    One(GraphQLError),
}

/// Encode a client message, or `None` when the dialect has no equivalent.
pub(crate) fn encode(protocol: WireProtocol, message: ClientMessage) -> Result<Option<String>> {
    let frame = match protocol {
        WireProtocol::GraphqlTransportWs => {
            let frame = match message {
                ClientMessage::ConnectionInit { payload } => TransportWsFrame::ConnectionInit {
                    payload: Some(payload),
                },
                ClientMessage::Subscribe { id, payload } => {
                    TransportWsFrame::Subscribe { id, payload }
                }
                ClientMessage::Stop { id } => TransportWsFrame::Complete { id },
                ClientMessage::Ping => TransportWsFrame::Ping { payload: None },
                ClientMessage::Pong => TransportWsFrame::Pong { payload: None },
                ClientMessage::Terminate => return Ok(None),
            };
            serde_json::to_string(&frame)?
        }
        WireProtocol::SubscriptionsTransportWs => {
            let frame = match message {
                ClientMessage::ConnectionInit { payload } => LegacyFrame::ConnectionInit {
                    payload: Some(payload),
                },
                ClientMessage::Subscribe { id, payload } => LegacyFrame::Start { id, payload },
                ClientMessage::Stop { id } => LegacyFrame::Stop { id },
                ClientMessage::Terminate => LegacyFrame::ConnectionTerminate,
                ClientMessage::Ping | ClientMessage::Pong => return Ok(None),
            };
            serde_json::to_string(&frame)?
        }
    };
    Ok(Some(frame))
}

/// Decode a server frame.
pub(crate) fn decode(protocol: WireProtocol, text: &str) -> Result<ServerMessage> {
    let malformed = |e: serde_json::Error| {
        LinkError::MalformedResponse(format!("{} frame: {e}", protocol.subprotocol()))
    };
    let message = match protocol {
        WireProtocol::GraphqlTransportWs => {
            match serde_json::from_str::<TransportWsFrame>(text).map_err(malformed)? {
                TransportWsFrame::ConnectionAck { .. } => ServerMessage::ConnectionAck,
                TransportWsFrame::Ping { .. } => ServerMessage::Ping,
                TransportWsFrame::Pong { .. } => ServerMessage::Pong,
                TransportWsFrame::Next { id, payload } => ServerMessage::Next { id, payload },
                TransportWsFrame::Error { id, payload } => ServerMessage::Error {
                    id,
                    errors: payload,
                },
                TransportWsFrame::Complete { id } => ServerMessage::Complete { id },
                TransportWsFrame::ConnectionInit { .. } | TransportWsFrame::Subscribe { .. } => {
                    return Err(LinkError::MalformedResponse(
                        "server sent a client-only message".into(),
                    ));
                }
            }
        }
        WireProtocol::SubscriptionsTransportWs => {
            match serde_json::from_str::<LegacyFrame>(text).map_err(malformed)? {
                LegacyFrame::ConnectionAck { .. } => ServerMessage::ConnectionAck,
                LegacyFrame::ConnectionError { payload } => ServerMessage::ConnectionError(payload),
                LegacyFrame::KeepAlive => ServerMessage::KeepAlive,
                LegacyFrame::Data { id, payload } => ServerMessage::Next { id, payload },
                LegacyFrame::Error { id, payload } => ServerMessage::Error {
                    id,
                    errors: match payload {
                        LegacyErrors::Many(errors) => errors,
                        LegacyErrors::One(error) => vec![error],
                    },
                },
                LegacyFrame::Complete { id } => ServerMessage::Complete { id },
                LegacyFrame::ConnectionInit { .. }
                | LegacyFrame::ConnectionTerminate
                | LegacyFrame::Start { .. }
                | LegacyFrame::Stop { .. } => {
                    return Err(LinkError::MalformedResponse(
                        "server sent a client-only message".into(),
                    ));
                }
            }
        }
    };
    Ok(message)
}
