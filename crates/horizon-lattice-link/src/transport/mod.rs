//! Transports for GraphQL operations.
//!
//! - [`RequestTransport`]: one HTTP round trip per query or mutation.
//! - [`StreamingTransport`]: a persistent socket multiplexing many
//!   subscriptions, with reconnect and replay.
//!
//! The streaming side is layered: [`Connector`] / [`Socket`] move text
//! frames, the `protocol` codec maps frames onto protocol messages, and the
//! connection actor in [`streaming`] owns the registration table.
//!
//! # Example
//!
//! ```ignore
//! use horizon_lattice_link::transport::{StreamingConfig, StreamingTransport, SubscriptionMessage};
//! use horizon_lattice_link::{HeaderSet, Operation};
//!
//! let transport = StreamingTransport::websocket(StreamingConfig::default());
//! let connection = transport.open("ws://localhost:3000/graphql", &HeaderSet::new());
//!
//! let mut logs = connection.subscribe(
//!     Operation::subscription("subscription RunLogs($id: ID!) { runLogs(runId: $id) { message } }")
//!         .variable("id", "a1b2"),
//! );
//! while let Some(message) = logs.next().await {
//!     match message {
//!         SubscriptionMessage::Data(response) => println!("{:?}", response.data),
//!         SubscriptionMessage::Restarted => println!("stream restarted"),
//!         SubscriptionMessage::Complete | SubscriptionMessage::Error(_) => break,
//!     }
//! }
//! ```

mod protocol;
mod reconnect;
mod request;
mod socket;
pub mod streaming;
mod subscription;

pub use protocol::WireProtocol;
pub use reconnect::{IdlePolicy, ReconnectConfig};
pub use request::{HttpRequestTransport, RequestTransport};
pub use socket::{Connector, Socket, SocketRequest, WebSocketConnector};
pub use streaming::{Connection, ConnectionState, StreamingConfig, StreamingTransport};
pub use subscription::{SubscriptionMessage, SubscriptionStream};
