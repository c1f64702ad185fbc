//! GraphQL link layer for Horizon Lattice.
//!
//! One logical client routes every operation to the right transport,
//! multiplexes subscriptions over a single streaming connection, and
//! normalizes every result into a shared cache:
//!
//! - **Classification**: [`classify`] maps an [`Operation`]'s kind to a
//!   [`Route`]. Queries and mutations take the request transport,
//!   subscriptions take the streaming transport.
//! - **Request transport**: one HTTP POST per operation, no retries
//!   ([`transport::HttpRequestTransport`]).
//! - **Streaming transport**: one socket, many subscriptions, reconnect
//!   with backoff and replay in registration order
//!   ([`transport::StreamingTransport`]).
//! - **Links**: caller-supplied [`Link`] steps that rewrite or reject each
//!   operation before it is routed.
//! - **Router**: both transports behind [`TransportRouter::dispatch`].
//! - **Cache**: entity-normalized store with field-level last-write-wins
//!   ([`OperationCache`]).
//! - **Client**: [`Client::query`], [`Client::mutate`] and
//!   [`Client::subscribe`] over the router and the cache.
//!
//! # Example
//!
//! ```ignore
//! use horizon_lattice_link::{Client, ClientConfig, Operation};
//!
//! let client = Client::new(
//!     ClientConfig::new("http://localhost:3000").header("Authorization", "Bearer secret"),
//! )?;
//!
//! let mut runs = client.query(Operation::query("{ runs { __typename id status } }"));
//! if let Some(cached) = runs.cached() {
//!     render(cached.data());
//! }
//! while let Some(result) = runs.next().await {
//!     render(result?.data());
//! }
//! ```
//!
//! # Logging
//!
//! The crate logs through `tracing` under the targets
//! `horizon_lattice_link::http`, `::streaming`, `::cache` and `::client`.

pub mod cache;
mod client;
pub mod config;
mod error;
mod headers;
pub mod http;
pub mod link;
pub mod operation;
mod router;
pub mod transport;

pub use cache::{CacheSnapshot, OperationCache, TypePolicies};
pub use client::{
    CachedSubscription, Client, ClientBuilder, FetchPolicy, QueryResult, QueryStream, Source,
};
pub use config::{ClientConfig, Endpoints};
pub use error::{LinkError, Result};
pub use headers::HeaderSet;
pub use link::{Link, LinkChain};
pub use operation::{
    GraphQLError, GraphQLLocation, GraphQLResponse, Operation, OperationKind, PathSegment, Route,
    classify,
};
pub use router::{Dispatched, TransportRouter};
pub use transport::{
    Connection, ConnectionState, IdlePolicy, ReconnectConfig, StreamingConfig, StreamingTransport,
    SubscriptionMessage, SubscriptionStream, WireProtocol,
};
