//! The transport router: classification plus both transports behind one
//! entry point.

use std::sync::Arc;

use crate::config::Endpoints;
use crate::error::Result;
use crate::headers::HeaderSet;
use crate::link::{Link, LinkChain};
use crate::operation::{GraphQLResponse, Operation, Route, classify};
use crate::transport::{Connection, RequestTransport, StreamingTransport, SubscriptionStream};

/// The outcome of [`TransportRouter::dispatch`].
#[derive(Debug)]
pub enum Dispatched {
    /// A query or mutation, already awaited.
    Single(Result<GraphQLResponse>),
    /// A subscription's live stream.
    Stream(SubscriptionStream),
}

impl Dispatched {
    /// The single result, if this was a query or mutation.
    pub fn into_single(self) -> Option<Result<GraphQLResponse>> {
        match self {
            Self::Single(result) => Some(result),
            Self::Stream(_) => None,
        }
    }

    /// The stream, if this was a subscription.
    pub fn into_stream(self) -> Option<SubscriptionStream> {
        match self {
            Self::Stream(stream) => Some(stream),
            Self::Single(_) => None,
        }
    }
}

/// Routes operations to the request or streaming transport.
///
/// A router is bound to one pair of endpoints and one static header set.
/// To change headers, build a new router; the streaming transport then
/// replaces its connection on the next subscription.
///
/// Every operation passes through the router's [links](crate::link) before
/// it is classified.
#[derive(Clone)]
pub struct TransportRouter {
    request: Arc<dyn RequestTransport>,
    streaming: Arc<StreamingTransport>,
    endpoints: Endpoints,
    headers: HeaderSet,
    links: LinkChain,
}

impl TransportRouter {
    /// Create a router over the two transports.
    pub fn new(
        request: Arc<dyn RequestTransport>,
        streaming: Arc<StreamingTransport>,
        endpoints: Endpoints,
        headers: HeaderSet,
    ) -> Self {
        Self {
            request,
            streaming,
            endpoints,
            headers,
            links: LinkChain::new(),
        }
    }

    /// Append a link to the chain run before routing.
    pub fn link(mut self, link: Arc<dyn Link>) -> Self {
        self.links.push(link);
        self
    }

    /// Replace the whole link chain.
    pub fn with_links(mut self, links: LinkChain) -> Self {
        self.links = links;
        self
    }

    /// The bound endpoints.
    pub fn endpoints(&self) -> &Endpoints {
        &self.endpoints
    }

    /// The static header set.
    pub fn headers(&self) -> &HeaderSet {
        &self.headers
    }

    /// The streaming transport.
    pub fn streaming(&self) -> &Arc<StreamingTransport> {
        &self.streaming
    }

    /// Classify `operation` and hand it to the matching transport.
    ///
    /// Queries and mutations never touch the streaming transport. An
    /// operation without a kind fails with
    /// [`Classification`](crate::LinkError::Classification).
    pub async fn dispatch(&self, operation: Operation) -> Dispatched {
        let operation = match self.links.apply(operation) {
            Ok(operation) => operation,
            Err(e) => return Dispatched::Single(Err(e)),
        };
        match classify(&operation) {
            Ok(Route::Request) => Dispatched::Single(self.send(&operation).await),
            Ok(Route::Stream) => Dispatched::Stream(self.connection().subscribe(operation)),
            Err(e) => Dispatched::Single(Err(e)),
        }
    }

    /// Run the links, then send a query or mutation over the request
    /// transport.
    pub async fn execute(&self, operation: &Operation) -> Result<GraphQLResponse> {
        let operation = self.links.apply(operation.clone())?;
        self.send(&operation).await
    }

    /// Run the links, then register a subscription on the streaming
    /// connection.
    pub fn subscribe(&self, operation: Operation) -> Result<SubscriptionStream> {
        let operation = self.links.apply(operation)?;
        Ok(self.connection().subscribe(operation))
    }

    async fn send(&self, operation: &Operation) -> Result<GraphQLResponse> {
        self.request
            .send(&self.endpoints.http, &self.headers, operation)
            .await
    }

    /// The streaming connection for this router's endpoint, opened on
    /// first use.
    pub fn connection(&self) -> Connection {
        self.streaming.open(&self.endpoints.socket, &self.headers)
    }
}

impl std::fmt::Debug for TransportRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportRouter")
            .field("endpoints", &self.endpoints)
            .field("headers", &self.headers.len())
            .field("links", &self.links.len())
            .finish()
    }
}
