//! The client facade: `query`, `mutate` and `subscribe` over the router and
//! the cache.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, Stream};
use serde::Deserialize;
use serde_json::Value;

use crate::cache::OperationCache;
use crate::config::{ClientConfig, Endpoints};
use crate::error::{LinkError, Result};
use crate::http::HttpClient;
use crate::link::{Link, LinkChain};
use crate::operation::{GraphQLResponse, Operation, Route, classify};
use crate::router::TransportRouter;
use crate::transport::{
    ConnectionState, Connector, HttpRequestTransport, RequestTransport, StreamingTransport,
    SubscriptionMessage, SubscriptionStream, WebSocketConnector,
};

/// How a query uses the cache.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FetchPolicy {
    /// Deliver the cached result if there is one, then always fetch and
    /// deliver the network result. A warm cache yields two results.
    #[default]
    CacheAndNetwork,
    /// Deliver the cached result if there is one; fetch only on a miss.
    CacheFirst,
    /// Always fetch; write the result to the cache.
    NetworkOnly,
    /// Never fetch. A miss yields nothing.
    CacheOnly,
    /// Always fetch; leave the cache alone.
    NoCache,
}

/// Where a [`QueryResult`] came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Source {
    /// Read from the cache without a round trip.
    Cache,
    /// Returned by the request transport.
    Network,
}

/// One delivery of a query.
#[derive(Clone, Debug, PartialEq)]
pub struct QueryResult {
    /// The response. Cached results never carry errors.
    pub response: GraphQLResponse,
    /// Where the response came from.
    pub source: Source,
}

impl QueryResult {
    /// The result data.
    pub fn data(&self) -> Option<&Value> {
        self.response.data.as_ref()
    }

    /// Whether this delivery came from the cache.
    pub fn is_cached(&self) -> bool {
        self.source == Source::Cache
    }
}

/// The deliveries of one query: at most one cached result, available
/// immediately, followed by at most one network result.
///
/// The network request is sent when the stream is first polled past the
/// cached result.
pub struct QueryStream {
    cached: Option<QueryResult>,
    network: Option<BoxFuture<'static, Result<QueryResult>>>,
}

impl QueryStream {
    fn failed(error: LinkError) -> Self {
        Self {
            cached: None,
            network: Some(futures_util::future::ready(Err(error)).boxed()),
        }
    }

    /// The cached result, if the query hit the cache and it has not been
    /// taken by [`next`](Self::next) yet.
    pub fn cached(&self) -> Option<&QueryResult> {
        self.cached.as_ref()
    }

    /// Whether a network delivery is still pending.
    pub fn awaits_network(&self) -> bool {
        self.network.is_some()
    }

    /// The next delivery.
    pub async fn next(&mut self) -> Option<Result<QueryResult>> {
        futures_util::StreamExt::next(self).await
    }
}

impl Stream for QueryStream {
    type Item = Result<QueryResult>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if let Some(cached) = this.cached.take() {
            return Poll::Ready(Some(Ok(cached)));
        }
        match this.network.as_mut() {
            Some(network) => {
                let result = futures_util::ready!(network.poll_unpin(cx));
                this.network = None;
                Poll::Ready(Some(result))
            }
            None => Poll::Ready(None),
        }
    }
}

impl std::fmt::Debug for QueryStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryStream")
            .field("cached", &self.cached)
            .field("awaits_network", &self.network.is_some())
            .finish()
    }
}

/// A subscription whose data is written to the cache before delivery.
///
/// A payload that cannot be normalized is delivered as
/// [`SubscriptionMessage::Error`] with
/// [`CacheNormalization`](LinkError::CacheNormalization); the stream
/// continues.
#[derive(Debug)]
pub struct CachedSubscription {
    stream: SubscriptionStream,
    operation: Operation,
    cache: Arc<OperationCache>,
}

impl CachedSubscription {
    /// The subscription id on its connection.
    pub fn id(&self) -> u64 {
        self.stream.id()
    }

    /// The next message.
    pub async fn next(&mut self) -> Option<SubscriptionMessage> {
        let message = self.stream.next().await?;
        Some(self.absorb(message))
    }

    /// Stop the subscription. Idempotent.
    pub fn unsubscribe(&mut self) {
        self.stream.unsubscribe();
    }

    fn absorb(&self, message: SubscriptionMessage) -> SubscriptionMessage {
        match message {
            SubscriptionMessage::Data(response) => {
                match self.cache.write_response(&self.operation, &response) {
                    Ok(_) => SubscriptionMessage::Data(response),
                    Err(e) => SubscriptionMessage::Error(e),
                }
            }
            other => other,
        }
    }
}

impl Stream for CachedSubscription {
    type Item = SubscriptionMessage;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        Pin::new(&mut this.stream)
            .poll_next(cx)
            .map(|message| message.map(|m| this.absorb(m)))
    }
}

/// Builder for a [`Client`].
pub struct ClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    request_transport: Option<Arc<dyn RequestTransport>>,
    http_client: Option<HttpClient>,
    links: LinkChain,
}

impl ClientBuilder {
    /// Start from a configuration.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connector: None,
            request_transport: None,
            http_client: None,
            links: LinkChain::new(),
        }
    }

    /// Run `link` on every operation before it is routed, after any links
    /// added earlier.
    pub fn link(mut self, link: impl Link + 'static) -> Self {
        self.links.push(Arc::new(link));
        self
    }

    /// Open streaming sockets through `connector` instead of WebSockets.
    pub fn connector(mut self, connector: Arc<dyn Connector>) -> Self {
        self.connector = Some(connector);
        self
    }

    /// Use a custom request transport.
    pub fn request_transport(mut self, transport: Arc<dyn RequestTransport>) -> Self {
        self.request_transport = Some(transport);
        self
    }

    /// Use an existing HTTP client for the default request transport.
    pub fn http_client(mut self, client: HttpClient) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Build the client.
    pub fn build(self) -> Result<Client> {
        let config = self.config;
        let endpoints = config.endpoints()?;

        let request_transport = match self.request_transport {
            Some(transport) => transport,
            None => {
                let http_client = match self.http_client {
                    Some(client) => client,
                    None => HttpClient::builder()
                        .timeout(config.request_timeout)
                        .build()?,
                };
                Arc::new(HttpRequestTransport::new(http_client))
            }
        };
        let connector = self
            .connector
            .unwrap_or_else(|| Arc::new(WebSocketConnector::new()));
        let streaming = Arc::new(StreamingTransport::new(config.streaming.clone(), connector));

        let router = TransportRouter::new(
            request_transport,
            streaming,
            endpoints,
            config.headers.clone(),
        )
        .with_links(self.links);

        let cache = Arc::new(OperationCache::with_policies(config.type_policies.clone()));
        if let Some(snapshot) = config.initial_cache.clone() {
            cache.restore(snapshot);
        }

        tracing::debug!(
            target: "horizon_lattice_link::client",
            http = %router.endpoints().http,
            socket = %router.endpoints().socket,
            "client ready"
        );

        Ok(Client {
            inner: Arc::new(ClientInner {
                router,
                cache,
                fetch_policy: config.fetch_policy,
            }),
        })
    }
}

struct ClientInner {
    router: TransportRouter,
    cache: Arc<OperationCache>,
    fetch_policy: FetchPolicy,
}

/// A GraphQL client: split transport routing plus a normalized cache.
///
/// Build one at startup and pass it to whatever needs it; clones share the
/// router, the streaming connection and the cache.
///
/// # Example
///
/// ```ignore
/// use horizon_lattice_link::{Client, ClientConfig, Operation, SubscriptionMessage};
///
/// let client = Client::new(
///     ClientConfig::new("https://dagster.example.com")
///         .base_path("/dagit")
///         .header("Authorization", "Bearer secret"),
/// )?;
///
/// // cache-and-network: a cached result right away, then the fresh one.
/// let mut runs = client.query(Operation::query("query RunsRoot { runs { __typename id status } }"));
/// while let Some(result) = runs.next().await {
///     println!("{:?}: {:?}", result?.source, runs.cached());
/// }
///
/// let mut logs = client.subscribe(Operation::subscription(
///     "subscription { runUpdated { __typename id status } }",
/// ))?;
/// while let Some(SubscriptionMessage::Data(update)) = logs.next().await {
///     println!("{:?}", update.data);
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Build a client from `config` with default transports.
    pub fn new(config: ClientConfig) -> Result<Self> {
        ClientBuilder::new(config).build()
    }

    /// Start a builder from `config`.
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }

    /// The endpoints in use.
    pub fn endpoints(&self) -> &Endpoints {
        self.inner.router.endpoints()
    }

    /// The router.
    pub fn router(&self) -> &TransportRouter {
        &self.inner.router
    }

    /// The cache.
    pub fn cache(&self) -> &Arc<OperationCache> {
        &self.inner.cache
    }

    /// The default fetch policy.
    pub fn fetch_policy(&self) -> FetchPolicy {
        self.inner.fetch_policy
    }

    /// State of the streaming connection, if one has been opened.
    pub fn connection_state(&self) -> Option<ConnectionState> {
        self.inner
            .router
            .streaming()
            .current()
            .map(|connection| connection.state())
    }

    /// Run a query with the default fetch policy.
    pub fn query(&self, operation: Operation) -> QueryStream {
        self.query_with_policy(operation, self.inner.fetch_policy)
    }

    /// Run a query with an explicit fetch policy.
    ///
    /// Subscriptions are rejected with
    /// [`Classification`](LinkError::Classification).
    pub fn query_with_policy(&self, operation: Operation, policy: FetchPolicy) -> QueryStream {
        match classify(&operation) {
            Ok(Route::Request) => {}
            Ok(Route::Stream) => {
                return QueryStream::failed(LinkError::Classification(format!(
                    "'{}' is a subscription; use subscribe()",
                    operation.identity()
                )));
            }
            Err(e) => return QueryStream::failed(e),
        }

        let cached = match policy {
            FetchPolicy::CacheAndNetwork | FetchPolicy::CacheFirst | FetchPolicy::CacheOnly => self
                .inner
                .cache
                .read(&operation)
                .map(|data| QueryResult {
                    response: GraphQLResponse::from_data(data),
                    source: Source::Cache,
                }),
            FetchPolicy::NetworkOnly | FetchPolicy::NoCache => None,
        };

        let fetch = match policy {
            FetchPolicy::CacheAndNetwork | FetchPolicy::NetworkOnly | FetchPolicy::NoCache => true,
            FetchPolicy::CacheFirst => cached.is_none(),
            FetchPolicy::CacheOnly => false,
        };

        tracing::debug!(
            target: "horizon_lattice_link::client",
            operation = %operation.identity(),
            ?policy,
            hit = cached.is_some(),
            fetch,
            "query"
        );

        let network = fetch.then(|| {
            let inner = self.inner.clone();
            let write = policy != FetchPolicy::NoCache;
            async move {
                let response = inner.router.execute(&operation).await?;
                if write {
                    inner.cache.write_response(&operation, &response)?;
                }
                Ok(QueryResult {
                    response,
                    source: Source::Network,
                })
            }
            .boxed()
        });

        QueryStream { cached, network }
    }

    /// Run a mutation and write its result to the cache.
    ///
    /// Partial data that arrives with errors is written too; the errors
    /// stay on the returned response.
    pub async fn mutate(&self, operation: Operation) -> Result<GraphQLResponse> {
        if classify(&operation)? == Route::Stream {
            return Err(LinkError::Classification(format!(
                "'{}' is a subscription; use subscribe()",
                operation.identity()
            )));
        }
        let response = self.inner.router.execute(&operation).await?;
        self.inner.cache.write_response(&operation, &response)?;
        Ok(response)
    }

    /// Start a subscription. Its data is written to the cache before each
    /// delivery.
    ///
    /// Opens the streaming connection on first use, so this must be called
    /// from within a Tokio runtime.
    pub fn subscribe(&self, operation: Operation) -> Result<CachedSubscription> {
        if classify(&operation)? != Route::Stream {
            return Err(LinkError::Classification(format!(
                "'{}' is not a subscription",
                operation.identity()
            )));
        }
        let stream = self.inner.router.subscribe(operation.clone())?;
        Ok(CachedSubscription {
            stream,
            operation,
            cache: self.inner.cache.clone(),
        })
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("endpoints", self.endpoints())
            .field("fetch_policy", &self.inner.fetch_policy)
            .field("cache", &self.inner.cache)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn client() -> Client {
        Client::new(ClientConfig::new("http://127.0.0.1:9")).unwrap()
    }

    #[test]
    fn test_cache_only_miss_yields_nothing() {
        let client = client();
        let stream = client.query_with_policy(
            Operation::query("{ version }"),
            FetchPolicy::CacheOnly,
        );
        assert!(stream.cached().is_none());
        assert!(!stream.awaits_network());
    }

    #[test]
    fn test_cache_first_hit_skips_network() {
        let client = client();
        let op = Operation::query("{ version }");
        client.cache().write(&op, &json!({"version": "1.2"})).unwrap();

        let stream = client.query_with_policy(op, FetchPolicy::CacheFirst);
        assert_eq!(
            stream.cached().and_then(QueryResult::data),
            Some(&json!({"version": "1.2"}))
        );
        assert!(!stream.awaits_network());
    }

    #[tokio::test]
    async fn test_query_rejects_subscriptions() {
        let client = client();
        let mut stream = client.query(Operation::subscription("subscription { tick }"));
        assert!(matches!(
            stream.next().await,
            Some(Err(LinkError::Classification(_)))
        ));
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn test_subscribe_rejects_queries() {
        let client = client();
        assert!(matches!(
            client.subscribe(Operation::query("{ version }")),
            Err(LinkError::Classification(_))
        ));
        assert!(client.connection_state().is_none());
    }

    #[test]
    fn test_fetch_policy_names() {
        #[derive(Deserialize)]
        struct Holder {
            policy: FetchPolicy,
        }
        let holder: Holder = serde_json::from_value(json!({"policy": "cache-first"})).unwrap();
        assert_eq!(holder.policy, FetchPolicy::CacheFirst);
    }
}
