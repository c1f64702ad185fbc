//! The request transport: one HTTP POST per query or mutation.

use async_trait::async_trait;

use crate::error::Result;
use crate::headers::HeaderSet;
use crate::http::HttpClient;
use crate::operation::{GraphQLResponse, Operation};

/// A stateless one-shot transport for queries and mutations.
#[async_trait]
pub trait RequestTransport: Send + Sync + 'static {
    /// Send `operation` to `endpoint` with `headers` and wait for the
    /// single response. Implementations do not retry.
    async fn send(
        &self,
        endpoint: &str,
        headers: &HeaderSet,
        operation: &Operation,
    ) -> Result<GraphQLResponse>;
}

/// [`RequestTransport`] over HTTP.
///
/// Failures map onto distinct errors: a connection or I/O failure is
/// [`Network`](crate::LinkError::Network), a non-2xx status is
/// [`HttpStatus`](crate::LinkError::HttpStatus), a body that is not a
/// GraphQL response is [`MalformedResponse`](crate::LinkError::MalformedResponse),
/// and a response carrying only errors is [`Server`](crate::LinkError::Server).
#[derive(Clone, Debug)]
pub struct HttpRequestTransport {
    client: HttpClient,
}

impl HttpRequestTransport {
    /// Create a transport over an existing HTTP client.
    pub fn new(client: HttpClient) -> Self {
        Self { client }
    }

    /// The underlying HTTP client.
    pub fn client(&self) -> &HttpClient {
        &self.client
    }
}

#[async_trait]
impl RequestTransport for HttpRequestTransport {
    async fn send(
        &self,
        endpoint: &str,
        headers: &HeaderSet,
        operation: &Operation,
    ) -> Result<GraphQLResponse> {
        let headers = headers.merged(operation.headers());

        tracing::debug!(
            target: "horizon_lattice_link::http",
            endpoint,
            operation = %operation.identity(),
            "sending operation"
        );

        let response = self
            .client
            .post(endpoint)
            .header("Accept", "application/json")
            .headers(&headers)
            .json(operation)
            .send()
            .await?
            .error_for_status_with_body()
            .await?;

        let body: GraphQLResponse = response.json().await?;
        if body.has_errors() {
            tracing::debug!(
                target: "horizon_lattice_link::http",
                operation = %operation.identity(),
                errors = body.errors.len(),
                "response carries errors"
            );
        }
        body.into_result()
    }
}
