//! Outgoing POST requests.

use std::time::Duration;

use reqwest::header::CONTENT_TYPE;
use serde::Serialize;

use super::client::HttpClient;
use super::response::HttpResponse;
use crate::error::Result;
use crate::headers::HeaderSet;

/// A POST request being assembled.
///
/// Nothing is validated until [`send`](Self::send): a bad URL, header or
/// body surfaces there as the matching [`LinkError`](crate::LinkError).
pub struct HttpRequestBuilder {
    client: HttpClient,
    url: String,
    headers: HeaderSet,
    body: Option<Result<Vec<u8>>>,
    timeout: Option<Duration>,
}

impl HttpRequestBuilder {
    pub(crate) fn post(client: HttpClient, url: String) -> Self {
        Self {
            client,
            url,
            headers: HeaderSet::new(),
            body: None,
            timeout: None,
        }
    }

    /// Add one request header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers = self.headers.with(name, value);
        self
    }

    /// Layer `headers` over the headers already set; later values win.
    pub fn headers(mut self, headers: &HeaderSet) -> Self {
        self.headers = self.headers.merged(headers);
        self
    }

    /// Serialize `body` as the JSON payload.
    pub fn json<T: Serialize + ?Sized>(mut self, body: &T) -> Self {
        self.body = Some(serde_json::to_vec(body).map_err(Into::into));
        self
    }

    /// Override the client's timeout for this request only.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Send the request and wait for the response head.
    pub async fn send(self) -> Result<HttpResponse> {
        let url = url::Url::parse(&self.url)?;
        let mut request = self
            .client
            .inner()
            .post(url)
            .headers(self.headers.to_header_map()?);

        if let Some(body) = self.body {
            request = request.header(CONTENT_TYPE, "application/json").body(body?);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        tracing::trace!(target: "horizon_lattice_link::http", url = %self.url, "POST");
        let response = request.send().await?;
        Ok(HttpResponse::new(response))
    }
}

impl std::fmt::Debug for HttpRequestBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpRequestBuilder")
            .field("url", &self.url)
            .field("headers", &self.headers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::error::LinkError;

    fn client() -> HttpClient {
        HttpClient::builder().build().unwrap()
    }

    #[tokio::test]
    async fn test_invalid_url() {
        let result = client().post("not a url").send().await;
        assert!(matches!(result, Err(LinkError::InvalidUrl(_))));
    }

    #[tokio::test]
    async fn test_invalid_header_reported_on_send() {
        let result = client()
            .post("http://127.0.0.1:9/graphql")
            .header("X-Trace", "line\nbreak")
            .send()
            .await;
        assert!(matches!(result, Err(LinkError::InvalidHeader(_))));
    }

    #[tokio::test]
    async fn test_unserializable_body_reported_on_send() {
        // JSON object keys must be strings.
        let body = HashMap::from([((1, 2), "pair")]);
        let result = client()
            .post("http://127.0.0.1:9/graphql")
            .json(&body)
            .send()
            .await;
        assert!(matches!(result, Err(LinkError::Json(_))));
    }
}
