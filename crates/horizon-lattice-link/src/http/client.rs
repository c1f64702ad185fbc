//! The pooled HTTP client shared by request-transport calls.

use std::sync::Arc;
use std::time::Duration;

use super::request::HttpRequestBuilder;
use crate::error::{LinkError, Result};
use crate::headers::HeaderSet;

/// Settings applied to every request sent through an [`HttpClient`].
#[derive(Clone, Debug)]
pub struct HttpClientConfig {
    /// Deadline for a whole request, response body included.
    pub timeout: Option<Duration>,
    /// Deadline for establishing the TCP/TLS connection.
    pub connect_timeout: Option<Duration>,
    /// Keep session cookies set by the GraphQL endpoint.
    pub cookies_enabled: bool,
    /// `User-Agent` header value.
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Some(Duration::from_secs(30)),
            connect_timeout: Some(Duration::from_secs(10)),
            cookies_enabled: true,
            user_agent: Some(format!(
                "HorizonLatticeLink/{} (Rust)",
                env!("CARGO_PKG_VERSION")
            )),
        }
    }
}

/// Builder for an [`HttpClient`].
#[derive(Default)]
pub struct HttpClientBuilder {
    config: HttpClientConfig,
    default_headers: HeaderSet,
}

impl HttpClientBuilder {
    /// Start from [`HttpClientConfig::default`].
    pub fn new() -> Self {
        Self::default()
    }

    /// Deadline for a whole request, from connect to the last body byte.
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = Some(timeout);
        self
    }

    /// Let requests run for as long as the server takes.
    pub fn no_timeout(mut self) -> Self {
        self.config.timeout = None;
        self
    }

    /// Deadline for establishing the TCP and TLS connection.
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.config.connect_timeout = Some(timeout);
        self
    }

    /// Drop cookies instead of replaying them.
    pub fn no_cookies(mut self) -> Self {
        self.config.cookies_enabled = false;
        self
    }

    /// Set the `User-Agent` header value.
    pub fn user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.config.user_agent = Some(user_agent.into());
        self
    }

    /// Headers sent with every request, beneath per-request headers.
    pub fn default_headers(mut self, headers: HeaderSet) -> Self {
        self.default_headers = headers;
        self
    }

    /// Build the client. Fails on an invalid default header.
    pub fn build(self) -> Result<HttpClient> {
        let HttpClientBuilder {
            config,
            default_headers,
        } = self;

        let mut builder = reqwest::Client::builder()
            .default_headers(default_headers.to_header_map()?)
            .cookie_store(config.cookies_enabled);
        if let Some(timeout) = config.timeout {
            builder = builder.timeout(timeout);
        }
        if let Some(timeout) = config.connect_timeout {
            builder = builder.connect_timeout(timeout);
        }
        if let Some(user_agent) = config.user_agent.as_deref() {
            builder = builder.user_agent(user_agent);
        }

        let client = builder
            .build()
            .map_err(|e| LinkError::Config(format!("HTTP client: {e}")))?;

        Ok(HttpClient {
            shared: Arc::new(Shared { client, config }),
        })
    }
}

struct Shared {
    client: reqwest::Client,
    config: HttpClientConfig,
}

/// A `reqwest` client plus the settings it was built with.
///
/// Clones share one connection pool.
#[derive(Clone)]
pub struct HttpClient {
    shared: Arc<Shared>,
}

impl HttpClient {
    /// Start building a client.
    pub fn builder() -> HttpClientBuilder {
        HttpClientBuilder::new()
    }

    /// The settings this client was built with.
    pub fn config(&self) -> &HttpClientConfig {
        &self.shared.config
    }

    /// Start a POST to `url`.
    pub fn post(&self, url: impl Into<String>) -> HttpRequestBuilder {
        HttpRequestBuilder::post(self.clone(), url.into())
    }

    pub(crate) fn inner(&self) -> &reqwest::Client {
        &self.shared.client
    }
}

impl std::fmt::Debug for HttpClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClient")
            .field("config", &self.shared.config)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_overrides() {
        let client = HttpClient::builder()
            .timeout(Duration::from_secs(5))
            .no_cookies()
            .user_agent("link-tests")
            .build()
            .unwrap();

        let config = client.config();
        assert_eq!(config.timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.connect_timeout, Some(Duration::from_secs(10)));
        assert!(!config.cookies_enabled);
        assert_eq!(config.user_agent.as_deref(), Some("link-tests"));
    }

    #[test]
    fn test_invalid_default_header_rejected() {
        let result = HttpClient::builder()
            .default_headers(HeaderSet::new().with("bad\nname", "x"))
            .build();
        assert!(matches!(result, Err(LinkError::InvalidHeader(_))));
    }
}
