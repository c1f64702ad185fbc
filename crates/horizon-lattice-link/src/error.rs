//! Error types for the link layer.

use thiserror::Error;

use crate::operation::GraphQLError;

/// Errors produced while routing, transporting, or caching operations.
#[derive(Debug, Clone, Error)]
pub enum LinkError {
    /// The operation could not be classified (it carries no operation kind).
    #[error("Cannot classify operation: {0}")]
    Classification(String),

    /// A transient transport failure: connect, I/O, socket or HTTP plumbing.
    #[error("Network error: {0}")]
    Network(String),

    /// The request did not complete within its deadline.
    #[error("Request timed out")]
    Timeout,

    /// The server answered with a non-success HTTP status.
    #[error("HTTP {status}{}", status_suffix(.message))]
    HttpStatus {
        /// The HTTP status code.
        status: u16,
        /// Optional error message from the response body.
        message: Option<String>,
    },

    /// The server answered, but the body is not a GraphQL response.
    #[error("Malformed response: {0}")]
    MalformedResponse(String),

    /// The streaming connection exhausted its reconnect budget.
    #[error("Connection failed after {attempts} reconnect attempts")]
    ConnectionFailed {
        /// Number of failed attempts before giving up.
        attempts: u32,
    },

    /// A well-formed GraphQL error response.
    #[error("GraphQL error: {}", join_messages(.0))]
    Server(Vec<GraphQLError>),

    /// A result could not be normalized into the cache; the write was dropped.
    #[error("Cache normalization error: {0}")]
    CacheNormalization(String),

    /// Invalid URL provided.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Invalid header name or value.
    #[error("Invalid header: {0}")]
    InvalidHeader(String),

    /// Invalid client configuration.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON serialization error on the outgoing side.
    #[error("JSON error: {0}")]
    Json(String),
}

impl LinkError {
    /// Whether the streaming reconnect loop may retry after this error.
    ///
    /// Only transport-level failures qualify. Anything else raised while
    /// connecting, such as a rejected handshake, ends the connection.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

fn status_suffix(message: &Option<String>) -> String {
    match message {
        Some(msg) => format!(": {msg}"),
        None => String::new(),
    }
}

fn join_messages(errors: &[GraphQLError]) -> String {
    if errors.is_empty() {
        return "unknown error".into();
    }
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<reqwest::Error> for LinkError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_decode() {
            Self::MalformedResponse(err.to_string())
        } else {
            Self::Network(err.to_string())
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for LinkError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<url::ParseError> for LinkError {
    fn from(err: url::ParseError) -> Self {
        Self::InvalidUrl(err.to_string())
    }
}

impl From<serde_json::Error> for LinkError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

impl From<std::io::Error> for LinkError {
    fn from(err: std::io::Error) -> Self {
        Self::Network(err.to_string())
    }
}

impl From<http::header::InvalidHeaderName> for LinkError {
    fn from(err: http::header::InvalidHeaderName) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<http::header::InvalidHeaderValue> for LinkError {
    fn from(err: http::header::InvalidHeaderValue) -> Self {
        Self::InvalidHeader(err.to_string())
    }
}

impl From<toml::de::Error> for LinkError {
    fn from(err: toml::de::Error) -> Self {
        Self::Config(err.to_string())
    }
}

/// A specialized Result type for link operations.
pub type Result<T> = std::result::Result<T, LinkError>;
