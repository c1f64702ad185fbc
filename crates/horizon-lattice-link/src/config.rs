//! Client configuration and endpoint derivation.
//!
//! A [`ClientConfig`] can be built in code or loaded from TOML:
//!
//! ```toml
//! origin = "https://dagster.example.com"
//! base_path = "/dagit"
//! request_timeout_ms = 30000
//! fetch_policy = "cache-and-network"
//!
//! [headers]
//! Authorization = "Bearer secret"
//!
//! [streaming]
//! protocol = "graphql-ws"
//! connection_timeout_ms = 10000
//! keep_alive_ms = 30000
//! idle_close_ms = 5000
//!
//! [streaming.reconnect]
//! initial_delay_ms = 1000
//! max_delay_ms = 30000
//! multiplier = 2.0
//! max_attempts = 10
//! jitter = true
//!
//! [cache.key_fields]
//! Asset = ["key"]
//! ```

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::cache::{CacheSnapshot, TypePolicies};
use crate::client::FetchPolicy;
use crate::error::{LinkError, Result};
use crate::headers::HeaderSet;
use crate::transport::{IdlePolicy, ReconnectConfig, StreamingConfig, WireProtocol};

/// The two endpoints a client talks to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Endpoints {
    /// Request transport endpoint: `{origin}{base_path}/graphql`.
    pub http: String,
    /// Streaming endpoint: the HTTP endpoint with `http` replaced by `ws`.
    pub socket: String,
}

impl Endpoints {
    /// Derive both endpoints from an origin and a base path.
    ///
    /// The origin must be an `http` or `https` URL. The base path may be
    /// empty; leading and trailing slashes are normalized.
    pub fn derive(origin: &str, base_path: &str) -> Result<Self> {
        let origin = origin.trim_end_matches('/');
        let base_path = base_path.trim_matches('/');
        let http = if base_path.is_empty() {
            format!("{origin}/graphql")
        } else {
            format!("{origin}/{base_path}/graphql")
        };

        let parsed = url::Url::parse(&http)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(LinkError::InvalidUrl(format!(
                "origin must use http or https, got {}",
                parsed.scheme()
            )));
        }

        // http -> ws, https -> wss
        let socket = format!("ws{}", &http["http".len()..]);
        Ok(Self { http, socket })
    }
}

/// Everything needed to build a [`Client`](crate::Client).
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Server origin, e.g. `https://dagster.example.com`.
    pub origin: String,
    /// Path prefix under which `/graphql` is served.
    pub base_path: String,
    /// Static headers sent with every request and on every handshake.
    pub headers: HeaderSet,
    /// Per-request timeout for the request transport.
    pub request_timeout: Duration,
    /// Streaming transport settings.
    pub streaming: StreamingConfig,
    /// Default fetch policy for [`Client::query`](crate::Client::query).
    pub fetch_policy: FetchPolicy,
    /// Entity identity rules.
    pub type_policies: TypePolicies,
    /// Contents to seed the cache with.
    pub initial_cache: Option<CacheSnapshot>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            origin: "http://localhost:3000".into(),
            base_path: String::new(),
            headers: HeaderSet::new(),
            request_timeout: Duration::from_secs(30),
            streaming: StreamingConfig::default(),
            fetch_policy: FetchPolicy::default(),
            type_policies: TypePolicies::default(),
            initial_cache: None,
        }
    }
}

impl ClientConfig {
    /// Create a configuration for `origin` with defaults elsewhere.
    pub fn new(origin: impl Into<String>) -> Self {
        Self {
            origin: origin.into(),
            ..Self::default()
        }
    }

    /// Set the base path.
    pub fn base_path(mut self, base_path: impl Into<String>) -> Self {
        self.base_path = base_path.into();
        self
    }

    /// Add a static header.
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers = self.headers.with(name, value);
        self
    }

    /// Replace the static headers.
    pub fn headers(mut self, headers: HeaderSet) -> Self {
        self.headers = headers;
        self
    }

    /// Set the request timeout.
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Set the reconnect policy.
    pub fn reconnect(mut self, reconnect: ReconnectConfig) -> Self {
        self.streaming.reconnect = reconnect;
        self
    }

    /// Set the idle policy.
    pub fn idle_policy(mut self, idle: IdlePolicy) -> Self {
        self.streaming.idle = idle;
        self
    }

    /// Set the handshake timeout.
    pub fn connection_timeout(mut self, timeout: Duration) -> Self {
        self.streaming.connection_timeout = timeout;
        self
    }

    /// Set or disable the keep-alive ping interval.
    pub fn keep_alive(mut self, interval: Option<Duration>) -> Self {
        self.streaming.keep_alive_interval = interval;
        self
    }

    /// Set the wire protocol.
    pub fn protocol(mut self, protocol: WireProtocol) -> Self {
        self.streaming.protocol = protocol;
        self
    }

    /// Set the default fetch policy.
    pub fn fetch_policy(mut self, policy: FetchPolicy) -> Self {
        self.fetch_policy = policy;
        self
    }

    /// Set entity identity rules.
    pub fn type_policies(mut self, policies: TypePolicies) -> Self {
        self.type_policies = policies;
        self
    }

    /// Seed the cache.
    pub fn initial_cache(mut self, snapshot: CacheSnapshot) -> Self {
        self.initial_cache = Some(snapshot);
        self
    }

    /// Derive the endpoints.
    pub fn endpoints(&self) -> Result<Endpoints> {
        Endpoints::derive(&self.origin, &self.base_path)
    }

    /// Parse a TOML configuration. Missing keys take their defaults.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let raw: RawConfig = toml::from_str(source)?;
        raw.into_config()
    }

    /// Load a TOML configuration file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)
            .map_err(|e| LinkError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&source)
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawConfig {
    origin: Option<String>,
    base_path: Option<String>,
    headers: BTreeMap<String, String>,
    request_timeout_ms: Option<u64>,
    fetch_policy: Option<FetchPolicy>,
    streaming: RawStreaming,
    cache: RawCache,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawStreaming {
    protocol: Option<String>,
    connection_timeout_ms: Option<u64>,
    /// Zero disables keep-alive.
    keep_alive_ms: Option<u64>,
    /// Absent keeps idle connections open.
    idle_close_ms: Option<u64>,
    reconnect: RawReconnect,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawReconnect {
    initial_delay_ms: Option<u64>,
    max_delay_ms: Option<u64>,
    multiplier: Option<f64>,
    /// Zero retries forever.
    max_attempts: Option<u32>,
    jitter: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct RawCache {
    key_fields: BTreeMap<String, Vec<String>>,
    embedded: Vec<String>,
}

impl RawConfig {
    fn into_config(self) -> Result<ClientConfig> {
        let mut config = ClientConfig::default();
        if let Some(origin) = self.origin {
            config.origin = origin;
        }
        if let Some(base_path) = self.base_path {
            config.base_path = base_path;
        }
        config.headers = HeaderSet::from(self.headers);
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(policy) = self.fetch_policy {
            config.fetch_policy = policy;
        }

        let streaming = &mut config.streaming;
        if let Some(protocol) = self.streaming.protocol {
            streaming.protocol = parse_protocol(&protocol)?;
        }
        if let Some(ms) = self.streaming.connection_timeout_ms {
            streaming.connection_timeout = Duration::from_millis(ms);
        }
        match self.streaming.keep_alive_ms {
            Some(0) => streaming.keep_alive_interval = None,
            Some(ms) => streaming.keep_alive_interval = Some(Duration::from_millis(ms)),
            None => {}
        }
        if let Some(ms) = self.streaming.idle_close_ms {
            streaming.idle = IdlePolicy::CloseWhenIdle {
                grace: Duration::from_millis(ms),
            };
        }

        let reconnect = self.streaming.reconnect;
        let policy = &mut streaming.reconnect;
        if let Some(ms) = reconnect.initial_delay_ms {
            policy.initial_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = reconnect.max_delay_ms {
            policy.max_delay = Duration::from_millis(ms);
        }
        if let Some(multiplier) = reconnect.multiplier {
            if !(multiplier >= 1.0 && multiplier.is_finite()) {
                return Err(LinkError::Config(format!(
                    "reconnect multiplier must be a finite number >= 1, got {multiplier}"
                )));
            }
            policy.backoff_multiplier = multiplier;
        }
        match reconnect.max_attempts {
            Some(0) => policy.max_attempts = None,
            Some(attempts) => policy.max_attempts = Some(attempts),
            None => {}
        }
        if let Some(jitter) = reconnect.jitter {
            policy.jitter = jitter;
        }

        let mut policies = TypePolicies::new();
        for (typename, fields) in self.cache.key_fields {
            if fields.is_empty() {
                return Err(LinkError::Config(format!(
                    "cache.key_fields.{typename} must name at least one field"
                )));
            }
            policies = policies.key_fields(typename, fields);
        }
        for typename in self.cache.embedded {
            policies = policies.embedded(typename);
        }
        config.type_policies = policies;

        config.endpoints()?;
        Ok(config)
    }
}

fn parse_protocol(name: &str) -> Result<WireProtocol> {
    [
        WireProtocol::GraphqlTransportWs,
        WireProtocol::SubscriptionsTransportWs,
    ]
    .into_iter()
    .find(|p| p.subprotocol() == name)
    .ok_or_else(|| {
        LinkError::Config(format!(
            "unknown streaming protocol '{name}' (expected graphql-transport-ws or graphql-ws)"
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_derivation() {
        let endpoints = Endpoints::derive("http://localhost:3000", "").unwrap();
        assert_eq!(endpoints.http, "http://localhost:3000/graphql");
        assert_eq!(endpoints.socket, "ws://localhost:3000/graphql");

        let endpoints = Endpoints::derive("https://dagster.example.com/", "/dagit/").unwrap();
        assert_eq!(endpoints.http, "https://dagster.example.com/dagit/graphql");
        assert_eq!(endpoints.socket, "wss://dagster.example.com/dagit/graphql");
    }

    #[test]
    fn test_endpoint_rejects_non_http_origin() {
        assert!(matches!(
            Endpoints::derive("ftp://example.com", ""),
            Err(LinkError::InvalidUrl(_))
        ));
        assert!(matches!(
            Endpoints::derive("not a url", ""),
            Err(LinkError::InvalidUrl(_))
        ));
    }

    #[test]
    fn test_toml_config() {
        let config = ClientConfig::from_toml_str(
            r#"
            origin = "https://dagster.example.com"
            base_path = "/dagit"
            fetch_policy = "network-only"

            [headers]
            Authorization = "Bearer secret"

            [streaming]
            protocol = "graphql-ws"
            keep_alive_ms = 0
            idle_close_ms = 250

            [streaming.reconnect]
            initial_delay_ms = 50
            max_attempts = 3
            jitter = false

            [cache.key_fields]
            Asset = ["key"]
            "#,
        )
        .unwrap();

        assert_eq!(config.headers.get("Authorization"), Some("Bearer secret"));
        assert_eq!(config.fetch_policy, FetchPolicy::NetworkOnly);
        assert_eq!(config.streaming.protocol, WireProtocol::SubscriptionsTransportWs);
        assert_eq!(config.streaming.keep_alive_interval, None);
        assert_eq!(
            config.streaming.idle,
            IdlePolicy::CloseWhenIdle {
                grace: Duration::from_millis(250)
            }
        );
        assert_eq!(config.streaming.reconnect.max_attempts, Some(3));
        assert_eq!(config.streaming.reconnect.initial_delay, Duration::from_millis(50));
        assert!(!config.streaming.reconnect.jitter);
        assert_eq!(
            config.endpoints().unwrap().socket,
            "wss://dagster.example.com/dagit/graphql"
        );
    }

    #[test]
    fn test_toml_defaults_and_errors() {
        let config = ClientConfig::from_toml_str("").unwrap();
        assert_eq!(config.origin, "http://localhost:3000");
        assert_eq!(config.fetch_policy, FetchPolicy::CacheAndNetwork);

        assert!(matches!(
            ClientConfig::from_toml_str("[streaming]\nprotocol = \"sse\""),
            Err(LinkError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_toml_str("unknown_key = 1"),
            Err(LinkError::Config(_))
        ));
        assert!(matches!(
            ClientConfig::from_toml_str("[streaming.reconnect]\nmultiplier = 0.5"),
            Err(LinkError::Config(_))
        ));
    }

    #[test]
    fn test_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "origin = \"http://127.0.0.1:4000\"").unwrap();
        writeln!(file, "request_timeout_ms = 1500").unwrap();

        let config = ClientConfig::from_file(file.path()).unwrap();
        assert_eq!(config.origin, "http://127.0.0.1:4000");
        assert_eq!(config.request_timeout, Duration::from_millis(1500));

        assert!(matches!(
            ClientConfig::from_file(file.path().with_extension("missing")),
            Err(LinkError::Config(_))
        ));
    }
}
