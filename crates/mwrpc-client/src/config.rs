//! Client configuration.
//!
//! All settings live in a single `config.toml` file at
//! `~/.config/mwrpc/config.toml` by default:
//!
//! ```toml
//! host = "nas.example.com"
//! username = "admin"
//! api_key = "pass::nas/api-key"
//! ping_interval_secs = 30
//! ```
//!
//! Credential values (`username`, `api_key`) support secret references:
//! - `pass::path/in/store` resolved via `pass show`
//! - `env::VAR_NAME` resolved from the environment
//! - `file::/path` first line of a file
//! - plain text used as-is
//!
//! The alternate filesystem transport is never read from the file; it is
//! injected in code with `WsClient::with_fallback`.

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use mwrpc_core::ClientError;

use crate::secret::{self, SecretError};

/// Default path of the versioned API endpoint.
pub const DEFAULT_API_PATH: &str = "/api/current";

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The config file could not be read.
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid TOML for [`ClientConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// The configuration could not be rendered back to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// No host configured for the WebSocket transport.
    #[error("host must not be empty")]
    MissingHost,

    /// A credential field is not set.
    #[error("{0} is not configured")]
    MissingCredential(&'static str),

    /// A credential reference could not be resolved.
    #[error("failed to resolve {field}: {source}")]
    Secret {
        field: &'static str,
        #[source]
        source: SecretError,
    },

    /// A numeric setting is out of range.
    #[error("invalid {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}

impl From<ConfigError> for ClientError {
    fn from(err: ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

/// Which transport variant to build.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// JSON-RPC over WebSocket.
    #[default]
    Websocket,
    /// Filesystem operations only, through the injected fallback.
    Filesystem,
    /// Stub that rejects every operation.
    Unsupported,
}

/// Configuration for the management API client.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server host name or address.
    pub host: String,

    /// Server port. Defaults to 443 with TLS and 80 without.
    pub port: Option<u16>,

    /// Endpoint path.
    pub path: String,

    /// Connect with `wss://` instead of `ws://`.
    pub use_tls: bool,

    /// Login user (supports secret references).
    pub username: Option<String>,

    /// API key (supports secret references).
    pub api_key: Option<String>,

    /// Seconds between liveness probes. 0 disables probing.
    pub ping_interval_secs: u64,

    /// Seconds to wait for each call's response. 0 waits forever.
    pub request_timeout_secs: u64,

    /// Seconds allowed for the socket handshake and login.
    pub connect_timeout_secs: u64,

    /// Queue length of each subscription before the oldest events are dropped.
    /// Enforced exactly.
    pub subscription_capacity: usize,

    /// Accept any server certificate. Only for tests against self-signed servers.
    pub insecure_skip_verify: bool,

    /// Transport variant.
    pub transport: TransportKind,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: None,
            path: DEFAULT_API_PATH.to_string(),
            use_tls: true,
            username: None,
            api_key: None,
            ping_interval_secs: 30,
            request_timeout_secs: 60,
            connect_timeout_secs: 10,
            subscription_capacity: 64,
            insecure_skip_verify: false,
            transport: TransportKind::Websocket,
        }
    }
}

/// Resolved login credentials.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login user.
    pub username: String,
    /// API key.
    pub api_key: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("api_key", &"<redacted>")
            .finish()
    }
}

impl ClientConfig {
    /// Creates a configuration for the given host with default settings.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Default::default()
        }
    }

    /// Builder: set the port.
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Builder: set the endpoint path.
    pub fn with_path(mut self, path: impl Into<String>) -> Self {
        self.path = path.into();
        self
    }

    /// Builder: enable or disable TLS.
    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    /// Builder: set login credentials.
    pub fn with_credentials(mut self, username: impl Into<String>, api_key: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.api_key = Some(api_key.into());
        self
    }

    /// Builder: set the liveness probe interval. `Duration::ZERO` disables it;
    /// sub-second values round up to one second.
    pub fn with_ping_interval(mut self, interval: Duration) -> Self {
        self.ping_interval_secs = whole_secs(interval);
        self
    }

    /// Builder: set the per-call timeout. `Duration::ZERO` disables it;
    /// sub-second values round up to one second.
    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout_secs = whole_secs(timeout);
        self
    }

    /// Builder: set the connect timeout.
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout_secs = whole_secs(timeout);
        self
    }

    /// Builder: set the per-subscription queue length.
    pub fn with_subscription_capacity(mut self, capacity: usize) -> Self {
        self.subscription_capacity = capacity;
        self
    }

    /// Builder: skip certificate validation.
    pub fn with_insecure_skip_verify(mut self, skip: bool) -> Self {
        self.insecure_skip_verify = skip;
        self
    }

    /// Builder: set the transport variant.
    pub fn with_transport(mut self, transport: TransportKind) -> Self {
        self.transport = transport;
        self
    }

    /// Returns the configured port, or the scheme default.
    pub fn effective_port(&self) -> u16 {
        self.port.unwrap_or(if self.use_tls { 443 } else { 80 })
    }

    /// Returns the endpoint URL.
    ///
    /// ```rust
    /// use mwrpc_client::ClientConfig;
    ///
    /// let config = ClientConfig::new("nas.local");
    /// assert_eq!(config.url(), "wss://nas.local:443/api/current");
    ///
    /// let config = ClientConfig::new("127.0.0.1").with_tls(false).with_port(6000);
    /// assert_eq!(config.url(), "ws://127.0.0.1:6000/api/current");
    /// ```
    pub fn url(&self) -> String {
        let scheme = if self.use_tls { "wss" } else { "ws" };
        let path = if self.path.starts_with('/') {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{}://{}:{}{}", scheme, self.host, self.effective_port(), path)
    }

    /// Liveness probe interval, `None` when disabled.
    pub fn ping_interval(&self) -> Option<Duration> {
        (self.ping_interval_secs > 0).then(|| Duration::from_secs(self.ping_interval_secs))
    }

    /// Per-call timeout, `None` when disabled.
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.request_timeout_secs > 0).then(|| Duration::from_secs(self.request_timeout_secs))
    }

    /// Connect timeout. A zero setting falls back to 10 seconds.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(if self.connect_timeout_secs == 0 {
            10
        } else {
            self.connect_timeout_secs
        })
    }

    /// Resolves credentials, expanding secret references.
    pub fn resolve_credentials(&self) -> Result<Credentials, ConfigError> {
        let raw_user = self
            .username
            .as_deref()
            .ok_or(ConfigError::MissingCredential("username"))?;
        let raw_key = self
            .api_key
            .as_deref()
            .ok_or(ConfigError::MissingCredential("api_key"))?;

        let username = secret::resolve(raw_user).map_err(|source| ConfigError::Secret {
            field: "username",
            source,
        })?;
        let api_key = secret::resolve(raw_key).map_err(|source| ConfigError::Secret {
            field: "api_key",
            source,
        })?;

        Ok(Credentials { username, api_key })
    }

    /// Checks settings that would only fail later at connect time.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.transport == TransportKind::Websocket && self.host.trim().is_empty() {
            return Err(ConfigError::MissingHost);
        }
        if self.subscription_capacity == 0 {
            return Err(ConfigError::Invalid {
                field: "subscription_capacity",
                reason: "must be greater than zero",
            });
        }
        if self.port == Some(0) {
            return Err(ConfigError::Invalid {
                field: "port",
                reason: "must not be zero",
            });
        }
        Ok(())
    }

    /// Renders the configuration as TOML.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Loads configuration from the default path, or defaults if it does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Ok(toml::from_str(&content)?)
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        Self::default_config_dir().join("config.toml")
    }

    /// Returns the default configuration directory.
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("mwrpc")
    }
}

/// Whole seconds in `duration`, rounding any fraction up so that only
/// `Duration::ZERO` maps to 0.
fn whole_secs(duration: Duration) -> u64 {
    duration.as_secs() + u64::from(duration.subsec_nanos() > 0)
}
