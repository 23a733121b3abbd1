//! Transport configuration.
//!
//! A [`TransportConfig`] is an immutable value handed to each
//! [`Transport`](crate::Transport). It can be built in code, read from a JSON
//! file, or taken from `TEXT2SQL_*` environment variables, and every source
//! falls back to the same defaults.

use crate::error::{ClientError, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Prefix every workspace name must carry.
pub const WORKSPACE_PREFIX: &str = "workspaces/";

/// Full configuration for a transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Base URL of the service; requests go to `{base_url}/api/{path}`.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// Bearer token sent with every request.
    pub access_token: String,

    /// Workspace scope sent as `X-Workspace-Name`.
    #[serde(default)]
    pub workspace_name: Option<String>,

    /// `User-Agent` header value.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Negotiate HTTP/2 when the server offers it.
    #[serde(default)]
    pub http2: bool,

    /// Timeout settings.
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Connection pool settings.
    #[serde(default)]
    pub pool: PoolConfig,

    /// Retry settings.
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Timeouts applied to every request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Connection establishment.
    #[serde(with = "humantime_serde", default = "default_connect_timeout")]
    pub connect: Duration,

    /// Idle time allowed between reads of the response.
    #[serde(with = "humantime_serde", default = "default_read_timeout")]
    pub read: Duration,

    /// Time allowed to send the request.
    #[serde(with = "humantime_serde", default = "default_write_timeout")]
    pub write: Duration,

    /// Time allowed to wait for a free connection slot.
    #[serde(with = "humantime_serde", default = "default_pool_timeout")]
    pub pool: Duration,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect: default_connect_timeout(),
            read: default_read_timeout(),
            write: default_write_timeout(),
            pool: default_pool_timeout(),
        }
    }
}

impl TimeoutConfig {
    /// Ceiling for a whole request once a connection slot is held.
    pub fn request_ceiling(&self) -> Duration {
        self.connect + self.write + self.read
    }
}

/// Connection pool limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum simultaneous connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum idle connections kept alive for reuse.
    #[serde(default = "default_max_keepalive")]
    pub max_keepalive_connections: usize,

    /// How long an idle connection may be kept alive.
    #[serde(with = "humantime_serde", default = "default_keepalive_expiry")]
    pub keepalive_expiry: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_keepalive_connections: default_max_keepalive(),
            keepalive_expiry: default_keepalive_expiry(),
        }
    }
}

impl PoolConfig {
    /// Exactly one connection, never kept alive.
    pub fn single_use() -> Self {
        Self {
            max_connections: 1,
            max_keepalive_connections: 0,
            keepalive_expiry: Duration::ZERO,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Additional attempts after the first one.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Delay before the first retry; doubles on every following one.
    #[serde(with = "humantime_serde", default = "default_base_delay")]
    pub base_delay: Duration,

    /// Upper bound for computed backoff. Does not apply to `Retry-After`.
    #[serde(with = "humantime_serde", default = "default_max_delay")]
    pub max_delay: Duration,

    /// Spread computed backoff by ±25%.
    #[serde(default)]
    pub jitter: bool,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            base_delay: default_base_delay(),
            max_delay: default_max_delay(),
            jitter: false,
        }
    }
}

fn default_base_url() -> String {
    "http://localhost:8000".to_string()
}

fn default_user_agent() -> String {
    format!("text2sql-client/{}", crate::VERSION)
}

fn default_connect_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_read_timeout() -> Duration {
    Duration::from_secs(180)
}

fn default_write_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_pool_timeout() -> Duration {
    Duration::from_secs(300)
}

fn default_max_connections() -> usize {
    50
}

fn default_max_keepalive() -> usize {
    10
}

fn default_keepalive_expiry() -> Duration {
    Duration::from_secs(300)
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_delay() -> Duration {
    Duration::from_secs(1)
}

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

impl TransportConfig {
    /// Create a configuration with defaults for everything but the
    /// endpoint and credentials.
    pub fn new(base_url: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            access_token: access_token.into(),
            workspace_name: None,
            user_agent: default_user_agent(),
            http2: false,
            timeouts: TimeoutConfig::default(),
            pool: PoolConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    /// Set the workspace scope.
    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace_name = Some(workspace.into());
        self
    }

    /// Replace the retry settings.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Replace the timeout settings.
    pub fn with_timeouts(mut self, timeouts: TimeoutConfig) -> Self {
        self.timeouts = timeouts;
        self
    }

    /// Replace the pool settings.
    pub fn with_pool(mut self, pool: PoolConfig) -> Self {
        self.pool = pool;
        self
    }

    /// Load configuration from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClientError::InvalidConfig(format!("failed to read '{}': {e}", path.display()))
        })?;

        let config: Self = serde_json::from_str(&content).map_err(|e| {
            ClientError::InvalidConfig(format!("failed to parse '{}': {e}", path.display()))
        })?;

        config.validate()?;
        Ok(config)
    }

    /// Create configuration from `TEXT2SQL_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let access_token = std::env::var("TEXT2SQL_ACCESS_TOKEN").map_err(|_| {
            ClientError::InvalidConfig("TEXT2SQL_ACCESS_TOKEN is not set".to_string())
        })?;
        let base_url = std::env::var("TEXT2SQL_BASE_URL").unwrap_or_else(|_| default_base_url());

        let mut config = Self::new(base_url, access_token);
        config.workspace_name = std::env::var("TEXT2SQL_WORKSPACE").ok();

        if let Ok(retries) = std::env::var("TEXT2SQL_MAX_RETRIES") {
            config.retry.max_retries = retries.parse().map_err(|_| {
                ClientError::InvalidConfig(format!(
                    "TEXT2SQL_MAX_RETRIES must be a non-negative integer, got '{retries}'"
                ))
            })?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        if self.base_url.trim().is_empty() {
            return Err(ClientError::InvalidConfig(
                "base_url is required and cannot be empty".to_string(),
            ));
        }

        reqwest::Url::parse(&self.base_url).map_err(|e| {
            ClientError::InvalidConfig(format!("base_url '{}' is not a valid URL: {e}", self.base_url))
        })?;

        if self.access_token.is_empty() {
            return Err(ClientError::InvalidConfig(
                "access_token is required and cannot be empty".to_string(),
            ));
        }

        if let Some(workspace) = &self.workspace_name {
            if !workspace.starts_with(WORKSPACE_PREFIX) {
                return Err(ClientError::InvalidConfig(format!(
                    "workspace_name must start with '{WORKSPACE_PREFIX}' (e.g., 'workspaces/my-workspace')"
                )));
            }
        }

        if self.pool.max_connections == 0 {
            return Err(ClientError::InvalidConfig(
                "max_connections must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Serde helpers for durations written as `"30s"`, `"500ms"`, `"250us"`,
/// `"1500ns"`, or bare seconds (a string or a JSON number).
mod humantime_serde {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Secs(u64),
        Text(String),
    }

    /// Writes the largest unit that keeps the value exact.
    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let nanos = duration.subsec_nanos();
        let text = if nanos == 0 {
            format!("{}s", duration.as_secs())
        } else if nanos % 1_000_000 == 0 {
            format!("{}ms", duration.as_millis())
        } else if nanos % 1_000 == 0 {
            format!("{}us", duration.as_micros())
        } else {
            format!("{}ns", duration.as_nanos())
        };
        serializer.serialize_str(&text)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let text = match Raw::deserialize(deserializer)? {
            Raw::Secs(secs) => return Ok(Duration::from_secs(secs)),
            Raw::Text(text) => text,
        };
        parse(text.trim()).map_err(serde::de::Error::custom)
    }

    fn parse(s: &str) -> Result<Duration, std::num::ParseIntError> {
        // Two-letter suffixes have to be checked before "s".
        if let Some(ns) = s.strip_suffix("ns") {
            ns.trim().parse::<u64>().map(Duration::from_nanos)
        } else if let Some(us) = s.strip_suffix("us") {
            us.trim().parse::<u64>().map(Duration::from_micros)
        } else if let Some(ms) = s.strip_suffix("ms") {
            ms.trim().parse::<u64>().map(Duration::from_millis)
        } else if let Some(secs) = s.strip_suffix('s') {
            secs.trim().parse::<u64>().map(Duration::from_secs)
        } else {
            s.parse::<u64>().map(Duration::from_secs)
        }
    }
}
