use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Upper bound accepted for `max_redirects`.
pub const MAX_REDIRECTS_LIMIT: u32 = 100;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub client: ClientConfig,
}

/// Settings applied to every [`HttpClient`](crate::http::client::HttpClient)
/// built with [`with_config`](crate::http::client::HttpClient::with_config).
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub user_agent: String,
    pub max_redirects: u32,
    /// Bound on resolve plus connect, 0 for none.
    pub connect_timeout_ms: u64,
    /// Idle timeout re-armed on every received unit, 0 for none.
    pub timeout_ms: u64,
    /// Longest status, header or chunk-size line accepted.
    pub max_line_length: usize,
    /// Most body bytes buffered by one read.
    pub read_chunk_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            user_agent: concat!("evnet/", env!("CARGO_PKG_VERSION")).to_string(),
            max_redirects: 5,
            connect_timeout_ms: 0,
            timeout_ms: 0,
            max_line_length: 16 * 1024,
            read_chunk_size: 64 * 1024,
        }
    }
}

impl ClientConfig {
    pub fn connect_timeout(&self) -> Option<Duration> {
        (self.connect_timeout_ms > 0).then(|| Duration::from_millis(self.connect_timeout_ms))
    }

    pub fn timeout(&self) -> Option<Duration> {
        (self.timeout_ms > 0).then(|| Duration::from_millis(self.timeout_ms))
    }
}

impl Config {
    /// Load from the file named by `EVNET_CONFIG`, then apply `EVNET_USER_AGENT`.
    ///
    /// A missing or invalid file falls back to the defaults.
    pub fn load() -> Self {
        let mut config = match std::env::var("EVNET_CONFIG") {
            Ok(path) => Self::from_file(&path).unwrap_or_else(|e| {
                tracing::warn!(path = %path, error = %e, "ignoring configuration file");
                Self::default()
            }),
            Err(_) => Self::default(),
        };

        if let Ok(agent) = std::env::var("EVNET_USER_AGENT") {
            config.client.user_agent = agent;
        }
        config
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_yaml(&text).with_context(|| format!("Invalid config file {}", path.display()))
    }

    pub fn from_yaml(text: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(text).context("Failed to parse YAML config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.client.max_redirects > MAX_REDIRECTS_LIMIT {
            anyhow::bail!(
                "max_redirects {} exceeds the limit of {}",
                self.client.max_redirects,
                MAX_REDIRECTS_LIMIT
            );
        }
        if self.client.max_line_length == 0 || self.client.read_chunk_size == 0 {
            anyhow::bail!("max_line_length and read_chunk_size must be positive");
        }
        Ok(())
    }
}
