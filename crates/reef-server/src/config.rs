//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`REEF_CONFIG`, or the first default path found)
//! - Environment variables (`REEF_HOST`, `REEF_PORT`), which win over the file

use anyhow::{Context, Result};
use reef_core::{HubConfig, IngestLimits, SessionConfig};
use reef_protocol::model::DEFAULT_CHANNEL_ICON;
use reef_protocol::Channel;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

const CONFIG_PATHS: [&str; 3] = [
    "reef.toml",
    "/etc/reef/reef.toml",
    "~/.config/reef/reef.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Submission and history limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Heartbeat configuration.
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,

    /// Live stream endpoints.
    #[serde(default)]
    pub stream: StreamConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,

    /// Channels created at startup.
    #[serde(default = "default_channels")]
    pub channels: Vec<ChannelSeed>,
}

/// Submission and history limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum message length in characters.
    #[serde(default = "default_max_content_length")]
    pub max_content_length: usize,

    /// Maximum user name length in characters.
    #[serde(default = "default_max_user_name_length")]
    pub max_user_name_length: usize,

    /// History page size when none is requested.
    #[serde(default = "default_history_limit")]
    pub default_history_limit: usize,

    /// Largest history page a client may request.
    #[serde(default = "default_max_history_limit")]
    pub max_history_limit: usize,

    /// Events buffered per stream before it is dropped as too slow.
    #[serde(default = "default_sink_capacity")]
    pub sink_capacity: usize,
}

/// Heartbeat configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatConfig {
    /// Heartbeat interval in milliseconds.
    #[serde(default = "default_heartbeat_interval")]
    pub interval_ms: u64,

    /// Re-check the channel on every heartbeat.
    #[serde(default = "default_true")]
    pub verify_channel: bool,
}

/// Live stream endpoints.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamConfig {
    /// Serve `/api/messages/ws` next to the SSE endpoint.
    #[serde(default = "default_true")]
    pub websocket: bool,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    /// Enable metrics export.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Metrics port.
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

/// A `[[channels]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelSeed {
    pub id: String,
    pub name: String,
    pub slug: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub color: Option<String>,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub order: i32,
}

impl ChannelSeed {
    fn to_channel(&self) -> Channel {
        let mut channel = Channel::new(self.id.clone(), self.name.clone(), self.slug.clone())
            .with_icon(self.icon.as_deref().unwrap_or(DEFAULT_CHANNEL_ICON))
            .with_order(self.order);
        if let Some(description) = &self.description {
            channel = channel.with_description(description.clone());
        }
        if let Some(color) = &self.color {
            channel = channel.with_color(color.clone());
        }
        channel.is_private = self.is_private;
        channel
    }
}

// Default value functions
fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

fn default_max_content_length() -> usize {
    reef_core::ingest::DEFAULT_MAX_CONTENT_LENGTH
}

fn default_max_user_name_length() -> usize {
    reef_core::ingest::DEFAULT_MAX_USER_NAME_LENGTH
}

fn default_history_limit() -> usize {
    reef_core::hub::DEFAULT_HISTORY_LIMIT
}

fn default_max_history_limit() -> usize {
    reef_core::hub::MAX_HISTORY_LIMIT
}

fn default_sink_capacity() -> usize {
    reef_core::broadcaster::DEFAULT_SINK_CAPACITY
}

fn default_heartbeat_interval() -> u64 {
    15_000 // 15 seconds
}

fn default_metrics_port() -> u16 {
    9090
}

fn default_channels() -> Vec<ChannelSeed> {
    vec![ChannelSeed {
        id: "general".to_string(),
        name: "General".to_string(),
        slug: "general".to_string(),
        description: Some("Anything goes".to_string()),
        icon: None,
        color: None,
        is_private: false,
        order: 0,
    }]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            limits: LimitsConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            stream: StreamConfig::default(),
            metrics: MetricsConfig::default(),
            channels: default_channels(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_content_length: default_max_content_length(),
            max_user_name_length: default_max_user_name_length(),
            default_history_limit: default_history_limit(),
            max_history_limit: default_max_history_limit(),
            sink_capacity: default_sink_capacity(),
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_heartbeat_interval(),
            verify_channel: true,
        }
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { websocket: true }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: default_metrics_port(),
        }
    }
}

impl Config {
    /// Load configuration from file or defaults, then apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, or an
    /// override is malformed.
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var("REEF_CONFIG") {
            Ok(path) => Self::from_file(shellexpand::tilde(&path).as_ref())?,
            Err(_) => Self::from_default_paths()?,
        };

        config.apply_overrides(
            std::env::var("REEF_HOST").ok(),
            std::env::var("REEF_PORT").ok(),
        )?;
        Ok(config)
    }

    fn from_default_paths() -> Result<Self> {
        for path in &CONFIG_PATHS {
            let expanded = shellexpand::tilde(path);
            if Path::new(expanded.as_ref()).exists() {
                return Self::from_file(expanded.as_ref());
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from a specific file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    fn apply_overrides(&mut self, host: Option<String>, port: Option<String>) -> Result<()> {
        if let Some(host) = host {
            self.host = host;
        }
        if let Some(port) = port {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid REEF_PORT: {port}"))?;
        }
        Ok(())
    }

    /// Get the socket address to bind to.
    ///
    /// # Errors
    ///
    /// Returns an error if host and port do not form a socket address.
    pub fn bind_addr(&self) -> Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("Invalid bind address {}:{}", self.host, self.port))
    }

    /// Messaging hub settings.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            limits: IngestLimits {
                max_content_length: self.limits.max_content_length,
                max_user_name_length: self.limits.max_user_name_length,
            },
            default_history_limit: self.limits.default_history_limit,
            max_history_limit: self.limits.max_history_limit,
            session: SessionConfig {
                heartbeat_interval: Duration::from_millis(self.heartbeat.interval_ms),
                verify_channel_on_heartbeat: self.heartbeat.verify_channel,
            },
            sink_capacity: self.limits.sink_capacity,
        }
    }

    /// Channels to create at startup.
    #[must_use]
    pub fn seed_channels(&self) -> Vec<Channel> {
        self.channels.iter().map(ChannelSeed::to_channel).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.port, 8080);
        assert!(config.stream.websocket);
        assert_eq!(config.channels.len(), 1);

        let hub = config.hub_config();
        assert_eq!(hub.limits.max_content_length, 2000);
        assert_eq!(hub.session.heartbeat_interval, Duration::from_secs(15));
    }

    #[test]
    fn test_config_bind_addr() {
        let config = Config::default();
        assert_eq!(config.bind_addr().unwrap().port(), 8080);

        let config = Config {
            host: "not a host".into(),
            ..Config::default()
        };
        assert!(config.bind_addr().is_err());
    }

    #[test]
    fn test_config_from_toml() {
        let toml_str = r##"
            host = "0.0.0.0"
            port = 9000

            [limits]
            max_content_length = 500

            [heartbeat]
            interval_ms = 5000

            [stream]
            websocket = false

            [[channels]]
            id = "c-general"
            name = "General"
            slug = "general"

            [[channels]]
            id = "c-sharks"
            name = "Sharks"
            slug = "sharks"
            icon = "🦈"
            color = "#0077be"
            order = 1
        "##;

        let config: Config = toml::from_str(toml_str).unwrap();
        assert_eq!(config.host, "0.0.0.0");
        assert_eq!(config.port, 9000);
        assert_eq!(config.limits.max_content_length, 500);
        assert_eq!(config.limits.max_history_limit, 100);
        assert!(!config.stream.websocket);

        let channels = config.seed_channels();
        assert_eq!(channels.len(), 2);
        assert_eq!(channels[0].icon.as_deref(), Some(DEFAULT_CHANNEL_ICON));
        assert_eq!(channels[1].icon.as_deref(), Some("🦈"));
        assert_eq!(channels[1].order, 1);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config
            .apply_overrides(Some("0.0.0.0".into()), Some("7000".into()))
            .unwrap();
        assert_eq!(config.bind_addr().unwrap().to_string(), "0.0.0.0:7000");

        assert!(config.apply_overrides(None, Some("http".into())).is_err());
    }
}
