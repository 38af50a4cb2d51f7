//! Server configuration.
//!
//! Configuration can be loaded from:
//! - A TOML file (`PRESENCE_CONFIG`, or the first of the default paths)
//! - Environment variables (`PRESENCE_PORT`, `PRESENCE_LIMITS__MAX_CONNECTIONS`, ...)
//!
//! Environment variables override file values.

use anyhow::{Context, Result};
use presence_core::{HubConfig, ReusePolicy};
use presence_protocol::codec::MAX_RELAY_TEXT_SIZE;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::PathBuf;
use thiserror::Error;

/// Default configuration file locations, in lookup order.
const CONFIG_PATHS: [&str; 3] = [
    "presence.toml",
    "/etc/presence/presence.toml",
    "~/.config/presence/presence.toml",
];

/// Configuration values that load but cannot work together.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("limits.max_connections must be at least 1")]
    NoConnections,

    #[error(
        "limits.outbox_capacity ({capacity}) must be at least limits.max_connections ({max_connections})"
    )]
    OutboxTooSmall {
        capacity: usize,
        max_connections: usize,
    },

    #[error("limits.max_message_size ({size}) must not exceed {max}")]
    MessageTooLarge { size: usize, max: usize },

    #[error("transport.websocket_path must start with '/': {0:?}")]
    InvalidPath(String),
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Host to bind to.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Transport configuration.
    #[serde(default)]
    pub transport: TransportConfig,

    /// Resource limits.
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Hub behavior.
    #[serde(default)]
    pub hub: HubSettings,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    #[serde(default = "default_ws_path")]
    pub websocket_path: String,
}

/// Resource limits configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum number of live connections.
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,

    /// Maximum inbound message size in bytes, at most
    /// [`MAX_RELAY_TEXT_SIZE`] so every accepted message can be relayed.
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,

    /// Undelivered messages a connection may accumulate before it is
    /// evicted as a slow consumer.
    #[serde(default = "default_outbox_capacity")]
    pub outbox_capacity: usize,
}

/// Hub behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubSettings {
    /// Order in which released identities are reused.
    #[serde(default)]
    pub reuse_policy: ReusePolicy,

    /// Whether relayed messages are echoed back to their sender.
    #[serde(default = "default_true")]
    pub echo_to_sender: bool,
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

fn default_ws_path() -> String {
    "/ws".to_string()
}

fn default_max_connections() -> usize {
    1024
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64 KB
}

fn default_outbox_capacity() -> usize {
    4096
}

fn default_metrics_port() -> u16 {
    9090
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            transport: TransportConfig::default(),
            limits: LimitsConfig::default(),
            hub: HubSettings::default(),
            metrics: MetricsConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: default_ws_path(),
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            outbox_capacity: default_outbox_capacity(),
        }
    }
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            reuse_policy: ReusePolicy::default(),
            echo_to_sender: default_true(),
        }
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
    /// Load configuration from the config file (if any) and environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a config file exists but cannot be parsed, an
    /// environment override has the wrong type, or validation fails.
    pub fn load() -> Result<Self> {
        let mut builder = config::Config::builder();

        if let Some(path) = Self::find_file() {
            tracing::info!("Loading configuration from {}", path.display());
            builder = builder.add_source(
                config::File::from(path.as_path()).format(config::FileFormat::Toml),
            );
        }

        let config: Config = builder
            .add_source(
                config::Environment::with_prefix("PRESENCE")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to assemble configuration")?
            .try_deserialize()
            .context("Invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    /// Locate the configuration file, if any.
    fn find_file() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("PRESENCE_CONFIG") {
            return Some(PathBuf::from(shellexpand::tilde(&path).as_ref()));
        }

        CONFIG_PATHS
            .iter()
            .map(|path| PathBuf::from(shellexpand::tilde(path).as_ref()))
            .find(|path| path.exists())
    }

    /// Check that the values can work together.
    ///
    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.limits.max_connections == 0 {
            return Err(ConfigError::NoConnections);
        }
        // A newcomer's connection_info plus one existing_user per peer must fit
        if self.limits.outbox_capacity < self.limits.max_connections {
            return Err(ConfigError::OutboxTooSmall {
                capacity: self.limits.outbox_capacity,
                max_connections: self.limits.max_connections,
            });
        }
        if self.limits.max_message_size > MAX_RELAY_TEXT_SIZE {
            return Err(ConfigError::MessageTooLarge {
                size: self.limits.max_message_size,
                max: MAX_RELAY_TEXT_SIZE,
            });
        }
        if !self.transport.websocket_path.starts_with('/') {
            return Err(ConfigError::InvalidPath(
                self.transport.websocket_path.clone(),
            ));
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
            .with_context(|| format!("Invalid host:port {}:{}", self.host, self.port))
    }

    /// Hub configuration derived from this server configuration.
    #[must_use]
    pub fn hub_config(&self) -> HubConfig {
        HubConfig {
            max_connections: self.limits.max_connections,
            outbox_capacity: self.limits.outbox_capacity,
            reuse_policy: self.hub.reuse_policy,
            echo_to_sender: self.hub.echo_to_sender,
        }
    }
}
