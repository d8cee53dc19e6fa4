//! Server configuration.
//!
//! Configuration can be loaded from:
//! - TOML configuration file (`--config <path>` or the first default path found)
//! - Environment variables (`ROOMCAST_*`, nested keys split with `__`)

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

const DEFAULT_PATHS: [&str; 3] = [
    "roomcast.toml",
    "/etc/roomcast/roomcast.toml",
    "~/.config/roomcast/roomcast.toml",
];

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Host to bind to.
    pub host: String,

    /// Port to listen on.
    pub port: u16,

    /// Transport configuration.
    pub transport: TransportConfig,

    /// Hub configuration.
    pub hub: HubSection,

    /// Presence configuration.
    pub presence: PresenceConfig,

    /// Metrics configuration.
    pub metrics: MetricsConfig,

    /// Users and rooms for the in-memory directory.
    pub directory: DirectoryConfig,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportConfig {
    /// Path for WebSocket endpoint.
    pub websocket_path: String,

    /// Maximum incoming message size in bytes.
    pub max_message_size: usize,
}

/// Hub configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubSection {
    /// Capacity of the inbound frame channel.
    pub inbound_capacity: usize,

    /// How often hub gauges are refreshed, in seconds.
    pub stats_interval_secs: u64,
}

/// Presence configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Lifetime of an online flag in seconds.
    pub online_ttl_secs: u64,

    /// How often expired online flags are pruned, in seconds.
    pub prune_interval_secs: u64,
}

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    /// Enable metrics export.
    pub enabled: bool,

    /// Metrics port.
    pub port: u16,
}

/// Seed data for the in-memory directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DirectoryConfig {
    /// Known users.
    pub users: Vec<SeedUser>,

    /// Known rooms.
    pub rooms: Vec<SeedRoom>,
}

/// A seeded user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedUser {
    /// User ID.
    pub id: i64,
    /// Display name.
    pub username: String,
}

/// A seeded room.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SeedRoom {
    /// Room ID.
    pub id: i64,
    /// Room name.
    #[serde(default)]
    pub name: String,
    /// Member user IDs.
    #[serde(default)]
    pub members: Vec<i64>,
    /// Members who may not post.
    #[serde(default)]
    pub muted: Vec<i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            transport: TransportConfig::default(),
            hub: HubSection::default(),
            presence: PresenceConfig::default(),
            metrics: MetricsConfig::default(),
            directory: DirectoryConfig::default(),
        }
    }
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            websocket_path: "/ws".to_string(),
            max_message_size: 64 * 1024, // 64 KB
        }
    }
}

impl Default for HubSection {
    fn default() -> Self {
        Self {
            inbound_capacity: 1024,
            stats_interval_secs: 5,
        }
    }
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            online_ttl_secs: 24 * 60 * 60,
            prune_interval_secs: 60,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            port: 9090,
        }
    }
}

impl Config {
    /// Load configuration.
    ///
    /// Uses `explicit` if given, otherwise the first default path that exists,
    /// otherwise defaults. Environment variables override either.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be parsed or an override is
    /// malformed.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(path) => Some(path.to_path_buf()),
            None => DEFAULT_PATHS
                .iter()
                .map(|p| PathBuf::from(shellexpand::tilde(p).as_ref()))
                .find(|p| p.exists()),
        };

        Self::build(path.as_deref(), environment())
    }

    fn build(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Toml)
                    .required(true),
            );
        }

        let source = match path {
            Some(path) => path.display().to_string(),
            None => "defaults".to_string(),
        };

        builder
            .add_source(env)
            .build()
            .and_then(|loaded| loaded.try_deserialize::<Config>())
            .with_context(|| format!("Failed to load configuration from {source}"))
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

    /// Render the effective configuration as TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to render configuration")
    }
}

fn environment() -> config::Environment {
    config::Environment::with_prefix("ROOMCAST")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}
