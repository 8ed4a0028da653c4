//! Configuration loading for pair-relay.
//!
//! Configuration is loaded from a TOML file (default: `pair-relay.toml`).

use crate::error::RelayError;
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration for pair-relay.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    /// Server configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Pairing code configuration.
    #[serde(default)]
    pub pairing: PairingConfig,
    /// Rate limiting and connection limits.
    #[serde(default)]
    pub limits: LimitsConfig,
    /// HTTP endpoints configuration.
    #[serde(default)]
    pub http: HttpConfig,
    /// Expiry sweep configuration.
    #[serde(default)]
    pub cleanup: CleanupConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Bind address for HTTP and WebSocket traffic (default: 0.0.0.0:3000).
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// Pairing code configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct PairingConfig {
    /// Maximum age of a pairing code in seconds (default: 300).
    #[serde(default = "default_code_ttl")]
    pub code_ttl_secs: u64,
    /// Random draws before falling back to a scan of the code space (default: 64).
    #[serde(default = "default_max_issue_attempts")]
    pub max_issue_attempts: u32,
}

/// Rate limiting and connection limits.
#[derive(Debug, Clone, Deserialize)]
pub struct LimitsConfig {
    /// Maximum commands per connection per minute (default: 600).
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: u32,
    /// Maximum commands per second across all connections (default: 5000).
    #[serde(default = "default_global_rps")]
    pub global_requests_per_second: u32,
    /// Maximum concurrent connections (default: 10000).
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Maximum inbound frame size in bytes (default: 64KB).
    #[serde(default = "default_max_message_size")]
    pub max_message_size: usize,
    /// Outbound events buffered per connection before dropping (default: 64).
    #[serde(default = "default_outbound_queue")]
    pub outbound_queue: usize,
}

/// HTTP endpoints configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct HttpConfig {
    /// Enable metrics endpoint (default: true).
    #[serde(default = "default_metrics_enabled")]
    pub metrics_enabled: bool,
}

/// Expiry sweep configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct CleanupConfig {
    /// Sweep interval in seconds (default: 60).
    #[serde(default = "default_cleanup_interval")]
    pub interval_secs: u64,
    /// Enable sweep task (default: true).
    #[serde(default = "default_cleanup_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_bind_address() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_code_ttl() -> u64 {
    5 * 60 // 5 minutes
}

fn default_max_issue_attempts() -> u32 {
    64
}

fn default_messages_per_minute() -> u32 {
    600
}

fn default_global_rps() -> u32 {
    5000
}

fn default_max_connections() -> usize {
    10_000
}

fn default_max_message_size() -> usize {
    64 * 1024 // 64KB
}

fn default_outbound_queue() -> usize {
    64
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_cleanup_interval() -> u64 {
    60 // 1 minute
}

fn default_cleanup_enabled() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for PairingConfig {
    fn default() -> Self {
        Self {
            code_ttl_secs: default_code_ttl(),
            max_issue_attempts: default_max_issue_attempts(),
        }
    }
}

impl PairingConfig {
    /// Maximum code age as a [`Duration`].
    pub fn code_ttl(&self) -> Duration {
        Duration::from_secs(self.code_ttl_secs)
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            messages_per_minute: default_messages_per_minute(),
            global_requests_per_second: default_global_rps(),
            max_connections: default_max_connections(),
            max_message_size: default_max_message_size(),
            outbound_queue: default_outbound_queue(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            metrics_enabled: default_metrics_enabled(),
        }
    }
}

impl Default for CleanupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_cleanup_interval(),
            enabled: default_cleanup_enabled(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;

        toml::from_str(&content).map_err(|e| ConfigError::ParseError {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Load `path`, or the defaults when it does not exist.
    pub fn from_file_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            Self::from_file(path)
        } else {
            tracing::info!("No config at {}, using defaults", path.display());
            Ok(Self::default())
        }
    }

    /// Parse `server.bind_address`.
    pub fn bind_addr(&self) -> crate::error::Result<SocketAddr> {
        self.server
            .bind_address
            .parse()
            .map_err(|e: std::net::AddrParseError| RelayError::InvalidSetting {
                name: "server.bind_address",
                value: self.server.bind_address.clone(),
                reason: e.to_string(),
            })
    }

    /// Apply a `PORT` environment variable value.
    pub fn apply_port_env(&mut self, value: &str) -> crate::error::Result<()> {
        let port = value
            .trim()
            .parse::<u16>()
            .map_err(|e| RelayError::InvalidSetting {
                name: "PORT",
                value: value.to_string(),
                reason: e.to_string(),
            })?;
        self.override_port(port);
        Ok(())
    }

    /// Replace the port of `server.bind_address`, keeping the host.
    pub fn override_port(&mut self, port: u16) {
        let host = self
            .server
            .bind_address
            .rsplit_once(':')
            .map(|(host, _)| host.to_string())
            .unwrap_or_else(|| "0.0.0.0".to_string());
        self.server.bind_address = format!("{host}:{port}");
    }
}

/// Configuration error types.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file {path}: {source}")]
    ReadError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },
    /// Failed to parse configuration file.
    #[error("failed to parse config file {path}: {source}")]
    ParseError {
        /// Path to the configuration file.
        path: PathBuf,
        /// Underlying TOML parse error.
        source: toml::de::Error,
    },
}
