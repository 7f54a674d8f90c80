//! Configuration management for the chess sync server.
//!
//! This module handles loading, validation, and conversion of server
//! configuration from TOML files and command-line arguments.

use room_sync::SyncConfig;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

fn default_max_connections() -> usize {
    1000
}

fn default_reconcile_interval_ms() -> u64 {
    5_000
}

fn default_lobby_sweep_interval_ms() -> u64 {
    7_000
}

fn default_fetch_timeout_ms() -> u64 {
    10_000
}

fn default_room_grace_period_ms() -> u64 {
    30_000
}

fn default_session_buffer() -> usize {
    256
}

/// Application configuration loaded from TOML file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Network settings
    pub server: ServerSettings,
    /// Reconciliation timing
    #[serde(default)]
    pub sync: SyncSettings,
    /// Ledger endpoint
    pub ledger: LedgerSettings,
    /// Logging settings
    pub logging: LoggingSettings,
}

/// Server-specific configuration settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Network address to bind the WebSocket listener to (e.g., "127.0.0.1:3000")
    pub bind_address: String,
    /// Maximum number of concurrent client connections
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
}

/// Reconciliation and lobby timing, all in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSettings {
    #[serde(default = "default_reconcile_interval_ms")]
    pub reconcile_interval_ms: u64,
    #[serde(default = "default_lobby_sweep_interval_ms")]
    pub lobby_sweep_interval_ms: u64,
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,
    #[serde(default = "default_room_grace_period_ms")]
    pub room_grace_period_ms: u64,
    /// Outbound events buffered per session before new ones are dropped
    #[serde(default = "default_session_buffer")]
    pub session_buffer: usize,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            reconcile_interval_ms: default_reconcile_interval_ms(),
            lobby_sweep_interval_ms: default_lobby_sweep_interval_ms(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            room_grace_period_ms: default_room_grace_period_ms(),
            session_buffer: default_session_buffer(),
        }
    }
}

/// Where games are read from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerSettings {
    /// JSON-RPC endpoint of the ledger node
    pub rpc_url: String,
    /// Address of the chess program whose data holds the games
    pub program_address: String,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Whether to output logs in JSON format
    pub json_format: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerSettings {
                bind_address: "127.0.0.1:3000".to_string(),
                max_connections: default_max_connections(),
            },
            sync: SyncSettings::default(),
            ledger: LedgerSettings {
                rpc_url: "http://127.0.0.1:9292".to_string(),
                program_address: "0x0000000000000000000000000000000000000000".to_string(),
            },
            logging: LoggingSettings {
                level: "info".to_string(),
                json_format: false,
            },
        }
    }
}

impl AppConfig {
    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, creates a default configuration file at the
    /// specified path and returns the default configuration.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The loaded or default configuration, or an error if loading/creation failed.
    pub async fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        if path.exists() {
            let content = tokio::fs::read_to_string(path).await?;
            let config: AppConfig = toml::from_str(&content)?;
            Ok(config)
        } else {
            let default_config = AppConfig::default();
            let toml_content = toml::to_string_pretty(&default_config)?;
            tokio::fs::write(path, toml_content).await?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }

    /// Parsed listener address.
    pub fn bind_address(&self) -> anyhow::Result<SocketAddr> {
        Ok(self.server.bind_address.parse()?)
    }

    /// Converts the file settings into the synchronization core's config.
    pub fn to_sync_config(&self) -> SyncConfig {
        SyncConfig {
            reconcile_interval: Duration::from_millis(self.sync.reconcile_interval_ms),
            lobby_sweep_interval: Duration::from_millis(self.sync.lobby_sweep_interval_ms),
            fetch_timeout: Duration::from_millis(self.sync.fetch_timeout_ms),
            room_grace_period: Duration::from_millis(self.sync.room_grace_period_ms),
            session_buffer: self.sync.session_buffer,
        }
    }

    /// Validates the configuration for consistency and correctness.
    ///
    /// # Returns
    ///
    /// `Ok(())` if the configuration is valid, or an error string describing the issue.
    pub fn validate(&self) -> Result<(), String> {
        if self.server.bind_address.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "Invalid bind address: {}",
                &self.server.bind_address
            ));
        }

        if self.server.max_connections == 0 {
            return Err("max_connections must be greater than zero".to_string());
        }

        let intervals = [
            ("reconcile_interval_ms", self.sync.reconcile_interval_ms),
            ("lobby_sweep_interval_ms", self.sync.lobby_sweep_interval_ms),
            ("fetch_timeout_ms", self.sync.fetch_timeout_ms),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(format!("{name} must be greater than zero"));
            }
        }

        if self.sync.session_buffer == 0 {
            return Err("session_buffer must be greater than zero".to_string());
        }

        if self.ledger.rpc_url.trim().is_empty() {
            return Err("Ledger rpc_url cannot be empty".to_string());
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(format!(
                "Invalid log level: {}. Must be one of: {valid_levels:?}",
                &self.logging.level
            ));
        }

        Ok(())
    }
}
