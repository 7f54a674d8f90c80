//! Command-line argument parsing
//!
//! Every flag overrides the matching setting from the configuration file.

use crate::config::AppConfig;
use clap::Parser;
use std::path::PathBuf;

/// Command-line arguments for the chess sync server
#[derive(Parser, Debug, Clone)]
#[command(
    author,
    version,
    about = "Real-time chess room server backed by a ledger",
    long_about = None
)]
pub struct Args {
    /// Configuration file path
    ///
    /// If the file doesn't exist, a default configuration will be created.
    #[arg(short, long, default_value = "chess_sync.toml")]
    pub config: PathBuf,

    /// Listen address (e.g. "127.0.0.1:3000")
    #[arg(short, long)]
    pub bind: Option<String>,

    /// Ledger JSON-RPC endpoint
    #[arg(short, long)]
    pub rpc_url: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    pub log_level: Option<String>,

    /// Output logs in JSON format
    #[arg(long)]
    pub json_logs: bool,
}

impl Default for Args {
    fn default() -> Self {
        Self {
            config: PathBuf::from("chess_sync.toml"),
            bind: None,
            rpc_url: None,
            log_level: None,
            json_logs: false,
        }
    }
}

impl Args {
    /// Applies the command-line overrides on top of `config`.
    pub fn apply_to(&self, config: &mut AppConfig) {
        if let Some(bind) = &self.bind {
            config.server.bind_address = bind.clone();
        }
        if let Some(rpc_url) = &self.rpc_url {
            config.ledger.rpc_url = rpc_url.clone();
        }
        if let Some(level) = &self.log_level {
            config.logging.level = level.clone();
        }
        if self.json_logs {
            config.logging.json_format = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_default() {
        let args = Args::default();
        assert_eq!(args.config, PathBuf::from("chess_sync.toml"));
        assert!(args.bind.is_none());
        assert!(args.rpc_url.is_none());
        assert!(!args.json_logs);
    }

    #[test]
    fn test_parse_flags() {
        let args = Args::parse_from([
            "chess_sync",
            "--config",
            "/etc/chess.toml",
            "--bind",
            "0.0.0.0:9000",
            "--log-level",
            "debug",
            "--json-logs",
        ]);
        assert_eq!(args.config, PathBuf::from("/etc/chess.toml"));
        assert_eq!(args.bind.as_deref(), Some("0.0.0.0:9000"));
        assert_eq!(args.log_level.as_deref(), Some("debug"));
        assert!(args.json_logs);
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let mut config = AppConfig::default();
        let args = Args {
            bind: Some("0.0.0.0:9000".to_string()),
            rpc_url: Some("http://ledger:9292".to_string()),
            json_logs: true,
            ..Args::default()
        };
        args.apply_to(&mut config);

        assert_eq!(config.server.bind_address, "0.0.0.0:9000");
        assert_eq!(config.ledger.rpc_url, "http://ledger:9292");
        assert_eq!(config.logging.level, "info");
        assert!(config.logging.json_format);
    }
}
