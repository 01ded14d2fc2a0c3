//! Configuration module for dialogue-server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::protocol::DEFAULT_MAX_PARAMS;
use crate::runtime::{ConcurrencyMode, DEFAULT_QUEUE_DEPTH, DEFAULT_RECV_BUFFER_SIZE};
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use thiserror::Error;

/// Command-line arguments for the server
#[derive(Parser, Debug)]
#[command(name = "dialogue-server")]
#[command(author = "dialogue-server authors")]
#[command(version = "0.1.0")]
#[command(about = "A minimal HTTP/1.1-subset server with pluggable concurrency", long_about = None)]
pub struct CliArgs {
    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// IP address to bind to (defaults to all interfaces)
    #[arg(short, long)]
    pub ip: Option<String>,

    /// Port to listen on
    #[arg(short, long)]
    pub port: Option<u16>,

    /// Concurrency model: Sequential, Fork, Thread or ThreadPool
    #[arg(short, long)]
    pub mode: Option<ConcurrencyMode>,

    /// Worker threads for the ThreadPool mode (defaults to number of CPU cores)
    #[arg(short, long)]
    pub workers: Option<usize>,

    /// Connections that may wait for a pool worker before new ones are rejected
    #[arg(long)]
    pub queue_depth: Option<usize>,

    /// Per-connection receive buffer size in bytes
    #[arg(long)]
    pub recv_buffer: Option<usize>,

    /// Maximum query parameters kept per request
    #[arg(long)]
    pub max_params: Option<usize>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Directory for daily-rotated log files
    #[arg(short, long)]
    pub log_dir: Option<PathBuf>,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub dialogue: DialogueConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Listener and concurrency configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    /// IP address to bind to
    pub ip: Option<String>,
    /// Port to listen on
    pub port: Option<u16>,
    /// Concurrency model
    #[serde(default)]
    pub mode: ConcurrencyMode,
    /// Number of pool worker threads
    pub workers: Option<usize>,
    /// Pool queue depth
    #[serde(default = "default_queue_depth")]
    pub queue_depth: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            ip: None,
            port: None,
            mode: ConcurrencyMode::default(),
            workers: None,
            queue_depth: default_queue_depth(),
        }
    }
}

/// Per-connection protocol configuration
#[derive(Debug, Deserialize)]
pub struct DialogueConfig {
    /// Receive buffer size in bytes
    #[serde(default = "default_recv_buffer_size")]
    pub recv_buffer_size: usize,
    /// Maximum query parameters per request
    #[serde(default = "default_max_params")]
    pub max_params: usize,
}

impl Default for DialogueConfig {
    fn default() -> Self {
        Self {
            recv_buffer_size: default_recv_buffer_size(),
            max_params: default_max_params(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Directory for rotated log files
    pub dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            dir: None,
        }
    }
}

fn default_queue_depth() -> usize {
    DEFAULT_QUEUE_DEPTH
}

fn default_recv_buffer_size() -> usize {
    DEFAULT_RECV_BUFFER_SIZE
}

fn default_max_params() -> usize {
    DEFAULT_MAX_PARAMS
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    pub ip: Option<String>,
    pub port: u16,
    pub mode: ConcurrencyMode,
    pub workers: Option<usize>,
    pub queue_depth: usize,
    pub recv_buffer_size: usize,
    pub max_params: usize,
    pub log_level: String,
    pub log_dir: Option<PathBuf>,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    /// CLI arguments take precedence over TOML file values.
    pub fn load() -> Result<Self, ConfigError> {
        let cli = CliArgs::parse();

        // Load TOML config if specified
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path).map_err(|source| {
                ConfigError::FileRead {
                    path: config_path.clone(),
                    source,
                }
            })?;
            toml::from_str(&contents).map_err(|source| ConfigError::TomlParse {
                path: config_path.clone(),
                source,
            })?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    /// Merge CLI args over TOML values (CLI takes precedence).
    pub fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let port = cli
            .port
            .or(toml_config.server.port)
            .ok_or(ConfigError::MissingPort)?;

        Ok(Config {
            ip: cli.ip.or(toml_config.server.ip),
            port,
            mode: cli.mode.unwrap_or(toml_config.server.mode),
            workers: cli.workers.or(toml_config.server.workers),
            queue_depth: cli.queue_depth.unwrap_or(toml_config.server.queue_depth),
            recv_buffer_size: cli
                .recv_buffer
                .unwrap_or(toml_config.dialogue.recv_buffer_size),
            max_params: cli.max_params.unwrap_or(toml_config.dialogue.max_params),
            log_level: cli.log_level.unwrap_or(toml_config.logging.level),
            log_dir: cli.log_dir.or(toml_config.logging.dir),
        })
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file '{}': {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config file '{}': {source}", .path.display())]
    TomlParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Missing listen port: use -p PORT or set server.port in the config file")]
    MissingPort,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["dialogue-server"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.port, None);
        assert_eq!(config.server.mode, ConcurrencyMode::Sequential);
        assert_eq!(config.server.queue_depth, 1024);
        assert_eq!(config.dialogue.recv_buffer_size, 64 * 1024);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            ip = "127.0.0.1"
            port = 8080
            mode = "ThreadPool"
            workers = 4

            [dialogue]
            recv_buffer_size = 4096

            [logging]
            level = "debug"
            dir = "/var/log/dialogue"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.ip.as_deref(), Some("127.0.0.1"));
        assert_eq!(config.server.port, Some(8080));
        assert_eq!(config.server.mode, ConcurrencyMode::ThreadPool);
        assert_eq!(config.server.workers, Some(4));
        assert_eq!(config.server.queue_depth, 1024);
        assert_eq!(config.dialogue.recv_buffer_size, 4096);
        assert_eq!(config.dialogue.max_params, DEFAULT_MAX_PARAMS);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.dir, Some(PathBuf::from("/var/log/dialogue")));
    }

    #[test]
    fn test_toml_rejects_unknown_mode() {
        let toml_str = r#"
            [server]
            mode = "coroutines"
        "#;
        assert!(toml::from_str::<TomlConfig>(toml_str).is_err());
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 8080
            mode = "Thread"

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let config = Config::merge(cli(&["-p", "9090", "-m", "fork"]), toml_config).unwrap();
        assert_eq!(config.port, 9090);
        assert_eq!(config.mode, ConcurrencyMode::Fork);
        assert_eq!(config.log_level, "warn");
        assert_eq!(config.ip, None);
    }

    #[test]
    fn test_missing_port() {
        let err = Config::merge(cli(&[]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPort));
    }

    #[test]
    fn test_cli_rejects_out_of_range_port() {
        assert!(CliArgs::try_parse_from(["dialogue-server", "-p", "70000"]).is_err());
    }
}
