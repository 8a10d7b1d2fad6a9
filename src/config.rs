//! Configuration module for the uppercase echo server.
//!
//! Supports both command-line arguments and TOML configuration file.
//! CLI arguments take precedence over config file values.

use crate::runtime::buffer::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use clap::Parser;
use serde::Deserialize;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Command-line arguments for the echo server
#[derive(Parser, Debug)]
#[command(name = "uppercase-echo")]
#[command(version = "0.1.0")]
#[command(about = "A TCP echo server that uppercases what it receives", long_about = None)]
pub struct CliArgs {
    /// TCP port to listen on
    pub port: Option<u16>,

    /// Path to TOML configuration file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Address to bind to (defaults to 127.0.0.1)
    #[arg(long)]
    pub host: Option<IpAddr>,

    /// Maximum bytes handled per read
    #[arg(short = 'b', long)]
    pub buffer_size: Option<usize>,

    /// Maximum number of open connections (0 = unlimited)
    #[arg(short = 'm', long)]
    pub max_connections: Option<usize>,

    /// Close connections idle for this many seconds (0 = never)
    #[arg(short = 'i', long)]
    pub idle_timeout: Option<u64>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

/// TOML configuration file structure
#[derive(Debug, Deserialize, Default)]
pub struct TomlConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub io: IoConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server-related configuration
#[derive(Debug, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    pub port: Option<u16>,
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Seconds; 0 disables idle eviction
    #[serde(default)]
    pub idle_timeout: u64,
    /// Readiness events fetched per poll
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: None,
            max_connections: default_max_connections(),
            idle_timeout: 0,
            batch_size: default_batch_size(),
        }
    }
}

/// Socket I/O configuration
#[derive(Debug, Deserialize)]
pub struct IoConfig {
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
}

impl Default for IoConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::V4(Ipv4Addr::LOCALHOST)
}

fn default_max_connections() -> usize {
    10_000
}

fn default_batch_size() -> usize {
    4096
}

fn default_buffer_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_log_level() -> String {
    "info".to_string()
}

/// Final resolved configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    pub buffer_size: usize,
    pub max_connections: usize,
    pub idle_timeout: Option<Duration>,
    pub batch_size: usize,
    pub log_level: String,
}

impl Config {
    /// Load configuration from CLI args and optional TOML file.
    pub fn load() -> Result<Self, ConfigError> {
        Self::from_cli(CliArgs::parse())
    }

    /// Merge CLI args over the TOML file named by `--config`, if any.
    pub fn from_cli(cli: CliArgs) -> Result<Self, ConfigError> {
        let toml_config = if let Some(ref config_path) = cli.config {
            let contents = std::fs::read_to_string(config_path)
                .map_err(|e| ConfigError::FileRead(config_path.clone(), e))?;
            toml::from_str(&contents)
                .map_err(|e| ConfigError::TomlParse(config_path.clone(), e))?
        } else {
            TomlConfig::default()
        };

        Self::merge(cli, toml_config)
    }

    fn merge(cli: CliArgs, toml_config: TomlConfig) -> Result<Self, ConfigError> {
        let port = cli
            .port
            .or(toml_config.server.port)
            .ok_or(ConfigError::MissingPort)?;
        if port == 0 {
            return Err(ConfigError::InvalidPort(port));
        }

        let buffer_size = cli.buffer_size.unwrap_or(toml_config.io.buffer_size);
        if buffer_size == 0 || buffer_size > MAX_CHUNK_SIZE {
            return Err(ConfigError::InvalidBufferSize(buffer_size));
        }

        let batch_size = toml_config.server.batch_size;
        if batch_size == 0 {
            return Err(ConfigError::InvalidBatchSize(batch_size));
        }

        let idle_secs = cli.idle_timeout.unwrap_or(toml_config.server.idle_timeout);

        Ok(Config {
            host: cli.host.unwrap_or(toml_config.server.host),
            port,
            buffer_size,
            max_connections: cli
                .max_connections
                .unwrap_or(toml_config.server.max_connections),
            idle_timeout: (idle_secs > 0).then(|| Duration::from_secs(idle_secs)),
            batch_size,
            log_level: if cli.log_level != "info" {
                cli.log_level
            } else {
                toml_config.logging.level
            },
        })
    }

    /// Socket address the listener binds to.
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }
}

/// Configuration loading errors
#[derive(Debug)]
pub enum ConfigError {
    FileRead(PathBuf, std::io::Error),
    TomlParse(PathBuf, toml::de::Error),
    MissingPort,
    InvalidPort(u16),
    InvalidBufferSize(usize),
    InvalidBatchSize(usize),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::FileRead(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::TomlParse(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
            ConfigError::MissingPort => {
                write!(f, "No port given: pass PORT or set server.port in the config file")
            }
            ConfigError::InvalidPort(port) => write!(f, "Invalid port: {port}"),
            ConfigError::InvalidBufferSize(size) => {
                write!(f, "Invalid buffer size {size}: must be between 1 and {MAX_CHUNK_SIZE}")
            }
            ConfigError::InvalidBatchSize(size) => {
                write!(f, "Invalid batch size {size}: must be at least 1")
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> CliArgs {
        let mut argv = vec!["uppercase-echo"];
        argv.extend_from_slice(args);
        CliArgs::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_default_config() {
        let config = TomlConfig::default();
        assert_eq!(config.server.host, IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(config.server.port, None);
        assert_eq!(config.server.max_connections, 10_000);
        assert_eq!(config.server.idle_timeout, 0);
        assert_eq!(config.server.batch_size, 4096);
        assert_eq!(config.io.buffer_size, 4095);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_toml_parsing() {
        let toml_str = r#"
            [server]
            host = "0.0.0.0"
            port = 7000
            max_connections = 64
            idle_timeout = 30
            batch_size = 128

            [io]
            buffer_size = 1024

            [logging]
            level = "debug"
        "#;

        let config: TomlConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.server.host, "0.0.0.0".parse::<IpAddr>().unwrap());
        assert_eq!(config.server.port, Some(7000));
        assert_eq!(config.server.max_connections, 64);
        assert_eq!(config.server.idle_timeout, 30);
        assert_eq!(config.server.batch_size, 128);
        assert_eq!(config.io.buffer_size, 1024);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_positional_port() {
        let config = Config::merge(cli(&["8080"]), TomlConfig::default()).unwrap();
        assert_eq!(config.port, 8080);
        assert_eq!(config.listen_addr(), "127.0.0.1:8080".parse().unwrap());
        assert_eq!(config.buffer_size, 4095);
        assert_eq!(config.idle_timeout, None);
    }

    #[test]
    fn test_missing_port_is_fatal() {
        let err = Config::merge(cli(&[]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::MissingPort));
    }

    #[test]
    fn test_malformed_port_is_rejected() {
        assert!(CliArgs::try_parse_from(["uppercase-echo", "http"]).is_err());
        assert!(CliArgs::try_parse_from(["uppercase-echo", "70000"]).is_err());

        let err = Config::merge(cli(&["0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidPort(0)));
    }

    #[test]
    fn test_cli_overrides_toml() {
        let toml_config: TomlConfig = toml::from_str(
            r#"
            [server]
            port = 7000
            max_connections = 64
            idle_timeout = 30

            [logging]
            level = "warn"
        "#,
        )
        .unwrap();

        let config = Config::merge(
            cli(&["9000", "-m", "8", "-i", "5", "--log-level", "trace"]),
            toml_config,
        )
        .unwrap();
        assert_eq!(config.port, 9000);
        assert_eq!(config.max_connections, 8);
        assert_eq!(config.idle_timeout, Some(Duration::from_secs(5)));
        assert_eq!(config.log_level, "trace");
    }

    #[test]
    fn test_toml_port_used_when_cli_omits_it() {
        let toml_config: TomlConfig = toml::from_str("[server]\nport = 7000\n").unwrap();
        let config = Config::merge(cli(&[]), toml_config).unwrap();
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn test_buffer_size_bounds() {
        let err = Config::merge(cli(&["8080", "-b", "0"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBufferSize(0)));

        let err =
            Config::merge(cli(&["8080", "-b", "1000000"]), TomlConfig::default()).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBufferSize(1_000_000)));
    }

    #[test]
    fn test_missing_config_file() {
        let err = Config::from_cli(cli(&["8080", "-c", "/nonexistent/echo.toml"])).unwrap_err();
        assert!(matches!(err, ConfigError::FileRead(..)));
    }
}
