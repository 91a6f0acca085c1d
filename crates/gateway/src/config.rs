//! Configuration management for the ShellBridge gateway.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/shellbridge/config.toml`.

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("listen must be a socket address such as 0.0.0.0:3001, got {0}")]
    InvalidListen(String),

    #[error("{0} must be greater than 0")]
    ZeroDuration(&'static str),

    #[error("default_port must be greater than 0")]
    InvalidDefaultPort,

    #[error("initial terminal size must be between 1x1 and 1000x1000, got {0}x{1}")]
    InvalidTerminalSize(u32, u32),

    #[error("term must not be empty")]
    EmptyTerm,

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Largest accepted initial terminal dimension.
const MAX_TERMINAL_DIMENSION: u32 = 1000;

/// Main configuration structure for the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// HTTP/WebSocket listener.
    pub server: ServerConfig,

    /// Remote session behaviour.
    pub ssh: SshConfig,

    /// Log output.
    pub logging: LoggingConfig,
}

/// HTTP/WebSocket listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Address the server binds to.
    pub listen: String,
}

/// Remote session configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SshConfig {
    /// Port used when a connect request names none.
    pub default_port: u16,

    /// Upper bound for handshake, authentication and shell open, in seconds.
    pub ready_timeout_secs: u64,

    /// Interval between zero-byte writes to an idle shell, in seconds.
    pub shell_keepalive_secs: u64,

    /// Interval between SSH transport keepalive requests, in seconds.
    pub transport_keepalive_secs: u64,

    /// Unanswered transport keepalives before the connection is dropped.
    pub transport_keepalive_max: usize,

    /// Terminal type requested for the shell PTY.
    pub term: String,

    /// PTY width until the first resize.
    pub initial_cols: u32,

    /// PTY height until the first resize.
    pub initial_rows: u32,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub level: String,

    /// Directory for daily-rotated log files. Logs go to stderr only when unset.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3001".to_string(),
        }
    }
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            default_port: 22,
            ready_timeout_secs: 20,
            shell_keepalive_secs: 60,
            transport_keepalive_secs: 30,
            transport_keepalive_max: 3,
            term: "xterm-256color".to_string(),
            initial_cols: 80,
            initial_rows: 24,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

impl SshConfig {
    pub fn ready_timeout(&self) -> Duration {
        Duration::from_secs(self.ready_timeout_secs)
    }

    pub fn shell_keepalive(&self) -> Duration {
        Duration::from_secs(self.shell_keepalive_secs)
    }

    pub fn transport_keepalive(&self) -> Duration {
        Duration::from_secs(self.transport_keepalive_secs)
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("shellbridge")
        .join("config.toml")
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - SHELLBRIDGE_LISTEN: Override the listen address
    /// - PORT: Override only the port of the listen address
    /// - SHELLBRIDGE_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(listen) = std::env::var("SHELLBRIDGE_LISTEN") {
            if !listen.is_empty() {
                tracing::info!("Overriding listen from environment: {}", listen);
                self.server.listen = listen;
            }
        }

        if let Ok(port) = std::env::var("PORT") {
            if !port.is_empty() {
                let host = match self.server.listen.rsplit_once(':') {
                    Some((host, _)) => host.to_string(),
                    None => self.server.listen.clone(),
                };
                tracing::info!("Overriding listen port from environment: {}", port);
                self.server.listen = format!("{}:{}", host, port);
            }
        }

        if let Ok(level) = std::env::var("SHELLBRIDGE_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.logging.level = level;
            }
        }
    }

    /// Parsed listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.server
            .listen
            .parse()
            .map_err(|_| ConfigError::InvalidListen(self.server.listen.clone()))
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.listen_addr()?;

        if self.ssh.default_port == 0 {
            return Err(ConfigError::InvalidDefaultPort);
        }

        if self.ssh.ready_timeout_secs == 0 {
            return Err(ConfigError::ZeroDuration("ready_timeout_secs"));
        }
        if self.ssh.shell_keepalive_secs == 0 {
            return Err(ConfigError::ZeroDuration("shell_keepalive_secs"));
        }
        if self.ssh.transport_keepalive_secs == 0 {
            return Err(ConfigError::ZeroDuration("transport_keepalive_secs"));
        }

        let (cols, rows) = (self.ssh.initial_cols, self.ssh.initial_rows);
        if cols == 0 || rows == 0 || cols > MAX_TERMINAL_DIMENSION || rows > MAX_TERMINAL_DIMENSION
        {
            return Err(ConfigError::InvalidTerminalSize(cols, rows));
        }

        if self.ssh.term.trim().is_empty() {
            return Err(ConfigError::EmptyTerm);
        }

        // Validate log_level is a known value
        let level = self.logging.level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.level.clone()));
        }

        Ok(())
    }

    /// Load configuration from a file.
    ///
    /// If the file does not exist, returns the default configuration.
    /// If the file exists but is invalid TOML, returns an error with
    /// a helpful message.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();

        if !path.exists() {
            tracing::debug!("Config file not found at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        Self::from_toml(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Load configuration from the default path.
    pub fn load_default() -> Result<Self> {
        Self::load(default_config_path())
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self> {
        toml::from_str(toml_str)
            .map_err(|e| anyhow::anyhow!("Invalid TOML configuration: {}", format_toml_error(&e)))
    }

    /// Save configuration to a file.
    ///
    /// Creates parent directories if they don't exist.
    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("Failed to create config directory: {}", parent.display())
            })?;
        }

        let contents = self.to_toml()?;
        fs::write(path, contents)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        tracing::debug!("Configuration saved to {:?}", path);
        Ok(())
    }

    /// Serialize configuration to a TOML string.
    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).context("Failed to serialize configuration to TOML")
    }
}

/// Format a TOML deserialization error for user-friendly display.
fn format_toml_error(error: &toml::de::Error) -> String {
    let mut msg = error.message().to_string();

    if let Some(span) = error.span() {
        msg.push_str(&format!(" (at position {}..{})", span.start, span.end));
    }

    msg
}
