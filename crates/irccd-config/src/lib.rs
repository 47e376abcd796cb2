#![deny(unsafe_code)]

//! Configuration loading and validation for irccd.
//!
//! Loads TOML configuration files and validates them. Every field has a
//! default, so an empty file (or no file at all) yields a daemon that
//! connects to the stock server as `user`.

use std::path::Path;

use serde::{Deserialize, Serialize};

/// Longest nickname accepted in configuration.
pub const MAX_NICK_LEN: usize = 30;

/// Smallest control record the daemon will accept (action code + one payload byte).
pub const MIN_RECORD_SIZE: usize = 2;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// IRC server and identity.
    #[serde(default)]
    pub server: ServerConfig,

    /// Local control channel.
    #[serde(default)]
    pub control: ControlConfig,

    /// Reader task failure policy.
    #[serde(default)]
    pub reader: ReaderConfig,

    /// Event loop settings.
    #[serde(default)]
    pub daemon: DaemonConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// The IRC server the daemon talks to and the identity it logs in with.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Server host name or IPv4/IPv6 literal.
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Nickname sent in `NICK` and `USER`.
    #[serde(default = "default_nick")]
    pub nick: String,

    /// Real name sent as the trailing `USER` parameter.
    #[serde(default = "default_realname")]
    pub realname: String,

    /// Connect to `host:port` as soon as the daemon starts.
    #[serde(default = "default_connect_on_start")]
    pub connect_on_start: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            nick: default_nick(),
            realname: default_realname(),
            connect_on_start: default_connect_on_start(),
        }
    }
}

fn default_host() -> String {
    "185.30.166.38".to_string()
}

fn default_port() -> u16 {
    6667
}

fn default_nick() -> String {
    "user".to_string()
}

fn default_realname() -> String {
    "user".to_string()
}

fn default_connect_on_start() -> bool {
    true
}

/// Local control channel settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Unix socket path other processes write control records to.
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Fixed size of one control record in bytes (action code + payload).
    #[serde(default = "default_record_size")]
    pub record_size: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            record_size: default_record_size(),
        }
    }
}

fn default_socket_path() -> String {
    "/tmp/irccd.socket".to_string()
}

fn default_record_size() -> usize {
    4096 // PIPE_BUF on Linux
}

/// Reader task retry policy.
///
/// A failed read sleeps `retry_interval_ms` and counts toward
/// `ping_timeout`; any successful read resets the count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReaderConfig {
    /// Consecutive failed reads tolerated before the session is torn down.
    #[serde(default = "default_ping_timeout")]
    pub ping_timeout: u32,

    /// Pause between failed reads, in milliseconds.
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            ping_timeout: default_ping_timeout(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

fn default_ping_timeout() -> u32 {
    300
}

fn default_retry_interval_ms() -> u64 {
    1000
}

/// Event loop configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonConfig {
    /// Seconds between idle ticks of the event loop.
    #[serde(default = "default_tick_secs")]
    pub tick_secs: u64,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            tick_secs: default_tick_secs(),
        }
    }
}

fn default_tick_secs() -> u64 {
    120
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
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

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        let config = Self::parse(&content)?;
        tracing::debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::Validation(
                "server.host must not be empty".to_string(),
            ));
        }
        if self.server.port == 0 {
            return Err(ConfigError::Validation(
                "server.port must be non-zero".to_string(),
            ));
        }
        validate_word("server.nick", &self.server.nick)?;
        if self.server.nick.len() > MAX_NICK_LEN {
            return Err(ConfigError::Validation(format!(
                "server.nick must be at most {MAX_NICK_LEN} bytes, got {}",
                self.server.nick.len()
            )));
        }
        if self.server.realname.is_empty() || self.server.realname.contains(['\r', '\n']) {
            return Err(ConfigError::Validation(
                "server.realname must be non-empty and fit on one line".to_string(),
            ));
        }

        if self.control.socket_path.is_empty() {
            return Err(ConfigError::Validation(
                "control.socket_path must not be empty".to_string(),
            ));
        }
        if self.control.record_size < MIN_RECORD_SIZE {
            return Err(ConfigError::Validation(format!(
                "control.record_size must be at least {MIN_RECORD_SIZE}, got {}",
                self.control.record_size
            )));
        }

        if self.reader.ping_timeout == 0 {
            return Err(ConfigError::Validation(
                "reader.ping_timeout must be at least 1".to_string(),
            ));
        }
        if self.daemon.tick_secs == 0 {
            return Err(ConfigError::Validation(
                "daemon.tick_secs must be non-zero".to_string(),
            ));
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }

    /// Address string (`host:port`) of the configured server.
    pub fn server_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }
}

fn validate_word(field: &str, value: &str) -> Result<(), ConfigError> {
    if value.is_empty() || value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(ConfigError::Validation(format!(
            "{field} must be a single non-empty word, got {value:?}"
        )));
    }
    Ok(())
}
