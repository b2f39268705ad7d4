//! Configuration management for the MiniTel client.
//!
//! This module provides TOML-based configuration file loading and saving.
//! The default configuration path is `~/.config/minitel/config.toml`.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::client::{MiniTelClient, DEFAULT_CONNECT_TIMEOUT};

/// Configuration validation errors.
#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("host must not be empty")]
    EmptyHost,

    #[error("port must be between 1 and 65535, got {0}")]
    InvalidPort(u16),

    #[error("connect_timeout_ms must be between 1 and 60000, got {0}")]
    InvalidConnectTimeout(u64),

    #[error("response_timeout_ms must be at most 600000 (0 disables it), got {0}")]
    InvalidResponseTimeout(u64),

    #[error("max_dump_attempts must be at least 1, got {0}")]
    InvalidMaxDumpAttempts(u32),

    #[error("log_level must be one of: trace, debug, info, warn, error; got {0}")]
    InvalidLogLevel(String),
}

/// Valid log level values for tracing configuration.
const VALID_LOG_LEVELS: &[&str] = &["trace", "debug", "info", "warn", "error"];

/// Upper bound for `connect_timeout_ms`.
const MAX_CONNECT_TIMEOUT_MS: u64 = 60_000;

/// Upper bound for `response_timeout_ms`.
const MAX_RESPONSE_TIMEOUT_MS: u64 = 600_000;

/// Main configuration structure for the MiniTel client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct Config {
    /// Server address and connection settings.
    pub server: ServerConfig,

    /// Command exchange settings.
    pub session: SessionConfig,

    /// Logging settings.
    pub logging: LoggingConfig,
}

/// Server address and connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ServerConfig {
    /// Host name or IP address of the MiniTel server.
    pub host: String,

    /// TCP port of the MiniTel server.
    pub port: u16,

    /// Deadline for establishing the TCP connection, in milliseconds.
    pub connect_timeout_ms: u64,
}

/// Command exchange settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct SessionConfig {
    /// Deadline for each command's response in milliseconds (0 = wait forever).
    pub response_timeout_ms: u64,

    /// How many DUMP requests a session sends before giving up.
    pub max_dump_attempts: u32,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7321,
            connect_timeout_ms: DEFAULT_CONNECT_TIMEOUT.as_millis() as u64,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            response_timeout_ms: 0,
            max_dump_attempts: 5,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Returns the default configuration file path.
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("minitel")
        .join("config.toml")
}

impl ServerConfig {
    /// Connect deadline as a `Duration`.
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl SessionConfig {
    /// Response deadline, or `None` when disabled.
    pub fn response_timeout(&self) -> Option<Duration> {
        (self.response_timeout_ms > 0).then(|| Duration::from_millis(self.response_timeout_ms))
    }
}

impl Config {
    /// Apply environment variable overrides to the configuration.
    ///
    /// Environment variables take precedence over config file values.
    /// Supported variables:
    /// - MINITEL_HOST: Override server host
    /// - MINITEL_PORT: Override server port
    /// - MINITEL_LOG_LEVEL: Override log level (trace, debug, info, warn, error)
    pub fn apply_env_overrides(&mut self) {
        if let Ok(host) = std::env::var("MINITEL_HOST") {
            if !host.is_empty() {
                tracing::info!("Overriding host from environment: {}", host);
                self.server.host = host;
            }
        }

        if let Ok(port) = std::env::var("MINITEL_PORT") {
            match port.parse::<u16>() {
                Ok(port) => {
                    tracing::info!("Overriding port from environment: {}", port);
                    self.server.port = port;
                }
                Err(_) if port.is_empty() => {}
                Err(e) => tracing::warn!("Ignoring MINITEL_PORT={:?}: {}", port, e),
            }
        }

        if let Ok(level) = std::env::var("MINITEL_LOG_LEVEL") {
            if !level.is_empty() {
                tracing::info!("Overriding log_level from environment: {}", level);
                self.logging.log_level = level;
            }
        }
    }

    /// Validate the configuration values.
    ///
    /// Returns an error if any configuration value is outside the valid range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.host.trim().is_empty() {
            return Err(ConfigError::EmptyHost);
        }

        if self.server.port == 0 {
            return Err(ConfigError::InvalidPort(self.server.port));
        }

        let connect = self.server.connect_timeout_ms;
        if connect == 0 || connect > MAX_CONNECT_TIMEOUT_MS {
            return Err(ConfigError::InvalidConnectTimeout(connect));
        }

        if self.session.response_timeout_ms > MAX_RESPONSE_TIMEOUT_MS {
            return Err(ConfigError::InvalidResponseTimeout(
                self.session.response_timeout_ms,
            ));
        }

        if self.session.max_dump_attempts == 0 {
            return Err(ConfigError::InvalidMaxDumpAttempts(
                self.session.max_dump_attempts,
            ));
        }

        let level = self.logging.log_level.to_lowercase();
        if !VALID_LOG_LEVELS.contains(&level.as_str()) {
            return Err(ConfigError::InvalidLogLevel(self.logging.log_level.clone()));
        }

        Ok(())
    }

    /// Build a client configured from these settings.
    pub fn build_client(&self) -> MiniTelClient {
        let client = MiniTelClient::new();
        match self.session.response_timeout() {
            Some(timeout) => client.with_response_timeout(timeout),
            None => client,
        }
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

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        std::env::remove_var("MINITEL_HOST");
        std::env::remove_var("MINITEL_PORT");
        std::env::remove_var("MINITEL_LOG_LEVEL");
    }

    #[test]
    fn test_default_config() {
        let config = Config::default();

        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 7321);
        assert_eq!(config.server.connect_timeout_ms, 2000);
        assert_eq!(config.session.response_timeout_ms, 0);
        assert_eq!(config.session.max_dump_attempts, 5);
        assert_eq!(config.logging.log_level, "info");
    }

    #[test]
    fn test_timeout_conversions() {
        let mut config = Config::default();
        assert_eq!(config.server.connect_timeout(), Duration::from_secs(2));
        assert_eq!(config.session.response_timeout(), None);

        config.session.response_timeout_ms = 1500;
        assert_eq!(
            config.session.response_timeout(),
            Some(Duration::from_millis(1500))
        );
    }

    #[test]
    fn test_build_client_applies_response_timeout() {
        let mut config = Config::default();
        assert_eq!(config.build_client().response_timeout(), None);

        config.session.response_timeout_ms = 250;
        assert_eq!(
            config.build_client().response_timeout(),
            Some(Duration::from_millis(250))
        );
    }

    #[test]
    fn test_from_toml_empty() {
        // Empty TOML should use all defaults
        let config = Config::from_toml("").unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_toml_partial() {
        let toml = r#"
[server]
port = 9000

[logging]
log_level = "debug"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.port, 9000);
        assert_eq!(config.logging.log_level, "debug");
        // Other values should be defaults
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.session.max_dump_attempts, 5);
    }

    #[test]
    fn test_from_toml_full() {
        let toml = r#"
[server]
host = "minitel.example.com"
port = 8080
connect_timeout_ms = 500

[session]
response_timeout_ms = 3000
max_dump_attempts = 2

[logging]
log_level = "trace"
"#;
        let config = Config::from_toml(toml).unwrap();

        assert_eq!(config.server.host, "minitel.example.com");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.connect_timeout_ms, 500);
        assert_eq!(config.session.response_timeout_ms, 3000);
        assert_eq!(config.session.max_dump_attempts, 2);
        assert_eq!(config.logging.log_level, "trace");
    }

    #[test]
    fn test_from_toml_invalid_syntax() {
        let toml = r#"
[server
port = 9000
"#;
        let err = Config::from_toml(toml).unwrap_err().to_string();
        assert!(err.contains("Invalid TOML"));
    }

    #[test]
    fn test_from_toml_wrong_type() {
        let toml = r#"
[server]
port = "not a number"
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_from_toml_port_out_of_range() {
        let toml = r#"
[server]
port = 70000
"#;
        assert!(Config::from_toml(toml).is_err());
    }

    #[test]
    fn test_roundtrip() {
        let mut original = Config::default();
        original.server.host = "10.0.0.7".to_string();
        original.session.response_timeout_ms = 1000;

        let toml = original.to_toml().unwrap();
        assert!(toml.contains("[server]"));
        assert!(toml.contains("[session]"));
        assert!(toml.contains("[logging]"));

        let loaded = Config::from_toml(&toml).unwrap();
        assert_eq!(original, loaded);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = TempDir::new().unwrap();
        let config = Config::load(temp_dir.path().join("missing.toml")).unwrap();
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_load() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.server.port = 4242;
        config.save(&path).unwrap();

        let loaded = Config::load(&path).unwrap();
        assert_eq!(loaded.server.port, 4242);
    }

    #[test]
    fn test_load_invalid_file() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "[server\n").unwrap();

        let err = Config::load(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("Failed to parse config file"));
    }

    #[test]
    fn test_default_config_path() {
        let path = default_config_path();
        assert!(path.ends_with("minitel/config.toml"));
    }

    #[test]
    #[serial]
    fn test_env_override_host_and_port() {
        clear_env();
        std::env::set_var("MINITEL_HOST", "192.168.1.20");
        std::env::set_var("MINITEL_PORT", "9999");

        let mut config = Config::default();
        config.apply_env_overrides();

        assert_eq!(config.server.host, "192.168.1.20");
        assert_eq!(config.server.port, 9999);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_invalid_port_ignored() {
        clear_env();
        std::env::set_var("MINITEL_PORT", "not-a-port");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.server.port, 7321);

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_empty_does_not_override() {
        clear_env();
        std::env::set_var("MINITEL_HOST", "");
        std::env::set_var("MINITEL_LOG_LEVEL", "");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config, Config::default());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_env_override_log_level() {
        clear_env();
        std::env::set_var("MINITEL_LOG_LEVEL", "debug");

        let mut config = Config::default();
        config.apply_env_overrides();
        assert_eq!(config.logging.log_level, "debug");

        clear_env();
    }

    #[test]
    fn test_validate_default_config() {
        assert!(Config::default().validate().is_ok());
    }

    #[test]
    fn test_validate_empty_host() {
        let mut config = Config::default();
        config.server.host = "  ".to_string();
        assert_eq!(config.validate(), Err(ConfigError::EmptyHost));
    }

    #[test]
    fn test_validate_port_zero() {
        let mut config = Config::default();
        config.server.port = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidPort(0)));
    }

    #[test]
    fn test_validate_connect_timeout_bounds() {
        let mut config = Config::default();

        config.server.connect_timeout_ms = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidConnectTimeout(0)));

        config.server.connect_timeout_ms = 60_001;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidConnectTimeout(60_001))
        );

        config.server.connect_timeout_ms = 60_000;
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_response_timeout_too_high() {
        let mut config = Config::default();
        config.session.response_timeout_ms = 600_001;
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidResponseTimeout(600_001))
        );
    }

    #[test]
    fn test_validate_zero_dump_attempts() {
        let mut config = Config::default();
        config.session.max_dump_attempts = 0;
        assert_eq!(config.validate(), Err(ConfigError::InvalidMaxDumpAttempts(0)));
    }

    #[test]
    fn test_validate_log_level_case_insensitive() {
        let mut config = Config::default();
        config.logging.log_level = "DEBUG".to_string();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_log_level_invalid() {
        let mut config = Config::default();
        config.logging.log_level = "verbose".to_string();
        assert_eq!(
            config.validate(),
            Err(ConfigError::InvalidLogLevel("verbose".to_string()))
        );
    }
}
