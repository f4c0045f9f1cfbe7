//! Client Configuration
//!
//! Centralized configuration for the platform client, loaded from a TOML
//! file at `~/.config/ragstream/client.toml` plus environment overrides.
//! The resulting [`ClientConfig`] is passed explicitly to everything that
//! talks to the backend; nothing reads the environment at call time.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (via [`ConfigOverrides`])
//! 2. Environment variables
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [server]
//! base_url = "http://localhost:8000/api/v1"
//! connect_timeout_secs = 10
//! request_timeout_secs = 30
//!
//! [streaming]
//! event_buffer = 256
//! max_line_bytes = 10485760
//!
//! [research]
//! poll_interval_ms = 1000
//! namespace = "default"
//! max_iterations = 5
//! timeout_seconds = 300
//! step_timeout_seconds = 60
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::research::ResearchParams;
use crate::transport::MAX_LINE_SIZE;

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    ReadError {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    ParseError(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where a configuration value came from
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    /// Value from command-line argument
    Cli,
    /// Value from environment variable
    Env,
    /// Value from TOML configuration file
    File,
    /// Default value
    Default,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Cli => write!(f, "CLI"),
            Self::Env => write!(f, "environment"),
            Self::File => write!(f, "config file"),
            Self::Default => write!(f, "default"),
        }
    }
}

// =============================================================================
// TOML Configuration Structures
// =============================================================================

/// Server section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerToml {
    /// API base URL
    pub base_url: Option<String>,

    /// Connection timeout in seconds
    pub connect_timeout_secs: Option<u64>,

    /// Timeout for non-streaming requests in seconds
    pub request_timeout_secs: Option<u64>,
}

/// Streaming section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamingToml {
    /// Capacity of the event channel between reader and consumer
    pub event_buffer: Option<usize>,

    /// Longest line accepted from an event stream
    pub max_line_bytes: Option<usize>,
}

/// Research section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ResearchToml {
    /// Status poll interval in milliseconds
    pub poll_interval_ms: Option<u64>,

    /// Default namespace
    pub namespace: Option<String>,

    /// Default iteration budget
    pub max_iterations: Option<u32>,

    /// Default job timeout
    pub timeout_seconds: Option<u64>,

    /// Default per-step timeout
    pub step_timeout_seconds: Option<u64>,
}

/// Top-level TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientToml {
    /// Server configuration section
    pub server: ServerToml,

    /// Streaming configuration section
    pub streaming: StreamingToml,

    /// Research configuration section
    pub research: ResearchToml,
}

// =============================================================================
// Main Configuration Struct
// =============================================================================

/// Configuration for the platform client
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// API base URL (no trailing slash)
    pub base_url: String,

    /// Connection timeout
    pub connect_timeout: Duration,

    /// Timeout for non-streaming requests
    ///
    /// Streaming requests only use the connect timeout; a stream may stay
    /// open for minutes.
    pub request_timeout: Duration,

    /// Capacity of the event channel of a streaming session
    pub event_buffer: usize,

    /// Longest line accepted from an event stream
    pub max_line_bytes: usize,

    /// Interval between research status polls
    pub poll_interval: Duration,

    /// Default research parameters
    pub research: ResearchParams,

    /// Path to the config file that was loaded (if any)
    pub config_file_path: Option<PathBuf>,

    /// Source of configuration values
    source: ConfigSource,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000/api/v1".to_string(),
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            event_buffer: 256,
            max_line_bytes: MAX_LINE_SIZE,
            poll_interval: Duration::from_secs(1),
            research: ResearchParams::default(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ClientConfig {
    /// Create a configuration pointing at `base_url`, defaults elsewhere
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            ..Default::default()
        }
    }

    /// Set the poll interval
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Get the primary source of this configuration
    #[must_use]
    pub fn source(&self) -> ConfigSource {
        self.source
    }

    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Check values that would make the client unusable
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ValidationError`] for an empty or non-HTTP base
    /// URL, or a zero poll interval, event buffer or line limit.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.base_url.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "base_url must not be empty".to_string(),
            ));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::ValidationError(format!(
                "base_url must be an http(s) URL, got {}",
                self.base_url
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationError(
                "poll_interval must be greater than zero".to_string(),
            ));
        }
        if self.event_buffer == 0 {
            return Err(ConfigError::ValidationError(
                "event_buffer must be greater than zero".to_string(),
            ));
        }
        if self.max_line_bytes == 0 {
            return Err(ConfigError::ValidationError(
                "max_line_bytes must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/ragstream/client.toml` or
/// `~/.config/ragstream/client.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("ragstream").join("client.toml"))
}

/// Load configuration from all sources with proper priority
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be parsed. A missing
/// config file is not an error. Values are not validated here; call
/// [`ClientConfig::validate`] once CLI overrides have been applied.
pub fn load_config() -> Result<ClientConfig, ConfigError> {
    load_config_from_path(default_config_path())
}

/// Load configuration from a specific path
///
/// # Arguments
///
/// * `path` - Optional path to the configuration file. If `None`, only defaults
///   and environment variables are used.
///
/// # Errors
///
/// Returns an error if the specified config file cannot be read or parsed.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ClientConfig, ConfigError> {
    load_config_with_env(path, |key| std::env::var(key).ok())
}

/// Load configuration using `lookup` in place of the process environment
fn load_config_with_env<F>(path: Option<PathBuf>, lookup: F) -> Result<ClientConfig, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    // Start with defaults
    let mut config = ClientConfig::default();

    // Try to load from file
    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::ReadError {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ClientToml = toml::from_str(&toml_content)?;
            apply_toml_config(&mut config, &toml_config);
            config.config_file_path = Some(config_path.clone());
            config.source = ConfigSource::File;

            tracing::info!(
                path = %config_path.display(),
                "Loaded configuration from file"
            );
        } else {
            tracing::debug!(
                path = %config_path.display(),
                "Config file not found, using defaults"
            );
        }
    }

    // Apply environment variables (overrides file values)
    apply_env_config(&mut config, lookup);

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ClientConfig, toml: &ClientToml) {
    // Server settings
    if let Some(ref url) = toml.server.base_url {
        config.base_url = url.trim_end_matches('/').to_string();
    }
    if let Some(secs) = toml.server.connect_timeout_secs {
        config.connect_timeout = Duration::from_secs(secs);
    }
    if let Some(secs) = toml.server.request_timeout_secs {
        config.request_timeout = Duration::from_secs(secs);
    }

    // Streaming settings
    if let Some(capacity) = toml.streaming.event_buffer {
        config.event_buffer = capacity;
    }
    if let Some(max) = toml.streaming.max_line_bytes {
        config.max_line_bytes = max;
    }

    // Research settings
    if let Some(ms) = toml.research.poll_interval_ms {
        config.poll_interval = Duration::from_millis(ms);
    }
    if let Some(ref namespace) = toml.research.namespace {
        config.research.namespace = namespace.clone();
    }
    if let Some(n) = toml.research.max_iterations {
        config.research.max_iterations = n;
    }
    if let Some(secs) = toml.research.timeout_seconds {
        config.research.timeout_seconds = secs;
    }
    if let Some(secs) = toml.research.step_timeout_seconds {
        config.research.step_timeout_seconds = secs;
    }
}

/// Apply environment variable overrides to the config
fn apply_env_config<F>(config: &mut ClientConfig, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(url) = lookup("RAGSTREAM_BASE_URL") {
        config.base_url = url.trim_end_matches('/').to_string();
        config.source = ConfigSource::Env;
    }
    if let Some(timeout) = lookup("RAGSTREAM_REQUEST_TIMEOUT_SECS") {
        if let Ok(secs) = timeout.parse::<u64>() {
            config.request_timeout = Duration::from_secs(secs);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(interval) = lookup("RAGSTREAM_POLL_INTERVAL_MS") {
        if let Ok(ms) = interval.parse::<u64>() {
            config.poll_interval = Duration::from_millis(ms);
            config.source = ConfigSource::Env;
        }
    }
    if let Some(namespace) = lookup("RAGSTREAM_NAMESPACE") {
        config.research.namespace = namespace;
        config.source = ConfigSource::Env;
    }
}

// =============================================================================
// CLI Override Support
// =============================================================================

/// Builder for applying CLI overrides to configuration
///
/// Use this after [`load_config`] to apply command-line argument overrides.
#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    /// Base URL override
    pub base_url: Option<String>,

    /// Poll interval override (milliseconds)
    pub poll_interval_ms: Option<u64>,

    /// Namespace override
    pub namespace: Option<String>,

    /// Iteration budget override
    pub max_iterations: Option<u32>,
}

impl ConfigOverrides {
    /// Create a new empty set of overrides
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set base URL override
    #[must_use]
    pub fn with_base_url(mut self, url: impl Into<String>) -> Self {
        self.base_url = Some(url.into());
        self
    }

    /// Set poll interval override
    #[must_use]
    pub fn with_poll_interval_ms(mut self, ms: u64) -> Self {
        self.poll_interval_ms = Some(ms);
        self
    }

    /// Set namespace override
    #[must_use]
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Set iteration budget override
    #[must_use]
    pub fn with_max_iterations(mut self, n: u32) -> Self {
        self.max_iterations = Some(n);
        self
    }

    /// Apply overrides to a configuration
    pub fn apply(&self, config: &mut ClientConfig) {
        if self.base_url.is_some()
            || self.poll_interval_ms.is_some()
            || self.namespace.is_some()
            || self.max_iterations.is_some()
        {
            config.source = ConfigSource::Cli;
        }

        if let Some(ref url) = self.base_url {
            config.base_url = url.trim_end_matches('/').to_string();
        }

        if let Some(ms) = self.poll_interval_ms {
            config.poll_interval = Duration::from_millis(ms);
        }

        if let Some(ref namespace) = self.namespace {
            config.research.namespace = namespace.clone();
        }

        if let Some(n) = self.max_iterations {
            config.research.max_iterations = n;
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_toml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    // =========================================================================
    // Default Configuration Tests
    // =========================================================================

    #[test]
    fn test_default_config() {
        let config = ClientConfig::default();

        assert_eq!(config.base_url, "http://localhost:8000/api/v1");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.event_buffer, 256);
        assert_eq!(config.max_line_bytes, MAX_LINE_SIZE);
        assert_eq!(config.research.namespace, "default");
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_default_config_path() {
        if let Some(p) = default_config_path() {
            assert!(p.to_string_lossy().contains("ragstream"));
            assert!(p.to_string_lossy().ends_with("client.toml"));
        }
    }

    #[test]
    fn test_new_trims_trailing_slash() {
        let config = ClientConfig::new("http://rag.internal/api/");
        assert_eq!(config.base_url, "http://rag.internal/api");
    }

    // =========================================================================
    // TOML Parsing Tests
    // =========================================================================

    #[test]
    fn test_parse_valid_toml() {
        let file = write_toml(
            r#"
[server]
base_url = "https://rag.example.com/api/v1/"
connect_timeout_secs = 3
request_timeout_secs = 45

[streaming]
event_buffer = 64
max_line_bytes = 65536

[research]
poll_interval_ms = 2500
namespace = "legal"
max_iterations = 8
timeout_seconds = 600
step_timeout_seconds = 90
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.base_url, "https://rag.example.com/api/v1");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.request_timeout, Duration::from_secs(45));
        assert_eq!(config.event_buffer, 64);
        assert_eq!(config.max_line_bytes, 65536);
        assert_eq!(config.poll_interval, Duration::from_millis(2500));
        assert_eq!(config.research.namespace, "legal");
        assert_eq!(config.research.max_iterations, 8);
        assert_eq!(config.research.timeout_seconds, 600);
        assert_eq!(config.research.step_timeout_seconds, 90);
        assert_eq!(config.source(), ConfigSource::File);
        assert_eq!(config.config_file_path, Some(file.path().to_path_buf()));
    }

    #[test]
    fn test_parse_partial_toml() {
        let file = write_toml(
            r#"
[research]
namespace = "support"
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();

        assert_eq!(config.research.namespace, "support");
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.base_url, "http://localhost:8000/api/v1");
    }

    #[test]
    fn test_missing_file_graceful() {
        let path = PathBuf::from("/nonexistent/path/client.toml");
        let config = load_config_with_env(Some(path), no_env).unwrap();
        assert_eq!(config.source(), ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_malformed_toml_error() {
        let file = write_toml(
            r#"
[server
base_url = 12
"#,
        );

        let result = load_config_with_env(Some(file.path().to_path_buf()), no_env);
        assert!(matches!(result.unwrap_err(), ConfigError::ParseError(_)));
    }

    #[test]
    fn test_zero_poll_interval_rejected() {
        let file = write_toml(
            r#"
[research]
poll_interval_ms = 0
"#,
        );

        let config = load_config_with_env(Some(file.path().to_path_buf()), no_env).unwrap();
        assert!(matches!(
            config.validate().unwrap_err(),
            ConfigError::ValidationError(_)
        ));
    }

    #[test]
    fn test_non_http_base_url_rejected() {
        let config = ClientConfig::new("ftp://files.example.com");
        assert!(config.validate().is_err());
    }

    // =========================================================================
    // Priority Ordering Tests
    // =========================================================================

    #[test]
    fn test_env_overrides_file() {
        let file = write_toml(
            r#"
[server]
base_url = "http://file-host/api"

[research]
poll_interval_ms = 5000
"#,
        );

        let env: HashMap<&str, &str> = [
            ("RAGSTREAM_BASE_URL", "http://env-host/api"),
            ("RAGSTREAM_POLL_INTERVAL_MS", "750"),
            ("RAGSTREAM_NAMESPACE", "finance"),
        ]
        .into_iter()
        .collect();

        let config = load_config_with_env(Some(file.path().to_path_buf()), |key| {
            env.get(key).map(|v| (*v).to_string())
        })
        .unwrap();

        assert_eq!(config.base_url, "http://env-host/api");
        assert_eq!(config.poll_interval, Duration::from_millis(750));
        assert_eq!(config.research.namespace, "finance");
        assert_eq!(config.source(), ConfigSource::Env);
    }

    #[test]
    fn test_unparseable_env_value_ignored() {
        let config = load_config_with_env(None, |key| {
            (key == "RAGSTREAM_POLL_INTERVAL_MS").then(|| "soon".to_string())
        })
        .unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(1));
        assert_eq!(config.source(), ConfigSource::Default);
    }

    #[test]
    fn test_cli_overrides_env() {
        let mut config = ClientConfig::default();
        config.base_url = "http://env-host/api".to_string();
        config.set_source(ConfigSource::Env);

        let overrides = ConfigOverrides::new()
            .with_base_url("http://cli-host/api/")
            .with_poll_interval_ms(200);
        overrides.apply(&mut config);

        assert_eq!(config.base_url, "http://cli-host/api");
        assert_eq!(config.poll_interval, Duration::from_millis(200));
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_cli_override_repairs_invalid_env_value() {
        let mut config = load_config_with_env(None, |key| {
            (key == "RAGSTREAM_BASE_URL").then(|| "localhost:8000".to_string())
        })
        .unwrap();
        assert_eq!(config.base_url, "localhost:8000");
        assert!(config.validate().is_err());

        ConfigOverrides::new()
            .with_base_url("http://localhost:8000/api/v1")
            .apply(&mut config);

        assert!(config.validate().is_ok());
        assert_eq!(config.base_url, "http://localhost:8000/api/v1");
        assert_eq!(config.source(), ConfigSource::Cli);
    }

    #[test]
    fn test_config_overrides_empty_no_change() {
        let mut config = ClientConfig::default();
        let original_source = config.source();

        ConfigOverrides::new().apply(&mut config);

        assert_eq!(config.source(), original_source);
    }

    #[test]
    fn test_config_source_display() {
        assert_eq!(format!("{}", ConfigSource::Cli), "CLI");
        assert_eq!(format!("{}", ConfigSource::Env), "environment");
        assert_eq!(format!("{}", ConfigSource::File), "config file");
        assert_eq!(format!("{}", ConfigSource::Default), "default");
    }

    #[test]
    fn test_config_error_display() {
        let read_err = ConfigError::ReadError {
            path: PathBuf::from("/test/path"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        let msg = format!("{read_err}");
        assert!(msg.contains("/test/path"));
        assert!(msg.contains("Failed to read"));

        let validation_err = ConfigError::ValidationError("invalid value".to_string());
        assert!(format!("{validation_err}").contains("invalid value"));
    }
}
