//! TOML Configuration File Support
//!
//! Centralized configuration loading, from a TOML file at
//! `~/.config/chatstream/config.toml`.
//!
//! # Configuration Priority
//!
//! Configuration values are loaded with the following priority (highest first):
//! 1. CLI arguments (applied by the binary after loading)
//! 2. Environment variables (`CHATSTREAM_*`)
//! 3. TOML configuration file
//! 4. Default values
//!
//! # Example Configuration
//!
//! ```toml
//! [transport]
//! connect_timeout_ms = 10000
//! read_timeout_ms = 0
//! user_agent = "chatstream/0.1"
//!
//! [aggregator]
//! flush_threshold = 32
//!
//! [cache]
//! capacity = 10
//!
//! [orchestrator]
//! channel_capacity = 64
//! preview_chars = 120
//!
//! [provider]
//! kind = "openai"
//! base_url = "https://api.openai.com/v1"
//! model = "gpt-4o-mini"
//! api_key_env = "OPENAI_API_KEY"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::adapter::{ProviderConfig, ProviderKind, DEFAULT_BASE_URL, DEFAULT_MODEL};
use crate::cache::DEFAULT_CAPACITY;
use crate::orchestrator::{OrchestratorConfig, DEFAULT_CHANNEL_CAPACITY, DEFAULT_PREVIEW_CHARS};
use crate::streaming::DEFAULT_FLUSH_THRESHOLD;
use crate::transport::client::{DEFAULT_CONNECT_TIMEOUT, DEFAULT_USER_AGENT};
use crate::transport::ClientSettings;

/// Environment variable holding the API key unless configured otherwise
pub const DEFAULT_API_KEY_ENV: &str = "OPENAI_API_KEY";

// =============================================================================
// Error Types
// =============================================================================

/// Errors that can occur when loading configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read config file
    #[error("Failed to read config file at {path}: {source}")]
    Read {
        /// The path that was attempted
        path: PathBuf,
        /// The underlying IO error
        source: std::io::Error,
    },

    /// Failed to parse TOML
    #[error("Failed to parse TOML config: {0}")]
    Parse(#[from] toml::de::Error),

    /// Invalid configuration value
    #[error("Invalid configuration: {0}")]
    Validation(String),
}

// =============================================================================
// Configuration Source Tracking
// =============================================================================

/// Tracks where the highest-priority configuration value came from
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

/// Transport section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportToml {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: Option<u64>,
    /// Maximum gap between body chunks in milliseconds (0 = no timeout)
    pub read_timeout_ms: Option<u64>,
    /// User agent header
    pub user_agent: Option<String>,
}

/// Aggregator section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregatorToml {
    /// Characters buffered before a delta is emitted
    pub flush_threshold: Option<usize>,
}

/// Cache section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheToml {
    /// Maximum number of cached sessions
    pub capacity: Option<usize>,
}

/// Orchestrator section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorToml {
    /// Deltas buffered between worker and caller
    pub channel_capacity: Option<usize>,
    /// Maximum characters kept as the session preview
    pub preview_chars: Option<usize>,
}

/// Provider section of the TOML configuration
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderToml {
    /// Wire format of the provider
    pub kind: Option<ProviderKind>,
    /// Endpoint base URL
    pub base_url: Option<String>,
    /// Model name
    pub model: Option<String>,
    /// Name of the environment variable holding the API key
    pub api_key_env: Option<String>,
}

/// Root TOML configuration structure
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatStreamToml {
    /// Transport settings
    pub transport: TransportToml,
    /// Aggregator settings
    pub aggregator: AggregatorToml,
    /// Cache settings
    pub cache: CacheToml,
    /// Orchestrator settings
    pub orchestrator: OrchestratorToml,
    /// Provider settings
    pub provider: ProviderToml,
}

// =============================================================================
// Resolved Configuration
// =============================================================================

/// Fully resolved configuration
#[derive(Clone, Debug)]
pub struct ChatStreamConfig {
    /// Connection timeout in milliseconds
    pub connect_timeout_ms: u64,
    /// Read timeout in milliseconds (0 = no timeout)
    pub read_timeout_ms: u64,
    /// User agent header
    pub user_agent: String,
    /// Characters buffered before a delta is emitted
    pub flush_threshold: usize,
    /// Maximum number of cached sessions
    pub cache_capacity: usize,
    /// Deltas buffered between worker and caller
    pub channel_capacity: usize,
    /// Maximum characters kept as the session preview
    pub preview_chars: usize,
    /// Wire format of the provider
    pub provider_kind: ProviderKind,
    /// Endpoint base URL
    pub base_url: String,
    /// Model name
    pub model: String,
    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    /// Path of the file that was loaded, if any
    pub config_file_path: Option<PathBuf>,
    /// Highest-priority source that contributed a value
    pub source: ConfigSource,
}

impl Default for ChatStreamConfig {
    fn default() -> Self {
        Self {
            connect_timeout_ms: u64::try_from(DEFAULT_CONNECT_TIMEOUT.as_millis())
                .unwrap_or(u64::MAX),
            read_timeout_ms: 0,
            user_agent: DEFAULT_USER_AGENT.to_string(),
            flush_threshold: DEFAULT_FLUSH_THRESHOLD,
            cache_capacity: DEFAULT_CAPACITY,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            preview_chars: DEFAULT_PREVIEW_CHARS,
            provider_kind: ProviderKind::default(),
            base_url: DEFAULT_BASE_URL.to_string(),
            model: DEFAULT_MODEL.to_string(),
            api_key_env: DEFAULT_API_KEY_ENV.to_string(),
            config_file_path: None,
            source: ConfigSource::Default,
        }
    }
}

impl ChatStreamConfig {
    /// Set the configuration source
    pub fn set_source(&mut self, source: ConfigSource) {
        self.source = source;
    }

    /// Reject values the components cannot work with
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Validation` naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.flush_threshold == 0 {
            return Err(ConfigError::Validation(
                "aggregator.flush_threshold must be at least 1".into(),
            ));
        }
        if self.cache_capacity == 0 {
            return Err(ConfigError::Validation(
                "cache.capacity must be at least 1".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(ConfigError::Validation(
                "orchestrator.channel_capacity must be at least 1".into(),
            ));
        }
        if self.connect_timeout_ms == 0 {
            return Err(ConfigError::Validation(
                "transport.connect_timeout_ms must be at least 1".into(),
            ));
        }
        if !(self.base_url.starts_with("http://") || self.base_url.starts_with("https://")) {
            return Err(ConfigError::Validation(format!(
                "provider.base_url must be an http(s) URL, got '{}'",
                self.base_url
            )));
        }
        if self.model.trim().is_empty() {
            return Err(ConfigError::Validation("provider.model must not be empty".into()));
        }
        Ok(())
    }

    /// Settings for the HTTP client
    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        ClientSettings {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            read_timeout: (self.read_timeout_ms > 0)
                .then(|| Duration::from_millis(self.read_timeout_ms)),
            user_agent: self.user_agent.clone(),
        }
    }

    /// Settings for the orchestrator
    #[must_use]
    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            flush_threshold: self.flush_threshold,
            channel_capacity: self.channel_capacity,
            preview_chars: self.preview_chars,
        }
    }

    /// Provider endpoint, with the API key read from its environment variable
    #[must_use]
    pub fn provider_config(&self) -> ProviderConfig {
        let provider = ProviderConfig::new(self.base_url.clone(), self.model.clone());
        match std::env::var(&self.api_key_env) {
            Ok(key) if !key.trim().is_empty() => provider.with_api_key(key),
            _ => {
                tracing::debug!(env = %self.api_key_env, "No API key in environment");
                provider
            }
        }
    }
}

// =============================================================================
// Configuration Loading
// =============================================================================

/// Get the default configuration file path
///
/// Returns `$XDG_CONFIG_HOME/chatstream/config.toml` or
/// `~/.config/chatstream/config.toml` if `XDG_CONFIG_HOME` is not set.
#[must_use]
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|p| p.join("chatstream").join("config.toml"))
}

/// Load configuration from the default path, the environment and defaults
///
/// # Errors
///
/// Returns an error if the config file exists but cannot be read or parsed,
/// or if the result fails validation. A missing file is not an error.
pub fn load_config() -> Result<ChatStreamConfig, ConfigError> {
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
/// Returns an error if the specified config file cannot be read or parsed,
/// or if the result fails validation.
pub fn load_config_from_path(path: Option<PathBuf>) -> Result<ChatStreamConfig, ConfigError> {
    let mut config = load_file_layer(path)?;
    apply_env_config(&mut config, |key| std::env::var(key).ok());
    config.validate()?;
    Ok(config)
}

/// Defaults overlaid with the file at `path`, if it exists
fn load_file_layer(path: Option<PathBuf>) -> Result<ChatStreamConfig, ConfigError> {
    let mut config = ChatStreamConfig::default();

    if let Some(ref config_path) = path {
        if config_path.exists() {
            let toml_content =
                std::fs::read_to_string(config_path).map_err(|e| ConfigError::Read {
                    path: config_path.clone(),
                    source: e,
                })?;

            let toml_config: ChatStreamToml = toml::from_str(&toml_content)?;
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

    Ok(config)
}

/// Apply TOML configuration values to the config struct
fn apply_toml_config(config: &mut ChatStreamConfig, toml: &ChatStreamToml) {
    // Transport settings
    if let Some(timeout) = toml.transport.connect_timeout_ms {
        config.connect_timeout_ms = timeout;
    }
    if let Some(timeout) = toml.transport.read_timeout_ms {
        config.read_timeout_ms = timeout;
    }
    if let Some(ref agent) = toml.transport.user_agent {
        config.user_agent.clone_from(agent);
    }

    // Aggregator and cache
    if let Some(threshold) = toml.aggregator.flush_threshold {
        config.flush_threshold = threshold;
    }
    if let Some(capacity) = toml.cache.capacity {
        config.cache_capacity = capacity;
    }

    // Orchestrator
    if let Some(capacity) = toml.orchestrator.channel_capacity {
        config.channel_capacity = capacity;
    }
    if let Some(chars) = toml.orchestrator.preview_chars {
        config.preview_chars = chars;
    }

    // Provider
    if let Some(kind) = toml.provider.kind {
        config.provider_kind = kind;
    }
    if let Some(ref url) = toml.provider.base_url {
        config.base_url.clone_from(url);
    }
    if let Some(ref model) = toml.provider.model {
        config.model.clone_from(model);
    }
    if let Some(ref env) = toml.provider.api_key_env {
        config.api_key_env.clone_from(env);
    }
}

/// Apply environment variable overrides to the config
///
/// Values that fail to parse are ignored with a warning.
fn apply_env_config(config: &mut ChatStreamConfig, lookup: impl Fn(&str) -> Option<String>) {
    fn parsed<T: std::str::FromStr>(key: &str, raw: &str) -> Option<T> {
        let value = raw.trim().parse().ok();
        if value.is_none() {
            tracing::warn!(key, value = raw, "Ignoring unparseable environment override");
        }
        value
    }

    if let Some(raw) = lookup("CHATSTREAM_CONNECT_TIMEOUT") {
        if let Some(ms) = parsed("CHATSTREAM_CONNECT_TIMEOUT", &raw) {
            config.connect_timeout_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = lookup("CHATSTREAM_READ_TIMEOUT") {
        if let Some(ms) = parsed("CHATSTREAM_READ_TIMEOUT", &raw) {
            config.read_timeout_ms = ms;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = lookup("CHATSTREAM_FLUSH_THRESHOLD") {
        if let Some(n) = parsed("CHATSTREAM_FLUSH_THRESHOLD", &raw) {
            config.flush_threshold = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = lookup("CHATSTREAM_CACHE_CAPACITY") {
        if let Some(n) = parsed("CHATSTREAM_CACHE_CAPACITY", &raw) {
            config.cache_capacity = n;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(raw) = lookup("CHATSTREAM_PROVIDER") {
        if let Some(kind) = parsed("CHATSTREAM_PROVIDER", &raw) {
            config.provider_kind = kind;
            config.source = ConfigSource::Env;
        }
    }
    if let Some(url) = lookup("CHATSTREAM_BASE_URL") {
        config.base_url = url;
        config.source = ConfigSource::Env;
    }
    if let Some(model) = lookup("CHATSTREAM_MODEL") {
        config.model = model;
        config.source = ConfigSource::Env;
    }
    if let Some(env) = lookup("CHATSTREAM_API_KEY_ENV") {
        config.api_key_env = env;
        config.source = ConfigSource::Env;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = ChatStreamConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.flush_threshold, 32);
        assert_eq!(config.cache_capacity, 10);
        assert_eq!(config.source, ConfigSource::Default);
        assert_eq!(config.client_settings().read_timeout, None);
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_file_layer(Some(dir.path().join("absent.toml"))).unwrap();
        assert_eq!(config.source, ConfigSource::Default);
        assert!(config.config_file_path.is_none());
    }

    #[test]
    fn test_file_values_apply() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            file,
            r#"
[transport]
read_timeout_ms = 30000

[aggregator]
flush_threshold = 8

[provider]
kind = "plain_text"
base_url = "http://localhost:9000/stream"
model = "local"
"#
        )
        .unwrap();

        let config = load_file_layer(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.source, ConfigSource::File);
        assert_eq!(config.flush_threshold, 8);
        assert_eq!(config.provider_kind, ProviderKind::PlainText);
        assert_eq!(config.model, "local");
        assert_eq!(
            config.client_settings().read_timeout,
            Some(Duration::from_secs(30))
        );
        // Untouched sections keep their defaults
        assert_eq!(config.cache_capacity, DEFAULT_CAPACITY);
    }

    #[test]
    fn test_malformed_file_is_parse_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[aggregator\nflush_threshold = ").unwrap();
        let err = load_file_layer(Some(file.path().to_path_buf())).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = ChatStreamConfig {
            model: "from-file".into(),
            source: ConfigSource::File,
            ..ChatStreamConfig::default()
        };
        apply_env_config(
            &mut config,
            env(&[
                ("CHATSTREAM_MODEL", "from-env"),
                ("CHATSTREAM_CACHE_CAPACITY", "3"),
                ("CHATSTREAM_PROVIDER", "plain"),
            ]),
        );
        assert_eq!(config.model, "from-env");
        assert_eq!(config.cache_capacity, 3);
        assert_eq!(config.provider_kind, ProviderKind::PlainText);
        assert_eq!(config.source, ConfigSource::Env);
    }

    #[test]
    fn test_unparseable_env_is_ignored() {
        let mut config = ChatStreamConfig::default();
        apply_env_config(&mut config, env(&[("CHATSTREAM_FLUSH_THRESHOLD", "lots")]));
        assert_eq!(config.flush_threshold, DEFAULT_FLUSH_THRESHOLD);
        assert_eq!(config.source, ConfigSource::Default);
    }

    #[test]
    fn test_validation_rejects_zeroes() {
        for config in [
            ChatStreamConfig {
                flush_threshold: 0,
                ..ChatStreamConfig::default()
            },
            ChatStreamConfig {
                cache_capacity: 0,
                ..ChatStreamConfig::default()
            },
            ChatStreamConfig {
                channel_capacity: 0,
                ..ChatStreamConfig::default()
            },
            ChatStreamConfig {
                base_url: "ftp://nope".into(),
                ..ChatStreamConfig::default()
            },
        ] {
            assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
        }
    }

    #[test]
    fn test_orchestrator_config_mapping() {
        let config = ChatStreamConfig {
            flush_threshold: 5,
            preview_chars: 40,
            ..ChatStreamConfig::default()
        };
        let orchestrator = config.orchestrator_config();
        assert_eq!(orchestrator.flush_threshold, 5);
        assert_eq!(orchestrator.preview_chars, 40);
    }

    #[test]
    fn test_source_display() {
        assert_eq!(ConfigSource::Cli.to_string(), "CLI");
        assert_eq!(ConfigSource::File.to_string(), "config file");
    }
}
