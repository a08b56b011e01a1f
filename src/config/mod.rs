// src/config/mod.rs - Tracker configuration: defaults, config files, validation

use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

pub mod cli;

pub use cli::Cli;

/// Errors raised while loading or validating configuration
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse YAML config {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("failed to parse TOML config {path}: {source}")]
    Toml {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("unsupported config format '{0}' (expected .yaml, .yml or .toml)")]
    UnsupportedFormat(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Complete tracker configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    pub upstream: UpstreamConfig,
    pub classifier: ClassifierConfig,
    pub window: WindowConfig,
    pub ingest: IngestConfig,
    pub file_sink: FileSinkConfig,
    pub live: LiveConfig,
    pub status: StatusConfig,
}

/// Twitch chat connection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Channel (streamer) whose chat is tracked
    pub channel: String,
    pub url: String,
    /// Leave unset to connect anonymously
    pub username: Option<String>,
    pub oauth_token: Option<String>,
    pub connect_timeout_seconds: u64,
    pub reconnect: ReconnectConfig,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            channel: "northernlion".to_string(),
            url: "wss://irc-ws.chat.twitch.tv:443".to_string(),
            username: None,
            oauth_token: None,
            connect_timeout_seconds: 30,
            reconnect: ReconnectConfig::default(),
        }
    }
}

/// What to do when the upstream connection drops.
///
/// Disabled means fail fast: the process exits with an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_attempts: 5,
            initial_backoff_ms: 1_000,
            max_backoff_ms: 30_000,
        }
    }
}

/// Patterns deciding which counter a message feeds.
///
/// A pattern is either a literal substring or a regex written as `~/pattern/flags`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub positive_patterns: Vec<String>,
    pub negative_patterns: Vec<String>,
    pub case_sensitive: bool,
    /// Apply NFKC before matching so full-width digits and signs count
    pub normalize_unicode: bool,
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        Self {
            positive_patterns: vec!["+2".to_string()],
            negative_patterns: vec!["-2".to_string()],
            case_sensitive: true,
            normalize_unicode: true,
        }
    }
}

/// Longest accepted window (one day)
pub const MAX_WINDOW_SECONDS: u64 = 86_400;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WindowConfig {
    pub interval_seconds: u64,
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self { interval_seconds: 10 }
    }
}

/// How classified events reach the counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IngestMode {
    /// Increment from the task reading chat
    Direct,
    /// Hand tokens to a dedicated consumer over a bounded channel
    Buffered,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    pub mode: IngestMode,
    pub buffer_capacity: usize,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            mode: IngestMode::Direct,
            buffer_capacity: 1024,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSinkConfig {
    pub enabled: bool,
    pub path: PathBuf,
    pub delimiter: char,
    pub write_retries: u32,
    pub retry_backoff_ms: u64,
    pub queue_capacity: usize,
}

impl Default for FileSinkConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: PathBuf::from("plustwos.log"),
            delimiter: ',',
            write_retries: 3,
            retry_backoff_ms: 200,
            queue_capacity: 16,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveConfig {
    pub enabled: bool,
    pub listen_addr: String,
    /// Only upgrade requests on this path are accepted
    pub path: String,
    /// Per-subscriber queue depth; a full queue drops the newest window for that subscriber
    pub queue_capacity: usize,
}

impl Default for LiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            listen_addr: "localhost:8080".to_string(),
            path: "/tracker".to_string(),
            queue_capacity: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StatusConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for StatusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 3000,
        }
    }
}

impl TrackerConfig {
    /// Load from a YAML or TOML file, picked by extension
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or_default()
            .to_lowercase();

        let config = match extension.as_str() {
            "yaml" | "yml" => serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
                path: path.to_path_buf(),
                source,
            })?,
            "toml" => toml::from_str(&content).map_err(|source| ConfigError::Toml {
                path: path.to_path_buf(),
                source,
            })?,
            other => return Err(ConfigError::UnsupportedFormat(other.to_string())),
        };

        info!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Defaults, then the optional config file, then command-line/env overrides
    pub fn load(cli: &Cli) -> Result<Self, ConfigError> {
        let mut config = match &cli.config {
            Some(path) => Self::from_file(path)?,
            None => {
                debug!("No config file given, using defaults");
                Self::default()
            }
        };
        cli.apply(&mut config);
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));

        if self.upstream.channel.trim().is_empty() {
            return invalid("upstream.channel must not be empty");
        }
        if url::Url::parse(&self.upstream.url).is_err() {
            return Err(ConfigError::Invalid(format!(
                "upstream.url is not a valid URL: {}",
                self.upstream.url
            )));
        }
        if self.upstream.username.is_some() != self.upstream.oauth_token.is_some() {
            return invalid("upstream.username and upstream.oauth_token must be set together");
        }
        if let Some(token) = &self.upstream.oauth_token {
            if !token.starts_with("oauth:") {
                return invalid("upstream.oauth_token must start with 'oauth:'");
            }
        }
        if self.upstream.reconnect.enabled && self.upstream.reconnect.max_attempts == 0 {
            return invalid("upstream.reconnect.max_attempts must be at least 1");
        }
        if self.classifier.positive_patterns.is_empty() && self.classifier.negative_patterns.is_empty() {
            return invalid("classifier needs at least one pattern");
        }
        if self.window.interval_seconds == 0 {
            return invalid("window.interval_seconds must be at least 1");
        }
        if self.window.interval_seconds > MAX_WINDOW_SECONDS {
            return Err(ConfigError::Invalid(format!(
                "window.interval_seconds must be at most {}",
                MAX_WINDOW_SECONDS
            )));
        }
        if self.ingest.mode == IngestMode::Buffered && self.ingest.buffer_capacity == 0 {
            return invalid("ingest.buffer_capacity must be at least 1");
        }
        if !self.file_sink.enabled && !self.live.enabled {
            return invalid("at least one of file_sink and live must be enabled");
        }
        if self.file_sink.enabled {
            if !matches!(self.file_sink.delimiter, ',' | ' ' | '\t' | ';') {
                return Err(ConfigError::Invalid(format!(
                    "unsupported file_sink.delimiter {:?}",
                    self.file_sink.delimiter
                )));
            }
            if self.file_sink.queue_capacity == 0 {
                return invalid("file_sink.queue_capacity must be at least 1");
            }
        }
        if self.live.enabled {
            if self.live.queue_capacity == 0 {
                return invalid("live.queue_capacity must be at least 1");
            }
            if !self.live.path.starts_with('/') {
                return invalid("live.path must start with '/'");
            }
        }

        // Surface bad regexes at startup rather than on the first message
        crate::tracker::classifier::PatternClassifier::from_config(&self.classifier)
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_defaults_are_valid() {
        let config = TrackerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.window.interval_seconds, 10);
        assert_eq!(config.live.listen_addr, "localhost:8080");
        assert_eq!(config.file_sink.delimiter, ',');
    }

    #[test]
    fn test_yaml_partial_config() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "upstream:\n  channel: somestreamer\nwindow:\n  interval_seconds: 5\nfile_sink:\n  delimiter: \" \"\n"
        )
        .unwrap();

        let config = TrackerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.upstream.channel, "somestreamer");
        assert_eq!(config.window.interval_seconds, 5);
        assert_eq!(config.file_sink.delimiter, ' ');
        // Untouched sections keep their defaults
        assert_eq!(config.live.path, "/tracker");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_toml_config() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[ingest]\nmode = \"buffered\"\nbuffer_capacity = 64\n\n[classifier]\npositive_patterns = [\"+2\", \"~/\\\\bW\\\\b/\"]\n"
        )
        .unwrap();

        let config = TrackerConfig::from_file(file.path()).unwrap();
        assert_eq!(config.ingest.mode, IngestMode::Buffered);
        assert_eq!(config.ingest.buffer_capacity, 64);
        assert_eq!(config.classifier.positive_patterns.len(), 2);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unsupported_extension() {
        let file = NamedTempFile::new().unwrap();
        let err = TrackerConfig::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedFormat(_)));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = TrackerConfig::default();
        config.window.interval_seconds = 0;
        assert!(config.validate().is_err());
        config.window.interval_seconds = MAX_WINDOW_SECONDS;
        assert!(config.validate().is_ok());
        config.window.interval_seconds = MAX_WINDOW_SECONDS + 1;
        assert!(config.validate().is_err());
        config.window.interval_seconds = u64::MAX;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.file_sink.enabled = false;
        config.live.enabled = false;
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.file_sink.delimiter = '|';
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.classifier.negative_patterns = vec!["~/(unclosed/".to_string()];
        assert!(config.validate().is_err());

        let mut config = TrackerConfig::default();
        config.upstream.username = Some("bot".to_string());
        assert!(config.validate().is_err());
        config.upstream.oauth_token = Some("oauth:abc".to_string());
        assert!(config.validate().is_ok());
    }
}
