//! Configuration for the label exporter.

use label_exporter_common::config::{LoggingConfig, ZenohConfig};
use label_exporter_common::keyexpr::{KEY_PREFIX, validate_prefix};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to parse config: {0}")]
    Parse(#[from] json5::Error),
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Paths served by the HTTP server besides the metrics endpoint.
const RESERVED_PATHS: [&str; 3] = ["/", "/health", "/ready"];

/// Complete exporter configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExporterConfig {
    /// Zenoh connection settings used to reach the event source.
    #[serde(default)]
    pub zenoh: ZenohConfig,

    /// Event source settings.
    #[serde(default)]
    pub source: SourceConfig,

    /// HTTP exposition settings.
    #[serde(default)]
    pub http: HttpConfig,

    /// Which labels and entities are tracked.
    #[serde(default)]
    pub labels: LabelConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Event source configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Key expression prefix the entity events live under (default: "labels").
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Upper bound for consuming the initial listing (seconds).
    #[serde(default = "default_sync_timeout")]
    pub sync_timeout_secs: u64,
}

fn default_key_prefix() -> String {
    KEY_PREFIX.to_string()
}

fn default_sync_timeout() -> u64 {
    60
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            key_prefix: default_key_prefix(),
            sync_timeout_secs: default_sync_timeout(),
        }
    }
}

/// HTTP endpoint configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Address to listen on (default: "0.0.0.0:9102").
    #[serde(default = "default_listen")]
    pub listen: String,

    /// Path for metrics endpoint (default: "/metrics").
    #[serde(default = "default_path")]
    pub path: String,
}

fn default_listen() -> String {
    "0.0.0.0:9102".to_string()
}

fn default_path() -> String {
    "/metrics".to_string()
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            listen: default_listen(),
            path: default_path(),
        }
    }
}

/// Label selection configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelConfig {
    /// Only label names containing this substring are exported (default: "le__").
    #[serde(default = "default_label_prefix")]
    pub prefix: String,

    /// Export every label of every entity, ignoring `prefix` and `opt_in_label`.
    #[serde(default)]
    pub expose_all: bool,

    /// Label an entity must carry to be tracked at all (default: "export-labels").
    #[serde(default = "default_opt_in_label")]
    pub opt_in_label: String,

    /// How known label names are cleaned up when an entity goes away.
    #[serde(default)]
    pub cleanup: CleanupStrategy,
}

fn default_label_prefix() -> String {
    "le__".to_string()
}

fn default_opt_in_label() -> String {
    "export-labels".to_string()
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            prefix: default_label_prefix(),
            expose_all: false,
            opt_in_label: default_opt_in_label(),
            cleanup: CleanupStrategy::default(),
        }
    }
}

/// Known-label cleanup strategy applied on entity removal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CleanupStrategy {
    /// Check every label of the removed entity on its own and purge each
    /// one no remaining entity carries.
    #[default]
    Independent,

    /// Visit the removed entity's labels in order and stop at the first
    /// one still in use; later labels stay known even if orphaned.
    EarlyExit,
}

impl CleanupStrategy {
    /// Name used in logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            CleanupStrategy::Independent => "independent",
            CleanupStrategy::EarlyExit => "early_exit",
        }
    }
}

impl ExporterConfig {
    /// Load configuration from a JSON5 file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    /// Parse configuration from a JSON5 string.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: ExporterConfig = json5::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.sync_timeout_secs == 0 {
            return Err(ConfigError::Validation(
                "sync_timeout_secs must be > 0".to_string(),
            ));
        }

        validate_prefix(&self.source.key_prefix)
            .map_err(|e| ConfigError::Validation(e.to_string()))?;

        if self.labels.opt_in_label.is_empty() {
            return Err(ConfigError::Validation(
                "opt_in_label must not be empty".to_string(),
            ));
        }

        if self.http.listen.parse::<std::net::SocketAddr>().is_err() {
            return Err(ConfigError::Validation(format!(
                "Invalid listen address: {}",
                self.http.listen
            )));
        }

        if !self.http.path.starts_with('/') {
            return Err(ConfigError::Validation(
                "Metrics path must start with /".to_string(),
            ));
        }

        if RESERVED_PATHS.contains(&self.http.path.as_str()) {
            return Err(ConfigError::Validation(format!(
                "Metrics path {} is reserved",
                self.http.path
            )));
        }

        Ok(())
    }
}
