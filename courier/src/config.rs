//! The `courier.config.ron` file.
//!
//! ```ron
//! (
//!     broker: (host: "rabbitmq", prefetch: 200, max_retries: 5),
//!     queue: "emails",
//!     batch: (max_batch_size: 100, flush_timeout_ms: 2000),
//!     storage: (bucket: "attachments", region: "eu-west-1"),
//!     smtp: (host: "smtp.example.com", username: "courier", password: "secret"),
//!     sender: (name: "Example", email: "noreply@example.com"),
//!     templates: { "welcome": "Hello {{ first_name }}!" },
//! )
//! ```

use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use courier_broker::BrokerConfig;
use courier_cache::{CacheConfig, StorageConfig};
use courier_dispatch::{BatchConfig, MemoryTemplates, SenderConfig};
use courier_metrics::MetricsConfig;
use courier_smtp::SmtpConfig;
use serde::Deserialize;
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "COURIER_CONFIG";

/// Searched in order when [`CONFIG_ENV`] is unset.
pub const DEFAULT_PATHS: [&str; 2] = [
    "./courier.config.ron",
    "/etc/courier/courier.config.ron",
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{} points to non-existent file: {}", CONFIG_ENV, .0.display())]
    MissingEnvPath(PathBuf),

    #[error("No configuration file found. Tried {} and {}", CONFIG_ENV, DEFAULT_PATHS.join(", "))]
    NotFound,

    #[error("Failed to read config from {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid configuration: {0}")]
    Parse(#[from] ron::error::SpannedError),

    #[error("A queue name is required")]
    MissingQueue,

    #[error("max_batch_size must be greater than zero")]
    EmptyBatch,

    /// The broker would never push enough deliveries to fill a batch.
    #[error("Prefetch ({prefetch}) must be at least max_batch_size ({max_batch_size})")]
    PrefetchTooSmall {
        prefetch: u16,
        max_batch_size: usize,
    },
}

#[derive(Debug, Clone, Deserialize)]
pub struct CourierConfig {
    #[serde(default)]
    pub broker: BrokerConfig,

    /// The queue consumed, declared with its dead-letter pair on startup
    pub queue: String,

    #[serde(default)]
    pub batch: BatchConfig,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub storage: StorageConfig,

    #[serde(default)]
    pub smtp: SmtpConfig,

    pub sender: SenderConfig,

    /// Template name to body, expanded at dispatch time
    #[serde(default)]
    pub templates: HashMap<String, String>,

    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl CourierConfig {
    /// Parse and validate a configuration document.
    ///
    /// # Errors
    ///
    /// Returns an error if the document does not parse or fails validation.
    pub fn parse(content: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::Options::default()
            .with_default_extension(ron::extensions::Extensions::IMPLICIT_SOME)
            .from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed or validated.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content)
    }

    /// Locate the configuration file and load it.
    ///
    /// # Errors
    ///
    /// Returns an error if no file is found or it fails to load.
    pub fn discover() -> Result<Self, ConfigError> {
        Self::load(&find_config_file(std::env::var_os(CONFIG_ENV).map(PathBuf::from))?)
    }

    /// # Errors
    ///
    /// Returns the first inconsistency found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue.trim().is_empty() {
            return Err(ConfigError::MissingQueue);
        }

        if self.batch.max_batch_size == 0 {
            return Err(ConfigError::EmptyBatch);
        }

        if usize::from(self.broker.prefetch) < self.batch.max_batch_size {
            return Err(ConfigError::PrefetchTooSmall {
                prefetch: self.broker.prefetch,
                max_batch_size: self.batch.max_batch_size,
            });
        }

        Ok(())
    }

    #[must_use]
    pub fn templates(&self) -> MemoryTemplates {
        self.templates
            .iter()
            .map(|(name, body)| (name.clone(), body.as_str()))
            .collect()
    }
}

/// Resolve the configuration path using the following precedence:
/// 1. `COURIER_CONFIG` environment variable
/// 2. ./courier.config.ron (current working directory)
/// 3. /etc/courier/courier.config.ron (system-wide config)
///
/// # Errors
///
/// Returns an error if the explicit path does not exist or nothing is found.
pub fn find_config_file(explicit: Option<PathBuf>) -> Result<PathBuf, ConfigError> {
    if let Some(path) = explicit {
        return if path.exists() {
            Ok(path)
        } else {
            Err(ConfigError::MissingEnvPath(path))
        };
    }

    DEFAULT_PATHS
        .iter()
        .map(PathBuf::from)
        .find(|path| path.exists())
        .ok_or(ConfigError::NotFound)
}
