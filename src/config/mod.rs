//! Application configuration.
//!
//! Loaded from YAML files and environment variables into a single `Config`.

mod storage;

pub use storage::{StorageConfig, StorageType};

use serde::Deserialize;

use crate::bus::KafkaConfig;

/// Default configuration file name.
pub const DEFAULT_CONFIG_FILE: &str = "config.yaml";
/// Environment variable for configuration file path.
pub const CONFIG_ENV_VAR: &str = "RATINGS_CONFIG";
/// Prefix for configuration environment variables.
pub const CONFIG_ENV_PREFIX: &str = "RATINGS";
/// Environment variable for logging configuration.
pub const LOG_ENV_VAR: &str = "RATINGS_LOG";
/// Environment variable selecting the log format (`json` or `pretty`).
pub const LOG_FORMAT_ENV_VAR: &str = "RATINGS_LOG_FORMAT";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to load configuration: {0}")]
    Load(#[from] ::config::ConfigError),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// Messaging backend discriminator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessagingType {
    /// In-process partitioned log.
    #[default]
    Channel,
    Kafka,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct MessagingConfig {
    #[serde(rename = "type")]
    pub messaging_type: MessagingType,
    /// Partitions per topic for the in-process log.
    pub channel_partitions: i32,
}

impl Default for MessagingConfig {
    fn default() -> Self {
        Self {
            messaging_type: MessagingType::Channel,
            channel_partitions: 3,
        }
    }
}

/// Optional second subscription that copies averages onto products.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProjectorConfig {
    pub enabled: bool,
    /// Consumer group for the `rating_calculated_topic` subscription.
    pub group_id: String,
}

impl Default for ProjectorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            group_id: "product-service".to_string(),
        }
    }
}

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Config {
    pub storage: StorageConfig,
    pub messaging: MessagingConfig,
    /// Topics, consumer group and client settings. Also used by the
    /// in-process log for topic names and consumer tuning.
    pub kafka: KafkaConfig,
    pub projector: ProjectorConfig,
}

impl Config {
    /// Load configuration from file and environment.
    ///
    /// Configuration sources (in order of priority, later overrides earlier):
    /// 1. `config.yaml` in current directory (if exists)
    /// 2. File specified by `path` argument (if provided)
    /// 3. File specified by `CONFIG_ENV_VAR` environment variable (if set)
    /// 4. Environment variables with `CONFIG_ENV_PREFIX` prefix, `__` between
    ///    levels (`RATINGS__KAFKA__GROUP_ID`)
    pub fn load(path: Option<&str>) -> Result<Self, ConfigError> {
        use ::config::{Config as ConfigLib, Environment, File, FileFormat};

        let mut builder = ConfigLib::builder()
            .add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Yaml).required(false));

        if let Some(config_path) = path {
            builder = builder.add_source(File::new(config_path, FileFormat::Yaml).required(true));
        }

        if let Ok(config_path) = std::env::var(CONFIG_ENV_VAR) {
            builder = builder.add_source(File::new(&config_path, FileFormat::Yaml).required(true));
        }

        let config: Config = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    /// Reject settings no backend can run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.storage.table.trim().is_empty() {
            return Err(ConfigError::Invalid("storage.table must not be empty".to_string()));
        }
        if self.kafka.review_modified_topic.trim().is_empty()
            || self.kafka.rating_calculated_topic.trim().is_empty()
        {
            return Err(ConfigError::Invalid("topic names must not be empty".to_string()));
        }
        if self.kafka.group_id.trim().is_empty() {
            return Err(ConfigError::Invalid("kafka.group_id must not be empty".to_string()));
        }
        if self.messaging.messaging_type == MessagingType::Kafka && self.kafka.brokers().is_empty()
        {
            return Err(ConfigError::Invalid(
                "kafka.bootstrap_servers must list at least one broker".to_string(),
            ));
        }
        if self.projector.enabled && self.projector.group_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "projector.group_id must not be empty".to_string(),
            ));
        }
        if self.messaging.channel_partitions < 1 {
            return Err(ConfigError::Invalid(
                "messaging.channel_partitions must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}
