//! `groupflow` engine configuration.
//!
//! Provides configuration file support via `groupflow.toml` and environment
//! variables. Aggregation plans are separate documents (see
//! [`AggregationPlan`](crate::plan::AggregationPlan)); this file only tunes the
//! engine.
//!
//! # Priority (highest to lowest)
//!
//! 1. Environment variables (`GROUPFLOW_*`, sections separated by `__`, e.g.
//!    `GROUPFLOW_ENGINE__BATCH_SIZE=512`)
//! 2. Configuration file (`groupflow.toml`)
//! 3. Default values

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to parse configuration file.
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    /// Invalid configuration value.
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue {
        /// Configuration key that failed validation.
        key: String,
        /// Validation error message.
        message: String,
    },

    /// Configuration file not found.
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),
}

/// Default number of records pulled per batch.
pub const DEFAULT_BATCH_SIZE: usize = 1024;

/// Default reservoir capacity.
pub const DEFAULT_SAMPLE_SIZE: usize = 100;

/// Default sample seed.
pub const DEFAULT_SAMPLE_SEED: u64 = 42;

/// Default declared-cardinality ceiling for the pre-run warning.
pub const DEFAULT_CARDINALITY_CEILING: u64 = 1_000_000;

/// Engine section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Records pulled from the source per batch.
    pub batch_size: usize,
    /// Hard cap on table entries. `None` = unbounded.
    pub max_groups: Option<usize>,
    /// Declared nested cardinality above which a warning is raised.
    pub cardinality_ceiling: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            batch_size: DEFAULT_BATCH_SIZE,
            max_groups: None,
            cardinality_ceiling: DEFAULT_CARDINALITY_CEILING,
        }
    }
}

/// Sampling defaults for plans that enable sampling without a size or seed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SampleConfig {
    /// Reservoir capacity.
    pub sample_size: usize,
    /// RNG seed.
    pub seed: u64,
}

impl Default for SampleConfig {
    fn default() -> Self {
        Self {
            sample_size: DEFAULT_SAMPLE_SIZE,
            seed: DEFAULT_SAMPLE_SEED,
        }
    }
}

/// Logging section.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: error, warn, info, debug, trace.
    pub level: String,
    /// Output format: text or json.
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Main `groupflow` configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GroupflowConfig {
    /// Engine configuration.
    pub engine: EngineConfig,
    /// Sampling configuration.
    pub sample: SampleConfig,
    /// Logging configuration.
    pub logging: LoggingConfig,
}

impl GroupflowConfig {
    /// Loads configuration from default sources.
    ///
    /// Priority: defaults < file < environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_path("groupflow.toml")
    }

    /// Loads configuration from a specific file path.
    ///
    /// A missing file is not an error; defaults and environment apply.
    ///
    /// # Errors
    ///
    /// Returns an error if configuration parsing fails.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("GROUPFLOW_").split("__"));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Loads a configuration file that must exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::FileNotFound`] when the file is missing, or a
    /// parse error.
    pub fn load_required<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }
        Self::load_from_path(path)
    }

    /// Creates a configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing fails.
    pub fn from_toml(toml_str: &str) -> Result<Self, ConfigError> {
        let figment = Figment::new()
            .merge(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml_str));

        figment
            .extract()
            .map_err(|e| ConfigError::ParseError(e.to_string()))
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if any configuration value is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.engine.batch_size == 0 || self.engine.batch_size > 1_000_000 {
            return Err(ConfigError::InvalidValue {
                key: "engine.batch_size".to_string(),
                message: format!(
                    "value {} is out of range [1, 1000000]",
                    self.engine.batch_size
                ),
            });
        }

        if self.engine.max_groups == Some(0) {
            return Err(ConfigError::InvalidValue {
                key: "engine.max_groups".to_string(),
                message: "value must be > 0 when set".to_string(),
            });
        }

        if self.engine.cardinality_ceiling == 0 {
            return Err(ConfigError::InvalidValue {
                key: "engine.cardinality_ceiling".to_string(),
                message: "value must be > 0".to_string(),
            });
        }

        if self.sample.sample_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "sample.sample_size".to_string(),
                message: "value must be > 0".to_string(),
            });
        }

        let valid_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.level".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.level, valid_levels
                ),
            });
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::InvalidValue {
                key: "logging.format".to_string(),
                message: format!(
                    "value '{}' is invalid, expected one of: {:?}",
                    self.logging.format, valid_formats
                ),
            });
        }

        Ok(())
    }

    /// Serializes the configuration to TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}
