//! Configuration management for the messaging layer.
//!
//! Settings are loaded from TOML. Every section and field is optional and
//! falls back to its default.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::info;

fn default_log_level() -> String {
    "info".to_string()
}

fn default_warn_on_type_mismatch() -> bool {
    true
}

fn default_check_on_startup() -> bool {
    true
}

/// Messaging configuration loaded from a TOML file.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MessagingConfig {
    /// Logging configuration settings
    #[serde(default)]
    pub logging: LoggingSettings,
    /// Event bus settings
    #[serde(default)]
    pub events: EventSettings,
    /// Request store settings
    #[serde(default)]
    pub requests: RequestSettings,
    /// Startup consistency check settings
    #[serde(default)]
    pub consistency: ConsistencySettings,
}

/// Logging system configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Log level filter (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Whether to output logs in JSON format
    #[serde(default)]
    pub json_format: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json_format: false,
        }
    }
}

/// Event bus configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventSettings {
    /// Log publishes that reach no handler at debug instead of trace
    #[serde(default)]
    pub log_unhandled: bool,
}

/// Request store configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestSettings {
    /// Warn when a cell binds to a key holding a value of another type
    #[serde(default = "default_warn_on_type_mismatch")]
    pub warn_on_type_mismatch: bool,
}

impl Default for RequestSettings {
    fn default() -> Self {
        Self {
            warn_on_type_mismatch: default_warn_on_type_mismatch(),
        }
    }
}

/// Consistency checker configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsistencySettings {
    /// Run the declaration checker when the context starts
    #[serde(default = "default_check_on_startup")]
    pub check_on_startup: bool,
}

impl Default for ConsistencySettings {
    fn default() -> Self {
        Self {
            check_on_startup: default_check_on_startup(),
        }
    }
}

impl MessagingConfig {
    /// Parses a configuration from TOML text.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    /// Renders the configuration as pretty TOML.
    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Loads configuration from a TOML file.
    ///
    /// If the file doesn't exist, a default configuration file is created
    /// at that path and the defaults are returned.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            let content = std::fs::read_to_string(path)?;
            Self::from_toml_str(&content)
        } else {
            let default_config = Self::default();
            std::fs::write(path, default_config.to_toml_string()?)?;
            info!("Created default configuration file: {}", path.display());
            Ok(default_config)
        }
    }
}
