//! Common configuration types.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// Default log filter directive.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Errors raised while reading configuration values.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Observability configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive.
    pub log_level: String,
    /// Enable JSON-formatted logs.
    pub json_logs: bool,
    /// Optional Prometheus listener address (e.g., "0.0.0.0:9100").
    pub metrics_bind_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: DEFAULT_LOG_LEVEL.to_string(),
            json_logs: false,
            metrics_bind_address: None,
        }
    }
}

impl ObservabilityConfig {
    /// Load observability settings from a variable map.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if `SC_LOG_JSON` is not a boolean.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let log_level = vars
            .get("SC_LOG_LEVEL")
            .cloned()
            .unwrap_or_else(|| DEFAULT_LOG_LEVEL.to_string());

        let json_logs = match vars.get("SC_LOG_JSON") {
            Some(value) => parse_bool(value).ok_or_else(|| {
                ConfigError::InvalidValue(format!("SC_LOG_JSON must be true or false, got {value}"))
            })?,
            None => false,
        };

        let metrics_bind_address = vars
            .get("SC_METRICS_BIND_ADDRESS")
            .filter(|s| !s.is_empty())
            .cloned();

        Ok(Self {
            log_level,
            json_logs,
            metrics_bind_address,
        })
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Some(true),
        "0" | "false" | "no" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_unset() {
        let config = ObservabilityConfig::from_vars(&HashMap::new()).unwrap();
        assert_eq!(config, ObservabilityConfig::default());
    }

    #[test]
    fn test_custom_values() {
        let vars = HashMap::from([
            ("SC_LOG_LEVEL".to_string(), "debug".to_string()),
            ("SC_LOG_JSON".to_string(), "TRUE".to_string()),
            (
                "SC_METRICS_BIND_ADDRESS".to_string(),
                "127.0.0.1:9100".to_string(),
            ),
        ]);

        let config = ObservabilityConfig::from_vars(&vars).unwrap();
        assert_eq!(config.log_level, "debug");
        assert!(config.json_logs);
        assert_eq!(config.metrics_bind_address.as_deref(), Some("127.0.0.1:9100"));
    }

    #[test]
    fn test_invalid_json_flag() {
        let vars = HashMap::from([("SC_LOG_JSON".to_string(), "maybe".to_string())]);
        let result = ObservabilityConfig::from_vars(&vars);
        assert!(matches!(result, Err(ConfigError::InvalidValue(_))));
    }
}
