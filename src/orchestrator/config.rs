//! Orchestrator configuration.
//!
//! Controls how long the scheduling loop may sit idle between passes and
//! whether it emits periodic activity summaries.

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is missing.
    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value.
    #[error("Invalid value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    /// Configuration validation failed.
    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),
}

/// Configuration for the orchestrator loop.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Longest time the loop waits for a signal before re-polling.
    pub poll_interval: Duration,
    /// Emit an activity summary whenever the tracked collections change.
    pub activity_summaries: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(500),
            activity_summaries: true,
        }
    }
}

impl OrchestratorConfig {
    /// Creates a new configuration with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `BRANCHFORGE_POLL_INTERVAL_MS`: Idle poll interval in milliseconds (default: 500)
    /// - `BRANCHFORGE_ACTIVITY_SUMMARIES`: Emit activity summaries (default: true)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable has an invalid value.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();

        if let Ok(val) = std::env::var("BRANCHFORGE_POLL_INTERVAL_MS") {
            let millis: u64 = parse_env_value(&val, "BRANCHFORGE_POLL_INTERVAL_MS")?;
            config.poll_interval = Duration::from_millis(millis);
        }

        if let Ok(val) = std::env::var("BRANCHFORGE_ACTIVITY_SUMMARIES") {
            config.activity_summaries = parse_env_bool(&val, "BRANCHFORGE_ACTIVITY_SUMMARIES")?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.poll_interval.is_zero() {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must be greater than 0".to_string(),
            ));
        }

        if self.poll_interval > Duration::from_secs(60) {
            return Err(ConfigError::ValidationFailed(
                "poll_interval must not exceed 60 seconds".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Builder method to enable or disable activity summaries.
    pub fn with_activity_summaries(mut self, enabled: bool) -> Self {
        self.activity_summaries = enabled;
        self
    }
}

/// Parse an environment variable value into a type.
pub(crate) fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
pub(crate) fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.poll_interval, Duration::from_millis(500));
        assert!(config.activity_summaries);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_builder() {
        let config = OrchestratorConfig::new()
            .with_poll_interval(Duration::from_millis(20))
            .with_activity_summaries(false);

        assert_eq!(config.poll_interval, Duration::from_millis(20));
        assert!(!config.activity_summaries);
    }

    #[test]
    fn test_validation_zero_interval() {
        let config = OrchestratorConfig::default().with_poll_interval(Duration::ZERO);
        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("poll_interval"));
    }

    #[test]
    fn test_validation_huge_interval() {
        let config = OrchestratorConfig::default().with_poll_interval(Duration::from_secs(120));
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_env_value() {
        let millis: u64 = parse_env_value("250", "TEST").unwrap();
        assert_eq!(millis, 250);

        let err = parse_env_value::<u64>("soon", "TEST").unwrap_err();
        assert!(err.to_string().contains("could not parse 'soon'"));
    }

    #[test]
    fn test_parse_env_bool() {
        assert!(parse_env_bool("true", "test").unwrap());
        assert!(parse_env_bool("1", "test").unwrap());
        assert!(parse_env_bool("yes", "test").unwrap());
        assert!(parse_env_bool("ON", "test").unwrap());

        assert!(!parse_env_bool("false", "test").unwrap());
        assert!(!parse_env_bool("0", "test").unwrap());
        assert!(!parse_env_bool("no", "test").unwrap());
        assert!(!parse_env_bool("off", "test").unwrap());

        assert!(parse_env_bool("maybe", "test").is_err());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::MissingEnvVar("TEST_VAR".to_string());
        assert!(err.to_string().contains("TEST_VAR"));

        let err = ConfigError::InvalidValue {
            key: "KEY".to_string(),
            message: "bad value".to_string(),
        };
        assert!(err.to_string().contains("KEY"));
        assert!(err.to_string().contains("bad value"));
    }
}
