//! `tracing-subscriber` installation.

use crate::errors::PlanflowError;
use serde::{Deserialize, Serialize};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::EnvFilter;

/// Output format of the log layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter used when `RUST_LOG` is not set.
    pub default_directive: String,
    /// Output format.
    pub format: LogFormat,
    /// Include span enter/exit context in each line.
    pub with_span_context: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            default_directive: "info,planflow=debug".to_string(),
            format: LogFormat::Pretty,
            with_span_context: true,
        }
    }
}

impl LoggingConfig {
    /// Sets the fallback filter directive.
    #[must_use]
    pub fn with_directive(mut self, directive: impl Into<String>) -> Self {
        self.default_directive = directive.into();
        self
    }

    /// Switches to JSON output.
    #[must_use]
    pub fn json(mut self) -> Self {
        self.format = LogFormat::Json;
        self
    }

    fn filter(&self) -> Result<EnvFilter, PlanflowError> {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => Ok(filter),
            Err(_) => EnvFilter::try_new(&self.default_directive).map_err(|err| {
                PlanflowError::Configuration(format!(
                    "invalid log directive '{}': {err}",
                    self.default_directive
                ))
            }),
        }
    }
}

/// Installs the global subscriber.
///
/// Returns `Ok(false)` if a subscriber was already installed, so repeated
/// calls from tests are harmless.
pub fn init_tracing(config: &LoggingConfig) -> Result<bool, PlanflowError> {
    let filter = config.filter()?;
    let registry = tracing_subscriber::registry().with(filter);
    let installed = match config.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(config.with_span_context))
            .try_init(),
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(config.with_span_context),
            )
            .try_init(),
    };
    Ok(installed.is_ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = LoggingConfig::default();
        assert_eq!(config.format, LogFormat::Pretty);
        assert!(config.default_directive.contains("planflow"));
    }

    #[test]
    fn test_config_deserialize_partial() {
        let config: LoggingConfig = serde_json::from_str(r#"{"format": "json"}"#).unwrap();
        assert_eq!(config.format, LogFormat::Json);
        assert_eq!(config.default_directive, LoggingConfig::default().default_directive);
    }

    #[test]
    fn test_init_twice_is_harmless() {
        let config = LoggingConfig::default().with_directive("warn");
        let first = init_tracing(&config).unwrap();
        let second = init_tracing(&config.clone().json()).unwrap();
        assert!(!(first && second));
    }
}
