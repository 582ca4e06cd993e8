//! Engine configuration.

use crate::errors::PlanflowError;
use crate::observability::LoggingConfig;
use crate::retry::{BackoffStrategy, RetryConfig};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Prefix of environment overrides.
pub const ENV_PREFIX: &str = "PLANFLOW_";

/// Tunables of an [`crate::engine::OrchestrationEngine`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Work units executing concurrently.
    pub worker_pool_size: usize,
    /// Copies a `STRATEGY` node without a strategy config spawns of its child.
    pub bare_strategy_fanout: usize,
    /// Use matrix values instead of indices in identifier postfixes.
    pub use_matrix_values_in_identifiers: bool,
    /// Deepest allowed level stack.
    pub max_nesting_depth: usize,
    /// Retry schedule for persistence calls.
    pub collaborator_retry: RetryConfig,
    /// Intervention wait limit used when the policy sets none.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_intervention_timeout_ms: Option<u64>,
    /// Logging settings.
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_pool_size: 64,
            bare_strategy_fanout: 2,
            use_matrix_values_in_identifiers: true,
            max_nesting_depth: 32,
            collaborator_retry: RetryConfig::new()
                .with_max_attempts(3)
                .with_base_delay_ms(50)
                .with_backoff(BackoffStrategy::Exponential),
            default_intervention_timeout_ms: None,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Default configuration with `PLANFLOW_*` environment overrides.
    pub fn from_env() -> Result<Self, PlanflowError> {
        Self::default().with_overrides(|key| std::env::var(format!("{ENV_PREFIX}{key}")).ok())
    }

    /// Applies overrides looked up by unprefixed key.
    pub fn with_overrides<F>(mut self, lookup: F) -> Result<Self, PlanflowError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = parse(&lookup, "WORKER_POOL_SIZE")? {
            self.worker_pool_size = value;
        }
        if let Some(value) = parse(&lookup, "BARE_STRATEGY_FANOUT")? {
            self.bare_strategy_fanout = value;
        }
        if let Some(value) = parse(&lookup, "USE_MATRIX_VALUES_IN_IDENTIFIERS")? {
            self.use_matrix_values_in_identifiers = value;
        }
        if let Some(value) = parse(&lookup, "MAX_NESTING_DEPTH")? {
            self.max_nesting_depth = value;
        }
        if let Some(value) = parse(&lookup, "COLLABORATOR_RETRY_ATTEMPTS")? {
            self.collaborator_retry.max_attempts = value;
        }
        if let Some(value) = parse(&lookup, "COLLABORATOR_RETRY_BASE_DELAY_MS")? {
            self.collaborator_retry.base_delay_ms = value;
        }
        if let Some(value) = parse(&lookup, "DEFAULT_INTERVENTION_TIMEOUT_MS")? {
            self.default_intervention_timeout_ms = Some(value);
        }
        if let Some(value) = lookup("LOG") {
            self.logging.default_directive = value;
        }
        self.validate()?;
        Ok(self)
    }

    /// Rejects values the engine cannot run with.
    pub fn validate(&self) -> Result<(), PlanflowError> {
        if self.worker_pool_size == 0 {
            return Err(PlanflowError::Configuration(
                "worker_pool_size must be at least 1".to_string(),
            ));
        }
        if self.bare_strategy_fanout == 0 {
            return Err(PlanflowError::Configuration(
                "bare_strategy_fanout must be at least 1".to_string(),
            ));
        }
        if self.max_nesting_depth == 0 {
            return Err(PlanflowError::Configuration(
                "max_nesting_depth must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Sets the worker pool size.
    #[must_use]
    pub fn with_worker_pool_size(mut self, size: usize) -> Self {
        self.worker_pool_size = size;
        self
    }

    /// Sets the bare strategy fan-out.
    #[must_use]
    pub fn with_bare_strategy_fanout(mut self, fanout: usize) -> Self {
        self.bare_strategy_fanout = fanout;
        self
    }

    /// Chooses matrix values or indices for identifier postfixes.
    #[must_use]
    pub fn with_matrix_values_in_identifiers(mut self, enabled: bool) -> Self {
        self.use_matrix_values_in_identifiers = enabled;
        self
    }

    /// Sets the maximum nesting depth.
    #[must_use]
    pub fn with_max_nesting_depth(mut self, depth: usize) -> Self {
        self.max_nesting_depth = depth;
        self
    }

    /// Sets the persistence retry schedule.
    #[must_use]
    pub fn with_collaborator_retry(mut self, retry: RetryConfig) -> Self {
        self.collaborator_retry = retry;
        self
    }

    /// Sets the fallback intervention timeout.
    #[must_use]
    pub fn with_default_intervention_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_intervention_timeout_ms = Some(timeout_ms);
        self
    }
}

fn parse<T, F>(lookup: &F, key: &str) -> Result<Option<T>, PlanflowError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    lookup(key)
        .map(|raw| {
            raw.trim().parse::<T>().map_err(|err| {
                PlanflowError::Configuration(format!("{ENV_PREFIX}{key}='{raw}': {err}"))
            })
        })
        .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.worker_pool_size, 64);
        assert_eq!(config.bare_strategy_fanout, 2);
        assert!(config.use_matrix_values_in_identifiers);
        assert_eq!(config.max_nesting_depth, 32);
        assert_eq!(config.collaborator_retry.max_attempts, 3);
        assert_eq!(config.collaborator_retry.base_delay_ms, 50);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_overrides() {
        let config = EngineConfig::default()
            .with_overrides(lookup(&[
                ("WORKER_POOL_SIZE", "8"),
                ("BARE_STRATEGY_FANOUT", "3"),
                ("USE_MATRIX_VALUES_IN_IDENTIFIERS", "false"),
                ("DEFAULT_INTERVENTION_TIMEOUT_MS", "1500"),
                ("LOG", "warn"),
            ]))
            .unwrap();
        assert_eq!(config.worker_pool_size, 8);
        assert_eq!(config.bare_strategy_fanout, 3);
        assert!(!config.use_matrix_values_in_identifiers);
        assert_eq!(config.default_intervention_timeout_ms, Some(1500));
        assert_eq!(config.logging.default_directive, "warn");
    }

    #[test]
    fn test_invalid_override() {
        let result = EngineConfig::default().with_overrides(lookup(&[("WORKER_POOL_SIZE", "many")]));
        assert!(matches!(result, Err(PlanflowError::Configuration(msg)) if msg.contains("WORKER_POOL_SIZE")));

        let result = EngineConfig::default().with_overrides(lookup(&[("BARE_STRATEGY_FANOUT", "0")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_partial() {
        let config: EngineConfig = serde_json::from_str(r#"{"worker_pool_size": 4}"#).unwrap();
        assert_eq!(config.worker_pool_size, 4);
        assert_eq!(config.max_nesting_depth, 32);
    }
}
