//! Error types for the planflow engine.
//!
//! The taxonomy follows the engine's failure classes: configuration errors
//! (malformed plans, strategies or unregistered step types), step-level
//! failures, infrastructure errors raised by collaborators, and invalid
//! requests against the engine's public surface.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

/// The main error type for planflow operations.
#[derive(Debug, Error)]
pub enum PlanflowError {
    /// A plan failed validation.
    #[error("{0}")]
    Validation(#[from] PlanValidationError),

    /// A fan-out strategy is malformed.
    #[error("{0}")]
    StrategyConfig(#[from] StrategyConfigError),

    /// A step implementation reported an error.
    #[error("{0}")]
    Step(#[from] StepError),

    /// A persistence collaborator failed.
    #[error("{0}")]
    Persistence(#[from] PersistenceError),

    /// Two producers wrote the same output into the same scope.
    #[error("{0}")]
    OutputConflict(#[from] OutputConflictError),

    /// Engine configuration could not be loaded.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// The request does not apply to the current state of the target.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// A retry request was rejected.
    #[error("Retry rejected: {0}")]
    RetryRejected(String),

    /// Execution was aborted.
    #[error("Plan execution aborted: {0}")]
    Aborted(String),

    /// A generic internal error.
    #[error("Internal error: {0}")]
    Internal(String),

    /// Serialization/deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl PlanflowError {
    /// Returns true if retrying the failed call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Persistence(err) if err.is_transient())
    }
}

impl From<serde_json::Error> for PlanflowError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Diagnostic payload attached to errors and failure records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorInfo {
    /// Error code (e.g., "PLAN-002-MISSING_NODE").
    pub code: String,
    /// Short summary of the error.
    pub summary: String,
    /// Hint for fixing the error.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
    /// Additional context key-value pairs.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
}

impl ErrorInfo {
    /// Creates a new error info.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            fix_hint: None,
            context: HashMap::new(),
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a single context entry.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }
}

/// Error raised when a plan fails validation.
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct PlanValidationError {
    /// The error message.
    pub message: String,
    /// The node ids involved in the error.
    pub nodes: Vec<String>,
    /// Optional diagnostic info.
    pub error_info: Option<ErrorInfo>,
}

impl PlanValidationError {
    /// Creates a new plan validation error.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            nodes: Vec::new(),
            error_info: None,
        }
    }

    /// Sets the nodes involved.
    #[must_use]
    pub fn with_nodes(mut self, nodes: Vec<String>) -> Self {
        self.nodes = nodes;
        self
    }

    /// Sets the diagnostic info.
    #[must_use]
    pub fn with_error_info(mut self, info: ErrorInfo) -> Self {
        self.error_info = Some(info);
        self
    }

    /// Returns the error code, if any.
    #[must_use]
    pub fn code(&self) -> Option<&str> {
        self.error_info.as_ref().map(|info| info.code.as_str())
    }
}

/// Error raised when the node reference graph contains a cycle.
#[derive(Debug, Clone, Error)]
#[error("Cycle detected in plan: {}", cycle_path.join(" -> "))]
pub struct CycleDetectedError {
    /// The path of node ids forming the cycle.
    pub cycle_path: Vec<String>,
}

impl CycleDetectedError {
    /// Creates a new cycle detected error.
    #[must_use]
    pub fn new(cycle_path: Vec<String>) -> Self {
        Self { cycle_path }
    }
}

impl From<CycleDetectedError> for PlanValidationError {
    fn from(err: CycleDetectedError) -> Self {
        let info = ErrorInfo::new(
            "PLAN-004-CYCLE",
            format!("Plan references form a cycle: {}", err.cycle_path.join(" -> ")),
        )
        .with_fix_hint("Express repetition with a for-loop or matrix strategy instead of a back edge.");

        Self {
            message: err.to_string(),
            nodes: err.cycle_path,
            error_info: Some(info),
        }
    }
}

/// Errors raised while validating or expanding a fan-out strategy.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StrategyConfigError {
    /// A matrix declared no axes.
    #[error("Matrix strategy declares no axes")]
    NoAxes,

    /// A matrix axis has no values.
    #[error("Matrix axis '{axis}' has no values")]
    EmptyAxis {
        /// The axis name.
        axis: String,
    },

    /// The same axis name was declared twice.
    #[error("Matrix axis '{axis}' is declared more than once")]
    DuplicateAxis {
        /// The axis name.
        axis: String,
    },

    /// An axis lists the same value twice.
    #[error("Matrix axis '{axis}' lists value '{value}' more than once")]
    DuplicateAxisValue {
        /// The axis name.
        axis: String,
        /// The repeated value.
        value: String,
    },

    /// An exclude entry references an axis that does not exist.
    #[error("Matrix exclude references unknown axis '{axis}'")]
    UnknownExcludeAxis {
        /// The unknown axis name.
        axis: String,
    },

    /// A max-concurrency of zero was requested.
    #[error("maxConcurrency must be greater than zero")]
    ZeroConcurrency,

    /// The strategy node does not name the child it fans out.
    #[error("Strategy node '{node_id}' does not declare a child node")]
    MissingChild {
        /// The strategy node id.
        node_id: String,
    },
}

impl StrategyConfigError {
    /// Returns the diagnostic info for this error.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        let code = match self {
            Self::NoAxes => "STRATEGY-001-NO_AXES",
            Self::EmptyAxis { .. } => "STRATEGY-001-EMPTY_AXIS",
            Self::DuplicateAxis { .. } | Self::DuplicateAxisValue { .. } => "STRATEGY-003-DUPLICATE",
            Self::UnknownExcludeAxis { .. } => "STRATEGY-002-UNKNOWN_AXIS",
            Self::ZeroConcurrency => "STRATEGY-005-CONCURRENCY",
            Self::MissingChild { .. } => "STRATEGY-006-MISSING_CHILD",
        };
        ErrorInfo::new(code, self.to_string())
    }
}

/// Errors reported by step implementations.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// The step ran and failed.
    #[error("Step failed: {message}")]
    Failed {
        /// The failure message.
        message: String,
    },

    /// The step is misconfigured; the plan cannot continue.
    #[error("Step configuration error: {0}")]
    Configuration(String),

    /// Resource access validation failed.
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// No step implementation is registered for the step type.
    #[error("No step registered for type '{step_type}'")]
    Unregistered {
        /// The missing step type.
        step_type: String,
    },
}

impl StepError {
    /// Creates a failed error.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
        }
    }

    /// Returns true if this error makes the whole plan unrunnable.
    #[must_use]
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::Unregistered { .. })
    }
}

impl From<anyhow::Error> for StepError {
    fn from(err: anyhow::Error) -> Self {
        Self::failed(format!("{err:#}"))
    }
}

impl From<StrategyConfigError> for StepError {
    fn from(err: StrategyConfigError) -> Self {
        Self::Configuration(err.to_string())
    }
}

/// Errors raised by persistence collaborators.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PersistenceError {
    /// The record does not exist.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Record kind.
        kind: &'static str,
        /// Record id.
        id: String,
    },

    /// A record with the same id already exists.
    #[error("{kind} already exists: {id}")]
    AlreadyExists {
        /// Record kind.
        kind: &'static str,
        /// Record id.
        id: String,
    },

    /// The backing store is unavailable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl PersistenceError {
    /// Creates a not-found error.
    #[must_use]
    pub fn not_found(kind: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound { kind, id: id.into() }
    }

    /// Returns true if retrying the call may succeed.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Error raised when an output name is written twice in one scope.
#[derive(Debug, Clone, Error)]
#[error("Output conflict for '{name}' produced by '{producer}'")]
pub struct OutputConflictError {
    /// Output name.
    pub name: String,
    /// Producer identifier.
    pub producer: String,
}

impl OutputConflictError {
    /// Creates a new output conflict error.
    #[must_use]
    pub fn new(name: impl Into<String>, producer: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            producer: producer.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_info_creation() {
        let info = ErrorInfo::new("TEST-001", "Test error")
            .with_fix_hint("Fix this by doing that")
            .with_context_entry("node", "build");

        assert_eq!(info.code, "TEST-001");
        assert_eq!(info.summary, "Test error");
        assert_eq!(info.fix_hint, Some("Fix this by doing that".to_string()));
        assert_eq!(info.context.get("node"), Some(&"build".to_string()));
    }

    #[test]
    fn test_cycle_detected_into_validation() {
        let err = CycleDetectedError::new(vec![
            "a".to_string(),
            "b".to_string(),
            "a".to_string(),
        ]);
        assert!(err.to_string().contains("a -> b -> a"));

        let validation: PlanValidationError = err.into();
        assert_eq!(validation.code(), Some("PLAN-004-CYCLE"));
        assert_eq!(validation.nodes.len(), 3);
    }

    #[test]
    fn test_strategy_error_codes() {
        let err = StrategyConfigError::UnknownExcludeAxis {
            axis: "gpu".to_string(),
        };
        assert_eq!(err.error_info().code, "STRATEGY-002-UNKNOWN_AXIS");
        assert!(err.to_string().contains("gpu"));
    }

    #[test]
    fn test_step_error_classification() {
        assert!(StepError::Configuration("bad".to_string()).is_configuration());
        assert!(StepError::Unregistered {
            step_type: "SHELL".to_string()
        }
        .is_configuration());
        assert!(!StepError::failed("boom").is_configuration());
    }

    #[test]
    fn test_step_error_from_anyhow() {
        let err: StepError = anyhow::anyhow!("disk full").into();
        assert!(matches!(err, StepError::Failed { ref message } if message.contains("disk full")));
    }

    #[test]
    fn test_persistence_error_transient() {
        assert!(PersistenceError::Unavailable("down".to_string()).is_transient());
        assert!(!PersistenceError::not_found("NodeExecution", "x").is_transient());
    }

    #[test]
    fn test_planflow_error_from_serde() {
        let parse: Result<serde_json::Value, _> = serde_json::from_str("{");
        let err: PlanflowError = parse.unwrap_err().into();
        assert!(matches!(err, PlanflowError::Serialization(_)));
    }
}
