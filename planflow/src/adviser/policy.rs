//! Per-node adviser configuration.

use crate::retry::RetryConfig;
use serde::{Deserialize, Serialize};
use std::fmt;

/// What to do when a node fails or expires.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum FailurePolicy {
    /// End the node FAILED and let the parent decide.
    #[default]
    MarkFailed,
    /// Treat the failure as success and continue.
    Ignore,
    /// End the whole plan with this node's status.
    EndPlan,
    /// Park the node until someone intervenes.
    ManualIntervention {
        /// Wait limit before `on_timeout` is applied.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        /// Action applied when the wait times out.
        #[serde(default = "default_timeout_action")]
        on_timeout: InterventionAction,
    },
    /// Re-run the node with backoff.
    Retry {
        /// Retries allowed after the first attempt.
        max_retries: u32,
        /// Wait schedule between attempts.
        #[serde(default = "RetryConfig::immediate")]
        backoff: RetryConfig,
        /// Policy once retries are exhausted. A nested retry counts as
        /// `mark_failed`.
        #[serde(default)]
        after_retries: Box<FailurePolicy>,
    },
}

fn default_timeout_action() -> InterventionAction {
    InterventionAction::MarkFailed
}

impl FailurePolicy {
    /// Creates a retry policy that fails after `max_retries` retries.
    #[must_use]
    pub fn retry(max_retries: u32, backoff: RetryConfig) -> Self {
        Self::Retry {
            max_retries,
            backoff,
            after_retries: Box::new(Self::MarkFailed),
        }
    }

    /// Creates a manual intervention policy.
    #[must_use]
    pub fn manual_intervention(timeout_ms: Option<u64>, on_timeout: InterventionAction) -> Self {
        Self::ManualIntervention {
            timeout_ms,
            on_timeout,
        }
    }
}

/// How a parent treats failed children.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ChildrenFailureMode {
    /// Any failed child fails the parent.
    #[default]
    FailFast,
    /// The parent fails only if every child failed.
    AllFailed,
    /// Failed children are recorded but the parent succeeds.
    BestEffort,
}

/// A decision applied to a node waiting on intervention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterventionAction {
    /// Run the node again.
    Retry,
    /// End the node SUCCEEDED.
    MarkSuccess,
    /// End the node FAILED.
    MarkFailed,
    /// End the node ABORTED and abort the plan.
    Abort,
}

impl fmt::Display for InterventionAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Retry => write!(f, "retry"),
            Self::MarkSuccess => write!(f, "mark_success"),
            Self::MarkFailed => write!(f, "mark_failed"),
            Self::Abort => write!(f, "abort"),
        }
    }
}

/// Adviser settings of a plan node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdviserConfig {
    /// Sibling to run after this node succeeds.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_node_id: Option<String>,
    /// Failure handling.
    pub on_failure: FailurePolicy,
    /// Failed-children handling for fan-out nodes.
    pub children_failure_mode: ChildrenFailureMode,
}

impl AdviserConfig {
    /// Creates a default adviser config.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the next node.
    #[must_use]
    pub fn with_next(mut self, next_node_id: impl Into<String>) -> Self {
        self.next_node_id = Some(next_node_id.into());
        self
    }

    /// Sets the failure policy.
    #[must_use]
    pub fn with_on_failure(mut self, policy: FailurePolicy) -> Self {
        self.on_failure = policy;
        self
    }

    /// Sets the children failure mode.
    #[must_use]
    pub fn with_children_failure_mode(mut self, mode: ChildrenFailureMode) -> Self {
        self.children_failure_mode = mode;
        self
    }
}
