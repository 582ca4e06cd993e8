//! Runtime record of one node instantiation.

use crate::adviser::AdviserResponse;
use crate::ambiance::Ambiance;
use crate::core::{ExecutionMode, FailureInfo, Status, StepType};
use crate::strategy::StrategyMetadata;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which node execution strategy drives a node execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionKind {
    /// Fresh execution of the step.
    #[default]
    Normal,
    /// Replay of an earlier node execution.
    Identity {
        /// The node execution being replayed.
        original_node_execution_id: String,
    },
}

impl ExecutionKind {
    /// The replayed execution id, for identity executions.
    #[must_use]
    pub fn original_node_execution_id(&self) -> Option<&str> {
        match self {
            Self::Normal => None,
            Self::Identity {
                original_node_execution_id,
            } => Some(original_node_execution_id),
        }
    }
}

/// The mutable runtime record of a node within one plan execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeExecution {
    /// Node execution id; also the runtime id of its ambiance level.
    pub uuid: String,
    /// Plan execution this record belongs to.
    pub plan_execution_id: String,
    /// Plan node id.
    pub node_id: String,
    /// Identifier including the strategy postfix.
    pub identifier: String,
    /// Step type of the node.
    pub step_type: StepType,
    /// Ambiance including this node's own level.
    pub ambiance: Ambiance,
    /// Current status.
    pub status: Status,
    /// How the step produced its result, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<ExecutionMode>,
    /// Normal or identity.
    #[serde(default)]
    pub kind: ExecutionKind,
    /// Parent node execution.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Correlation id the node's result is published to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notify_id: Option<String>,
    /// Previous node of a sequential chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_id: Option<String>,
    /// Adviser decision, once terminal.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adviser_response: Option<AdviserResponse>,
    /// Failure details for failed outcomes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    /// Earlier attempts of this node, oldest first.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retry_ids: Vec<String>,
    /// True once a newer attempt has replaced this one.
    #[serde(default)]
    pub old_retry: bool,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Start time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// End time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl NodeExecution {
    /// Iteration metadata of this execution's level.
    #[must_use]
    pub fn strategy_metadata(&self) -> Option<&StrategyMetadata> {
        self.ambiance
            .current_level()
            .and_then(|level| level.strategy_metadata.as_ref())
    }

    /// True if the node spawned children.
    #[must_use]
    pub fn is_parent(&self) -> bool {
        self.mode.is_some_and(|mode| mode.is_parent())
    }

    /// Number of retries made before this attempt.
    #[must_use]
    pub fn retry_count(&self) -> u32 {
        u32::try_from(self.retry_ids.len()).unwrap_or(u32::MAX)
    }

    /// Ambiance of the parent: this node's ambiance without its own level.
    #[must_use]
    pub fn parent_ambiance(&self) -> Ambiance {
        self.ambiance.clone_for_finish()
    }
}

/// A partial update of a node execution. Only set fields are written.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NodeExecutionUpdate {
    /// New status.
    pub status: Option<Status>,
    /// New mode.
    pub mode: Option<ExecutionMode>,
    /// New adviser response.
    pub adviser_response: Option<AdviserResponse>,
    /// New failure info.
    pub failure_info: Option<FailureInfo>,
    /// New old-retry flag.
    pub old_retry: Option<bool>,
    /// New start time.
    pub started_at: Option<DateTime<Utc>>,
    /// New end time.
    pub ended_at: Option<DateTime<Utc>>,
}

impl NodeExecutionUpdate {
    /// Creates an empty update.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the status.
    #[must_use]
    pub fn status(mut self, status: Status) -> Self {
        self.status = Some(status);
        self
    }

    /// Sets the mode.
    #[must_use]
    pub fn mode(mut self, mode: ExecutionMode) -> Self {
        self.mode = Some(mode);
        self
    }

    /// Sets the adviser response.
    #[must_use]
    pub fn adviser_response(mut self, response: AdviserResponse) -> Self {
        self.adviser_response = Some(response);
        self
    }

    /// Sets the failure info.
    #[must_use]
    pub fn failure_info(mut self, failure: Option<FailureInfo>) -> Self {
        self.failure_info = failure;
        self
    }

    /// Flags the execution as replaced by a newer attempt.
    #[must_use]
    pub fn old_retry(mut self) -> Self {
        self.old_retry = Some(true);
        self
    }

    /// Stamps the start time.
    #[must_use]
    pub fn started_now(mut self) -> Self {
        self.started_at = Some(Utc::now());
        self
    }

    /// Stamps the end time.
    #[must_use]
    pub fn ended_now(mut self) -> Self {
        self.ended_at = Some(Utc::now());
        self
    }

    /// Applies the set fields to `execution`.
    pub fn apply(self, execution: &mut NodeExecution) {
        if let Some(status) = self.status {
            execution.status = status;
        }
        if let Some(mode) = self.mode {
            execution.mode = Some(mode);
        }
        if let Some(response) = self.adviser_response {
            execution.adviser_response = Some(response);
        }
        if let Some(failure) = self.failure_info {
            execution.failure_info = Some(failure);
        }
        if let Some(old_retry) = self.old_retry {
            execution.old_retry = old_retry;
        }
        if let Some(started_at) = self.started_at {
            execution.started_at = Some(started_at);
        }
        if let Some(ended_at) = self.ended_at {
            execution.ended_at = Some(ended_at);
        }
    }
}
