//! Failure records surfaced on node and plan executions.

use super::Status;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A failure attributed to one node execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FailureInfo {
    /// Failure message.
    pub message: String,
    /// Terminal status of the failing node.
    pub status: Status,
    /// Plan node id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,
    /// Node execution id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_execution_id: Option<String>,
    /// Identifier with strategy postfix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub identifier: Option<String>,
    /// Step type name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_type: Option<String>,
    /// Name of the adviser decision applied to the failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adviser_decision: Option<String>,
    /// When the failure was recorded.
    pub timestamp: DateTime<Utc>,
}

impl FailureInfo {
    /// Creates a failure record.
    #[must_use]
    pub fn new(status: Status, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            status,
            node_id: None,
            node_execution_id: None,
            identifier: None,
            step_type: None,
            adviser_decision: None,
            timestamp: Utc::now(),
        }
    }

    /// Attributes the failure to a node execution.
    #[must_use]
    pub fn with_node(
        mut self,
        node_id: impl Into<String>,
        node_execution_id: impl Into<String>,
        identifier: impl Into<String>,
    ) -> Self {
        self.node_id = Some(node_id.into());
        self.node_execution_id = Some(node_execution_id.into());
        self.identifier = Some(identifier.into());
        self
    }

    /// Sets the step type.
    #[must_use]
    pub fn with_step_type(mut self, step_type: impl Into<String>) -> Self {
        self.step_type = Some(step_type.into());
        self
    }

    /// Sets the adviser decision.
    #[must_use]
    pub fn with_adviser_decision(mut self, decision: impl Into<String>) -> Self {
        self.adviser_decision = Some(decision.into());
        self
    }
}
