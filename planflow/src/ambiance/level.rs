//! One frame of the ambiance level stack.

use crate::core::{StepCategory, StepType};
use crate::strategy::StrategyMetadata;
use serde::{Deserialize, Serialize};

/// Whether a level belongs to a fresh run of its node or an identity replay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LevelNodeType {
    /// Fresh execution.
    #[default]
    Plan,
    /// Replay of an earlier execution.
    Identity,
}

/// A nesting level: one per node execution on the path from the root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Level {
    /// Node execution id.
    pub runtime_id: String,
    /// Plan node id.
    pub setup_id: String,
    /// Node identifier without strategy postfix.
    pub identifier: String,
    /// Step type of the node.
    pub step_type: StepType,
    /// Output group of the node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Iteration metadata when the node is a fan-out child.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_metadata: Option<StrategyMetadata>,
    /// Start time in epoch milliseconds.
    pub start_ts: i64,
    /// Number of earlier attempts of this node.
    #[serde(default)]
    pub retry_index: u32,
    /// Fresh or identity execution.
    #[serde(default)]
    pub node_type: LevelNodeType,
}

impl Level {
    /// Creates a level stamped with the current time.
    #[must_use]
    pub fn new(
        runtime_id: impl Into<String>,
        setup_id: impl Into<String>,
        identifier: impl Into<String>,
        step_type: StepType,
    ) -> Self {
        Self {
            runtime_id: runtime_id.into(),
            setup_id: setup_id.into(),
            identifier: identifier.into(),
            step_type,
            group: None,
            strategy_metadata: None,
            start_ts: chrono::Utc::now().timestamp_millis(),
            retry_index: 0,
            node_type: LevelNodeType::Plan,
        }
    }

    /// Sets the group.
    #[must_use]
    pub fn with_group(mut self, group: Option<String>) -> Self {
        self.group = group;
        self
    }

    /// Sets the iteration metadata.
    #[must_use]
    pub fn with_strategy_metadata(mut self, metadata: Option<StrategyMetadata>) -> Self {
        self.strategy_metadata = metadata;
        self
    }

    /// Sets the retry index.
    #[must_use]
    pub fn with_retry_index(mut self, retry_index: u32) -> Self {
        self.retry_index = retry_index;
        self
    }

    /// Sets the node type.
    #[must_use]
    pub fn with_node_type(mut self, node_type: LevelNodeType) -> Self {
        self.node_type = node_type;
        self
    }

    /// Returns the step category of this level.
    #[must_use]
    pub fn category(&self) -> StepCategory {
        self.step_type.category
    }

    /// Identifier postfix from the level's iteration, empty when none.
    #[must_use]
    pub fn strategy_postfix(&self, use_matrix_values: bool) -> String {
        self.strategy_metadata
            .as_ref()
            .map(|metadata| metadata.identifier_postfix(use_matrix_values))
            .unwrap_or_default()
    }

    /// Identifier with its strategy postfix.
    #[must_use]
    pub fn display_identifier(&self, use_matrix_values: bool) -> String {
        format!("{}{}", self.identifier, self.strategy_postfix(use_matrix_values))
    }
}
