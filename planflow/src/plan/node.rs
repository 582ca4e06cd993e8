//! Plan nodes.

use crate::adviser::AdviserConfig;
use crate::core::{StepCategory, StepType};
use crate::strategy::StrategyConfig;
use serde::{Deserialize, Serialize};

/// Param key naming the single child of `STRATEGY` and `SECTION` nodes.
pub const CHILD_NODE_ID_PARAM: &str = "child_node_id";
/// Param key listing the children of `FORK` nodes.
pub const CHILDREN_PARAM: &str = "children";

/// Whether a node runs fresh or replays an earlier execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    /// Fresh execution.
    #[default]
    Plan,
    /// Replay of a completed node execution.
    Identity {
        /// The node execution being replayed.
        original_node_execution_id: String,
    },
}

/// A vertex of a compiled plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Node {
    /// Unique node id.
    pub uuid: String,
    /// Human identifier.
    pub identifier: String,
    /// Display name.
    #[serde(default)]
    pub name: String,
    /// Step type tag.
    pub step_type: StepType,
    /// Output group, used to scope outputs to this node's subtree.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Fresh or identity.
    #[serde(default)]
    pub kind: NodeKind,
    /// Fan-out strategy.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy: Option<StrategyConfig>,
    /// Step parameters.
    #[serde(default)]
    pub params: serde_json::Value,
    /// Adviser settings.
    #[serde(default)]
    pub adviser: AdviserConfig,
    /// Leaf timeout in milliseconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
}

impl Node {
    /// Creates a node. The identifier doubles as the display name.
    #[must_use]
    pub fn new(uuid: impl Into<String>, identifier: impl Into<String>, step_type: StepType) -> Self {
        let identifier = identifier.into();
        Self {
            uuid: uuid.into(),
            name: identifier.clone(),
            identifier,
            step_type,
            group: None,
            kind: NodeKind::Plan,
            strategy: None,
            params: serde_json::Value::Null,
            adviser: AdviserConfig::default(),
            timeout_ms: None,
        }
    }

    /// Sets the display name.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Sets the output group.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }

    /// Sets the strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: StrategyConfig) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Sets the params.
    #[must_use]
    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.params = params;
        self
    }

    /// Sets the adviser config.
    #[must_use]
    pub fn with_adviser(mut self, adviser: AdviserConfig) -> Self {
        self.adviser = adviser;
        self
    }

    /// Sets the next sibling.
    #[must_use]
    pub fn with_next(mut self, next_node_id: impl Into<String>) -> Self {
        self.adviser.next_node_id = Some(next_node_id.into());
        self
    }

    /// Sets the timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    /// Marks the node as a replay of `original_node_execution_id`.
    #[must_use]
    pub fn into_identity(mut self, original_node_execution_id: impl Into<String>) -> Self {
        self.kind = NodeKind::Identity {
            original_node_execution_id: original_node_execution_id.into(),
        };
        self
    }

    /// Returns the structural category.
    #[must_use]
    pub fn category(&self) -> StepCategory {
        self.step_type.category
    }

    /// The child named by the `child_node_id` param.
    #[must_use]
    pub fn child_node_id(&self) -> Option<&str> {
        self.params.get(CHILD_NODE_ID_PARAM).and_then(serde_json::Value::as_str)
    }

    /// The children listed in the `children` param.
    #[must_use]
    pub fn children_ids(&self) -> Vec<&str> {
        self.params
            .get(CHILDREN_PARAM)
            .and_then(serde_json::Value::as_array)
            .map(|items| items.iter().filter_map(serde_json::Value::as_str).collect())
            .unwrap_or_default()
    }

    /// Every node id this node references: its children and next sibling.
    #[must_use]
    pub fn referenced_node_ids(&self) -> Vec<&str> {
        let mut ids = self.children_ids();
        ids.extend(self.child_node_id());
        ids.extend(self.adviser.next_node_id.as_deref());
        ids
    }
}
