//! What a step's `execute` asks the engine to do next.

use crate::core::{ExecutionMode, StepResponse};
use crate::strategy::{ExpandedChild, StrategyMetadata};
use serde::{Deserialize, Serialize};

/// One child to dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChildSpec {
    /// Plan node to run.
    pub child_node_id: String,
    /// Iteration metadata, for strategy fan-outs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_metadata: Option<StrategyMetadata>,
}

impl ChildSpec {
    /// A child without iteration metadata.
    #[must_use]
    pub fn new(child_node_id: impl Into<String>) -> Self {
        Self {
            child_node_id: child_node_id.into(),
            strategy_metadata: None,
        }
    }
}

impl From<ExpandedChild> for ChildSpec {
    fn from(child: ExpandedChild) -> Self {
        Self {
            child_node_id: child.child_node_id,
            strategy_metadata: Some(child.strategy_metadata),
        }
    }
}

/// Children to fan out to.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChildrenExecutable {
    /// Children in dispatch order.
    pub children: Vec<ChildSpec>,
    /// How many may run at once.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<usize>,
}

/// External work the node waits on.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AsyncExecutable {
    /// Ids under which task completions will be delivered.
    pub callback_ids: Vec<String>,
    /// Handle of the external task, for reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_handle: Option<String>,
}

/// Result of [`super::Step::execute`].
#[derive(Debug, Clone, PartialEq)]
pub enum Executable {
    /// Finished inline.
    Sync(StepResponse),
    /// Suspended on external tasks.
    Async(AsyncExecutable),
    /// Runs one child.
    Child(ChildSpec),
    /// Fans out to several children.
    Children(ChildrenExecutable),
}

impl Executable {
    /// The execution mode this result puts the node in.
    #[must_use]
    pub fn mode(&self) -> ExecutionMode {
        match self {
            Self::Sync(_) => ExecutionMode::Sync,
            Self::Async(_) => ExecutionMode::Async,
            Self::Child(_) => ExecutionMode::Child,
            Self::Children(_) => ExecutionMode::Children,
        }
    }
}
