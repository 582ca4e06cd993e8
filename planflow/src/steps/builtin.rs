//! Structural steps every engine knows.

use super::{ChildSpec, ChildrenExecutable, Executable, Step, StepContext};
use crate::errors::{StepError, StrategyConfigError};
use crate::strategy::{fetch_bare_children, fetch_children};
use async_trait::async_trait;

/// Step type of fan-out nodes driven by a strategy.
pub const STRATEGY: &str = "STRATEGY";
/// Step type of nodes running a fixed list of children in parallel.
pub const FORK: &str = "FORK";
/// Step type of nodes running a single child chain.
pub const SECTION: &str = "SECTION";

/// Expands the node's strategy and fans out to the resulting iterations.
///
/// A node without a strategy spawns `bare_fanout` copies of its child.
#[derive(Debug, Clone, Copy)]
pub struct StrategyStep {
    bare_fanout: usize,
}

impl StrategyStep {
    /// Creates the step.
    #[must_use]
    pub fn new(bare_fanout: usize) -> Self {
        Self {
            bare_fanout: bare_fanout.max(1),
        }
    }
}

#[async_trait]
impl Step for StrategyStep {
    fn step_type(&self) -> &str {
        STRATEGY
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Executable, StepError> {
        let node = &ctx.node;
        let child_node_id = node.child_node_id().ok_or_else(|| {
            StrategyConfigError::MissingChild {
                node_id: node.uuid.clone(),
            }
        })?;

        let (children, max_concurrency) = match &node.strategy {
            Some(strategy) => (
                fetch_children(strategy, child_node_id)?,
                strategy.max_concurrency(),
            ),
            None => (fetch_bare_children(child_node_id, self.bare_fanout), None),
        };

        Ok(Executable::Children(ChildrenExecutable {
            children: children.into_iter().map(ChildSpec::from).collect(),
            max_concurrency,
        }))
    }
}

/// Runs every child listed in the node's `children` param in parallel.
#[derive(Debug, Clone, Copy, Default)]
pub struct ForkStep;

#[async_trait]
impl Step for ForkStep {
    fn step_type(&self) -> &str {
        FORK
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Executable, StepError> {
        Ok(Executable::Children(ChildrenExecutable {
            children: ctx.node.children_ids().into_iter().map(ChildSpec::new).collect(),
            max_concurrency: None,
        }))
    }
}

/// Runs the chain starting at the node's `child_node_id`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SectionStep;

#[async_trait]
impl Step for SectionStep {
    fn step_type(&self) -> &str {
        SECTION
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Executable, StepError> {
        let child = ctx.node.child_node_id().ok_or_else(|| {
            StepError::Configuration(format!(
                "section '{}' has no child_node_id param",
                ctx.node.identifier
            ))
        })?;
        Ok(Executable::Child(ChildSpec::new(child)))
    }
}
