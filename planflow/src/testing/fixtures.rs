//! Plan fixtures for engine tests.

use std::future::Future;
use std::time::Duration;

use serde_json::json;

use crate::core::{StepCategory, StepType};
use crate::errors::PlanValidationError;
use crate::plan::{Node, Plan, PlanBuilder, CHILDREN_PARAM, CHILD_NODE_ID_PARAM};
use crate::steps::{FORK, SECTION, STRATEGY};
use crate::strategy::StrategyConfig;

/// A leaf node whose id doubles as its identifier.
#[must_use]
pub fn leaf(id: &str, step_type: &str) -> Node {
    Node::new(id, id, StepType::step(step_type))
}

/// A `STRATEGY` node fanning out to `child` with `strategy`.
#[must_use]
pub fn strategy_node(id: &str, child: &str, strategy: StrategyConfig) -> Node {
    Node::new(id, id, StepType::new(STRATEGY, StepCategory::Strategy))
        .with_params(json!({ CHILD_NODE_ID_PARAM: child }))
        .with_strategy(strategy)
}

/// A `FORK` node running `children` in parallel.
#[must_use]
pub fn fork_node(id: &str, children: &[&str]) -> Node {
    Node::new(id, id, StepType::new(FORK, StepCategory::Fork)).with_params(json!({ CHILDREN_PARAM: children }))
}

/// A `SECTION` node running the chain starting at `child`.
#[must_use]
pub fn section_node(id: &str, child: &str) -> Node {
    Node::new(id, id, StepType::new(SECTION, StepCategory::Section))
        .with_params(json!({ CHILD_NODE_ID_PARAM: child }))
}

/// Builds plans for tests.
#[derive(Debug, Clone)]
pub struct PlanFixture {
    plan_id: String,
    root: Option<String>,
    nodes: Vec<Node>,
}

impl PlanFixture {
    /// Creates an empty fixture.
    #[must_use]
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            root: None,
            nodes: Vec::new(),
        }
    }

    /// Sets the root. Defaults to the first node added.
    #[must_use]
    pub fn root(mut self, node_id: impl Into<String>) -> Self {
        self.root = Some(node_id.into());
        self
    }

    /// Adds a node.
    #[must_use]
    pub fn node(mut self, node: Node) -> Self {
        self.nodes.push(node);
        self
    }

    /// A section running `ids` as a chain of `step_type` leaves.
    #[must_use]
    pub fn chain(plan_id: impl Into<String>, step_type: &str, ids: &[&str]) -> Self {
        let mut fixture = Self::new(plan_id).node(section_node("root", ids.first().copied().unwrap_or("root")));
        for (index, id) in ids.iter().enumerate() {
            let mut node = leaf(id, step_type);
            if let Some(next) = ids.get(index + 1) {
                node = node.with_next(*next);
            }
            fixture = fixture.node(node);
        }
        fixture
    }

    /// Builds and validates the plan.
    ///
    /// # Errors
    ///
    /// Returns the validation error of a malformed plan.
    pub fn try_build(self) -> Result<Plan, PlanValidationError> {
        let root = self
            .root
            .or_else(|| self.nodes.first().map(|node| node.uuid.clone()))
            .unwrap_or_default();
        PlanBuilder::new(self.plan_id).root(root).nodes(self.nodes)?.build()
    }

    /// Builds the plan, panicking if it is malformed.
    ///
    /// # Panics
    ///
    /// Panics on an invalid plan.
    #[must_use]
    pub fn build(self) -> Plan {
        match self.try_build() {
            Ok(plan) => plan,
            Err(err) => panic!("invalid test plan: {err}"),
        }
    }
}

/// Polls `check` every 5ms until it returns true or `timeout` passes.
/// Returns the last result.
pub async fn eventually<F, Fut>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check().await {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
