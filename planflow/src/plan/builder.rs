//! Plan builder.

use super::{Node, Plan};
use crate::errors::{ErrorInfo, PlanValidationError};
use std::collections::{BTreeMap, BTreeSet};

/// Assembles a [`Plan`] node by node and validates it on build.
#[derive(Debug, Clone)]
pub struct PlanBuilder {
    plan_id: String,
    root_node_id: Option<String>,
    nodes: BTreeMap<String, Node>,
    layout: Option<serde_json::Value>,
}

impl PlanBuilder {
    /// Creates a builder for `plan_id`.
    #[must_use]
    pub fn new(plan_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            root_node_id: None,
            nodes: BTreeMap::new(),
            layout: None,
        }
    }

    /// Sets the root node.
    #[must_use]
    pub fn root(mut self, node_id: impl Into<String>) -> Self {
        self.root_node_id = Some(node_id.into());
        self
    }

    /// Sets the layout summary.
    #[must_use]
    pub fn layout(mut self, layout: serde_json::Value) -> Self {
        self.layout = Some(layout);
        self
    }

    /// Adds a node. Fails if its id is already taken.
    pub fn node(mut self, node: Node) -> Result<Self, PlanValidationError> {
        if self.nodes.contains_key(&node.uuid) {
            return Err(PlanValidationError::new(format!(
                "Node '{}' is defined more than once",
                node.uuid
            ))
            .with_nodes(vec![node.uuid.clone()])
            .with_error_info(ErrorInfo::new(
                "PLAN-005-DUPLICATE_NODE",
                "Node ids must be unique within a plan",
            )));
        }
        self.nodes.insert(node.uuid.clone(), node);
        Ok(self)
    }

    /// Adds several nodes.
    pub fn nodes<I>(self, nodes: I) -> Result<Self, PlanValidationError>
    where
        I: IntoIterator<Item = Node>,
    {
        nodes.into_iter().try_fold(self, Self::node)
    }

    /// Builds and validates the plan.
    pub fn build(self) -> Result<Plan, PlanValidationError> {
        let root_node_id = self.root_node_id.ok_or_else(|| {
            PlanValidationError::new("Plan has no root node").with_error_info(
                ErrorInfo::new("PLAN-001-MISSING_ROOT", "Plan root node is missing")
                    .with_fix_hint("Call PlanBuilder::root before build."),
            )
        })?;

        let plan = Plan {
            plan_id: self.plan_id,
            root_node_id,
            nodes: self.nodes,
            rerun_node_ids: BTreeSet::new(),
            layout: self.layout,
        };
        plan.validate()?;
        Ok(plan)
    }
}
