//! Compiled execution plans.
//!
//! A [`Plan`] is an immutable graph of [`Node`]s handed to the engine.
//! Edges are the children a node names in its params and the
//! `next_node_id` of its adviser config; repetition is expressed with
//! strategies, never with cycles. [`PlanBuilder`] assembles and validates
//! plans; [`RetryPlanner`] derives the plan of a retry-from-failure run.

mod builder;
mod node;
mod retry;

pub use builder::PlanBuilder;
pub use node::{Node, NodeKind, CHILDREN_PARAM, CHILD_NODE_ID_PARAM};
pub use retry::{RetryPlanner, RetryRequest};

use crate::errors::{CycleDetectedError, ErrorInfo, PlanValidationError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::LazyLock;

static IDENTIFIER: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z_][0-9a-zA-Z_$-]{0,127}$").ok());

/// An immutable execution plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
    /// Plan id.
    pub plan_id: String,
    /// Entry node.
    pub root_node_id: String,
    /// Nodes by id.
    pub nodes: BTreeMap<String, Node>,
    /// Nodes a retry run must execute fresh even if their original
    /// execution succeeded.
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub rerun_node_ids: BTreeSet<String>,
    /// Graph layout summary for reporting.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub layout: Option<serde_json::Value>,
}

impl Plan {
    /// Looks up a node.
    #[must_use]
    pub fn node(&self, node_id: &str) -> Option<&Node> {
        self.nodes.get(node_id)
    }

    /// The root node.
    #[must_use]
    pub fn root(&self) -> Option<&Node> {
        self.node(&self.root_node_id)
    }

    /// Number of nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Checks structural invariants: root present, references resolve,
    /// identifiers well formed, strategies valid and no cycles.
    pub fn validate(&self) -> Result<(), PlanValidationError> {
        if self.root().is_none() {
            return Err(PlanValidationError::new(format!(
                "Root node '{}' is not part of the plan",
                self.root_node_id
            ))
            .with_nodes(vec![self.root_node_id.clone()])
            .with_error_info(
                ErrorInfo::new("PLAN-001-MISSING_ROOT", "Plan root node is missing")
                    .with_fix_hint("Add the root node or point root_node_id at an existing node."),
            ));
        }

        for (id, node) in &self.nodes {
            if id != &node.uuid {
                return Err(PlanValidationError::new(format!(
                    "Node stored under '{id}' declares uuid '{}'",
                    node.uuid
                ))
                .with_nodes(vec![id.clone()]));
            }

            if !is_valid_identifier(&node.identifier) {
                return Err(PlanValidationError::new(format!(
                    "Node '{id}' has invalid identifier '{}'",
                    node.identifier
                ))
                .with_nodes(vec![id.clone()])
                .with_error_info(
                    ErrorInfo::new("PLAN-003-IDENTIFIER", "Identifier is not well formed")
                        .with_fix_hint("Use letters, digits, '_', '-' or '$', starting with a letter or '_'."),
                ));
            }

            for referenced in node.referenced_node_ids() {
                if !self.nodes.contains_key(referenced) {
                    return Err(PlanValidationError::new(format!(
                        "Node '{id}' references missing node '{referenced}'"
                    ))
                    .with_nodes(vec![id.clone(), referenced.to_string()])
                    .with_error_info(
                        ErrorInfo::new("PLAN-002-MISSING_NODE", "Referenced node does not exist")
                            .with_context_entry("node", id.clone())
                            .with_context_entry("missing", referenced),
                    ));
                }
            }

            if let Some(strategy) = &node.strategy {
                strategy.validate().map_err(|err| {
                    PlanValidationError::new(format!("Node '{id}': {err}"))
                        .with_nodes(vec![id.clone()])
                        .with_error_info(err.error_info())
                })?;
            }
        }

        self.detect_cycles()?;
        Ok(())
    }

    fn detect_cycles(&self) -> Result<(), CycleDetectedError> {
        let mut visited = HashSet::new();
        let mut on_path = HashSet::new();
        let mut path = Vec::new();

        for id in self.nodes.keys() {
            if !visited.contains(id.as_str()) {
                if let Some(cycle) = self.dfs_cycle(id, &mut visited, &mut on_path, &mut path) {
                    return Err(CycleDetectedError::new(cycle));
                }
            }
        }
        Ok(())
    }

    fn dfs_cycle<'a>(
        &'a self,
        id: &'a str,
        visited: &mut HashSet<&'a str>,
        on_path: &mut HashSet<&'a str>,
        path: &mut Vec<&'a str>,
    ) -> Option<Vec<String>> {
        visited.insert(id);
        on_path.insert(id);
        path.push(id);

        if let Some(node) = self.node(id) {
            for next in node.referenced_node_ids() {
                if on_path.contains(next) {
                    let start = path.iter().position(|n| *n == next).unwrap_or(0);
                    let mut cycle: Vec<String> = path[start..].iter().map(ToString::to_string).collect();
                    cycle.push(next.to_string());
                    return Some(cycle);
                }
                if !visited.contains(next) {
                    if let Some(cycle) = self.dfs_cycle(next, visited, on_path, path) {
                        return Some(cycle);
                    }
                }
            }
        }

        path.pop();
        on_path.remove(id);
        None
    }
}

fn is_valid_identifier(identifier: &str) -> bool {
    IDENTIFIER
        .as_ref()
        .map_or(!identifier.is_empty(), |re| re.is_match(identifier))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{StepCategory, StepType};
    use crate::strategy::{MatrixConfig, StrategyConfig};
    use serde_json::json;

    fn leaf(id: &str) -> Node {
        Node::new(id, id, StepType::step("SHELL"))
    }

    fn plan(root: &str, nodes: Vec<Node>) -> Plan {
        Plan {
            plan_id: "p".to_string(),
            root_node_id: root.to_string(),
            nodes: nodes.into_iter().map(|n| (n.uuid.clone(), n)).collect(),
            rerun_node_ids: BTreeSet::new(),
            layout: None,
        }
    }

    #[test]
    fn test_valid_plan() {
        let fork = Node::new("root", "root", StepType::new("FORK", StepCategory::Fork))
            .with_params(json!({"children": ["a", "b"]}));
        let plan = plan("root", vec![fork, leaf("a").with_next("c"), leaf("b"), leaf("c")]);
        assert!(plan.validate().is_ok());
        assert_eq!(plan.node_count(), 4);
    }

    #[test]
    fn test_missing_root() {
        let err = plan("nope", vec![leaf("a")]).validate().unwrap_err();
        assert_eq!(err.code(), Some("PLAN-001-MISSING_ROOT"));
    }

    #[test]
    fn test_missing_reference() {
        let err = plan("a", vec![leaf("a").with_next("ghost")]).validate().unwrap_err();
        assert_eq!(err.code(), Some("PLAN-002-MISSING_NODE"));
        assert!(err.nodes.contains(&"ghost".to_string()));
    }

    #[test]
    fn test_invalid_identifier() {
        let node = Node::new("a", "1bad name", StepType::step("SHELL"));
        let err = plan("a", vec![node]).validate().unwrap_err();
        assert_eq!(err.code(), Some("PLAN-003-IDENTIFIER"));
    }

    #[test]
    fn test_cycle_detected() {
        let err = plan("a", vec![leaf("a").with_next("b"), leaf("b").with_next("a")])
            .validate()
            .unwrap_err();
        assert_eq!(err.code(), Some("PLAN-004-CYCLE"));
        assert_eq!(err.nodes.first(), err.nodes.last());
    }

    #[test]
    fn test_invalid_strategy() {
        let node = leaf("a").with_strategy(StrategyConfig::Matrix(MatrixConfig::new()));
        let err = plan("a", vec![node]).validate().unwrap_err();
        assert_eq!(err.code(), Some("STRATEGY-001-NO_AXES"));
    }
}
