//! Retry-from-failure planning.
//!
//! A retry run re-uses the plan of a failed run. Its root becomes an
//! identity node pointing at the original root execution; at runtime every
//! child of an identity parent is matched against the original parent's
//! children and either replayed or re-executed. Nodes listed for a forced
//! rerun, and everything chained after them, always execute fresh.

use super::Plan;
use crate::core::{StepCategory, Status};
use crate::errors::PlanflowError;
use crate::execution::{NodeExecution, PlanExecution};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Which parts of a failed run to execute fresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct RetryRequest {
    /// Identifiers of nodes to rerun even if they succeeded.
    #[serde(default)]
    pub identifiers: Vec<String>,
    /// Keep only the listed stages whose original execution failed.
    #[serde(default)]
    pub only_failed: bool,
}

impl RetryRequest {
    /// Retries every failed part and replays everything that succeeded.
    #[must_use]
    pub fn failed_only() -> Self {
        Self::default()
    }

    /// Reruns the given nodes and everything chained after them.
    #[must_use]
    pub fn from_identifiers<I, S>(identifiers: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            identifiers: identifiers.into_iter().map(Into::into).collect(),
            only_failed: false,
        }
    }

    /// Restricts the listed identifiers to failed stages.
    #[must_use]
    pub fn only_failed(mut self) -> Self {
        self.only_failed = true;
        self
    }
}

/// Derives retry plans from failed runs.
#[derive(Debug, Clone, Copy, Default)]
pub struct RetryPlanner;

impl RetryPlanner {
    /// Statuses a retry can recover from.
    #[must_use]
    pub fn is_failed_status(status: Status) -> bool {
        status.is_failed()
    }

    /// Rejects retries of runs that are still active or did not fail.
    pub fn validate_retry(original: &PlanExecution) -> Result<(), PlanflowError> {
        if !original.is_ended() {
            return Err(PlanflowError::RetryRejected(format!(
                "plan execution '{}' is still {}",
                original.plan_execution_id, original.status
            )));
        }
        if !Self::is_failed_status(original.status) {
            return Err(PlanflowError::RetryRejected(format!(
                "plan execution '{}' ended {}; only failed runs can be retried",
                original.plan_execution_id, original.status
            )));
        }
        Ok(())
    }

    /// Keeps the identifiers of stages whose latest execution failed.
    pub fn fetch_only_failed_stages(
        executions: &[NodeExecution],
        identifiers: &[String],
    ) -> Result<Vec<String>, PlanflowError> {
        let mut failed = Vec::new();
        for identifier in identifiers {
            let latest = executions
                .iter()
                .filter(|ne| {
                    !ne.old_retry
                        && ne.step_type.category == StepCategory::Stage
                        && &ne.identifier == identifier
                })
                .max_by_key(|ne| ne.created_at)
                .ok_or_else(|| {
                    PlanflowError::RetryRejected(format!("no stage execution named '{identifier}'"))
                })?;
            if Self::is_failed_status(latest.status) {
                failed.push(identifier.clone());
            }
        }

        if failed.is_empty() {
            return Err(PlanflowError::RetryRejected(
                "none of the selected stages failed".to_string(),
            ));
        }
        Ok(failed)
    }

    /// Builds the plan of a retry run.
    pub fn transform_plan(
        plan: &Plan,
        executions: &[NodeExecution],
        request: &RetryRequest,
    ) -> Result<Plan, PlanflowError> {
        let identifiers = if request.only_failed && !request.identifiers.is_empty() {
            Self::fetch_only_failed_stages(executions, &request.identifiers)?
        } else {
            request.identifiers.clone()
        };

        let mut rerun = BTreeSet::new();
        for identifier in &identifiers {
            let node = plan
                .nodes
                .values()
                .find(|node| &node.identifier == identifier)
                .ok_or_else(|| {
                    PlanflowError::RetryRejected(format!("plan has no node named '{identifier}'"))
                })?;

            let mut cursor = Some(node);
            while let Some(current) = cursor {
                if !rerun.insert(current.uuid.clone()) {
                    break;
                }
                cursor = current
                    .adviser
                    .next_node_id
                    .as_deref()
                    .and_then(|next| plan.node(next));
            }
        }

        let root_execution = executions
            .iter()
            .filter(|ne| ne.node_id == plan.root_node_id && ne.parent_id.is_none() && !ne.old_retry)
            .max_by_key(|ne| ne.created_at);

        let mut retry_plan = plan.clone();
        retry_plan.rerun_node_ids = rerun;
        if let Some(root_execution) = root_execution {
            if !retry_plan.rerun_node_ids.contains(&plan.root_node_id) {
                if let Some(root) = retry_plan.nodes.remove(&plan.root_node_id) {
                    let root = root.into_identity(root_execution.uuid.clone());
                    retry_plan.nodes.insert(root.uuid.clone(), root);
                }
            }
        }

        tracing::debug!(
            plan_id = %plan.plan_id,
            rerun = retry_plan.rerun_node_ids.len(),
            "Transformed plan for retry"
        );
        Ok(retry_plan)
    }
}
