//! Identity node execution: replay a node of an earlier plan execution.
//!
//! A replayed leaf never runs its step. It copies the original's status,
//! failure message and outputs, so anything resolving those outputs in the
//! new execution sees the same values. Nodes that should run again are
//! created as normal executions by the retry request instead. A replayed parent runs its step
//! again to fan out, and its children are matched against the original's
//! children when they are created.

use super::state::EngineCore;
use crate::core::{Status, StepResponse};
use crate::errors::PlanflowError;
use crate::execution::NodeExecution;
use crate::plan::Node;
use std::sync::Arc;
use tracing::debug;

impl EngineCore {
    pub(crate) async fn run_identity(
        self: &Arc<Self>,
        execution: NodeExecution,
        node: Arc<Node>,
    ) -> Result<(), PlanflowError> {
        let Some(original_id) = execution.kind.original_node_execution_id().map(str::to_string) else {
            return self.run_step(execution, node).await;
        };

        let original = match self.load(&original_id).await {
            Ok(original) => original,
            Err(PlanflowError::Persistence(err)) if !err.is_transient() => {
                let message = format!("original node execution '{original_id}' is unavailable: {err}");
                return self.fail_configuration(execution, message).await;
            }
            Err(err) => return Err(err),
        };

        if original.status == Status::Skipped {
            debug!(node_execution_id = %execution.uuid, original = %original_id, "Replaying skipped node");
            return self
                .process_step_response(execution, StepResponse::skipped("skipped in the original execution"), None)
                .await;
        }

        if original.is_parent() {
            debug!(node_execution_id = %execution.uuid, original = %original_id, "Replaying parent; fanning out again");
            return self.run_step(execution, node).await;
        }
        let outputs = self
            .list_outputs(&original_id)
            .await?
            .iter()
            .map(|record| record.to_output())
            .collect();
        debug!(
            node_execution_id = %execution.uuid,
            original = %original_id,
            status = %original.status,
            "Replaying leaf"
        );
        let response = StepResponse {
            status: original.status,
            outputs,
            failure_message: original.failure_info.map(|failure| failure.message),
        };
        self.process_step_response(execution, response, None).await
    }
}
