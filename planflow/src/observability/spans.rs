//! Spans wrapping engine work units.

use crate::execution::NodeExecution;
use tracing::Span;

/// Span for work on a single node execution.
#[must_use]
pub fn node_span(execution: &NodeExecution) -> Span {
    tracing::info_span!(
        "node",
        plan_execution_id = %execution.plan_execution_id,
        node_execution_id = %execution.uuid,
        node_id = %execution.node_id,
        identifier = %execution.identifier,
        step_type = %execution.step_type.name,
    )
}

/// Span for plan-level work.
#[must_use]
pub fn plan_span(plan_execution_id: &str) -> Span {
    tracing::info_span!("plan", plan_execution_id = %plan_execution_id)
}
