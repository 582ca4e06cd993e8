//! Runtime records: node executions and plan executions.

mod node_execution;
mod plan_execution;

pub use node_execution::{ExecutionKind, NodeExecution, NodeExecutionUpdate};
pub use plan_execution::PlanExecution;
