//! Persistence collaborators.
//!
//! The engine reads and writes node executions, plan executions and
//! outputs through these traits. Calls are wrapped in
//! [`crate::retry::with_retry_if`] so transient store failures are retried
//! before they surface. In-memory implementations back tests and
//! single-process deployments.

mod memory;
mod outcome;

pub use memory::{InMemoryNodeExecutionStore, InMemoryOutcomeStore, InMemoryPlanExecutionStore};
pub use outcome::OutcomeRecord;

use crate::core::{FailureInfo, OutputKind, Status};
use crate::errors::{PersistenceError, PlanflowError};
use crate::execution::{NodeExecution, NodeExecutionUpdate, PlanExecution};
use async_trait::async_trait;

/// Storage of node executions.
#[async_trait]
pub trait NodeExecutionStore: Send + Sync {
    /// Inserts a new record.
    async fn insert(&self, execution: NodeExecution) -> Result<(), PersistenceError>;

    /// Loads a record by id.
    async fn get(&self, id: &str) -> Result<NodeExecution, PersistenceError>;

    /// Applies a partial update and returns the updated record.
    async fn update(
        &self,
        id: &str,
        update: NodeExecutionUpdate,
    ) -> Result<NodeExecution, PersistenceError>;

    /// Applies a partial update only if the current status is in `from`.
    /// Returns `None` when the status did not match.
    async fn update_if_status(
        &self,
        id: &str,
        from: &[Status],
        update: NodeExecutionUpdate,
    ) -> Result<Option<NodeExecution>, PersistenceError>;

    /// Children of a parent in creation order, excluding replaced attempts.
    async fn list_children(&self, parent_id: &str) -> Result<Vec<NodeExecution>, PersistenceError>;

    /// Every record of a plan execution in creation order.
    async fn list_by_plan_execution(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<NodeExecution>, PersistenceError>;
}

/// Storage of outcomes and sweeping outputs.
#[async_trait]
pub trait OutcomeStore: Send + Sync {
    /// Saves a record. Fails with an output conflict if the slot is taken.
    async fn save(&self, record: OutcomeRecord) -> Result<(), PlanflowError>;

    /// Records produced by a node execution, in save order.
    async fn list_by_producer(&self, producer_id: &str) -> Result<Vec<OutcomeRecord>, PersistenceError>;

    /// The nearest record named `name` visible from `runtime_path`.
    async fn resolve(
        &self,
        plan_execution_id: &str,
        runtime_path: &[String],
        kind: OutputKind,
        name: &str,
    ) -> Result<Option<OutcomeRecord>, PersistenceError>;
}

/// Storage of plan executions.
#[async_trait]
pub trait PlanExecutionStore: Send + Sync {
    /// Inserts a new record.
    async fn insert(&self, execution: PlanExecution) -> Result<(), PersistenceError>;

    /// Loads a record by id.
    async fn get(&self, id: &str) -> Result<PlanExecution, PersistenceError>;

    /// Records the root node execution.
    async fn set_root_node_execution(&self, id: &str, node_execution_id: &str) -> Result<(), PersistenceError>;

    /// Appends a failure to the run's failure trail.
    async fn append_failure(&self, id: &str, failure: FailureInfo) -> Result<(), PersistenceError>;

    /// Forces the final status. The first request wins.
    async fn request_end_status(&self, id: &str, status: Status) -> Result<(), PersistenceError>;

    /// Ends the run. Returns `None` if it had already ended.
    async fn mark_ended(&self, id: &str, status: Status) -> Result<Option<PlanExecution>, PersistenceError>;
}
