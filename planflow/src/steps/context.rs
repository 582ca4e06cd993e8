//! What a step sees while it runs.

use crate::ambiance::Ambiance;
use crate::core::OutputKind;
use crate::dispatch::AbortSignal;
use crate::errors::PlanflowError;
use crate::persistence::OutcomeStore;
use crate::plan::Node;
use crate::strategy::StrategyMetadata;
use std::sync::Arc;

/// Execution context handed to [`super::Step`] methods.
#[derive(Clone)]
pub struct StepContext {
    /// Ambiance of the running node; its last level is the node itself.
    pub ambiance: Ambiance,
    /// Plan node being executed.
    pub node: Arc<Node>,
    /// Node execution id.
    pub node_execution_id: String,
    /// Retries made before this attempt.
    pub attempt: u32,
    abort: Arc<AbortSignal>,
    outcomes: Arc<dyn OutcomeStore>,
}

impl StepContext {
    /// Creates a context.
    #[must_use]
    pub fn new(
        ambiance: Ambiance,
        node: Arc<Node>,
        node_execution_id: impl Into<String>,
        outcomes: Arc<dyn OutcomeStore>,
    ) -> Self {
        Self {
            ambiance,
            node,
            node_execution_id: node_execution_id.into(),
            attempt: 0,
            abort: Arc::new(AbortSignal::new()),
            outcomes,
        }
    }

    /// Shares the plan's abort signal.
    #[must_use]
    pub fn with_abort_signal(mut self, abort: Arc<AbortSignal>) -> Self {
        self.abort = abort;
        self
    }

    /// Sets the retry attempt.
    #[must_use]
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Node params.
    #[must_use]
    pub fn params(&self) -> &serde_json::Value {
        &self.node.params
    }

    /// Iteration metadata of this node, if it is a strategy child.
    #[must_use]
    pub fn strategy_metadata(&self) -> Option<&StrategyMetadata> {
        self.ambiance
            .current_level()
            .and_then(|level| level.strategy_metadata.as_ref())
    }

    /// The plan's abort signal.
    #[must_use]
    pub fn abort_signal(&self) -> &Arc<AbortSignal> {
        &self.abort
    }

    /// True once the plan was aborted.
    #[must_use]
    pub fn is_aborted(&self) -> bool {
        self.abort.is_aborted()
    }

    /// The nearest visible outcome named `name`.
    pub async fn resolve_outcome(&self, name: &str) -> Result<Option<serde_json::Value>, PlanflowError> {
        self.resolve(OutputKind::Outcome, name).await
    }

    /// The nearest visible sweeping output named `name`.
    pub async fn resolve_sweeping_output(
        &self,
        name: &str,
    ) -> Result<Option<serde_json::Value>, PlanflowError> {
        self.resolve(OutputKind::SweepingOutput, name).await
    }

    async fn resolve(&self, kind: OutputKind, name: &str) -> Result<Option<serde_json::Value>, PlanflowError> {
        let record = self
            .outcomes
            .resolve(
                &self.ambiance.plan_execution_id,
                &self.ambiance.runtime_path(),
                kind,
                name,
            )
            .await?;
        Ok(record.map(|record| record.value))
    }
}

impl std::fmt::Debug for StepContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StepContext")
            .field("node_execution_id", &self.node_execution_id)
            .field("node_id", &self.node.uuid)
            .field("attempt", &self.attempt)
            .field("aborted", &self.is_aborted())
            .finish_non_exhaustive()
    }
}
