//! The orchestration engine.
//!
//! [`OrchestrationEngine`] runs [`Plan`]s. Every unit of work (creating a
//! node, starting it, resuming a parent, finishing the plan) is a separate
//! task on the engine's [`WorkerPool`]; units hand work to each other only
//! through the pool and the [`WaitNotifyEngine`], never by direct calls.
//!
//! Node state changes go through `update_if_status`, so when a step
//! response, a timeout, an abort and an intervention race on one node,
//! exactly one of them moves it.
//!
//! ```ignore
//! let engine = OrchestrationEngine::builder()
//!     .step(ShellStep::default())
//!     .build()?;
//! let result = engine.run(plan).await?;
//! assert_eq!(result.status, Status::Succeeded);
//! ```

mod correlator;
mod identity;
mod normal;
mod state;
mod transitions;

#[cfg(test)]
mod integration_tests;

pub use correlator::{
    ChildResult, ChildrenCorrelator, ChildrenOutcome, CHILDREN_OUTCOME, FAILED_CHILDREN_OUTPUT,
};

use self::state::{plan_notify_id, register_root_wait, EngineCore, TriggerRequest};
use crate::adviser::InterventionAction;
use crate::ambiance::{Ambiance, RetryInfo};
use crate::config::EngineConfig;
use crate::core::{StepOutput, StepResponse};
use crate::dispatch::{AbortSignal, WorkerPool};
use crate::errors::PlanflowError;
use crate::events::{EngineEvent, EventSink, NoOpEventSink};
use crate::execution::{ExecutionKind, NodeExecution, PlanExecution};
use crate::persistence::{
    InMemoryNodeExecutionStore, InMemoryOutcomeStore, InMemoryPlanExecutionStore,
    NodeExecutionStore, OutcomeStore, PlanExecutionStore,
};
use crate::plan::{Plan, RetryPlanner, RetryRequest};
use crate::steps::{Step, StepRegistry};
use crate::waiter::{ResponseData, WaitNotifyEngine};
use dashmap::DashMap;
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// How a node execution is driven.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStrategy {
    /// Run the registered step.
    Normal,
    /// Replay an earlier execution of the node.
    Identity,
}

impl NodeStrategy {
    /// The strategy for an execution record.
    #[must_use]
    pub fn of(execution: &NodeExecution) -> Self {
        match execution.kind {
            ExecutionKind::Normal => Self::Normal,
            ExecutionKind::Identity { .. } => Self::Identity,
        }
    }
}

/// Builder for [`OrchestrationEngine`].
pub struct EngineBuilder {
    config: EngineConfig,
    registry: Option<Arc<StepRegistry>>,
    steps: Vec<Arc<dyn Step>>,
    node_executions: Option<Arc<dyn NodeExecutionStore>>,
    outcomes: Option<Arc<dyn OutcomeStore>>,
    plan_executions: Option<Arc<dyn PlanExecutionStore>>,
    events: Option<Arc<dyn EventSink>>,
}

impl EngineBuilder {
    fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            registry: None,
            steps: Vec::new(),
            node_executions: None,
            outcomes: None,
            plan_executions: None,
            events: None,
        }
    }

    /// Sets the engine config.
    #[must_use]
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Uses an existing registry instead of one with the built-in steps.
    #[must_use]
    pub fn registry(mut self, registry: Arc<StepRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Registers a step.
    #[must_use]
    pub fn step<S: Step + 'static>(mut self, step: S) -> Self {
        self.steps.push(Arc::new(step));
        self
    }

    /// Registers a step the caller keeps a handle to.
    #[must_use]
    pub fn shared_step(mut self, step: Arc<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    /// Sets the node execution store.
    #[must_use]
    pub fn node_execution_store(mut self, store: Arc<dyn NodeExecutionStore>) -> Self {
        self.node_executions = Some(store);
        self
    }

    /// Sets the outcome store.
    #[must_use]
    pub fn outcome_store(mut self, store: Arc<dyn OutcomeStore>) -> Self {
        self.outcomes = Some(store);
        self
    }

    /// Sets the plan execution store.
    #[must_use]
    pub fn plan_execution_store(mut self, store: Arc<dyn PlanExecutionStore>) -> Self {
        self.plan_executions = Some(store);
        self
    }

    /// Sets the event sink.
    #[must_use]
    pub fn event_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.events = Some(sink);
        self
    }

    /// Builds the engine.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the config is invalid.
    pub fn build(self) -> Result<OrchestrationEngine, PlanflowError> {
        self.config.validate()?;

        let registry = self.registry.unwrap_or_else(|| {
            Arc::new(StepRegistry::with_builtins(self.config.bare_strategy_fanout))
        });
        for step in self.steps {
            registry.register_arc(step);
        }
        let events: Arc<dyn EventSink> = self.events.unwrap_or_else(|| Arc::new(NoOpEventSink));
        let waiter = Arc::new(WaitNotifyEngine::with_event_sink(Arc::clone(&events)));
        let pool = WorkerPool::new(self.config.worker_pool_size);

        let core = Arc::new_cyclic(|weak| EngineCore {
            registry,
            node_executions: self
                .node_executions
                .unwrap_or_else(|| Arc::new(InMemoryNodeExecutionStore::new())),
            outcomes: self
                .outcomes
                .unwrap_or_else(|| Arc::new(InMemoryOutcomeStore::new())),
            plan_executions: self
                .plan_executions
                .unwrap_or_else(|| Arc::new(InMemoryPlanExecutionStore::new())),
            waiter,
            events,
            pool,
            plans: DashMap::new(),
            signals: DashMap::new(),
            queues: DashMap::new(),
            task_waits: DashMap::new(),
            self_ref: weak.clone(),
            config: self.config,
        });
        Ok(OrchestrationEngine { core })
    }
}

impl std::fmt::Debug for EngineBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EngineBuilder")
            .field("config", &self.config)
            .field("steps", &self.steps.len())
            .finish_non_exhaustive()
    }
}

/// Runs plans on a worker pool.
#[derive(Clone)]
pub struct OrchestrationEngine {
    core: Arc<EngineCore>,
}

impl OrchestrationEngine {
    /// Starts building an engine.
    #[must_use]
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Creates an engine with in-memory stores and the built-in steps.
    ///
    /// # Errors
    ///
    /// Returns a configuration error if the config is invalid.
    pub fn new(config: EngineConfig) -> Result<Self, PlanflowError> {
        Self::builder().config(config).build()
    }

    /// The engine config.
    #[must_use]
    pub fn config(&self) -> &EngineConfig {
        &self.core.config
    }

    /// The wait/notify engine, for delivering external responses directly.
    #[must_use]
    pub fn waiter(&self) -> &Arc<WaitNotifyEngine> {
        &self.core.waiter
    }

    /// Registers a step after construction.
    pub fn register_step<S: Step + 'static>(&self, step: S) {
        self.core.registry.register(step);
    }

    /// Starts a plan under `ambiance` and returns the plan execution id.
    ///
    /// The ambiance's plan execution id is used if set; otherwise a new
    /// one is generated.
    ///
    /// # Errors
    ///
    /// Returns a validation error for a malformed plan, or a persistence
    /// error if the plan execution cannot be recorded.
    pub async fn submit_plan(&self, plan: Plan, ambiance: Ambiance) -> Result<String, PlanflowError> {
        self.start_plan(plan, ambiance, None).await
    }

    /// Starts a plan with a fresh ambiance.
    ///
    /// # Errors
    ///
    /// See [`OrchestrationEngine::submit_plan`].
    pub async fn submit(&self, plan: Plan) -> Result<String, PlanflowError> {
        let ambiance = Ambiance::new(plan.plan_id.clone(), String::new());
        self.submit_plan(plan, ambiance).await
    }

    async fn start_plan(
        &self,
        plan: Plan,
        ambiance: Ambiance,
        retry_of: Option<String>,
    ) -> Result<String, PlanflowError> {
        plan.validate()?;
        let core = &self.core;

        let plan_execution_id = if ambiance.plan_execution_id.is_empty() {
            Uuid::now_v7().to_string()
        } else {
            ambiance.plan_execution_id.clone()
        };
        let ambiance = Ambiance {
            plan_id: plan.plan_id.clone(),
            ..ambiance.for_plan_execution(plan_execution_id.clone())
        };

        let mut record = PlanExecution::new(ambiance.clone()).with_plan(plan.clone());
        if let Some(original) = &retry_of {
            record = record.with_retry_of(original.clone());
        }
        core.plan_executions.insert(record).await?;
        core.plans
            .insert(plan_execution_id.clone(), Arc::new(plan.clone()));
        core.signals
            .insert(plan_execution_id.clone(), Arc::new(AbortSignal::new()));

        info!(
            plan_execution_id = %plan_execution_id,
            plan_id = %plan.plan_id,
            nodes = plan.nodes.len(),
            retry_of = retry_of.as_deref().unwrap_or("-"),
            "Plan execution started"
        );
        core.events
            .emit(&EngineEvent::PlanStarted {
                plan_execution_id: plan_execution_id.clone(),
                plan_id: plan.plan_id.clone(),
            })
            .await;

        let root_notify_id = Uuid::now_v7().to_string();
        register_root_wait(core, &plan_execution_id, &root_notify_id);
        core.dispatch_trigger(TriggerRequest {
            notify_id: Some(root_notify_id),
            ..TriggerRequest::new(ambiance, plan.root_node_id.clone())
        });
        Ok(plan_execution_id)
    }

    /// Waits for a plan execution to end and returns its record.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the record cannot be read, including
    /// a not-found error for an unknown id.
    pub async fn await_plan(&self, plan_execution_id: &str) -> Result<PlanExecution, PlanflowError> {
        let record = self.core.load_plan_execution(plan_execution_id).await?;
        if record.is_ended() {
            return Ok(record);
        }

        let notify_id = plan_notify_id(plan_execution_id);
        let receiver = self.core.waiter.on_notify(&notify_id);
        let record = self.core.load_plan_execution(plan_execution_id).await?;
        if record.is_ended() {
            self.core.waiter.forget(&notify_id);
            return Ok(record);
        }
        // A closed channel means the notification was dropped with the
        // plan's state; the record is authoritative either way.
        let _ = receiver.await;
        self.core.load_plan_execution(plan_execution_id).await
    }

    /// Submits a plan and waits for it to end.
    ///
    /// # Errors
    ///
    /// See [`OrchestrationEngine::submit_plan`] and
    /// [`OrchestrationEngine::await_plan`].
    pub async fn run(&self, plan: Plan) -> Result<PlanExecution, PlanflowError> {
        let plan_execution_id = self.submit(plan).await?;
        self.await_plan(&plan_execution_id).await
    }

    /// Aborts a running plan execution. Returns how many nodes were
    /// stopped.
    ///
    /// # Errors
    ///
    /// Returns an error for an unknown or ended plan execution.
    pub async fn abort(&self, plan_execution_id: &str) -> Result<usize, PlanflowError> {
        let record = self.core.load_plan_execution(plan_execution_id).await?;
        if record.is_ended() {
            return Err(PlanflowError::InvalidState(format!(
                "plan execution '{plan_execution_id}' already ended {}",
                record.status
            )));
        }
        self.core
            .abort_plan(plan_execution_id, "aborted by user", true)
            .await
    }

    /// Resolves a node waiting for intervention.
    ///
    /// # Errors
    ///
    /// Returns [`PlanflowError::InvalidState`] if the node is not waiting
    /// for intervention.
    pub async fn intervene(
        &self,
        node_execution_id: &str,
        action: InterventionAction,
    ) -> Result<(), PlanflowError> {
        self.core.intervene(node_execution_id, action).await
    }

    /// Delivers the result of an external task an async step waits on.
    ///
    /// Returns false if the callback id was already completed.
    pub fn complete_task(&self, callback_id: &str, response: StepResponse) -> bool {
        self.core
            .waiter
            .done_with(callback_id, ResponseData::Task(response))
    }

    /// Starts a retry of an ended plan execution and returns the new plan
    /// execution id.
    ///
    /// Nodes named in `request` and everything after them in their chains
    /// run again; the rest replay the original's results.
    ///
    /// # Errors
    ///
    /// Returns [`PlanflowError::RetryRejected`] if the original cannot be
    /// retried or the request names unknown nodes.
    pub async fn retry_plan(
        &self,
        original_plan_execution_id: &str,
        request: &RetryRequest,
    ) -> Result<String, PlanflowError> {
        let original = self
            .core
            .load_plan_execution(original_plan_execution_id)
            .await?;
        RetryPlanner::validate_retry(&original)?;
        let plan = original.plan.clone().ok_or_else(|| {
            PlanflowError::RetryRejected(format!(
                "plan execution '{original_plan_execution_id}' did not record its plan"
            ))
        })?;
        let executions = self
            .core
            .list_plan_executions(original_plan_execution_id)
            .await?;
        let retry_plan = RetryPlanner::transform_plan(&plan, &executions, request)?;

        let root_execution_id = original
            .ambiance
            .retry_info
            .as_ref()
            .map_or_else(|| original.plan_execution_id.clone(), |info| info.root_execution_id.clone());
        let ambiance = Ambiance::new(retry_plan.plan_id.clone(), String::new())
            .with_retry_info(RetryInfo {
                root_execution_id,
                parent_retry_id: original.plan_execution_id.clone(),
            });
        let ambiance = Ambiance {
            setup_abstractions: original.ambiance.setup_abstractions.clone(),
            ..ambiance
        };
        self.start_plan(retry_plan, ambiance, Some(original.plan_execution_id))
            .await
    }

    /// A node execution record.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown id.
    pub async fn node_execution(&self, node_execution_id: &str) -> Result<NodeExecution, PlanflowError> {
        self.core.load(node_execution_id).await
    }

    /// Every node execution of a plan execution, retried ones included.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store fails.
    pub async fn node_executions(&self, plan_execution_id: &str) -> Result<Vec<NodeExecution>, PlanflowError> {
        self.core.list_plan_executions(plan_execution_id).await
    }

    /// A plan execution record.
    ///
    /// # Errors
    ///
    /// Returns a not-found error for an unknown id.
    pub async fn plan_execution(&self, plan_execution_id: &str) -> Result<PlanExecution, PlanflowError> {
        self.core.load_plan_execution(plan_execution_id).await
    }

    /// Outputs recorded by a node execution.
    ///
    /// # Errors
    ///
    /// Returns a persistence error if the store fails.
    pub async fn outputs_of(&self, node_execution_id: &str) -> Result<Vec<StepOutput>, PlanflowError> {
        Ok(self
            .core
            .list_outputs(node_execution_id)
            .await?
            .iter()
            .map(crate::persistence::OutcomeRecord::to_output)
            .collect())
    }

    /// Waits until no unit of work is queued or running.
    pub async fn wait_idle(&self) {
        self.core.pool.wait_idle().await;
    }
}

impl std::fmt::Debug for OrchestrationEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OrchestrationEngine")
            .field("config", &self.core.config)
            .field("plans", &self.core.plans.len())
            .field("in_flight", &self.core.pool.in_flight())
            .finish()
    }
}
