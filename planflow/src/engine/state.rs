//! Shared engine state, node creation, start and end.

use super::NodeStrategy;
use crate::adviser::AdviserResponse;
use crate::ambiance::{Ambiance, Level, LevelNodeType};
use crate::config::EngineConfig;
use crate::core::{FailureInfo, Status, StepOutput};
use crate::dispatch::{AbortSignal, WorkerPool};
use crate::errors::{PersistenceError, PlanflowError};
use crate::events::{EngineEvent, EventSink};
use crate::execution::{ExecutionKind, NodeExecution, NodeExecutionUpdate, PlanExecution};
use crate::observability::{node_span, plan_span};
use crate::persistence::{NodeExecutionStore, OutcomeRecord, OutcomeStore, PlanExecutionStore};
use crate::plan::{Node, NodeKind, Plan};
use crate::retry::with_retry_if;
use crate::steps::{StepContext, StepRegistry};
use crate::strategy::StrategyMetadata;
use crate::waiter::{NotifyCallback, ResponseData, StepResponseNotifyData, WaitNotifyEngine};
use chrono::Utc;
use dashmap::DashMap;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::{debug, error, info, warn, Instrument};
use uuid::Uuid;

/// Correlation id under which a plan's final status is published.
pub(crate) fn plan_notify_id(plan_execution_id: &str) -> String {
    format!("plan:{plan_execution_id}")
}

/// Everything needed to create one node execution.
#[derive(Debug, Clone)]
pub(crate) struct TriggerRequest {
    /// Ambiance of the parent; the new level is appended to it.
    pub ambiance: Ambiance,
    pub node_id: String,
    pub parent_id: Option<String>,
    pub notify_id: Option<String>,
    pub previous_id: Option<String>,
    pub strategy_metadata: Option<StrategyMetadata>,
    pub retry_ids: Vec<String>,
    /// Forces the execution kind instead of matching against a replayed
    /// parent.
    pub kind: Option<ExecutionKind>,
    pub queued: bool,
}

impl TriggerRequest {
    pub fn new(ambiance: Ambiance, node_id: impl Into<String>) -> Self {
        Self {
            ambiance,
            node_id: node_id.into(),
            parent_id: None,
            notify_id: None,
            previous_id: None,
            strategy_metadata: None,
            retry_ids: Vec::new(),
            kind: None,
            queued: false,
        }
    }
}

pub(crate) struct EngineCore {
    pub config: EngineConfig,
    pub registry: Arc<StepRegistry>,
    pub node_executions: Arc<dyn NodeExecutionStore>,
    pub outcomes: Arc<dyn OutcomeStore>,
    pub plan_executions: Arc<dyn PlanExecutionStore>,
    pub waiter: Arc<WaitNotifyEngine>,
    pub events: Arc<dyn EventSink>,
    pub pool: WorkerPool,
    pub plans: DashMap<String, Arc<Plan>>,
    pub signals: DashMap<String, Arc<AbortSignal>>,
    pub queues: DashMap<String, VecDeque<String>>,
    /// Task waits of ASYNC_WAITING nodes, by node execution id.
    pub task_waits: DashMap<String, String>,
    pub self_ref: Weak<EngineCore>,
}

impl EngineCore {
    // ---- lookups ----

    pub fn plan(&self, plan_execution_id: &str) -> Result<Arc<Plan>, PlanflowError> {
        self.plans
            .get(plan_execution_id)
            .map(|plan| Arc::clone(plan.value()))
            .ok_or_else(|| {
                PlanflowError::InvalidState(format!("unknown plan execution '{plan_execution_id}'"))
            })
    }

    pub fn node(&self, execution: &NodeExecution) -> Result<Arc<Node>, PlanflowError> {
        let plan = self.plan(&execution.plan_execution_id)?;
        plan.node(&execution.node_id).cloned().map(Arc::new).ok_or_else(|| {
            PlanflowError::Configuration(format!(
                "plan '{}' has no node '{}'",
                plan.plan_id, execution.node_id
            ))
        })
    }

    /// The abort signal of a live plan execution. An ended one gets a
    /// detached signal.
    pub fn signal(&self, plan_execution_id: &str) -> Arc<AbortSignal> {
        self.signals
            .get(plan_execution_id)
            .map_or_else(|| Arc::new(AbortSignal::new()), |signal| Arc::clone(signal.value()))
    }

    pub fn step_context(&self, execution: &NodeExecution, node: Arc<Node>) -> StepContext {
        StepContext::new(
            execution.ambiance.clone(),
            node,
            execution.uuid.clone(),
            Arc::clone(&self.outcomes),
        )
        .with_abort_signal(self.signal(&execution.plan_execution_id))
        .with_attempt(execution.retry_count())
    }

    // ---- collaborator calls, retried on transient failures ----

    pub async fn load(&self, id: &str) -> Result<NodeExecution, PlanflowError> {
        let store = &self.node_executions;
        with_retry_if(
            &self.config.collaborator_retry,
            "node_executions.get",
            || store.get(id),
            PersistenceError::is_transient,
        )
        .await
        .map_err(Into::into)
    }

    pub async fn update_if(
        &self,
        id: &str,
        from: &[Status],
        update: NodeExecutionUpdate,
    ) -> Result<Option<NodeExecution>, PlanflowError> {
        let store = &self.node_executions;
        with_retry_if(
            &self.config.collaborator_retry,
            "node_executions.update_if_status",
            || store.update_if_status(id, from, update.clone()),
            PersistenceError::is_transient,
        )
        .await
        .map_err(Into::into)
    }

    pub async fn list_children(&self, parent_id: &str) -> Result<Vec<NodeExecution>, PlanflowError> {
        let store = &self.node_executions;
        with_retry_if(
            &self.config.collaborator_retry,
            "node_executions.list_children",
            || store.list_children(parent_id),
            PersistenceError::is_transient,
        )
        .await
        .map_err(Into::into)
    }

    pub async fn list_plan_executions(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<NodeExecution>, PlanflowError> {
        let store = &self.node_executions;
        with_retry_if(
            &self.config.collaborator_retry,
            "node_executions.list_by_plan_execution",
            || store.list_by_plan_execution(plan_execution_id),
            PersistenceError::is_transient,
        )
        .await
        .map_err(Into::into)
    }

    pub async fn list_outputs(&self, producer_id: &str) -> Result<Vec<OutcomeRecord>, PlanflowError> {
        let store = &self.outcomes;
        with_retry_if(
            &self.config.collaborator_retry,
            "outcomes.list_by_producer",
            || store.list_by_producer(producer_id),
            PersistenceError::is_transient,
        )
        .await
        .map_err(Into::into)
    }

    async fn save_outputs(&self, execution: &NodeExecution, outputs: Vec<StepOutput>) -> Result<(), PlanflowError> {
        for output in outputs {
            let record = OutcomeRecord::scoped(&execution.ambiance, &execution.identifier, output);
            let store = &self.outcomes;
            let result = with_retry_if(
                &self.config.collaborator_retry,
                "outcomes.save",
                || store.save(record.clone()),
                PlanflowError::is_transient,
            )
            .await;
            match result {
                Ok(()) => {}
                Err(PlanflowError::OutputConflict(conflict)) => {
                    warn!(
                        node_execution_id = %execution.uuid,
                        output = %conflict.name,
                        "Output already recorded in this scope; keeping the first"
                    );
                }
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    async fn plan_call<T, F, Fut>(&self, key: &str, operation: F) -> Result<T, PlanflowError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, PersistenceError>>,
    {
        with_retry_if(
            &self.config.collaborator_retry,
            key,
            operation,
            PersistenceError::is_transient,
        )
        .await
        .map_err(Into::into)
    }

    pub async fn load_plan_execution(&self, id: &str) -> Result<PlanExecution, PlanflowError> {
        let store = &self.plan_executions;
        self.plan_call("plan_executions.get", || store.get(id)).await
    }

    pub async fn request_end_status(&self, id: &str, status: Status) -> Result<(), PlanflowError> {
        let store = &self.plan_executions;
        self.plan_call("plan_executions.request_end_status", || {
            store.request_end_status(id, status)
        })
        .await
    }

    // ---- dispatch: every unit of work goes through the pool ----

    pub fn dispatch_trigger(self: &Arc<Self>, request: TriggerRequest) {
        self.dispatch_trigger_after(request, Duration::ZERO);
    }

    pub fn dispatch_trigger_after(self: &Arc<Self>, request: TriggerRequest, delay: Duration) {
        let core = Arc::clone(self);
        let span = plan_span(&request.ambiance.plan_execution_id);
        self.pool.submit_after(
            "trigger",
            delay,
            async move {
                match core.create_node_execution(request.clone()).await {
                    Ok(execution) => core.dispatch_start(execution.uuid),
                    Err(err) => core.trigger_failed(&request, &err),
                }
            }
            .instrument(span),
        );
    }

    pub fn dispatch_start(self: &Arc<Self>, node_execution_id: String) {
        let core = Arc::clone(self);
        self.pool.submit("start", async move {
            if let Err(err) = core.start(&node_execution_id).await {
                core.recover(&node_execution_id, err).await;
            }
        });
    }

    /// Wait callback that hands `work` to the pool if the engine is alive.
    pub fn callback<F>(&self, work: F) -> NotifyCallback
    where
        F: FnOnce(&Arc<EngineCore>, HashMap<String, ResponseData>) + Send + 'static,
    {
        let weak = Weak::clone(&self.self_ref);
        Box::new(move |responses| {
            if let Some(core) = weak.upgrade() {
                work(&core, responses);
            } else {
                debug!("Engine dropped; ignoring resolved wait");
            }
        })
    }

    // ---- trigger ----

    /// Creates the node execution described by `request`.
    pub async fn create_node_execution(&self, request: TriggerRequest) -> Result<NodeExecution, PlanflowError> {
        let plan_execution_id = request.ambiance.plan_execution_id.clone();
        let plan = self.plan(&plan_execution_id)?;
        let node = plan.node(&request.node_id).ok_or_else(|| {
            PlanflowError::Configuration(format!(
                "plan '{}' has no node '{}'",
                plan.plan_id, request.node_id
            ))
        })?;

        let kind = match request.kind.clone() {
            Some(kind) => kind,
            None => self.resolve_kind(&plan, node, &request).await?,
        };

        let uuid = Uuid::now_v7().to_string();
        let node_type = match kind {
            ExecutionKind::Normal => LevelNodeType::Plan,
            ExecutionKind::Identity { .. } => LevelNodeType::Identity,
        };
        let level = Level::new(uuid.clone(), node.uuid.clone(), node.identifier.clone(), node.step_type.clone())
            .with_group(node.group.clone())
            .with_strategy_metadata(request.strategy_metadata.clone())
            .with_retry_index(u32::try_from(request.retry_ids.len()).unwrap_or(u32::MAX))
            .with_node_type(node_type);
        let identifier = level.display_identifier(self.config.use_matrix_values_in_identifiers);
        let ambiance = request.ambiance.clone_for_child(level);

        let execution = NodeExecution {
            uuid,
            plan_execution_id,
            node_id: node.uuid.clone(),
            identifier,
            step_type: node.step_type.clone(),
            ambiance,
            status: if request.queued {
                Status::Queued
            } else {
                Status::NotStarted
            },
            mode: None,
            kind,
            parent_id: request.parent_id,
            notify_id: request.notify_id,
            previous_id: request.previous_id,
            adviser_response: None,
            failure_info: None,
            retry_ids: request.retry_ids,
            old_retry: false,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
        };

        let store = &self.node_executions;
        with_retry_if(
            &self.config.collaborator_retry,
            "node_executions.insert",
            || store.insert(execution.clone()),
            PersistenceError::is_transient,
        )
        .await?;

        if execution.parent_id.is_none() && execution.previous_id.is_none() {
            let plan_store = &self.plan_executions;
            self.plan_call("plan_executions.set_root_node_execution", || {
                plan_store.set_root_node_execution(&execution.plan_execution_id, &execution.uuid)
            })
            .await?;
        }

        debug!(
            node_execution_id = %execution.uuid,
            node_id = %execution.node_id,
            identifier = %execution.identifier,
            status = %execution.status,
            identity = execution.kind.original_node_execution_id().is_some(),
            "Created node execution"
        );
        Ok(execution)
    }

    /// Picks the execution kind of a node that was not forced to one.
    ///
    /// Identity plan nodes replay their original. Children of a replayed
    /// parent replay the matching child of the original parent (same node,
    /// same iteration) when that child succeeded, was skipped, or fanned out
    /// itself, unless the node is marked for re-run.
    async fn resolve_kind(
        &self,
        plan: &Plan,
        node: &Node,
        request: &TriggerRequest,
    ) -> Result<ExecutionKind, PlanflowError> {
        if let NodeKind::Identity {
            original_node_execution_id,
        } = &node.kind
        {
            return Ok(ExecutionKind::Identity {
                original_node_execution_id: original_node_execution_id.clone(),
            });
        }
        if plan.rerun_node_ids.contains(&node.uuid) {
            return Ok(ExecutionKind::Normal);
        }
        let Some(parent_id) = &request.parent_id else {
            return Ok(ExecutionKind::Normal);
        };
        let parent = self.load(parent_id).await?;
        let Some(original_parent) = parent.kind.original_node_execution_id() else {
            return Ok(ExecutionKind::Normal);
        };

        let iteration = request.strategy_metadata.as_ref().map(|m| m.current_iteration);
        let original = self
            .list_children(original_parent)
            .await?
            .into_iter()
            .filter(|child| {
                child.node_id == node.uuid
                    && child.strategy_metadata().map(|m| m.current_iteration) == iteration
            })
            .max_by_key(|child| child.created_at);

        Ok(match original {
            Some(original) if original.status.is_success_like() || original.is_parent() => {
                ExecutionKind::Identity {
                    original_node_execution_id: original.uuid,
                }
            }
            _ => ExecutionKind::Normal,
        })
    }

    /// A trigger that could not create its node still owes its waiter a
    /// response.
    fn trigger_failed(self: &Arc<Self>, request: &TriggerRequest, err: &PlanflowError) {
        error!(
            node_id = %request.node_id,
            plan_execution_id = %request.ambiance.plan_execution_id,
            error = %err,
            "Failed to create node execution"
        );
        let Some(notify_id) = &request.notify_id else {
            return;
        };
        let failure = FailureInfo::new(Status::Failed, err.to_string())
            .with_adviser_decision(AdviserResponse::MarkFailed.name());
        self.waiter.done_with(
            notify_id,
            ResponseData::Step(StepResponseNotifyData {
                node_id: request.node_id.clone(),
                node_execution_id: String::new(),
                identifier: request.node_id.clone(),
                status: Status::Failed,
                adviser_response: Some(AdviserResponse::MarkFailed),
                failure_info: Some(failure),
                strategy_metadata: request.strategy_metadata.clone(),
            }),
        );
    }

    // ---- start ----

    async fn start(self: &Arc<Self>, node_execution_id: &str) -> Result<(), PlanflowError> {
        let execution = self.load(node_execution_id).await?;
        let span = node_span(&execution);
        async move {
            if self.signal(&execution.plan_execution_id).is_aborted() {
                self.abort_node(&execution, "plan aborted before start").await?;
                return Ok(());
            }

            let Some(execution) = self
                .update_if(
                    node_execution_id,
                    &[Status::NotStarted, Status::Queued],
                    NodeExecutionUpdate::new().status(Status::Running).started_now(),
                )
                .await?
            else {
                debug!(node_execution_id, "Node no longer startable");
                return Ok(());
            };

            let strategy = NodeStrategy::of(&execution);
            self.events
                .emit(&EngineEvent::NodeStarted {
                    plan_execution_id: execution.plan_execution_id.clone(),
                    node_execution_id: execution.uuid.clone(),
                    identifier: execution.identifier.clone(),
                    step_type: execution.step_type.name.clone(),
                    identity: strategy == NodeStrategy::Identity,
                })
                .await;
            debug!(strategy = ?strategy, "Started node");

            if execution.ambiance.levels.len() > self.config.max_nesting_depth {
                let message = format!(
                    "nesting depth {} exceeds the limit of {}",
                    execution.ambiance.levels.len(),
                    self.config.max_nesting_depth
                );
                return self.fail_configuration(execution, message).await;
            }

            let node = match self.node(&execution) {
                Ok(node) => node,
                Err(err) => return self.fail_configuration(execution, err.to_string()).await,
            };
            if let Some(timeout_ms) = node.timeout_ms {
                self.schedule_expiry(&execution.uuid, timeout_ms);
            }

            match strategy {
                NodeStrategy::Normal => self.run_step(execution, node).await,
                NodeStrategy::Identity => self.run_identity(execution, node).await,
            }
        }
        .instrument(span)
        .await
    }

    /// Turns an infrastructure error inside a node's work unit into a node
    /// failure handled by the adviser.
    pub async fn recover(self: &Arc<Self>, node_execution_id: &str, err: PlanflowError) {
        error!(node_execution_id, error = %err, "Node work unit failed");
        let execution = match self.load(node_execution_id).await {
            Ok(execution) => execution,
            Err(load_err) => {
                error!(node_execution_id, error = %load_err, "Cannot load node to record failure");
                return;
            }
        };
        if execution.status.is_terminal() {
            return;
        }
        let response = crate::core::StepResponse::failed(err.to_string());
        let result = if matches!(err, PlanflowError::Configuration(_)) {
            self.fail_configuration(execution.clone(), err.to_string()).await
        } else if execution.status == Status::NotStarted || execution.status == Status::Queued {
            self.end_node(&execution, Status::Failed, AdviserResponse::MarkFailed, Vec::new(), response.failure_message, true)
                .await
                .map(|_| ())
        } else {
            self.process_step_response(execution.clone(), response, None).await
        };
        if let Err(err) = result {
            error!(node_execution_id, error = %err, "Failed to record node failure; publishing directly");
            self.publish_status(&execution, Status::Failed, AdviserResponse::MarkFailed);
        }
    }

    // ---- end ----

    /// Moves `execution` from the status it was read in to `status`, saves
    /// its outputs and, if `publish`, notifies whoever waits on it.
    ///
    /// Returns `None` if another transition got there first.
    pub async fn end_node(
        self: &Arc<Self>,
        execution: &NodeExecution,
        status: Status,
        adviser_response: AdviserResponse,
        outputs: Vec<StepOutput>,
        failure_message: Option<String>,
        publish: bool,
    ) -> Result<Option<NodeExecution>, PlanflowError> {
        let failure = status.is_failed().then(|| {
            self.failure_info(
                execution,
                status,
                failure_message.unwrap_or_else(|| format!("node ended {status}")),
                &adviser_response,
            )
        });

        let Some(ended) = self
            .update_if(
                &execution.uuid,
                &[execution.status],
                NodeExecutionUpdate::new()
                    .status(status)
                    .adviser_response(adviser_response.clone())
                    .failure_info(failure.clone())
                    .ended_now(),
            )
            .await?
        else {
            debug!(node_execution_id = %execution.uuid, "Node already moved on; not ending it again");
            return Ok(None);
        };

        self.save_outputs(&ended, outputs).await?;
        if let Some(failure) = failure {
            let store = &self.plan_executions;
            self.plan_call("plan_executions.append_failure", || {
                store.append_failure(&ended.plan_execution_id, failure.clone())
            })
            .await?;
        }

        info!(
            node_execution_id = %ended.uuid,
            identifier = %ended.identifier,
            status = %status,
            adviser = %adviser_response,
            "Node ended"
        );
        self.events
            .emit(&EngineEvent::NodeEnded {
                plan_execution_id: ended.plan_execution_id.clone(),
                node_execution_id: ended.uuid.clone(),
                identifier: ended.identifier.clone(),
                status,
                adviser_response: Some(adviser_response),
            })
            .await;

        if publish {
            self.publish(&ended);
        }
        Ok(Some(ended))
    }

    pub fn failure_info(
        &self,
        execution: &NodeExecution,
        status: Status,
        message: String,
        adviser_response: &AdviserResponse,
    ) -> FailureInfo {
        FailureInfo::new(status, message)
            .with_node(
                execution.node_id.clone(),
                execution.uuid.clone(),
                execution.identifier.clone(),
            )
            .with_step_type(execution.step_type.name.clone())
            .with_adviser_decision(adviser_response.name())
    }

    /// Publishes an ended node to its notify id.
    pub fn publish(&self, execution: &NodeExecution) {
        let Some(notify_id) = &execution.notify_id else {
            return;
        };
        let data = StepResponseNotifyData {
            node_id: execution.node_id.clone(),
            node_execution_id: execution.uuid.clone(),
            identifier: execution.identifier.clone(),
            status: execution.status,
            adviser_response: execution.adviser_response.clone(),
            failure_info: execution.failure_info.clone(),
            strategy_metadata: execution.strategy_metadata().cloned(),
        };
        self.waiter.done_with(notify_id, ResponseData::Step(data));
    }

    fn publish_status(&self, execution: &NodeExecution, status: Status, adviser_response: AdviserResponse) {
        let mut snapshot = execution.clone();
        snapshot.status = status;
        snapshot.adviser_response = Some(adviser_response);
        self.publish(&snapshot);
    }

    // ---- plan completion ----

    pub fn dispatch_finish_plan(self: &Arc<Self>, plan_execution_id: String, root: Option<ResponseData>) {
        let core = Arc::clone(self);
        let span = plan_span(&plan_execution_id);
        self.pool.submit(
            "finish_plan",
            async move {
                if let Err(err) = core.finish_plan(&plan_execution_id, root).await {
                    error!(error = %err, "Failed to finish plan execution");
                }
            }
            .instrument(span),
        );
    }

    async fn finish_plan(&self, plan_execution_id: &str, root: Option<ResponseData>) -> Result<(), PlanflowError> {
        let plan_execution = self.load_plan_execution(plan_execution_id).await?;
        let root_status = root.as_ref().map_or(Status::Failed, ResponseData::status);
        let status = plan_execution.end_status_override.unwrap_or(root_status);

        let store = &self.plan_executions;
        let ended = self
            .plan_call("plan_executions.mark_ended", || store.mark_ended(plan_execution_id, status))
            .await?;
        let Some(ended) = ended else {
            warn!("Plan execution already ended");
            return Ok(());
        };

        info!(status = %ended.status, failures = ended.failures.len(), "Plan execution ended");
        self.events
            .emit(&EngineEvent::PlanEnded {
                plan_execution_id: plan_execution_id.to_string(),
                status: ended.status,
            })
            .await;
        let notify_id = plan_notify_id(plan_execution_id);
        self.waiter.done_with(
            &notify_id,
            ResponseData::Task(crate::core::StepResponse::from_status(ended.status)),
        );
        self.waiter.forget(&notify_id);
        self.release_plan(plan_execution_id);
        Ok(())
    }

    /// Drops the in-memory state of an ended plan execution. The plan
    /// itself stays on the plan execution record.
    fn release_plan(&self, plan_execution_id: &str) {
        let cancelled = self.waiter.release_scope(plan_execution_id);
        self.signals.remove(plan_execution_id);
        self.plans.remove(plan_execution_id);
        debug!(cancelled_waits = cancelled, "Released plan execution state");
    }

    /// Cancels the task wait of a node that stopped waiting without its
    /// tasks completing.
    pub fn release_task_wait(&self, node_execution_id: &str) {
        if let Some((_, wait_id)) = self.task_waits.remove(node_execution_id) {
            if self.waiter.cancel_wait(&wait_id) {
                debug!(node_execution_id, wait_id = %wait_id, "Cancelled task wait");
            }
        }
    }
}

/// Registers the wait that ends a plan once its root publishes.
pub(crate) fn register_root_wait(core: &Arc<EngineCore>, plan_execution_id: &str, root_notify_id: &str) {
    let owned_id = plan_execution_id.to_string();
    let notify_id = root_notify_id.to_string();
    core.waiter.register_scoped_wait(
        plan_execution_id,
        vec![notify_id.clone()],
        core.callback(move |core, mut responses| {
            core.dispatch_finish_plan(owned_id, responses.remove(&notify_id));
        }),
    );
}
