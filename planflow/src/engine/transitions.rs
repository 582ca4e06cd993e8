//! Adviser-driven transitions: advance, retry, intervention, expiry and
//! plan aborts.

use super::state::{EngineCore, TriggerRequest};
use crate::adviser::{advise, AdviseInput, AdviserResponse, ChildrenSummary, InterventionAction};
use crate::core::{Status, StepResponse};
use crate::errors::PlanflowError;
use crate::events::EngineEvent;
use crate::execution::{ExecutionKind, NodeExecution, NodeExecutionUpdate};
use futures::future::{BoxFuture, FutureExt};
use futures::stream::{FuturesUnordered, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

impl EngineCore {
    /// Asks the adviser what to do with a node that produced `response`.
    pub(crate) async fn process_step_response(
        self: &Arc<Self>,
        execution: NodeExecution,
        response: StepResponse,
        children: Option<ChildrenSummary>,
    ) -> Result<(), PlanflowError> {
        let node = match self.node(&execution) {
            Ok(node) => node,
            Err(err) => return self.fail_configuration(execution, err.to_string()).await,
        };
        let mut input = AdviseInput::new(response.status, execution.retry_count());
        if let Some(summary) = children {
            input = input.with_children(summary);
        }
        let advice = advise(&input, &node.adviser);
        debug!(
            node_execution_id = %execution.uuid,
            status = %response.status,
            advice = %advice,
            "Adviser decided"
        );
        self.process_adviser_response(execution, response, advice).await
    }

    /// Misconfiguration ends the node FAILED and stops the plan.
    pub(crate) async fn fail_configuration(
        self: &Arc<Self>,
        execution: NodeExecution,
        message: String,
    ) -> Result<(), PlanflowError> {
        warn!(node_execution_id = %execution.uuid, message = %message, "Node misconfigured");
        self.process_adviser_response(execution, StepResponse::failed(message), AdviserResponse::EndPlan)
            .await
    }

    pub(crate) async fn process_adviser_response(
        self: &Arc<Self>,
        execution: NodeExecution,
        response: StepResponse,
        advice: AdviserResponse,
    ) -> Result<(), PlanflowError> {
        let StepResponse {
            status,
            outputs,
            failure_message,
        } = response;

        match advice.clone() {
            AdviserResponse::Advance { next_node_id: next } => {
                let ended = self
                    .end_node(&execution, status, advice, outputs, failure_message, next.is_none())
                    .await?;
                if let (Some(ended), Some(next)) = (ended, next) {
                    self.trigger_next(&ended, next);
                }
                Ok(())
            }
            AdviserResponse::MarkSuccess => {
                let next = self.node(&execution)?.adviser.next_node_id.clone();
                let ended = self
                    .end_node(&execution, Status::Succeeded, advice, outputs, None, next.is_none())
                    .await?;
                if let (Some(ended), Some(next)) = (ended, next) {
                    self.trigger_next(&ended, next);
                }
                Ok(())
            }
            AdviserResponse::MarkFailed => {
                let status = if status == Status::Expired {
                    Status::Expired
                } else {
                    Status::Failed
                };
                self.end_node(&execution, status, advice, outputs, failure_message, true)
                    .await?;
                Ok(())
            }
            AdviserResponse::EndPlan => {
                let status = if status.is_terminal() && status != Status::Succeeded && status != Status::Skipped {
                    status
                } else {
                    Status::Failed
                };
                let ended = self
                    .end_node(&execution, status, advice, outputs, failure_message, true)
                    .await?;
                if ended.is_some() {
                    let plan_status = if status == Status::Aborted {
                        Status::Aborted
                    } else {
                        Status::Failed
                    };
                    self.request_end_status(&execution.plan_execution_id, plan_status)
                        .await?;
                    let reason = format!("node '{}' ended the plan", execution.identifier);
                    self.abort_plan(&execution.plan_execution_id, &reason, false)
                        .await?;
                }
                Ok(())
            }
            AdviserResponse::Retry { attempt, wait_ms } => {
                self.retry_node(execution, status, failure_message, attempt, wait_ms)
                    .await
            }
            AdviserResponse::Intervene {
                timeout_ms,
                on_timeout,
            } => {
                self.await_intervention(execution, advice, timeout_ms, on_timeout)
                    .await
            }
        }
    }

    /// Triggers the next sibling of `ended` under the same parent and
    /// notify id.
    fn trigger_next(self: &Arc<Self>, ended: &NodeExecution, next_node_id: String) {
        debug!(node_execution_id = %ended.uuid, next = %next_node_id, "Advancing to next node");
        let request = TriggerRequest {
            parent_id: ended.parent_id.clone(),
            notify_id: ended.notify_id.clone(),
            previous_id: Some(ended.uuid.clone()),
            strategy_metadata: ended.strategy_metadata().cloned(),
            ..TriggerRequest::new(ended.parent_ambiance(), next_node_id)
        };
        self.dispatch_trigger(request);
    }

    /// Retires `execution` as an old retry and schedules a fresh one.
    async fn retry_node(
        self: &Arc<Self>,
        execution: NodeExecution,
        status: Status,
        failure_message: Option<String>,
        attempt: u32,
        wait_ms: u64,
    ) -> Result<(), PlanflowError> {
        let status = if status == Status::Expired {
            Status::Expired
        } else {
            Status::Failed
        };
        let advice = AdviserResponse::Retry { attempt, wait_ms };
        let failure = self.failure_info(
            &execution,
            status,
            failure_message.unwrap_or_else(|| format!("node ended {status}")),
            &advice,
        );
        let Some(retired) = self
            .update_if(
                &execution.uuid,
                &[execution.status],
                NodeExecutionUpdate::new()
                    .status(status)
                    .adviser_response(advice)
                    .failure_info(Some(failure))
                    .old_retry()
                    .ended_now(),
            )
            .await?
        else {
            debug!(node_execution_id = %execution.uuid, "Node already moved on; not retrying");
            return Ok(());
        };

        info!(
            node_execution_id = %retired.uuid,
            identifier = %retired.identifier,
            attempt,
            wait_ms,
            "Retrying node"
        );
        self.events
            .emit(&EngineEvent::NodeRetried {
                node_execution_id: retired.uuid.clone(),
                attempt,
                wait_ms,
            })
            .await;

        let mut retry_ids = retired.retry_ids.clone();
        retry_ids.push(retired.uuid.clone());
        let request = TriggerRequest {
            parent_id: retired.parent_id.clone(),
            notify_id: retired.notify_id.clone(),
            previous_id: retired.previous_id.clone(),
            strategy_metadata: retired.strategy_metadata().cloned(),
            retry_ids,
            kind: Some(ExecutionKind::Normal),
            ..TriggerRequest::new(retired.parent_ambiance(), retired.node_id.clone())
        };
        self.dispatch_trigger_after(request, Duration::from_millis(wait_ms));
        Ok(())
    }

    async fn await_intervention(
        self: &Arc<Self>,
        execution: NodeExecution,
        advice: AdviserResponse,
        timeout_ms: Option<u64>,
        on_timeout: InterventionAction,
    ) -> Result<(), PlanflowError> {
        let Some(waiting) = self
            .update_if(
                &execution.uuid,
                &[execution.status],
                NodeExecutionUpdate::new()
                    .status(Status::InterventionWaiting)
                    .adviser_response(advice),
            )
            .await?
        else {
            debug!(node_execution_id = %execution.uuid, "Node already moved on; not parking it");
            return Ok(());
        };

        info!(node_execution_id = %waiting.uuid, identifier = %waiting.identifier, "Waiting for intervention");
        self.events
            .emit(&EngineEvent::InterventionWaiting {
                node_execution_id: waiting.uuid.clone(),
                identifier: waiting.identifier.clone(),
            })
            .await;

        if let Some(timeout_ms) = timeout_ms.or(self.config.default_intervention_timeout_ms) {
            let weak = Arc::downgrade(self);
            let node_execution_id = waiting.uuid;
            self.pool.schedule_timer(Duration::from_millis(timeout_ms), move || {
                if let Some(core) = weak.upgrade() {
                    core.dispatch_intervention_timeout(node_execution_id, on_timeout);
                }
            });
        }
        Ok(())
    }

    fn dispatch_intervention_timeout(self: &Arc<Self>, node_execution_id: String, action: InterventionAction) {
        let core = Arc::clone(self);
        self.pool.submit("intervention_timeout", async move {
            match core.intervene(&node_execution_id, action).await {
                Ok(()) => {}
                Err(PlanflowError::InvalidState(_)) => {
                    debug!(node_execution_id = %node_execution_id, "Intervention already resolved");
                }
                Err(err) => core.recover(&node_execution_id, err).await,
            }
        });
    }

    /// Resolves a node parked in INTERVENTION_WAITING.
    ///
    /// Boxed because an intervention can park the node again, and the
    /// timeout of that new wait calls back in here.
    pub(crate) fn intervene<'a>(
        self: &'a Arc<Self>,
        node_execution_id: &'a str,
        action: InterventionAction,
    ) -> BoxFuture<'a, Result<(), PlanflowError>> {
        async move {
            let execution = self.load(node_execution_id).await?;
            if execution.status != Status::InterventionWaiting {
                return Err(PlanflowError::InvalidState(format!(
                    "node execution '{node_execution_id}' is {}, not INTERVENTION_WAITING",
                    execution.status
                )));
            }
            info!(node_execution_id, action = %action, "Applying intervention");
            let message = || {
                execution
                    .failure_info
                    .as_ref()
                    .map_or_else(|| "failed before intervention".to_string(), |f| f.message.clone())
            };

            match action {
                InterventionAction::Retry => {
                    let attempt = execution.retry_count() + 1;
                    let failure_message = Some(message());
                    self.retry_node(execution, Status::Failed, failure_message, attempt, 0)
                        .await
                }
                InterventionAction::MarkSuccess => {
                    self.process_adviser_response(execution, StepResponse::succeeded(), AdviserResponse::MarkSuccess)
                        .await
                }
                InterventionAction::MarkFailed => {
                    let response = StepResponse::failed(message());
                    self.process_adviser_response(execution, response, AdviserResponse::MarkFailed)
                        .await
                }
                InterventionAction::Abort => {
                    self.process_adviser_response(
                        execution,
                        StepResponse::aborted("aborted by intervention"),
                        AdviserResponse::EndPlan,
                    )
                    .await
                }
            }
        }
        .boxed()
    }

    /// Arms the timeout of a leaf node.
    pub(crate) fn schedule_expiry(self: &Arc<Self>, node_execution_id: &str, timeout_ms: u64) {
        let weak = Arc::downgrade(self);
        let node_execution_id = node_execution_id.to_string();
        self.pool.schedule_timer(Duration::from_millis(timeout_ms), move || {
            let Some(core) = weak.upgrade() else { return };
            let core_for_task = Arc::clone(&core);
            core.pool.submit("expire", async move {
                if let Err(err) = core_for_task.expire(&node_execution_id, timeout_ms).await {
                    core_for_task.recover(&node_execution_id, err).await;
                }
            });
        });
    }

    async fn expire(self: &Arc<Self>, node_execution_id: &str, timeout_ms: u64) -> Result<(), PlanflowError> {
        let execution = self.load(node_execution_id).await?;
        if execution.is_parent() || execution.status.is_terminal() {
            return Ok(());
        }
        let Some(expired) = self
            .update_if(
                node_execution_id,
                &[Status::Running, Status::AsyncWaiting],
                NodeExecutionUpdate::new().status(Status::Expired),
            )
            .await?
        else {
            return Ok(());
        };
        self.release_task_wait(node_execution_id);
        warn!(node_execution_id, timeout_ms, "Node timed out");
        let response = StepResponse {
            failure_message: Some(format!("timed out after {timeout_ms}ms")),
            ..StepResponse::from_status(Status::Expired)
        };
        self.process_step_response(expired, response, None).await
    }

    /// Aborts a single not-yet-ended node and publishes it.
    pub(crate) async fn abort_node(
        self: &Arc<Self>,
        execution: &NodeExecution,
        reason: &str,
    ) -> Result<bool, PlanflowError> {
        let advice = AdviserResponse::EndPlan;
        let failure = self.failure_info(execution, Status::Aborted, reason.to_string(), &advice);
        let Some(aborted) = self
            .update_if(
                &execution.uuid,
                &Status::ABORTABLE,
                NodeExecutionUpdate::new()
                    .status(Status::Aborted)
                    .failure_info(Some(failure.clone()))
                    .ended_now(),
            )
            .await?
        else {
            return Ok(false);
        };
        self.release_task_wait(&aborted.uuid);

        let store = &self.plan_executions;
        crate::retry::with_retry_if(
            &self.config.collaborator_retry,
            "plan_executions.append_failure",
            || store.append_failure(&aborted.plan_execution_id, failure.clone()),
            crate::errors::PersistenceError::is_transient,
        )
        .await?;
        self.events
            .emit(&EngineEvent::NodeEnded {
                plan_execution_id: aborted.plan_execution_id.clone(),
                node_execution_id: aborted.uuid.clone(),
                identifier: aborted.identifier.clone(),
                status: Status::Aborted,
                adviser_response: None,
            })
            .await;
        self.publish(&aborted);
        Ok(true)
    }

    /// Stops every running leaf of a plan execution. Parents with children
    /// in flight end as their children report back.
    ///
    /// Leaves are marked before the abort signal is raised, so a step that
    /// observes the signal never finds its node still RUNNING. A second sweep
    /// catches nodes triggered while the first one ran.
    ///
    /// Returns how many nodes were aborted.
    pub(crate) async fn abort_plan(
        self: &Arc<Self>,
        plan_execution_id: &str,
        reason: &str,
        requested_by_user: bool,
    ) -> Result<usize, PlanflowError> {
        if requested_by_user {
            self.request_end_status(plan_execution_id, Status::Aborted).await?;
        }

        let mut aborted = self.abort_leaves(plan_execution_id, reason).await?;
        if self.signal(plan_execution_id).abort(reason) {
            info!(plan_execution_id, reason, "Aborting plan execution");
        }
        aborted += self.abort_leaves(plan_execution_id, reason).await?;
        Ok(aborted)
    }

    async fn abort_leaves(self: &Arc<Self>, plan_execution_id: &str, reason: &str) -> Result<usize, PlanflowError> {
        let mut pending: FuturesUnordered<_> = self
            .list_plan_executions(plan_execution_id)
            .await?
            .into_iter()
            .filter(|execution| {
                let fanning_out = execution.is_parent() && execution.status == Status::Running;
                !execution.old_retry && !fanning_out && Status::ABORTABLE.contains(&execution.status)
            })
            .map(|execution| async move { self.abort_node(&execution, reason).await })
            .collect();

        let mut aborted = 0;
        while let Some(result) = pending.next().await {
            if result? {
                aborted += 1;
            }
        }
        Ok(aborted)
    }
}
