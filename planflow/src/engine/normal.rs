//! Normal node execution: run the step, then wait on its tasks or children.

use super::correlator::ChildrenCorrelator;
use super::state::{EngineCore, TriggerRequest};
use crate::core::{ExecutionMode, Status, StepResponse};
use crate::errors::{PlanflowError, StepError};
use crate::events::EngineEvent;
use crate::execution::{NodeExecution, NodeExecutionUpdate};
use crate::plan::Node;
use crate::steps::{AsyncExecutable, ChildSpec, Executable};
use crate::waiter::ResponseData;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

impl EngineCore {
    /// Invokes the registered step for a running node and routes its
    /// result.
    pub(crate) async fn run_step(
        self: &Arc<Self>,
        execution: NodeExecution,
        node: Arc<Node>,
    ) -> Result<(), PlanflowError> {
        let Some(step) = self.registry.get(&node.step_type.name) else {
            let message = format!("no step registered for type '{}'", node.step_type.name);
            return self.fail_configuration(execution, message).await;
        };

        let ctx = self.step_context(&execution, node);
        let result = match step.validate_access(&ctx).await {
            Ok(()) => step.execute(&ctx).await,
            Err(err) => Err(err),
        };

        match result {
            Ok(Executable::Sync(response)) => self.process_step_response(execution, response, None).await,
            Ok(Executable::Async(task)) => self.suspend_async(execution, task).await,
            Ok(Executable::Child(child)) => {
                self.dispatch_children(execution, ExecutionMode::Child, vec![child], None)
                    .await
            }
            Ok(Executable::Children(children)) => {
                self.dispatch_children(
                    execution,
                    ExecutionMode::Children,
                    children.children,
                    children.max_concurrency,
                )
                .await
            }
            Err(err) if err.is_configuration() => self.fail_configuration(execution, err.to_string()).await,
            Err(err) => {
                debug!(node_execution_id = %execution.uuid, error = %err, "Step failed");
                let message = match err {
                    StepError::Failed { message } => message,
                    other => other.to_string(),
                };
                self.process_step_response(execution, StepResponse::failed(message), None)
                    .await
            }
        }
    }

    async fn suspend_async(
        self: &Arc<Self>,
        execution: NodeExecution,
        task: AsyncExecutable,
    ) -> Result<(), PlanflowError> {
        let Some(waiting) = self
            .update_if(
                &execution.uuid,
                &[Status::Running],
                NodeExecutionUpdate::new()
                    .status(Status::AsyncWaiting)
                    .mode(ExecutionMode::Async),
            )
            .await?
        else {
            debug!(node_execution_id = %execution.uuid, "Node left RUNNING before suspending");
            return Ok(());
        };

        debug!(
            node_execution_id = %waiting.uuid,
            callbacks = task.callback_ids.len(),
            task_handle = task.task_handle.as_deref().unwrap_or("-"),
            "Waiting on async tasks"
        );
        let node_execution_id = waiting.uuid.clone();
        let wait_id = self.waiter.register_scoped_wait(
            &waiting.plan_execution_id,
            task.callback_ids,
            self.callback(move |core, responses| core.dispatch_resume_async(node_execution_id, responses)),
        );
        self.task_waits.insert(waiting.uuid.clone(), wait_id.clone());
        if !self.waiter.is_pending(&wait_id) {
            self.task_waits.remove(&waiting.uuid);
        }
        Ok(())
    }

    fn dispatch_resume_async(self: &Arc<Self>, node_execution_id: String, responses: HashMap<String, ResponseData>) {
        self.task_waits.remove(&node_execution_id);
        let core = Arc::clone(self);
        self.pool.submit("resume_async", async move {
            if let Err(err) = core.resume_async(&node_execution_id, responses).await {
                core.recover(&node_execution_id, err).await;
            }
        });
    }

    async fn resume_async(
        self: &Arc<Self>,
        node_execution_id: &str,
        responses: HashMap<String, ResponseData>,
    ) -> Result<(), PlanflowError> {
        let Some(execution) = self
            .update_if(
                node_execution_id,
                &[Status::AsyncWaiting],
                NodeExecutionUpdate::new().status(Status::Running),
            )
            .await?
        else {
            warn!(node_execution_id, "Async response for a node that stopped waiting");
            self.events
                .emit(&EngineEvent::CorrelationDropped {
                    correlation_id: node_execution_id.to_string(),
                    reason: "node is no longer waiting on tasks".to_string(),
                })
                .await;
            return Ok(());
        };

        let node = self.node(&execution)?;
        let Some(step) = self.registry.get(&node.step_type.name) else {
            let message = format!("no step registered for type '{}'", node.step_type.name);
            return self.fail_configuration(execution, message).await;
        };
        let ctx = self.step_context(&execution, node);
        let response = match step.handle_async_response(&ctx, responses).await {
            Ok(response) => response,
            Err(err) => StepResponse::failed(err.to_string()),
        };
        self.process_step_response(execution, response, None).await
    }

    /// Fans out to `children`, starting at most `limit` at once; the rest
    /// are created QUEUED and started as running ones finish.
    async fn dispatch_children(
        self: &Arc<Self>,
        execution: NodeExecution,
        mode: ExecutionMode,
        children: Vec<ChildSpec>,
        limit: Option<usize>,
    ) -> Result<(), PlanflowError> {
        let Some(parent) = self
            .update_if(&execution.uuid, &[Status::Running], NodeExecutionUpdate::new().mode(mode))
            .await?
        else {
            debug!(node_execution_id = %execution.uuid, "Node left RUNNING before fanning out");
            return Ok(());
        };

        let parent_id = parent.uuid.clone();
        if children.is_empty() {
            debug!(node_execution_id = %parent_id, "No children to run");
            self.dispatch_resume_children(parent_id, HashMap::new());
            return Ok(());
        }

        let notify_ids: Vec<String> = children.iter().map(|_| Uuid::now_v7().to_string()).collect();
        let requests: Vec<TriggerRequest> = children
            .into_iter()
            .zip(&notify_ids)
            .map(|(child, notify_id)| TriggerRequest {
                parent_id: Some(parent_id.clone()),
                notify_id: Some(notify_id.clone()),
                strategy_metadata: child.strategy_metadata,
                ..TriggerRequest::new(parent.ambiance.clone(), child.child_node_id)
            })
            .collect();

        let limit = limit.unwrap_or(requests.len()).max(1);
        debug!(
            node_execution_id = %parent_id,
            children = requests.len(),
            max_concurrency = limit,
            "Fanning out"
        );

        {
            let resume_parent = parent_id.clone();
            self.waiter.register_scoped_wait(
                &parent.plan_execution_id,
                notify_ids.clone(),
                self.callback(move |core, responses| core.dispatch_resume_children(resume_parent, responses)),
            );
        }

        let mut requests = requests.into_iter();
        let running: Vec<TriggerRequest> = requests.by_ref().take(limit).collect();
        let overflow: Vec<TriggerRequest> = requests.collect();

        if !overflow.is_empty() {
            let mut queue = VecDeque::with_capacity(overflow.len());
            for request in overflow {
                let queued = self
                    .create_node_execution(TriggerRequest {
                        queued: true,
                        ..request
                    })
                    .await?;
                queue.push_back(queued.uuid);
            }
            self.queues.insert(parent_id.clone(), queue);

            for notify_id in &notify_ids {
                let release_parent = parent_id.clone();
                self.waiter.register_scoped_wait(
                    &parent.plan_execution_id,
                    vec![notify_id.clone()],
                    self.callback(move |core, _| core.start_next_queued(&release_parent)),
                );
            }
        }

        for request in running {
            self.dispatch_trigger(request);
        }
        Ok(())
    }

    /// Starts the next QUEUED child of `parent_id`, if any.
    fn start_next_queued(self: &Arc<Self>, parent_id: &str) {
        let next = self
            .queues
            .get_mut(parent_id)
            .and_then(|mut queue| queue.pop_front());
        if let Some(node_execution_id) = next {
            debug!(parent_id, node_execution_id = %node_execution_id, "Releasing queued child");
            self.dispatch_start(node_execution_id);
        }
    }

    fn dispatch_resume_children(self: &Arc<Self>, parent_id: String, responses: HashMap<String, ResponseData>) {
        let core = Arc::clone(self);
        self.pool.submit("resume_children", async move {
            if let Err(err) = core.resume_children(&parent_id, responses).await {
                core.recover(&parent_id, err).await;
            }
        });
    }

    async fn resume_children(
        self: &Arc<Self>,
        parent_id: &str,
        responses: HashMap<String, ResponseData>,
    ) -> Result<(), PlanflowError> {
        self.queues.remove(parent_id);
        let parent = self.load(parent_id).await?;
        if parent.status != Status::Running {
            warn!(
                node_execution_id = parent_id,
                status = %parent.status,
                "Children finished for a parent that is not RUNNING"
            );
            self.events
                .emit(&EngineEvent::CorrelationDropped {
                    correlation_id: parent_id.to_string(),
                    reason: format!("parent is {}", parent.status),
                })
                .await;
            return Ok(());
        }

        let outcome = ChildrenCorrelator::merge(&responses);
        self.events
            .emit(&EngineEvent::ChildrenResumed {
                node_execution_id: parent.uuid.clone(),
                children: outcome.children.len(),
                status: outcome.status,
            })
            .await;

        let node = self.node(&parent)?;
        let response = match self.registry.get(&node.step_type.name) {
            Some(step) => {
                let ctx = self.step_context(&parent, node);
                match step.handle_children_response(&ctx, &outcome).await {
                    Ok(response) => response,
                    Err(err) => StepResponse::failed(err.to_string()),
                }
            }
            None => outcome.to_response(),
        };
        self.process_step_response(parent, response, Some(outcome.summary))
            .await
    }
}
