//! Mock steps and stores for testing.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::core::{Status, StepResponse};
use crate::errors::{PersistenceError, StepError};
use crate::execution::{NodeExecution, NodeExecutionUpdate};
use crate::persistence::NodeExecutionStore;
use crate::steps::{AsyncExecutable, Executable, Step, StepContext};

/// One recorded invocation of a mock step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedInvocation {
    /// Node execution the step ran for.
    pub node_execution_id: String,
    /// Plan node identifier.
    pub identifier: String,
    /// Iteration of the enclosing strategy, if any.
    pub iteration: Option<usize>,
    /// Retry attempt.
    pub attempt: u32,
}

impl RecordedInvocation {
    fn from_context(ctx: &StepContext) -> Self {
        Self {
            node_execution_id: ctx.node_execution_id.clone(),
            identifier: ctx.node.identifier.clone(),
            iteration: ctx.strategy_metadata().map(|m| m.current_iteration),
            attempt: ctx.attempt,
        }
    }
}

/// A step that records each call and returns a configurable response.
#[derive(Debug)]
pub struct RecordingStep {
    step_type: String,
    response: Mutex<StepResponse>,
    invocations: Mutex<Vec<RecordedInvocation>>,
}

impl RecordingStep {
    /// Creates a step that succeeds.
    #[must_use]
    pub fn new(step_type: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            response: Mutex::new(StepResponse::succeeded()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Sets the response to return.
    #[must_use]
    pub fn with_response(self, response: StepResponse) -> Self {
        *self.response.lock() = response;
        self
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.invocations.lock().len()
    }

    /// Returns every recorded call in order.
    #[must_use]
    pub fn invocations(&self) -> Vec<RecordedInvocation> {
        self.invocations.lock().clone()
    }
}

#[async_trait]
impl Step for RecordingStep {
    fn step_type(&self) -> &str {
        &self.step_type
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Executable, StepError> {
        self.invocations.lock().push(RecordedInvocation::from_context(ctx));
        Ok(Executable::Sync(self.response.lock().clone()))
    }
}

/// A step that fails a number of times, then succeeds.
#[derive(Debug)]
pub struct FailingStep {
    step_type: String,
    error: String,
    failures: u32,
    calls: AtomicU32,
}

impl FailingStep {
    /// Creates a step that always fails.
    #[must_use]
    pub fn new(step_type: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            error: error.into(),
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        }
    }

    /// Fails only the first `failures` calls.
    #[must_use]
    pub fn failing_times(mut self, failures: u32) -> Self {
        self.failures = failures;
        self
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for FailingStep {
    fn step_type(&self) -> &str {
        &self.step_type
    }

    async fn execute(&self, _ctx: &StepContext) -> Result<Executable, StepError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.failures {
            return Err(StepError::failed(self.error.clone()));
        }
        Ok(Executable::Sync(StepResponse::succeeded()))
    }
}

/// A step that suspends on one external task per call.
///
/// The callback id is `"<node_execution_id>:task"`; complete it with
/// [`crate::engine::OrchestrationEngine::complete_task`].
#[derive(Debug)]
pub struct AsyncTaskStep {
    step_type: String,
    callback_ids: Mutex<Vec<String>>,
}

impl AsyncTaskStep {
    /// Creates the step.
    #[must_use]
    pub fn new(step_type: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            callback_ids: Mutex::new(Vec::new()),
        }
    }

    /// Callback ids handed out so far.
    #[must_use]
    pub fn callback_ids(&self) -> Vec<String> {
        self.callback_ids.lock().clone()
    }
}

#[async_trait]
impl Step for AsyncTaskStep {
    fn step_type(&self) -> &str {
        &self.step_type
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Executable, StepError> {
        let callback_id = format!("{}:task", ctx.node_execution_id);
        self.callback_ids.lock().push(callback_id.clone());
        Ok(Executable::Async(AsyncExecutable {
            callback_ids: vec![callback_id],
            task_handle: Some(format!("task-{}", ctx.node.identifier)),
        }))
    }
}

/// A step that sleeps, returning ABORTED early if the plan is aborted.
#[derive(Debug)]
pub struct SlowStep {
    step_type: String,
    delay: Duration,
    running: AtomicUsize,
    max_running: AtomicUsize,
}

impl SlowStep {
    /// Creates a slow step.
    #[must_use]
    pub fn new(step_type: impl Into<String>, delay: Duration) -> Self {
        Self {
            step_type: step_type.into(),
            delay,
            running: AtomicUsize::new(0),
            max_running: AtomicUsize::new(0),
        }
    }

    /// Creates a slow step with the delay in milliseconds.
    #[must_use]
    pub fn with_delay_ms(step_type: impl Into<String>, ms: u64) -> Self {
        Self::new(step_type, Duration::from_millis(ms))
    }

    /// Highest number of calls seen running at once.
    #[must_use]
    pub fn max_running(&self) -> usize {
        self.max_running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Step for SlowStep {
    fn step_type(&self) -> &str {
        &self.step_type
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Executable, StepError> {
        let now = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_running.fetch_max(now, Ordering::SeqCst);

        let response = tokio::select! {
            () = tokio::time::sleep(self.delay) => StepResponse::succeeded(),
            () = ctx.abort_signal().aborted() => StepResponse::aborted("plan aborted"),
        };

        self.running.fetch_sub(1, Ordering::SeqCst);
        Ok(Executable::Sync(response))
    }
}

/// A step that publishes the outcomes listed in its `outcomes` param and
/// records the values of the outcomes named in its `reads` param.
#[derive(Debug)]
pub struct OutcomeStep {
    step_type: String,
    calls: AtomicUsize,
    reads: Mutex<Vec<(String, Option<serde_json::Value>)>>,
}

impl OutcomeStep {
    /// Creates the step.
    #[must_use]
    pub fn new(step_type: impl Into<String>) -> Self {
        Self {
            step_type: step_type.into(),
            calls: AtomicUsize::new(0),
            reads: Mutex::new(Vec::new()),
        }
    }

    /// Returns the number of calls.
    #[must_use]
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Outcome reads in call order, as `(name, value)`.
    #[must_use]
    pub fn reads(&self) -> Vec<(String, Option<serde_json::Value>)> {
        self.reads.lock().clone()
    }
}

#[async_trait]
impl Step for OutcomeStep {
    fn step_type(&self) -> &str {
        &self.step_type
    }

    async fn execute(&self, ctx: &StepContext) -> Result<Executable, StepError> {
        self.calls.fetch_add(1, Ordering::SeqCst);

        let names: Vec<String> = ctx
            .params()
            .get("reads")
            .and_then(serde_json::Value::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(serde_json::Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        for name in names {
            let value = ctx
                .resolve_outcome(&name)
                .await
                .map_err(|err| StepError::failed(err.to_string()))?;
            self.reads.lock().push((name, value));
        }

        let mut response = StepResponse::succeeded();
        if let Some(outcomes) = ctx.params().get("outcomes").and_then(serde_json::Value::as_object) {
            for (name, value) in outcomes {
                response = response.with_outcome(name.clone(), value.clone());
            }
        }
        Ok(Executable::Sync(response))
    }
}

/// Wraps a node execution store and fails the first `failures` status
/// transitions with a transient error.
pub struct FlakyNodeExecutionStore {
    inner: Arc<dyn NodeExecutionStore>,
    remaining: AtomicU32,
    injected: AtomicU32,
}

impl FlakyNodeExecutionStore {
    /// Wraps `inner`.
    #[must_use]
    pub fn new(inner: Arc<dyn NodeExecutionStore>, failures: u32) -> Self {
        Self {
            inner,
            remaining: AtomicU32::new(failures),
            injected: AtomicU32::new(0),
        }
    }

    /// Number of failures injected so far.
    #[must_use]
    pub fn injected(&self) -> u32 {
        self.injected.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for FlakyNodeExecutionStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FlakyNodeExecutionStore")
            .field("remaining", &self.remaining.load(Ordering::SeqCst))
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl NodeExecutionStore for FlakyNodeExecutionStore {
    async fn insert(&self, execution: NodeExecution) -> Result<(), PersistenceError> {
        self.inner.insert(execution).await
    }

    async fn get(&self, id: &str) -> Result<NodeExecution, PersistenceError> {
        self.inner.get(id).await
    }

    async fn update(&self, id: &str, update: NodeExecutionUpdate) -> Result<NodeExecution, PersistenceError> {
        self.inner.update(id, update).await
    }

    async fn update_if_status(
        &self,
        id: &str,
        from: &[Status],
        update: NodeExecutionUpdate,
    ) -> Result<Option<NodeExecution>, PersistenceError> {
        let failing = self
            .remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            self.injected.fetch_add(1, Ordering::SeqCst);
            return Err(PersistenceError::Unavailable("injected failure".to_string()));
        }
        self.inner.update_if_status(id, from, update).await
    }

    async fn list_children(&self, parent_id: &str) -> Result<Vec<NodeExecution>, PersistenceError> {
        self.inner.list_children(parent_id).await
    }

    async fn list_by_plan_execution(
        &self,
        plan_execution_id: &str,
    ) -> Result<Vec<NodeExecution>, PersistenceError> {
        self.inner.list_by_plan_execution(plan_execution_id).await
    }
}
