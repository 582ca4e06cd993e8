//! Step capability contract and the step-type registry.
//!
//! A [`Step`] implements the logic of one step type. The engine looks the
//! implementation up in the [`StepRegistry`] by the node's step type name
//! and drives it through `validate_access`, `execute` and, depending on
//! what `execute` returned, `handle_async_response` or
//! `handle_children_response`.

mod builtin;
mod context;
mod executable;
mod registry;

pub use builtin::{ForkStep, SectionStep, StrategyStep, FORK, SECTION, STRATEGY};
pub use context::StepContext;
pub use executable::{AsyncExecutable, ChildSpec, ChildrenExecutable, Executable};
pub use registry::StepRegistry;

use crate::core::{Status, StepResponse};
use crate::engine::ChildrenOutcome;
use crate::errors::StepError;
use crate::waiter::ResponseData;
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt::Debug;

/// Logic of one step type.
#[async_trait]
pub trait Step: Send + Sync + Debug {
    /// Step type name this implementation is registered under.
    fn step_type(&self) -> &str;

    /// Checks that the node may access the resources it needs.
    async fn validate_access(&self, _ctx: &StepContext) -> Result<(), StepError> {
        Ok(())
    }

    /// Runs the step.
    async fn execute(&self, ctx: &StepContext) -> Result<Executable, StepError>;

    /// Builds the response once every async callback id was completed.
    ///
    /// The default folds the task statuses and concatenates their outputs.
    async fn handle_async_response(
        &self,
        _ctx: &StepContext,
        responses: HashMap<String, ResponseData>,
    ) -> Result<StepResponse, StepError> {
        let mut ids: Vec<&String> = responses.keys().collect();
        ids.sort();

        let mut outputs = Vec::new();
        let mut failure_message = None;
        let mut statuses = Vec::with_capacity(ids.len());
        for id in ids {
            let data = &responses[id];
            statuses.push(data.status());
            if let ResponseData::Task(task) = data {
                outputs.extend(task.outputs.iter().cloned());
                if failure_message.is_none() {
                    failure_message.clone_from(&task.failure_message);
                }
            }
        }

        let status = Status::aggregate(statuses);
        Ok(StepResponse {
            status,
            outputs,
            failure_message: if status.is_success_like() {
                None
            } else {
                failure_message
            },
        })
    }

    /// Builds the response once every child reported.
    async fn handle_children_response(
        &self,
        _ctx: &StepContext,
        outcome: &ChildrenOutcome,
    ) -> Result<StepResponse, StepError> {
        Ok(outcome.to_response())
    }
}
