//! Runtime record of one plan run.

use crate::ambiance::Ambiance;
use crate::core::{FailureInfo, Status};
use crate::plan::Plan;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The runtime record of one plan run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanExecution {
    /// Plan execution id.
    pub plan_execution_id: String,
    /// Plan id.
    pub plan_id: String,
    /// Current status.
    pub status: Status,
    /// Initial ambiance, without levels.
    pub ambiance: Ambiance,
    /// Execution id of the root node.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub root_node_execution_id: Option<String>,
    /// Status forced by an end-plan decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_status_override: Option<Status>,
    /// Failures recorded during the run, in arrival order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<FailureInfo>,
    /// Plan execution this run retries.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_of: Option<String>,
    /// The plan that was run, kept so the run can be retried after the
    /// engine forgets it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub plan: Option<Plan>,
    /// Start time.
    pub started_at: DateTime<Utc>,
    /// End time.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl PlanExecution {
    /// Creates a running plan execution.
    #[must_use]
    pub fn new(ambiance: Ambiance) -> Self {
        Self {
            plan_execution_id: ambiance.plan_execution_id.clone(),
            plan_id: ambiance.plan_id.clone(),
            status: Status::Running,
            ambiance,
            root_node_execution_id: None,
            end_status_override: None,
            failures: Vec::new(),
            retry_of: None,
            plan: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Links the run to the execution it retries.
    #[must_use]
    pub fn with_retry_of(mut self, plan_execution_id: impl Into<String>) -> Self {
        self.retry_of = Some(plan_execution_id.into());
        self
    }

    /// Records the plan being run.
    #[must_use]
    pub fn with_plan(mut self, plan: Plan) -> Self {
        self.plan = Some(plan);
        self
    }

    /// True once the run ended.
    #[must_use]
    pub fn is_ended(&self) -> bool {
        self.status.is_terminal()
    }
}
