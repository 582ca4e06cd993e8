//! Adviser evaluation: the policy deciding what happens after a node
//! reaches a terminal status.
//!
//! [`advise`] is a pure function of the node's status, its retry count,
//! the summary of its children and its [`AdviserConfig`]. Dispatch logic in
//! the engine only interprets the returned [`AdviserResponse`].

mod policy;

pub use policy::{AdviserConfig, ChildrenFailureMode, FailurePolicy, InterventionAction};

use crate::core::Status;
use serde::{Deserialize, Serialize};
use std::fmt;

/// The adviser's decision for a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AdviserResponse {
    /// End the node and trigger the next sibling, if any.
    Advance {
        /// Next sibling.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        next_node_id: Option<String>,
    },
    /// Re-run the node.
    Retry {
        /// 1-based retry attempt.
        attempt: u32,
        /// Wait before the new attempt, in milliseconds.
        wait_ms: u64,
    },
    /// Park the node until intervention.
    Intervene {
        /// Wait limit before `on_timeout` applies.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timeout_ms: Option<u64>,
        /// Fallback action.
        on_timeout: InterventionAction,
    },
    /// End the node SUCCEEDED regardless of its status.
    MarkSuccess,
    /// End the node FAILED.
    MarkFailed,
    /// End the node and stop every other node of the plan.
    EndPlan,
}

impl AdviserResponse {
    /// Short decision name used in failure records.
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::Advance { .. } => "ADVANCE",
            Self::Retry { .. } => "RETRY",
            Self::Intervene { .. } => "INTERVENE",
            Self::MarkSuccess => "MARK_SUCCESS",
            Self::MarkFailed => "MARK_FAILED",
            Self::EndPlan => "END_PLAN",
        }
    }
}

impl fmt::Display for AdviserResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Child status counts seen by a fan-out parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ChildrenSummary {
    /// Number of children.
    pub total: usize,
    /// Children that failed or expired.
    pub failed: usize,
    /// Children that were aborted.
    pub aborted: usize,
}

/// Inputs to an adviser decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AdviseInput {
    /// Terminal status the node reached.
    pub status: Status,
    /// Retries already made for this node.
    pub retry_count: u32,
    /// Children summary for fan-out nodes.
    pub children: Option<ChildrenSummary>,
}

impl AdviseInput {
    /// Creates an input for a node without children.
    #[must_use]
    pub fn new(status: Status, retry_count: u32) -> Self {
        Self {
            status,
            retry_count,
            children: None,
        }
    }

    /// Attaches a children summary.
    #[must_use]
    pub fn with_children(mut self, summary: ChildrenSummary) -> Self {
        self.children = Some(summary);
        self
    }
}

/// Decides the next transition for a node.
#[must_use]
pub fn advise(input: &AdviseInput, config: &AdviserConfig) -> AdviserResponse {
    match input.status {
        Status::Aborted => AdviserResponse::EndPlan,
        Status::Failed | Status::Expired => {
            if let Some(summary) = input.children.filter(|s| s.aborted == 0) {
                if tolerates(config.children_failure_mode, summary) {
                    return AdviserResponse::MarkSuccess;
                }
            }
            on_failure(&config.on_failure, input.retry_count, true)
        }
        _ => AdviserResponse::Advance {
            next_node_id: config.next_node_id.clone(),
        },
    }
}

fn tolerates(mode: ChildrenFailureMode, summary: ChildrenSummary) -> bool {
    match mode {
        ChildrenFailureMode::FailFast => false,
        ChildrenFailureMode::AllFailed => summary.failed < summary.total,
        ChildrenFailureMode::BestEffort => true,
    }
}

fn on_failure(policy: &FailurePolicy, retry_count: u32, allow_retry: bool) -> AdviserResponse {
    match policy {
        FailurePolicy::MarkFailed => AdviserResponse::MarkFailed,
        FailurePolicy::Ignore => AdviserResponse::MarkSuccess,
        FailurePolicy::EndPlan => AdviserResponse::EndPlan,
        FailurePolicy::ManualIntervention {
            timeout_ms,
            on_timeout,
        } => AdviserResponse::Intervene {
            timeout_ms: *timeout_ms,
            on_timeout: *on_timeout,
        },
        FailurePolicy::Retry {
            max_retries,
            backoff,
            after_retries,
        } => {
            if !allow_retry {
                return AdviserResponse::MarkFailed;
            }
            if retry_count < *max_retries {
                let wait = backoff.delay_for_attempt(retry_count);
                AdviserResponse::Retry {
                    attempt: retry_count + 1,
                    wait_ms: u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                }
            } else {
                on_failure(after_retries, retry_count, false)
            }
        }
    }
}
