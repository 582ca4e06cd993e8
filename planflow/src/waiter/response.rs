//! Payloads published through the wait/notify engine.

use crate::adviser::AdviserResponse;
use crate::core::{FailureInfo, Status, StepResponse};
use crate::strategy::StrategyMetadata;
use serde::{Deserialize, Serialize};

/// What a node publishes to its notify id when it ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponseNotifyData {
    /// Plan node id.
    pub node_id: String,
    /// Node execution id.
    pub node_execution_id: String,
    /// Identifier including the strategy postfix.
    pub identifier: String,
    /// Terminal status.
    pub status: Status,
    /// Adviser decision.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub adviser_response: Option<AdviserResponse>,
    /// Failure details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    /// Iteration metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_metadata: Option<StrategyMetadata>,
}

/// A payload delivered to a correlation id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseData {
    /// A node ended.
    Step(StepResponseNotifyData),
    /// An external task completed.
    Task(StepResponse),
}

impl ResponseData {
    /// Terminal status carried by the payload.
    #[must_use]
    pub fn status(&self) -> Status {
        match self {
            Self::Step(data) => data.status,
            Self::Task(response) => response.status,
        }
    }
}
