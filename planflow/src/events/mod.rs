//! Typed engine events.
//!
//! The engine reports every lifecycle transition to an [`EventSink`]. Sinks
//! never influence execution; a failing sink only loses events.

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

use crate::adviser::AdviserResponse;
use crate::core::Status;
use serde::Serialize;

/// A lifecycle event emitted by the engine.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    /// A plan execution started.
    PlanStarted {
        /// Plan execution id.
        plan_execution_id: String,
        /// Plan id.
        plan_id: String,
    },
    /// A plan execution ended.
    PlanEnded {
        /// Plan execution id.
        plan_execution_id: String,
        /// Final status.
        status: Status,
    },
    /// A node execution started.
    NodeStarted {
        /// Plan execution id.
        plan_execution_id: String,
        /// Node execution id.
        node_execution_id: String,
        /// Identifier with strategy postfix.
        identifier: String,
        /// Step type name.
        step_type: String,
        /// True for identity replays.
        identity: bool,
    },
    /// A node execution reached a terminal status.
    NodeEnded {
        /// Plan execution id.
        plan_execution_id: String,
        /// Node execution id.
        node_execution_id: String,
        /// Identifier with strategy postfix.
        identifier: String,
        /// Terminal status.
        status: Status,
        /// Adviser decision, if any.
        adviser_response: Option<AdviserResponse>,
    },
    /// A failed node is being retried.
    NodeRetried {
        /// Failed attempt.
        node_execution_id: String,
        /// 1-based retry attempt.
        attempt: u32,
        /// Wait before the new attempt.
        wait_ms: u64,
    },
    /// A node is waiting on intervention.
    InterventionWaiting {
        /// Node execution id.
        node_execution_id: String,
        /// Identifier with strategy postfix.
        identifier: String,
    },
    /// A fan-out parent received all child responses.
    ChildrenResumed {
        /// Parent node execution id.
        node_execution_id: String,
        /// Number of children.
        children: usize,
        /// Aggregated child status.
        status: Status,
    },
    /// A notification or resumption was dropped.
    CorrelationDropped {
        /// Correlation id or node execution id.
        correlation_id: String,
        /// Why it was dropped.
        reason: String,
    },
}

impl EngineEvent {
    /// Dotted event type name.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::PlanStarted { .. } => "plan.started",
            Self::PlanEnded { .. } => "plan.ended",
            Self::NodeStarted { .. } => "node.started",
            Self::NodeEnded { .. } => "node.ended",
            Self::NodeRetried { .. } => "node.retried",
            Self::InterventionWaiting { .. } => "node.intervention_waiting",
            Self::ChildrenResumed { .. } => "node.children_resumed",
            Self::CorrelationDropped { .. } => "correlation.dropped",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_event_type() {
        let event = EngineEvent::PlanEnded {
            plan_execution_id: "e".to_string(),
            status: Status::Succeeded,
        };
        assert_eq!(event.event_type(), "plan.ended");
    }

    #[test]
    fn test_event_serialization() {
        let event = EngineEvent::NodeRetried {
            node_execution_id: "ne".to_string(),
            attempt: 2,
            wait_ms: 50,
        };
        assert_eq!(
            serde_json::to_value(&event).unwrap(),
            json!({"type": "node_retried", "node_execution_id": "ne", "attempt": 2, "wait_ms": 50})
        );
    }
}
