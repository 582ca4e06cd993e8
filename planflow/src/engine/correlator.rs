//! Fan-in of child completions.

use crate::adviser::ChildrenSummary;
use crate::core::{FailureInfo, Status, StepResponse};
use crate::strategy::StrategyMetadata;
use crate::waiter::ResponseData;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

/// Name of the outcome mapping child identifiers to their results.
pub const CHILDREN_OUTCOME: &str = "children";
/// Name of the sweeping output listing failed child identifiers.
pub const FAILED_CHILDREN_OUTPUT: &str = "failed_children";

/// One child's result as seen by its parent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildResult {
    /// Node execution that reported.
    pub node_execution_id: String,
    /// Plan node id.
    pub node_id: String,
    /// Terminal status.
    pub status: Status,
    /// Failure details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_info: Option<FailureInfo>,
    /// Iteration metadata.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strategy_metadata: Option<StrategyMetadata>,
}

/// The merged result of a fan-out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildrenOutcome {
    /// Aggregated status.
    pub status: Status,
    /// Results keyed by child identifier.
    pub children: BTreeMap<String, ChildResult>,
    /// Identifiers of failed or expired children.
    pub failed_children: Vec<String>,
    /// Status counts for the adviser.
    pub summary: ChildrenSummary,
}

impl ChildrenOutcome {
    /// Converts into the parent's response: the aggregated status, the
    /// child map as an outcome and the failed identifiers as a sweeping
    /// output.
    #[must_use]
    pub fn to_response(&self) -> StepResponse {
        let children: serde_json::Map<String, serde_json::Value> = self
            .children
            .iter()
            .map(|(identifier, child)| {
                (
                    identifier.clone(),
                    serde_json::json!({
                        "node_execution_id": child.node_execution_id,
                        "status": child.status,
                    }),
                )
            })
            .collect();

        let mut response = StepResponse::from_status(self.status)
            .with_outcome(CHILDREN_OUTCOME, serde_json::Value::Object(children))
            .with_sweeping_output(
                FAILED_CHILDREN_OUTPUT,
                serde_json::json!(self.failed_children),
            );
        if self.status.is_failed() {
            response.failure_message = Some(format!(
                "{} of {} children did not succeed: {}",
                self.failed_children.len() + self.summary.aborted,
                self.summary.total,
                self.failed_children.join(", ")
            ));
        }
        response
    }
}

/// Merges the responses of a parent's children.
#[derive(Debug, Clone, Copy, Default)]
pub struct ChildrenCorrelator;

impl ChildrenCorrelator {
    /// Merges `responses` into one outcome.
    ///
    /// The result does not depend on the iteration order of `responses`:
    /// entries are sorted by identifier and node execution id before the
    /// map is built, and colliding identifiers get a `#n` suffix in that
    /// order.
    #[must_use]
    pub fn merge(responses: &HashMap<String, ResponseData>) -> ChildrenOutcome {
        let mut entries: Vec<(String, ChildResult)> = responses
            .iter()
            .map(|(correlation_id, data)| match data {
                ResponseData::Step(step) => (
                    step.identifier.clone(),
                    ChildResult {
                        node_execution_id: step.node_execution_id.clone(),
                        node_id: step.node_id.clone(),
                        status: step.status,
                        failure_info: step.failure_info.clone(),
                        strategy_metadata: step.strategy_metadata.clone(),
                    },
                ),
                ResponseData::Task(task) => (
                    correlation_id.clone(),
                    ChildResult {
                        node_execution_id: correlation_id.clone(),
                        node_id: correlation_id.clone(),
                        status: task.status,
                        failure_info: task
                            .failure_message
                            .as_ref()
                            .map(|message| FailureInfo::new(task.status, message.clone())),
                        strategy_metadata: None,
                    },
                ),
            })
            .collect();
        entries.sort_by(|a, b| {
            a.0.cmp(&b.0)
                .then_with(|| a.1.node_execution_id.cmp(&b.1.node_execution_id))
        });

        let mut children = BTreeMap::new();
        let mut failed_children = Vec::new();
        let mut summary = ChildrenSummary {
            total: entries.len(),
            ..ChildrenSummary::default()
        };
        for (identifier, child) in entries {
            let mut key = identifier.clone();
            let mut n = 1;
            while children.contains_key(&key) {
                n += 1;
                key = format!("{identifier}#{n}");
            }
            match child.status {
                Status::Aborted => summary.aborted += 1,
                Status::Failed | Status::Expired => {
                    summary.failed += 1;
                    failed_children.push(key.clone());
                }
                _ => {}
            }
            children.insert(key, child);
        }

        ChildrenOutcome {
            status: Status::aggregate(children.values().map(|child| child.status)),
            children,
            failed_children,
            summary,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::OutputKind;
    use crate::waiter::StepResponseNotifyData;
    use pretty_assertions::assert_eq;

    fn step(ne: &str, identifier: &str, status: Status) -> ResponseData {
        ResponseData::Step(StepResponseNotifyData {
            node_id: "child".to_string(),
            node_execution_id: ne.to_string(),
            identifier: identifier.to_string(),
            status,
            adviser_response: None,
            failure_info: None,
            strategy_metadata: None,
        })
    }

    fn responses(items: &[(&str, ResponseData)]) -> HashMap<String, ResponseData> {
        items
            .iter()
            .map(|(id, data)| ((*id).to_string(), data.clone()))
            .collect()
    }

    #[test]
    fn test_merge_mixed_statuses() {
        let merged = ChildrenCorrelator::merge(&responses(&[
            ("n1", step("ne-1", "build_0", Status::Succeeded)),
            ("n2", step("ne-2", "build_1", Status::Failed)),
        ]));

        assert_eq!(merged.status, Status::Failed);
        assert_eq!(merged.children.len(), 2);
        assert_eq!(merged.failed_children, vec!["build_1".to_string()]);
        assert_eq!(
            merged.summary,
            ChildrenSummary {
                total: 2,
                failed: 1,
                aborted: 0
            }
        );

        let response = merged.to_response();
        assert_eq!(response.status, Status::Failed);
        let children = response.output(OutputKind::Outcome, CHILDREN_OUTCOME).unwrap();
        assert_eq!(children.value["build_0"]["status"], "SUCCEEDED");
        let failed = response
            .output(OutputKind::SweepingOutput, FAILED_CHILDREN_OUTPUT)
            .unwrap();
        assert_eq!(failed.value, serde_json::json!(["build_1"]));
        assert!(response.failure_message.is_some());
    }

    #[test]
    fn test_merge_counts_aborts() {
        let merged = ChildrenCorrelator::merge(&responses(&[
            ("n1", step("ne-1", "a", Status::Succeeded)),
            ("n2", step("ne-2", "b", Status::Aborted)),
            ("n3", step("ne-3", "c", Status::Aborted)),
        ]));
        assert_eq!(merged.status, Status::Aborted);
        assert_eq!(merged.summary.aborted, 2);
        assert!(merged.failed_children.is_empty());
    }

    #[test]
    fn test_duplicate_identifiers_are_disambiguated_deterministically() {
        let a = responses(&[
            ("n1", step("ne-2", "x", Status::Succeeded)),
            ("n2", step("ne-1", "x", Status::Failed)),
        ]);
        let merged = ChildrenCorrelator::merge(&a);
        assert_eq!(merged.children["x"].node_execution_id, "ne-1");
        assert_eq!(merged.children["x#2"].node_execution_id, "ne-2");
        assert_eq!(merged.failed_children, vec!["x".to_string()]);
    }

    #[test]
    fn test_task_responses_are_keyed_by_correlation_id() {
        let merged = ChildrenCorrelator::merge(&responses(&[(
            "cb-1",
            ResponseData::Task(StepResponse::failed("boom")),
        )]));
        assert_eq!(merged.children["cb-1"].status, Status::Failed);
        assert_eq!(
            merged.children["cb-1"].failure_info.as_ref().map(|f| f.message.as_str()),
            Some("boom")
        );
    }

    #[test]
    fn test_empty_merge_succeeds() {
        let merged = ChildrenCorrelator::merge(&HashMap::new());
        assert_eq!(merged.status, Status::Succeeded);
        assert_eq!(merged.summary.total, 0);
    }
}
