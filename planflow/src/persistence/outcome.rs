//! Scoped output records.

use crate::ambiance::Ambiance;
use crate::core::{OutputKind, StepOutput};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A persisted outcome or sweeping output.
///
/// `scope` is the runtime-id path whose subtree may read the record: by
/// default the producer's parent path, or the path down to the nearest
/// level of the output's group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeRecord {
    /// Record id.
    pub id: String,
    /// Plan execution.
    pub plan_execution_id: String,
    /// Producing node execution.
    pub producer_id: String,
    /// Producer identifier including its strategy postfix.
    pub producer_identifier: String,
    /// Output name.
    pub name: String,
    /// Outcome or sweeping output.
    pub kind: OutputKind,
    /// Requested group.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
    /// Visibility scope.
    pub scope: Vec<String>,
    /// Value.
    pub value: serde_json::Value,
    /// Creation time.
    pub created_at: DateTime<Utc>,
}

impl OutcomeRecord {
    /// Builds a record for `output` produced by the innermost level of
    /// `ambiance`.
    #[must_use]
    pub fn scoped(ambiance: &Ambiance, producer_identifier: &str, output: StepOutput) -> Self {
        let scope = visibility_scope(ambiance, output.group.as_deref());
        Self {
            id: Uuid::now_v7().to_string(),
            plan_execution_id: ambiance.plan_execution_id.clone(),
            producer_id: ambiance.current_runtime_id().unwrap_or_default().to_string(),
            producer_identifier: producer_identifier.to_string(),
            name: output.name,
            kind: output.kind,
            group: output.group,
            scope,
            value: output.value,
            created_at: Utc::now(),
        }
    }

    /// True if a node at `runtime_path` may read this record.
    #[must_use]
    pub fn is_visible_from(&self, runtime_path: &[String]) -> bool {
        runtime_path.starts_with(&self.scope)
    }

    /// The output this record was built from.
    #[must_use]
    pub fn to_output(&self) -> StepOutput {
        StepOutput {
            name: self.name.clone(),
            kind: self.kind,
            value: self.value.clone(),
            group: self.group.clone(),
        }
    }

    /// True if both records occupy the same slot.
    #[must_use]
    pub fn conflicts_with(&self, other: &Self) -> bool {
        self.plan_execution_id == other.plan_execution_id
            && self.kind == other.kind
            && self.name == other.name
            && self.scope == other.scope
            && self.producer_identifier == other.producer_identifier
    }
}

fn visibility_scope(ambiance: &Ambiance, group: Option<&str>) -> Vec<String> {
    let parent_len = ambiance.levels.len().saturating_sub(1);
    let len = group
        .and_then(|group| {
            ambiance
                .levels
                .iter()
                .rposition(|level| level.group.as_deref() == Some(group))
        })
        .map_or(parent_len, |index| index + 1);

    ambiance.levels[..len]
        .iter()
        .map(|level| level.runtime_id.clone())
        .collect()
}
