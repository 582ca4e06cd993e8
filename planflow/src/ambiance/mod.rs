//! Execution context threaded through every node.
//!
//! An [`Ambiance`] names the plan execution, carries a stack of
//! [`Level`]s (one per node execution on the path from the root) and a
//! flat map of setup abstractions. It is copy-on-descend: a node hands each
//! child a clone extended by one level and never mutates an ambiance it
//! did not create.

mod level;
mod scope;

pub use level::{Level, LevelNodeType};
pub use scope::{Scope, ACCOUNT_ID, ORG_IDENTIFIER, PROJECT_IDENTIFIER};

use crate::core::StepCategory;
use crate::errors::PlanflowError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Links a retried plan execution to the run it retries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryInfo {
    /// First execution in the retry chain.
    pub root_execution_id: String,
    /// Execution this run retries.
    pub parent_retry_id: String,
}

/// The execution context of one node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ambiance {
    /// Plan id.
    pub plan_id: String,
    /// Plan execution id.
    pub plan_execution_id: String,
    /// Level stack, root first.
    #[serde(default)]
    pub levels: Vec<Level>,
    /// Scope abstractions such as account, organization and project.
    #[serde(default)]
    pub setup_abstractions: BTreeMap<String, String>,
    /// Present when this plan execution retries an earlier one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retry_info: Option<RetryInfo>,
}

impl Ambiance {
    /// Creates an ambiance with an empty level stack.
    #[must_use]
    pub fn new(plan_id: impl Into<String>, plan_execution_id: impl Into<String>) -> Self {
        Self {
            plan_id: plan_id.into(),
            plan_execution_id: plan_execution_id.into(),
            levels: Vec::new(),
            setup_abstractions: BTreeMap::new(),
            retry_info: None,
        }
    }

    /// Adds a setup abstraction.
    #[must_use]
    pub fn with_setup_abstraction(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.setup_abstractions.insert(key.into(), value.into());
        self
    }

    /// Adds the entries of a scope to the setup abstractions.
    #[must_use]
    pub fn with_scope(mut self, scope: &Scope) -> Self {
        self.setup_abstractions.extend(scope.to_abstractions());
        self
    }

    /// Sets the retry link.
    #[must_use]
    pub fn with_retry_info(mut self, retry_info: RetryInfo) -> Self {
        self.retry_info = Some(retry_info);
        self
    }

    /// Returns a copy extended by one level.
    #[must_use]
    pub fn clone_for_child(&self, level: Level) -> Self {
        let mut child = self.clone();
        child.levels.push(level);
        child
    }

    /// Returns a copy without the last level: the ambiance of the parent.
    #[must_use]
    pub fn clone_for_finish(&self) -> Self {
        self.truncated(self.levels.len().saturating_sub(1))
    }

    /// Returns a copy keeping only the first `levels_to_keep` levels.
    #[must_use]
    pub fn truncated(&self, levels_to_keep: usize) -> Self {
        let mut copy = self.clone();
        copy.levels.truncate(levels_to_keep);
        copy
    }

    /// Returns a copy re-targeted at another plan execution.
    #[must_use]
    pub fn for_plan_execution(&self, plan_execution_id: impl Into<String>) -> Self {
        let mut copy = self.truncated(0);
        copy.plan_execution_id = plan_execution_id.into();
        copy
    }

    /// The innermost level.
    #[must_use]
    pub fn current_level(&self) -> Option<&Level> {
        self.levels.last()
    }

    /// Node execution id of the innermost level.
    #[must_use]
    pub fn current_runtime_id(&self) -> Option<&str> {
        self.current_level().map(|level| level.runtime_id.as_str())
    }

    /// Plan node id of the innermost level.
    #[must_use]
    pub fn current_setup_id(&self) -> Option<&str> {
        self.current_level().map(|level| level.setup_id.as_str())
    }

    /// Node execution id of the level above the innermost one.
    #[must_use]
    pub fn parent_runtime_id(&self) -> Option<&str> {
        let len = self.levels.len();
        if len < 2 {
            return None;
        }
        self.levels.get(len - 2).map(|level| level.runtime_id.as_str())
    }

    /// Step type name of the innermost level.
    #[must_use]
    pub fn current_step_type(&self) -> Option<&str> {
        self.current_level().map(|level| level.step_type.name.as_str())
    }

    /// Group of the innermost level.
    #[must_use]
    pub fn current_group(&self) -> Option<&str> {
        self.current_level().and_then(|level| level.group.as_deref())
    }

    /// Start time of the innermost level.
    pub fn current_level_start_ts(&self) -> Result<i64, PlanflowError> {
        self.current_level()
            .map(|level| level.start_ts)
            .ok_or_else(|| PlanflowError::InvalidState("ambiance has no levels".to_string()))
    }

    /// Runtime ids from the root to the innermost level.
    #[must_use]
    pub fn runtime_path(&self) -> Vec<String> {
        self.levels.iter().map(|level| level.runtime_id.clone()).collect()
    }

    fn last_level_of(&self, category: StepCategory) -> Option<&Level> {
        self.levels.iter().rev().find(|level| level.category() == category)
    }

    /// The innermost stage level.
    #[must_use]
    pub fn stage_level(&self) -> Option<&Level> {
        self.last_level_of(StepCategory::Stage)
    }

    /// The innermost strategy level.
    #[must_use]
    pub fn strategy_level(&self) -> Option<&Level> {
        self.last_level_of(StepCategory::Strategy)
    }

    /// The innermost step group level.
    #[must_use]
    pub fn step_group_level(&self) -> Option<&Level> {
        self.last_level_of(StepCategory::StepGroup)
    }

    /// True if the innermost level is a strategy wrapping a stage, that is
    /// a strategy with no stage above it.
    #[must_use]
    pub fn is_current_strategy_level_at_stage(&self) -> bool {
        match self.levels.split_last() {
            Some((current, above)) => {
                current.category() == StepCategory::Strategy
                    && !above.iter().any(|level| level.category() == StepCategory::Stage)
            }
            None => false,
        }
    }

    /// Account id from the setup abstractions.
    #[must_use]
    pub fn account_id(&self) -> Option<&str> {
        self.setup_abstractions.get(ACCOUNT_ID).map(String::as_str)
    }

    /// Organization identifier from the setup abstractions.
    #[must_use]
    pub fn org_identifier(&self) -> Option<&str> {
        self.setup_abstractions.get(ORG_IDENTIFIER).map(String::as_str)
    }

    /// Project identifier from the setup abstractions.
    #[must_use]
    pub fn project_identifier(&self) -> Option<&str> {
        self.setup_abstractions.get(PROJECT_IDENTIFIER).map(String::as_str)
    }

    /// Scope read from the setup abstractions.
    #[must_use]
    pub fn scope(&self) -> Scope {
        Scope::from_abstractions(&self.setup_abstractions)
    }

    /// True if the innermost node is a retry attempt.
    #[must_use]
    pub fn is_retry(&self) -> bool {
        self.current_level().is_some_and(|level| level.retry_index > 0)
    }

    /// Dotted identifier path from the root to the innermost level.
    /// Strategy levels are folded into their child's postfix.
    #[must_use]
    pub fn fully_qualified_identifier(&self, use_matrix_values: bool) -> String {
        self.levels
            .iter()
            .filter(|level| level.category() != StepCategory::Strategy)
            .map(|level| level.display_identifier(use_matrix_values))
            .collect::<Vec<_>>()
            .join(".")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::StepType;
    use crate::strategy::StrategyMetadata;

    fn level(id: &str, identifier: &str, category: StepCategory) -> Level {
        Level::new(id, format!("setup_{id}"), identifier, StepType::new("T", category))
    }

    fn ambiance() -> Ambiance {
        Ambiance::new("plan", "exec")
            .with_scope(&Scope::account("acc").with_org("org").with_project("proj"))
            .clone_for_child(level("r1", "pipeline", StepCategory::Pipeline))
            .clone_for_child(level("r2", "build", StepCategory::Stage))
            .clone_for_child(
                level("r3", "build_matrix", StepCategory::Strategy)
                    .with_group(Some("STRATEGY".to_string())),
            )
    }

    #[test]
    fn test_clone_for_child_does_not_touch_original() {
        let parent = ambiance();
        let child = parent.clone_for_child(level("r4", "compile", StepCategory::Step));

        assert_eq!(parent.levels.len(), 3);
        assert_eq!(child.levels.len(), 4);
        assert_eq!(child.current_runtime_id(), Some("r4"));
        assert_eq!(child.parent_runtime_id(), Some("r3"));
    }

    #[test]
    fn test_clone_for_finish_and_truncate() {
        let amb = ambiance();
        assert_eq!(amb.clone_for_finish().current_runtime_id(), Some("r2"));
        assert_eq!(amb.truncated(1).levels.len(), 1);
        assert!(Ambiance::new("p", "e").clone_for_finish().levels.is_empty());
    }

    #[test]
    fn test_getters() {
        let amb = ambiance();
        assert_eq!(amb.current_setup_id(), Some("setup_r3"));
        assert_eq!(amb.current_step_type(), Some("T"));
        assert_eq!(amb.current_group(), Some("STRATEGY"));
        assert_eq!(amb.account_id(), Some("acc"));
        assert_eq!(amb.org_identifier(), Some("org"));
        assert_eq!(amb.project_identifier(), Some("proj"));
        assert_eq!(amb.runtime_path(), vec!["r1", "r2", "r3"]);
        assert!(amb.current_level_start_ts().unwrap() > 0);
    }

    #[test]
    fn test_start_ts_requires_levels() {
        assert!(Ambiance::new("p", "e").current_level_start_ts().is_err());
    }

    #[test]
    fn test_level_queries() {
        let amb = ambiance();
        assert_eq!(amb.stage_level().map(|l| l.runtime_id.as_str()), Some("r2"));
        assert_eq!(amb.strategy_level().map(|l| l.runtime_id.as_str()), Some("r3"));
        assert!(amb.step_group_level().is_none());
        assert!(!amb.is_current_strategy_level_at_stage());

        let stage_strategy = Ambiance::new("p", "e")
            .clone_for_child(level("r1", "pipeline", StepCategory::Pipeline))
            .clone_for_child(level("r2", "deploy", StepCategory::Strategy));
        assert!(stage_strategy.is_current_strategy_level_at_stage());
    }

    #[test]
    fn test_is_retry() {
        let amb = ambiance();
        assert!(!amb.is_retry());
        let retried = amb.clone_for_child(level("r4", "compile", StepCategory::Step).with_retry_index(1));
        assert!(retried.is_retry());
    }

    #[test]
    fn test_fully_qualified_identifier() {
        let amb = ambiance().clone_for_child(
            level("r4", "compile", StepCategory::Step)
                .with_strategy_metadata(Some(StrategyMetadata::iteration(1, 2))),
        );
        assert_eq!(amb.fully_qualified_identifier(true), "pipeline.build.compile_1");
    }

    #[test]
    fn test_for_plan_execution_resets_levels() {
        let amb = ambiance().for_plan_execution("exec-2");
        assert_eq!(amb.plan_execution_id, "exec-2");
        assert!(amb.levels.is_empty());
        assert_eq!(amb.account_id(), Some("acc"));
    }
}
