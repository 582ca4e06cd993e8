//! Step type descriptors.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Structural role of a step within a plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepCategory {
    /// The whole plan.
    Pipeline,
    /// A stage of the plan.
    Stage,
    /// A group of steps inside a stage.
    StepGroup,
    /// A fan-out wrapper.
    Strategy,
    /// Parallel branches.
    Fork,
    /// A sequential section.
    Section,
    /// A unit of work.
    #[default]
    Step,
}

impl fmt::Display for StepCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Pipeline => "PIPELINE",
            Self::Stage => "STAGE",
            Self::StepGroup => "STEP_GROUP",
            Self::Strategy => "STRATEGY",
            Self::Fork => "FORK",
            Self::Section => "SECTION",
            Self::Step => "STEP",
        };
        f.write_str(text)
    }
}

/// A step type: the registry key plus its structural category.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StepType {
    /// Registry key of the step implementation.
    #[serde(rename = "type")]
    pub name: String,
    /// Structural category.
    #[serde(default)]
    pub category: StepCategory,
}

impl StepType {
    /// Creates a step type.
    #[must_use]
    pub fn new(name: impl Into<String>, category: StepCategory) -> Self {
        Self {
            name: name.into(),
            category,
        }
    }

    /// Creates a plain step type in the `STEP` category.
    #[must_use]
    pub fn step(name: impl Into<String>) -> Self {
        Self::new(name, StepCategory::Step)
    }
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.name, self.category)
    }
}
