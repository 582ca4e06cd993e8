//! Step responses and the outputs they carry.

use super::Status;
use serde::{Deserialize, Serialize};

/// Whether an output is a node outcome or a sweeping output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    /// The node's declared result.
    Outcome,
    /// A side value made visible to later nodes.
    SweepingOutput,
}

/// A named output value produced by a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepOutput {
    /// Output name.
    pub name: String,
    /// Outcome or sweeping output.
    pub kind: OutputKind,
    /// The value.
    pub value: serde_json::Value,
    /// Group whose subtree may read this output. `None` means the
    /// producer's parent scope.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<String>,
}

impl StepOutput {
    /// Creates an outcome.
    #[must_use]
    pub fn outcome(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            kind: OutputKind::Outcome,
            value,
            group: None,
        }
    }

    /// Creates a sweeping output.
    #[must_use]
    pub fn sweeping(name: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            kind: OutputKind::SweepingOutput,
            value,
            group: None,
        }
    }

    /// Publishes the output to the subtree of the nearest level in `group`.
    #[must_use]
    pub fn with_group(mut self, group: impl Into<String>) -> Self {
        self.group = Some(group.into());
        self
    }
}

/// The response of one step invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResponse {
    /// Terminal status reported by the step.
    pub status: Status,
    /// Outputs to persist when the node ends.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub outputs: Vec<StepOutput>,
    /// Failure message for failed responses.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_message: Option<String>,
}

impl StepResponse {
    fn with_status(status: Status) -> Self {
        Self {
            status,
            outputs: Vec::new(),
            failure_message: None,
        }
    }

    /// Creates a succeeded response.
    #[must_use]
    pub fn succeeded() -> Self {
        Self::with_status(Status::Succeeded)
    }

    /// Creates a failed response.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            failure_message: Some(message.into()),
            ..Self::with_status(Status::Failed)
        }
    }

    /// Creates a skipped response.
    #[must_use]
    pub fn skipped(reason: impl Into<String>) -> Self {
        Self {
            failure_message: Some(reason.into()),
            ..Self::with_status(Status::Skipped)
        }
    }

    /// Creates an aborted response.
    #[must_use]
    pub fn aborted(reason: impl Into<String>) -> Self {
        Self {
            failure_message: Some(reason.into()),
            ..Self::with_status(Status::Aborted)
        }
    }

    /// Creates a response with an explicit status.
    #[must_use]
    pub fn from_status(status: Status) -> Self {
        Self::with_status(status)
    }

    /// Adds an outcome.
    #[must_use]
    pub fn with_outcome(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.push(StepOutput::outcome(name, value));
        self
    }

    /// Adds a sweeping output.
    #[must_use]
    pub fn with_sweeping_output(mut self, name: impl Into<String>, value: serde_json::Value) -> Self {
        self.outputs.push(StepOutput::sweeping(name, value));
        self
    }

    /// Adds a prepared output.
    #[must_use]
    pub fn with_output(mut self, output: StepOutput) -> Self {
        self.outputs.push(output);
        self
    }

    /// Returns the first output with the given name and kind.
    #[must_use]
    pub fn output(&self, kind: OutputKind, name: &str) -> Option<&StepOutput> {
        self.outputs
            .iter()
            .find(|output| output.kind == kind && output.name == name)
    }
}

impl Default for StepResponse {
    fn default() -> Self {
        Self::succeeded()
    }
}
