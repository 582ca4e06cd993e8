//! Node execution status and execution mode enums.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The lifecycle status of a node execution or a plan execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    /// Created, not yet dispatched.
    #[default]
    NotStarted,
    /// Created but held back by a max-concurrency limit.
    Queued,
    /// Step logic is executing or children are in flight.
    Running,
    /// Waiting on externally completed tasks.
    AsyncWaiting,
    /// Waiting on a manual intervention decision.
    InterventionWaiting,
    /// Completed successfully.
    Succeeded,
    /// Completed with a failure.
    Failed,
    /// Skipped without running.
    Skipped,
    /// Stopped by an abort.
    Aborted,
    /// Stopped by a timeout.
    Expired,
}

impl Status {
    /// All terminal statuses.
    pub const TERMINAL: [Status; 5] = [
        Status::Succeeded,
        Status::Failed,
        Status::Skipped,
        Status::Aborted,
        Status::Expired,
    ];

    /// Statuses a node can be in while it still owns work.
    pub const ACTIVE: [Status; 3] = [
        Status::Running,
        Status::AsyncWaiting,
        Status::InterventionWaiting,
    ];

    /// Statuses that can be discontinued by an abort.
    pub const ABORTABLE: [Status; 5] = [
        Status::NotStarted,
        Status::Queued,
        Status::Running,
        Status::AsyncWaiting,
        Status::InterventionWaiting,
    ];

    /// Returns true if no further transitions are allowed.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        Self::TERMINAL.contains(self)
    }

    /// Returns true for statuses that count as a failed outcome.
    #[must_use]
    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed | Self::Aborted | Self::Expired)
    }

    /// Returns true for statuses that let a chain proceed.
    #[must_use]
    pub fn is_success_like(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Skipped)
    }

    /// Folds child statuses into a parent status.
    ///
    /// Any abort wins, then any failure or expiry. A set that is entirely
    /// skipped stays skipped; everything else succeeded. An empty set
    /// succeeds.
    #[must_use]
    pub fn aggregate<I>(statuses: I) -> Self
    where
        I: IntoIterator<Item = Status>,
    {
        let mut any = false;
        let mut all_skipped = true;
        let mut failed = false;
        for status in statuses {
            any = true;
            match status {
                Self::Aborted => return Self::Aborted,
                Self::Failed | Self::Expired => failed = true,
                Self::Skipped => {}
                _ => all_skipped = false,
            }
        }
        if failed {
            Self::Failed
        } else if any && all_skipped {
            Self::Skipped
        } else {
            Self::Succeeded
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::NotStarted => "NOT_STARTED",
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::AsyncWaiting => "ASYNC_WAITING",
            Self::InterventionWaiting => "INTERVENTION_WAITING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::Skipped => "SKIPPED",
            Self::Aborted => "ABORTED",
            Self::Expired => "EXPIRED",
        };
        f.write_str(text)
    }
}

/// How a node's step logic produced its result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionMode {
    /// Returned a response inline.
    Sync,
    /// Waits on external task completion.
    Async,
    /// Spawned exactly one child.
    Child,
    /// Spawned a set of children.
    Children,
}

impl ExecutionMode {
    /// Returns true if the node owns child executions.
    #[must_use]
    pub fn is_parent(&self) -> bool {
        matches!(self, Self::Child | Self::Children)
    }
}

impl fmt::Display for ExecutionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Sync => write!(f, "SYNC"),
            Self::Async => write!(f, "ASYNC"),
            Self::Child => write!(f, "CHILD"),
            Self::Children => write!(f, "CHILDREN"),
        }
    }
}
