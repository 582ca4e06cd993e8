//! Testing utilities for planflow plans.
//!
//! This module provides:
//! - Mock steps and a flaky store wrapper
//! - Plan fixtures and a polling helper
//! - Assertions over execution records

mod assertions;
mod fixtures;
mod mocks;

pub use assertions::{assert_all_terminal, assert_node_status, assert_plan_status, live_executions};
pub use fixtures::{eventually, fork_node, leaf, section_node, strategy_node, PlanFixture};
pub use mocks::{
    AsyncTaskStep, FailingStep, FlakyNodeExecutionStore, OutcomeStep, RecordedInvocation, RecordingStep,
    SlowStep,
};
