//! # Planflow
//!
//! An execution orchestration engine for compiled pipeline plans.
//!
//! A [`plan::Plan`] is a graph of nodes. Each node names a step type; leaf
//! steps do the work, while parent steps (sections, forks and strategies)
//! fan out into child node executions and resume once every child has
//! reported. Planflow provides:
//!
//! - **Strategy expansion**: matrix, for-loop and parallelism fan-out with
//!   per-child iteration metadata
//! - **Ambiance**: the hierarchical execution context carried by every node
//! - **Adviser-driven transitions**: retry with backoff, manual
//!   intervention, mark success or failure, end the plan
//! - **Wait/notify correlation**: parents and async steps resume once all
//!   their correlation ids are published
//! - **Plan retries**: failed nodes run again while succeeded nodes replay
//!   their original outputs
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use planflow::prelude::*;
//!
//! let plan = PlanBuilder::new("deploy")
//!     .root("build")
//!     .node(Node::new("build", "build", StepType::step("SHELL")))?
//!     .build()?;
//!
//! let engine = OrchestrationEngine::builder().step(ShellStep::default()).build()?;
//! let result = engine.run(plan).await?;
//! assert_eq!(result.status, Status::Succeeded);
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod adviser;
pub mod ambiance;
pub mod config;
pub mod core;
pub mod dispatch;
pub mod engine;
pub mod errors;
pub mod events;
pub mod execution;
pub mod observability;
pub mod persistence;
pub mod plan;
pub mod retry;
pub mod steps;
pub mod strategy;
pub mod testing;
pub mod waiter;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::adviser::{
        AdviserConfig, AdviserResponse, ChildrenFailureMode, FailurePolicy,
        InterventionAction,
    };
    pub use crate::ambiance::{Ambiance, Level, RetryInfo};
    pub use crate::config::EngineConfig;
    pub use crate::core::{
        ExecutionMode, FailureInfo, OutputKind, Status, StepCategory, StepOutput,
        StepResponse, StepType,
    };
    pub use crate::engine::{EngineBuilder, NodeStrategy, OrchestrationEngine};
    pub use crate::errors::{
        PersistenceError, PlanValidationError, PlanflowError, StepError,
        StrategyConfigError,
    };
    pub use crate::events::{EngineEvent, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::execution::{ExecutionKind, NodeExecution, PlanExecution};
    pub use crate::observability::{init_tracing, LoggingConfig};
    pub use crate::plan::{Node, Plan, PlanBuilder, RetryRequest};
    pub use crate::retry::RetryConfig;
    pub use crate::steps::{
        AsyncExecutable, ChildSpec, ChildrenExecutable, Executable, Step,
        StepContext, StepRegistry,
    };
    pub use crate::strategy::{
        ForLoopConfig, MatrixConfig, ParallelismConfig, StrategyConfig,
    };
    pub use crate::waiter::{ResponseData, WaitNotifyEngine};
}
