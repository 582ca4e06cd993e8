//! Core domain types shared by every planflow module.
//!
//! - Node status and execution mode
//! - Step type descriptors
//! - Step responses and outputs
//! - Failure records

mod failure;
mod response;
mod status;
mod step_type;

pub use failure::FailureInfo;
pub use response::{OutputKind, StepOutput, StepResponse};
pub use status::{ExecutionMode, Status};
pub use step_type::{StepCategory, StepType};
