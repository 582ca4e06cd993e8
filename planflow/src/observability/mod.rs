//! Logging setup and tracing spans.

mod logging;
mod spans;

pub use logging::{init_tracing, LogFormat, LoggingConfig};
pub use spans::{node_span, plan_span};
