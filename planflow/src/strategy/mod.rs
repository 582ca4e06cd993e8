//! Strategy expansion for matrix, for-loop and parallelism fan-outs.
//!
//! Expansion is pure and synchronous: given a [`StrategyConfig`] and the id
//! of the node to fan out, [`fetch_children`] returns the ordered list of
//! child iterations with their [`StrategyMetadata`]. The order is stable
//! across calls, which lets a retried plan re-identify every iteration of
//! the original run.

mod config;
mod expansion;
mod metadata;

pub use config::{ForLoopConfig, MatrixAxis, MatrixConfig, ParallelismConfig, StrategyConfig};
pub use expansion::{fetch_bare_children, fetch_children, ExpandedChild};
pub use metadata::{MatrixMetadata, StrategyMetadata};
