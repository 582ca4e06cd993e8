//! Scheduling primitives.
//!
//! Every trigger, start and resume in the engine runs as a unit of work on
//! the [`WorkerPool`] instead of inline, so graph depth never turns into
//! stack depth. [`AbortSignal`] carries a plan's abort request to every unit
//! of work that belongs to it.

mod pool;
mod signal;

pub use pool::WorkerPool;
pub use signal::AbortSignal;
