//! Task primitives.
//!
//! A task is a boxed future driven by the scheduler as an explicit state
//! machine: it suspends by writing a request into its cell, and the
//! scheduler writes the outcome back before resuming it.

mod core;
mod handle;
mod state;

pub(crate) use core::{Body, Task};

pub use core::{Continuation, PanicPayload, TaskError, TaskId, TaskResult};
pub use handle::TaskHandle;
pub use state::Status;
