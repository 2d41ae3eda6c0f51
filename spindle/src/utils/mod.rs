//! Allocation and threading utilities.
//!
//! This module provides low-level building blocks used internally by the
//! runtime:
//! - [`Pool`], a free-list slot allocator handing out stable indices,
//! - [`ThreadPool`], the named OS threads that run the broker's workers.

mod pool;
mod thread;

pub(crate) use pool::Pool;
pub use pool::PoolError;
pub(crate) use thread::ThreadPool;
