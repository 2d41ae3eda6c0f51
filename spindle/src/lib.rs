//! # Spindle
//!
//! **Spindle** is a single-threaded cooperative task scheduler for Rust,
//! coupled to an epoll socket broker backed by a pool of worker threads.
//!
//! Tasks are ordinary `async` blocks. They suspend only at explicit points
//! (yielding, waiting on a child, on I/O, on a timer, or on being paused)
//! and are resumed by the scheduler in round-robin order. Every scheduler
//! service is reached through the [`Ctx`] each task receives; there is no
//! global runtime state.
//!
//! Spindle provides:
//!
//! - A **cursor round-robin ready queue** with fairness quanta between I/O
//!   phases
//! - **Readiness I/O** on non-blocking sockets, driven by edge-triggered
//!   epoll on the scheduler thread
//! - **Offloaded I/O** performed by blocking worker threads, handed over
//!   through a lock-free bounded [`RingQueue`](sync::RingQueue)
//! - A **timer heap** for sleeps and I/O timeouts
//! - **`#[spindle::test]`** to run an async test body on a scheduler
//!
//! ## Quick Start
//!
//! ```rust
//! use spindle::SchedulerBuilder;
//!
//! let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();
//!
//! let handle = scheduler.spawn(|cx| async move {
//!     let child = cx.join(|cx| async move {
//!         cx.sleep(5).await;
//!         Ok(20)
//!     });
//!
//!     Ok(child.await? + 1)
//! });
//!
//! assert_eq!(scheduler.run(), 0);
//! assert_eq!(handle.take_result().unwrap().unwrap(), 21);
//! ```
//!
//! ## Modules
//!
//! - [`task`]: Task handles, statuses and errors
//! - [`sync`]: The lock-free ring queue
//! - [`time`]: Time sources for the timer heap
//! - [`net`]: Descriptor handles and I/O requests

mod error;
mod reactor;
mod runtime;
mod utils;

pub mod sync;
pub mod time;

pub mod net {
    //! Descriptor handles and the I/O requests submitted on them.

    pub use crate::reactor::{Callback, Handle, IoMode, IoRequest, Op, Readiness};
}

pub use error::{BrokerError, SchedulerError};
pub use runtime::task;
pub use runtime::task::{Continuation, Status, TaskError, TaskHandle, TaskResult};
pub use runtime::{Ctx, Scheduler, SchedulerBuilder};
pub use utils::PoolError;

pub use spindle_macros::test;
