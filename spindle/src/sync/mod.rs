//! Cross-thread hand-off primitives.
//!
//! - [`RingQueue`]: the bounded lock-free MPMC queue carrying I/O requests
//!   to the broker's workers and their completions back,
//! - a counting semaphore used to wake idle workers.

mod ring;
mod semaphore;

pub use ring::{MAX_ORDER, RingError, RingQueue};

pub(crate) use semaphore::Semaphore;
