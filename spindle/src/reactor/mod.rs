//! Socket broker and I/O plumbing.
//!
//! This module implements everything between a task's I/O request and
//! the operating system:
//! - the epoll poller and its cross-thread waker,
//! - the broker and its blocking worker pool,
//! - the typed request model and the syscalls that perform it,
//! - the timer heap that feeds the scheduler's wake deadline.
//!
//! Most runtime users only see [`Handle`], [`IoMode`], [`Op`] and
//! [`IoRequest`], reached through [`Ctx`](crate::Ctx).

mod worker;

pub(crate) mod broker;
pub(crate) mod command;
pub(crate) mod event;
pub(crate) mod io;
pub(crate) mod poller;
pub(crate) mod request;
pub(crate) mod timer;

pub use io::{Handle, IoMode};
pub use request::{Callback, IoRequest, Op, Readiness};
