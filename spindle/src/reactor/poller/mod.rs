//! Linux readiness poller.
//!
//! This module wraps the operating system facilities used by the socket
//! broker to:
//! - wait for edge-triggered readiness on registered descriptors,
//! - be woken up from another thread when worker completions arrive,
//! - perform the raw non-blocking syscalls behind each I/O operation.

pub(crate) mod common;

mod epoll;

pub(crate) mod unix;

pub(crate) use common::{Interest, Waker};
pub(crate) use epoll::EpollPoller as Poller;
