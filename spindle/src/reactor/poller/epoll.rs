//! Linux `epoll`-based poller.
//!
//! Responsibilities:
//! - Register socket descriptors for edge-triggered readiness
//! - Block waiting for readiness, with a millisecond timeout
//! - Wake up when broker workers publish completions

use super::common::Interest;
use crate::reactor::event::Event;
use crate::reactor::poller::Waker;

use libc::{
    EPOLL_CLOEXEC, EPOLL_CTL_ADD, EPOLL_CTL_DEL, EPOLL_CTL_MOD, EPOLLERR, EPOLLET, EPOLLHUP,
    EPOLLIN, EPOLLOUT, EPOLLRDHUP, epoll_create1, epoll_ctl, epoll_event, epoll_wait,
};
use std::io;
use std::os::unix::io::RawFd;
use std::sync::Arc;

/// Reserved token used internally for the wake-up event.
///
/// Handle ids come from a pool index and never reach `u64::MAX`.
const WAKE_TOKEN: u64 = u64::MAX;

/// Linux `epoll` poller.
///
/// Owns the `epoll` instance and a reusable event buffer sized to the
/// configured maximum number of events per wait. The wake-up `eventfd` is
/// shared with the workers through [`Waker`].
pub(crate) struct EpollPoller {
    epoll: RawFd,
    events: Vec<epoll_event>,
    waker: Arc<Waker>,
}

impl EpollPoller {
    /// Create the epoll instance and register the wake-up `eventfd` on it.
    pub(crate) fn new(max_events: usize) -> io::Result<Self> {
        let epoll = unsafe { epoll_create1(EPOLL_CLOEXEC) };
        if epoll < 0 {
            return Err(io::Error::last_os_error());
        }

        let eventfd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if eventfd < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll) };
            return Err(err);
        }
        let waker = Arc::new(Waker(eventfd));

        let mut event = epoll_event {
            events: EPOLLIN as u32,
            u64: WAKE_TOKEN,
        };

        let rc = unsafe { epoll_ctl(epoll, EPOLL_CTL_ADD, waker.0, &mut event) };
        if rc < 0 {
            let err = io::Error::last_os_error();
            unsafe { libc::close(epoll) };
            return Err(err);
        }

        Ok(Self {
            epoll,
            events: Vec::with_capacity(max_events.max(1)),
            waker,
        })
    }

    pub(crate) fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Register `fd` for edge-triggered readiness.
    ///
    /// A descriptor that is already known to this epoll instance gets its
    /// registration refreshed instead.
    pub(crate) fn poll_op(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        let mut flags = EPOLLET | EPOLLRDHUP;

        if interest.read {
            flags |= EPOLLIN;
        }
        if interest.write {
            flags |= EPOLLOUT;
        }

        let mut event = epoll_event {
            events: flags as u32,
            u64: token as u64,
        };

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_ADD, fd, &mut event) };
        if rc == 0 {
            return Ok(());
        }

        let err = io::Error::last_os_error();
        if err.raw_os_error() != Some(libc::EEXIST) {
            return Err(err);
        }

        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_MOD, fd, &mut event) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Remove a descriptor from the interest set.
    pub(crate) fn poll_del(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe { epoll_ctl(self.epoll, EPOLL_CTL_DEL, fd, std::ptr::null_mut()) };
        if rc < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }

    /// Wait for readiness for at most `timeout_ms` milliseconds (`-1` blocks).
    ///
    /// Events for the same token are coalesced. An interrupted wait reports
    /// zero events. Returns whether the wake-up `eventfd` fired.
    pub(crate) fn poll(&mut self, events: &mut Vec<Event>, timeout_ms: i32) -> io::Result<bool> {
        events.clear();

        let n = unsafe {
            epoll_wait(
                self.epoll,
                self.events.as_mut_ptr(),
                self.events.capacity() as i32,
                timeout_ms,
            )
        };

        if n < 0 {
            let err = io::Error::last_os_error();
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(false);
            }
            return Err(err);
        }

        unsafe {
            self.events.set_len(n as usize);
        }

        let mut woken = false;

        for ev in &self.events {
            if ev.u64 == WAKE_TOKEN {
                self.waker.drain()?;
                woken = true;
                continue;
            }

            let token = ev.u64 as usize;
            let flags = ev.events;

            let failed = (EPOLLERR | EPOLLHUP) as u32;
            let readable = flags & (EPOLLIN as u32 | EPOLLRDHUP as u32 | failed) != 0;
            let writable = flags & (EPOLLOUT as u32 | failed) != 0;

            if let Some(e) = events.iter_mut().find(|e| e.token == token) {
                e.readable |= readable;
                e.writable |= writable;
            } else {
                events.push(Event {
                    token,
                    readable,
                    writable,
                });
            }
        }

        unsafe {
            self.events.set_len(0);
        }

        Ok(woken)
    }
}

impl Drop for EpollPoller {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.epoll);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::EpollPoller;
    use crate::reactor::poller::common::Interest;
    use std::io::Write;
    use std::os::fd::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn reports_initial_writability() {
        let mut poller = EpollPoller::new(8).unwrap();
        let (left, _right) = UnixStream::pair().unwrap();

        poller.poll_op(left.as_raw_fd(), 3, Interest::BOTH).unwrap();

        let mut events = Vec::new();
        poller.poll(&mut events, 100).unwrap();

        assert_eq!(events.len(), 1);
        assert_eq!(events[0].token, 3);
        assert!(events[0].writable);
        assert!(!events[0].readable);
    }

    #[test]
    fn coalesces_and_reports_readability() {
        let mut poller = EpollPoller::new(8).unwrap();
        let (left, mut right) = UnixStream::pair().unwrap();

        poller.poll_op(left.as_raw_fd(), 7, Interest::BOTH).unwrap();
        // Registering twice refreshes the registration.
        poller.poll_op(left.as_raw_fd(), 7, Interest::BOTH).unwrap();
        right.write_all(b"ping").unwrap();

        let mut events = Vec::new();
        poller.poll(&mut events, 100).unwrap();

        assert_eq!(events.len(), 1);
        assert!(events[0].readable);
    }

    #[test]
    fn waker_interrupts_wait() {
        let mut poller = EpollPoller::new(8).unwrap();
        let waker = poller.waker();

        std::thread::spawn(move || waker.wake());

        let mut events = Vec::new();
        let woken = poller.poll(&mut events, 5_000).unwrap();

        assert!(woken);
        assert!(events.is_empty());
    }

    #[test]
    fn deregistered_descriptor_is_silent() {
        let mut poller = EpollPoller::new(8).unwrap();
        let (left, _right) = UnixStream::pair().unwrap();

        poller.poll_op(left.as_raw_fd(), 1, Interest::BOTH).unwrap();
        poller.poll_del(left.as_raw_fd()).unwrap();

        let mut events = Vec::new();
        poller.poll(&mut events, 0).unwrap();
        assert!(events.is_empty());
    }

    #[test]
    fn waker_outlives_poller() {
        let poller = EpollPoller::new(8).unwrap();
        let waker = poller.waker();
        drop(poller);

        // The eventfd still belongs to the waker.
        assert!(unsafe { libc::fcntl(waker.0, libc::F_GETFD) } >= 0);

        waker.wake();
        let mut count = 0u64;
        let rc = unsafe { libc::read(waker.0, &mut count as *mut u64 as *mut _, 8) };
        assert_eq!(rc, 8);
        assert_eq!(count, 1);
    }
}
