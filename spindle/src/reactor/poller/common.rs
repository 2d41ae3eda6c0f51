use std::io;
use std::os::fd::RawFd;

#[derive(Clone, Copy)]
pub(crate) struct Interest {
    pub(crate) read: bool,
    pub(crate) write: bool,
}

impl Interest {
    /// Sockets are registered once for both directions; each direction keeps
    /// its own readiness bit.
    pub(crate) const BOTH: Interest = Interest {
        read: true,
        write: true,
    };
}

/// Cross-thread wake-up handle backed by an `eventfd`.
///
/// Writing to it makes a blocked `epoll_wait` return. The descriptor is
/// closed when the last clone is dropped, so workers may outlive the poller.
pub(crate) struct Waker(pub(crate) RawFd);

unsafe impl Send for Waker {}
unsafe impl Sync for Waker {}

impl Waker {
    /// Wake the poller.
    ///
    /// The counter saturates rather than blocks, so repeated wakes before the
    /// poller drains it collapse into one.
    pub(crate) fn wake(&self) {
        let buf: u64 = 1;
        unsafe {
            libc::write(self.0, &buf as *const u64 as *const _, 8);
        }
    }

    /// Reset the counter after a wake-up was observed.
    pub(crate) fn drain(&self) -> io::Result<()> {
        let mut buf = 0u64;
        let rc = unsafe { libc::read(self.0, &mut buf as *mut u64 as *mut _, 8) };

        if rc < 0 {
            let err = io::Error::last_os_error();
            if err.kind() != io::ErrorKind::WouldBlock {
                return Err(err);
            }
        }

        Ok(())
    }
}

impl Drop for Waker {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}
