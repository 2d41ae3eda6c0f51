use crate::reactor::poller::unix::{
    sys_accept, sys_connect, sys_peer_connected, sys_read, sys_socket_error, sys_wait_ready,
    sys_write,
};
use crate::reactor::request::{IoRequest, Op, Readiness, RequestId};

use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;

/// Caller-facing token for a descriptor registered with the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Handle {
    pub(crate) id: usize,
    pub(crate) fd: RawFd,
}

impl Handle {
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

/// How requests on a handle are serviced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoMode {
    /// Non-blocking descriptor driven by epoll readiness on the scheduler
    /// thread.
    Poll,

    /// Descriptor serviced by blocking syscalls on a broker worker.
    Offload,
}

/// Registry entry of a [`Handle`].
#[derive(Debug)]
pub(crate) struct HandleState {
    pub(crate) fd: RawFd,
    pub(crate) mode: IoMode,
    pub(crate) registered: bool,
    pub(crate) readable: bool,
    pub(crate) writable: bool,
    pub(crate) pending_read: Option<RequestId>,
    pub(crate) pending_write: Option<RequestId>,
}

impl HandleState {
    pub(crate) fn new(fd: RawFd, mode: IoMode) -> Self {
        Self {
            fd,
            mode,
            registered: false,
            readable: false,
            writable: false,
            pending_read: None,
            pending_write: None,
        }
    }

    pub(crate) fn is_ready(&self, direction: Readiness) -> bool {
        match direction {
            Readiness::Readable => self.readable,
            Readiness::Writable => self.writable,
        }
    }

    pub(crate) fn set_ready(&mut self, direction: Readiness, ready: bool) {
        match direction {
            Readiness::Readable => self.readable = ready,
            Readiness::Writable => self.writable = ready,
        }
    }

    pub(crate) fn pending_mut(&mut self, direction: Readiness) -> &mut Option<RequestId> {
        match direction {
            Readiness::Readable => &mut self.pending_read,
            Readiness::Writable => &mut self.pending_write,
        }
    }

    /// Ids of every request parked on this handle.
    pub(crate) fn take_pending(&mut self) -> impl Iterator<Item = RequestId> {
        self.pending_read.take().into_iter().chain(self.pending_write.take())
    }
}

/// Outcome of one attempt at a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Progress {
    /// Completed, successfully or with `error` set.
    Done,

    /// The descriptor is not ready; retry once readiness is reported.
    WouldBlock,
}

/// Attempts the request on a non-blocking descriptor.
///
/// Reads and writes loop over partial transfers until satisfied, the peer
/// closes, an error occurs or the descriptor would block. Progress made
/// before blocking is kept in the request's cursor.
pub(crate) fn perform(request: &mut IoRequest) -> Progress {
    let fd = request.fd;

    let outcome = match &mut request.op {
        Op::Read { buf, filled, exact } => read_into(fd, buf, filled, *exact),
        Op::Write { buf, written } => write_from(fd, buf, written),
        Op::Accept { accepted } => sys_accept(fd).map(|pair| *accepted = Some(pair)),
        Op::Connect { addr, started } => connect(fd, addr, started),
        // Readiness itself is the result.
        Op::Poll(_) => Ok(()),
    };

    match outcome {
        Ok(()) => {
            request.error = 0;
            Progress::Done
        }
        Err(err) if err.kind() == io::ErrorKind::WouldBlock => Progress::WouldBlock,
        Err(err) => {
            request.fail(err.raw_os_error().unwrap_or(libc::EIO));
            Progress::Done
        }
    }
}

/// Performs the request on a worker thread, blocking as long as needed.
///
/// A non-blocking descriptor that reports `EAGAIN` completes with `-EAGAIN`
/// and the scheduler parks the request on epoll readiness instead.
pub(crate) fn perform_blocking(request: &mut IoRequest) {
    if let Op::Poll(readiness) = request.op {
        if let Err(err) = sys_wait_ready(request.fd, readiness) {
            request.fail(err.raw_os_error().unwrap_or(libc::EIO));
            return;
        }
    }

    if perform(request) == Progress::WouldBlock {
        request.fail(libc::EAGAIN);
    }
}

fn read_into(fd: RawFd, buf: &mut [u8], filled: &mut usize, exact: bool) -> io::Result<()> {
    while *filled < buf.len() {
        let n = sys_read(fd, &mut buf[*filled..]);

        if n > 0 {
            *filled += n as usize;
            if !exact {
                break;
            }
            continue;
        }

        if n == 0 {
            break;
        }

        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }

    Ok(())
}

fn write_from(fd: RawFd, buf: &[u8], written: &mut usize) -> io::Result<()> {
    while *written < buf.len() {
        let n = sys_write(fd, &buf[*written..]);

        if n >= 0 {
            *written += n as usize;
            continue;
        }

        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            continue;
        }
        return Err(err);
    }

    Ok(())
}

fn connect(fd: RawFd, addr: &SocketAddr, started: &mut bool) -> io::Result<()> {
    if !*started {
        return match sys_connect(fd, addr) {
            Ok(()) => Ok(()),
            Err(err)
                if matches!(
                    err.raw_os_error(),
                    Some(libc::EINPROGRESS) | Some(libc::EALREADY)
                ) =>
            {
                *started = true;
                Err(io::ErrorKind::WouldBlock.into())
            }
            Err(err) => Err(err),
        };
    }

    if let Some(err) = sys_socket_error(fd)? {
        return Err(err);
    }

    // Unconnected sockets report writable too; only a peer means success.
    if sys_peer_connected(fd)? {
        Ok(())
    } else {
        Err(io::ErrorKind::WouldBlock.into())
    }
}
