use crate::reactor::io::Handle;
use crate::runtime::task::{Continuation, TaskId};

use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;

/// Identifier of an in-flight request inside the scheduler's request pool.
pub(crate) type RequestId = usize;

/// Readiness direction of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Readiness {
    Readable,
    Writable,
}

/// The operation carried by an [`IoRequest`], with its typed payload.
///
/// Buffers are owned by the request while it is in flight and handed back
/// with the completion.
#[derive(Debug)]
pub enum Op {
    /// Read up to `buf.len()` bytes. `filled` is the running cursor.
    ///
    /// A non-`exact` read completes on the first chunk of data; an `exact`
    /// read accumulates partial reads until the buffer is full or the peer
    /// reaches end-of-file.
    Read {
        buf: Vec<u8>,
        filled: usize,
        exact: bool,
    },

    /// Write the whole of `buf`. `written` is the running cursor.
    Write { buf: Vec<u8>, written: usize },

    /// Accept one connection on a listening socket.
    Accept {
        accepted: Option<(RawFd, SocketAddr)>,
    },

    /// Connect a stream socket to `addr`.
    Connect { addr: SocketAddr, started: bool },

    /// Wait until the descriptor reports the given readiness.
    Poll(Readiness),
}

impl Op {
    pub fn read(len: usize) -> Self {
        Op::Read {
            buf: vec![0; len],
            filled: 0,
            exact: false,
        }
    }

    pub fn read_exact(len: usize) -> Self {
        Op::Read {
            buf: vec![0; len],
            filled: 0,
            exact: true,
        }
    }

    pub fn write(buf: Vec<u8>) -> Self {
        Op::Write { buf, written: 0 }
    }

    pub fn accept() -> Self {
        Op::Accept { accepted: None }
    }

    pub fn connect(addr: SocketAddr) -> Self {
        Op::Connect {
            addr,
            started: false,
        }
    }

    pub fn poll(readiness: Readiness) -> Self {
        Op::Poll(readiness)
    }

    /// Bytes still to be transferred by a read or write.
    pub fn remaining(&self) -> usize {
        match self {
            Op::Read { buf, filled, .. } => buf.len() - filled,
            Op::Write { buf, written } => buf.len() - written,
            _ => 0,
        }
    }

    /// Which readiness this operation waits for when it would block.
    pub(crate) fn direction(&self) -> Readiness {
        match self {
            Op::Read { .. } | Op::Accept { .. } => Readiness::Readable,
            Op::Write { .. } | Op::Connect { .. } => Readiness::Writable,
            Op::Poll(readiness) => *readiness,
        }
    }

    /// A connect must be initiated before there is any readiness to wait for.
    pub(crate) fn needs_initiation(&self) -> bool {
        matches!(self, Op::Connect { started: false, .. })
    }
}

/// Header of one pending I/O operation.
///
/// `error` is `0` on success and a negated `errno` once the operation failed
/// for good.
#[derive(Debug)]
pub struct IoRequest {
    pub(crate) id: RequestId,
    pub(crate) fd: RawFd,
    pub(crate) op: Op,
    pub(crate) error: i32,
}

impl IoRequest {
    pub(crate) fn new(id: RequestId, fd: RawFd, op: Op) -> Self {
        Self {
            id,
            fd,
            op,
            error: 0,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.fd
    }

    pub fn op(&self) -> &Op {
        &self.op
    }

    pub fn into_op(self) -> Op {
        self.op
    }

    /// `0` on success, a negated `errno` otherwise.
    pub fn error(&self) -> i32 {
        self.error
    }

    pub fn is_ok(&self) -> bool {
        self.error == 0
    }

    /// Converts the request into its payload, or the recorded OS error.
    pub fn into_result(self) -> io::Result<Op> {
        if self.error == 0 {
            Ok(self.op)
        } else {
            Err(io::Error::from_raw_os_error(-self.error))
        }
    }

    pub(crate) fn fail(&mut self, errno: i32) {
        self.error = -errno;
    }
}

/// An I/O request as handed over by a task, before it gets an id.
pub(crate) struct IoSubmission {
    pub(crate) handle: Handle,
    pub(crate) op: Op,

    /// Milliseconds after which the request is abandoned.
    pub(crate) timeout: Option<u64>,
}

/// Async-callback completion: receives the finished request and may return
/// the continuation to run next.
pub type Callback = Box<dyn FnOnce(IoRequest) -> Option<Continuation>>;

/// What happens when a request completes.
pub(crate) enum Completion {
    /// Wait-style: resume the task that submitted the request.
    Resume(TaskId),

    /// Callback-style: invoke the callback, spawn what it returns.
    Callback(Callback),
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::Resume(task) => f.debug_tuple("Resume").field(task).finish(),
            Completion::Callback(_) => f.write_str("Callback"),
        }
    }
}

/// Scheduler-side record of an in-flight request.
pub(crate) struct Pending {
    /// `None` while the header is with a worker or being performed.
    pub(crate) request: Option<IoRequest>,
    pub(crate) handle: Handle,
    pub(crate) completion: Completion,

    /// Whether the id currently sits in the completion batch.
    pub(crate) queued: bool,
}
