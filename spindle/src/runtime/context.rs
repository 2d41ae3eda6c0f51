use crate::reactor::command::Command;
use crate::reactor::io::{Handle, HandleState, IoMode};
use crate::reactor::request::{IoRequest, IoSubmission, Op, Readiness};
use crate::runtime::suspend::{Request, Resume, Suspend, TaskCell};
use crate::runtime::task::{Continuation, Status, TaskError, TaskHandle, TaskId, TaskResult};
use crate::time::TimeSource;
use crate::utils::Pool;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::net::SocketAddr;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::sync::Arc;
use tracing::debug;

/// Scheduler state tasks may touch between suspensions.
pub(crate) struct Shared {
    pub(crate) handles: RefCell<Pool<HandleState>>,
    pub(crate) commands: RefCell<VecDeque<Command>>,
    pub(crate) time: Arc<dyn TimeSource>,
}

impl Shared {
    pub(crate) fn register(&self, fd: RawFd, mode: IoMode) -> Handle {
        let id = self
            .handles
            .borrow_mut()
            .insert(HandleState::new(fd, mode));

        debug!(handle = id, fd, ?mode, "handle registered");
        Handle { id, fd }
    }
}

/// The execution context handed to every task.
///
/// All scheduler services are reached through it: suspension points
/// (`yield_now`, `sleep`, `join`, `pause`, I/O) and the operations that
/// take effect between ticks (`unpause`, `deregister`, `submit_with`).
pub struct Ctx {
    cell: Rc<TaskCell>,
    shared: Rc<Shared>,
}

impl Ctx {
    pub(crate) fn new(cell: Rc<TaskCell>, shared: Rc<Shared>) -> Self {
        Self { cell, shared }
    }

    /// Id of the task this context belongs to.
    pub fn id(&self) -> TaskId {
        self.cell.id
    }

    /// Current time of the scheduler's clock, in milliseconds.
    pub fn now(&self) -> u64 {
        self.shared.time.now_ms()
    }

    async fn suspend(&self, request: Request) -> Resume {
        Suspend::new(self.cell.clone(), request).await
    }

    /// Lets every other ready task run once before this one continues.
    pub async fn yield_now(&self) {
        self.suspend(Request::Yield).await;
    }

    /// Parks the task for `ms` milliseconds.
    pub async fn sleep(&self, ms: u64) {
        self.suspend(Request::Sleep(ms)).await;
    }

    /// Runs `body` as a child task and waits for its result.
    ///
    /// A panic in the child comes back as [`TaskError::Panicked`].
    pub async fn join<F, Fut>(&self, body: F) -> TaskResult
    where
        F: FnOnce(Ctx) -> Fut + 'static,
        Fut: Future<Output = TaskResult> + 'static,
    {
        match self.suspend(Request::Await(Continuation::new(body))).await {
            Resume::Joined(result) => result,
            _ => unreachable!("join resumed without a result"),
        }
    }

    /// Like [`join`](Self::join), but a panic in the child resumes unwinding
    /// in this task.
    pub async fn join_propagate<F, Fut>(&self, body: F) -> TaskResult
    where
        F: FnOnce(Ctx) -> Fut + 'static,
        Fut: Future<Output = TaskResult> + 'static,
    {
        self.join(body).await.map_err(TaskError::rethrow)
    }

    /// Starts `body` as an independent task.
    ///
    /// The new task is scheduled and this one continues within the same
    /// tick.
    pub async fn spawn<F, Fut>(&self, body: F) -> TaskHandle
    where
        F: FnOnce(Ctx) -> Fut + 'static,
        Fut: Future<Output = TaskResult> + 'static,
    {
        match self.suspend(Request::Push(Continuation::new(body))).await {
            Resume::Spawned(handle) => handle,
            _ => unreachable!("spawn resumed without a handle"),
        }
    }

    /// Parks the task until another task calls [`unpause`](Self::unpause).
    pub async fn pause(&self) {
        self.suspend(Request::Pause).await;
    }

    /// Puts a paused task back on the ready queue after the current tick.
    ///
    /// Returns `false` if the task is not paused.
    pub fn unpause(&self, handle: &TaskHandle) -> bool {
        if handle.status() != Status::Paused {
            return false;
        }

        self.shared
            .commands
            .borrow_mut()
            .push_back(Command::Unpause { task: handle.id() });
        true
    }

    /// Registers a descriptor with the scheduler.
    ///
    /// Readiness-mode descriptors must be non-blocking. The caller keeps
    /// ownership of `fd` and must keep it open while requests are in flight.
    pub fn register(&self, fd: RawFd, mode: IoMode) -> Handle {
        self.shared.register(fd, mode)
    }

    /// Forgets a handle after the current tick.
    ///
    /// Requests parked on it complete with `-ECANCELED`.
    pub fn deregister(&self, handle: Handle) {
        self.shared
            .commands
            .borrow_mut()
            .push_back(Command::Deregister { handle });
    }

    /// Submits `op` on `handle` and waits for it to complete.
    pub async fn submit(&self, handle: Handle, op: Op) -> IoRequest {
        let submission = IoSubmission {
            handle,
            op,
            timeout: None,
        };

        match self.suspend(Request::Io(submission)).await {
            Resume::Io(request) => request,
            _ => unreachable!("I/O wait resumed without its request"),
        }
    }

    /// Submits `op` and waits for at most `ms` milliseconds.
    ///
    /// Returns `None` if the timer won; the request is then withdrawn.
    /// Only readiness-mode handles support timeouts, others complete with
    /// `-EOPNOTSUPP`.
    pub async fn submit_timeout(&self, handle: Handle, op: Op, ms: u64) -> Option<IoRequest> {
        let submission = IoSubmission {
            handle,
            op,
            timeout: Some(ms),
        };

        match self.suspend(Request::Io(submission)).await {
            Resume::Io(request) => Some(request),
            Resume::TimedOut => None,
            _ => unreachable!("I/O wait resumed without its request"),
        }
    }

    /// Submits `op` without waiting.
    ///
    /// `callback` runs on the scheduler thread with the completed request;
    /// the continuation it returns, if any, is spawned as a new task.
    pub fn submit_with<F>(&self, handle: Handle, op: Op, callback: F)
    where
        F: FnOnce(IoRequest) -> Option<Continuation> + 'static,
    {
        let submission = IoSubmission {
            handle,
            op,
            timeout: None,
        };

        self.shared
            .commands
            .borrow_mut()
            .push_back(Command::Submit {
                submission,
                callback: Box::new(callback),
            });
    }

    /// Reads up to `len` bytes.
    ///
    /// An empty buffer means the peer closed the connection.
    pub async fn read(&self, handle: Handle, len: usize) -> io::Result<Vec<u8>> {
        match self.submit(handle, Op::read(len)).await.into_result()? {
            Op::Read {
                mut buf, filled, ..
            } => {
                buf.truncate(filled);
                Ok(buf)
            }
            _ => unreachable!("read completed with a different op"),
        }
    }

    /// Reads exactly `len` bytes, failing with `UnexpectedEof` if the peer
    /// closes first.
    pub async fn read_exact(&self, handle: Handle, len: usize) -> io::Result<Vec<u8>> {
        match self.submit(handle, Op::read_exact(len)).await.into_result()? {
            Op::Read { buf, filled, .. } if filled == buf.len() => Ok(buf),
            Op::Read { .. } => Err(io::ErrorKind::UnexpectedEof.into()),
            _ => unreachable!("read_exact completed with a different op"),
        }
    }

    /// Writes the whole buffer and returns the number of bytes written.
    pub async fn write(&self, handle: Handle, buf: impl Into<Vec<u8>>) -> io::Result<usize> {
        match self.submit(handle, Op::write(buf.into())).await.into_result()? {
            Op::Write { written, .. } => Ok(written),
            _ => unreachable!("write completed with a different op"),
        }
    }

    /// Accepts one connection. The new descriptor is non-blocking and owned
    /// by the caller.
    pub async fn accept(&self, handle: Handle) -> io::Result<(RawFd, SocketAddr)> {
        match self.submit(handle, Op::accept()).await.into_result()? {
            Op::Accept {
                accepted: Some(pair),
            } => Ok(pair),
            _ => unreachable!("accept completed without a connection"),
        }
    }

    /// Connects the socket behind `handle` to `addr`.
    pub async fn connect(&self, handle: Handle, addr: SocketAddr) -> io::Result<()> {
        self.submit(handle, Op::connect(addr)).await.into_result()?;
        Ok(())
    }

    /// Waits until the descriptor reports `readiness`.
    pub async fn ready(&self, handle: Handle, readiness: Readiness) -> io::Result<()> {
        self.submit(handle, Op::poll(readiness)).await.into_result()?;
        Ok(())
    }
}
