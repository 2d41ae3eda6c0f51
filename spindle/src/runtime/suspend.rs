use crate::reactor::request::{IoRequest, IoSubmission};
use crate::runtime::task::{Continuation, TaskHandle, TaskId, TaskResult};

use std::cell::Cell;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};

/// Why a task suspended.
pub(crate) enum Request {
    /// Give the other ready tasks a turn.
    Yield,

    /// Start a child and wait for its result.
    Await(Continuation),

    /// Start an independent task.
    Push(Continuation),

    /// Wait for the given number of milliseconds.
    Sleep(u64),

    /// Wait for an I/O request to complete.
    Io(IoSubmission),

    /// Wait for another task to unpause this one.
    Pause,
}

/// What the scheduler hands back to a suspended task.
pub(crate) enum Resume {
    Woken,
    Joined(TaskResult),
    Spawned(TaskHandle),
    Io(IoRequest),
    TimedOut,
}

/// Mailbox between a task and the scheduler.
pub(crate) struct TaskCell {
    pub(crate) id: TaskId,
    pub(crate) request: Cell<Option<Request>>,
    pub(crate) resume: Cell<Option<Resume>>,
}

impl TaskCell {
    pub(crate) fn new(id: TaskId) -> Self {
        Self {
            id,
            request: Cell::new(None),
            resume: Cell::new(None),
        }
    }
}

/// Future that posts a [`Request`] on its first poll and completes with the
/// [`Resume`] the scheduler writes back.
pub(crate) struct Suspend {
    cell: Rc<TaskCell>,
    request: Option<Request>,
}

impl Suspend {
    pub(crate) fn new(cell: Rc<TaskCell>, request: Request) -> Self {
        Self {
            cell,
            request: Some(request),
        }
    }
}

impl Future for Suspend {
    type Output = Resume;

    fn poll(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Resume> {
        if let Some(request) = self.request.take() {
            self.cell.request.set(Some(request));
            return Poll::Pending;
        }

        match self.cell.resume.take() {
            Some(resume) => Poll::Ready(resume),
            None => Poll::Pending,
        }
    }
}
