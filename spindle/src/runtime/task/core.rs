use super::handle::TaskState;
use crate::reactor::request::RequestId;
use crate::reactor::timer::TimerKey;
use crate::runtime::context::Ctx;
use crate::runtime::suspend::TaskCell;

use std::any::Any;
use std::io;
use std::panic;
use std::pin::Pin;
use std::rc::Rc;

/// Index of a task inside the scheduler's task pool.
pub type TaskId = usize;

/// What a task body evaluates to.
pub type TaskResult = Result<i64, TaskError>;

/// Payload of a captured panic.
pub type PanicPayload = Box<dyn Any + Send + 'static>;

pub(crate) type TaskFuture = Pin<Box<dyn Future<Output = TaskResult>>>;

/// Failure of a task body.
#[derive(Debug, thiserror::Error)]
pub enum TaskError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("task failed with code {0}")]
    Code(i32),

    #[error("task panicked: {message}")]
    Panicked {
        message: String,
        payload: PanicPayload,
    },

    #[error("operation timed out")]
    TimedOut,
}

impl TaskError {
    pub(crate) fn from_panic(payload: PanicPayload) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "opaque panic payload".to_owned()
        };

        TaskError::Panicked { message, payload }
    }

    pub fn is_panic(&self) -> bool {
        matches!(self, TaskError::Panicked { .. })
    }

    /// Resumes unwinding if this error is a captured panic, and returns any
    /// other error unchanged.
    pub fn rethrow(self) -> Self {
        match self {
            TaskError::Panicked { payload, .. } => panic::resume_unwind(payload),
            other => other,
        }
    }
}

/// The body of a task, not started yet.
///
/// The closure receives the task's [`Ctx`] when the scheduler resumes it for
/// the first time.
pub struct Continuation(Box<dyn FnOnce(Ctx) -> TaskFuture>);

impl Continuation {
    pub fn new<F, Fut>(body: F) -> Self
    where
        F: FnOnce(Ctx) -> Fut + 'static,
        Fut: Future<Output = TaskResult> + 'static,
    {
        Continuation(Box::new(move |cx| Box::pin(body(cx))))
    }

    pub(crate) fn start(self, cx: Ctx) -> TaskFuture {
        (self.0)(cx)
    }
}

pub(crate) enum Body {
    Fresh(Continuation),
    Running(TaskFuture),

    /// Transient, while the body is being started or polled.
    Empty,
}

/// What a parked task is waiting on, so the loser of a timeout race can be
/// torn down.
#[derive(Default)]
pub(crate) struct Park {
    pub(crate) timer: Option<TimerKey>,
    pub(crate) request: Option<RequestId>,
}

/// A task as stored in the scheduler's pool.
pub(crate) struct Task {
    pub(crate) body: Body,
    pub(crate) cell: Rc<TaskCell>,
    pub(crate) state: Rc<TaskState>,

    /// Task blocked in `join` on this one.
    pub(crate) waiter: Option<TaskId>,

    /// Child this task is blocked on.
    pub(crate) child: Option<TaskId>,
    pub(crate) park: Park,
}

impl Task {
    pub(crate) fn new(id: TaskId, body: Continuation, waiter: Option<TaskId>) -> Self {
        Self {
            body: Body::Fresh(body),
            cell: Rc::new(TaskCell::new(id)),
            state: TaskState::new(id),
            waiter,
            child: None,
            park: Park::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::TaskError;
    use std::panic::{self, AssertUnwindSafe};

    #[test]
    fn panic_message_is_extracted() {
        let payload = panic::catch_unwind(|| panic!("boom {}", 7)).unwrap_err();
        let error = TaskError::from_panic(payload);

        assert!(error.is_panic());
        assert_eq!(error.to_string(), "task panicked: boom 7");
    }

    #[test]
    fn rethrow_resumes_the_original_panic() {
        let payload = panic::catch_unwind(|| panic!("inner")).unwrap_err();
        let error = TaskError::from_panic(payload);

        let caught = panic::catch_unwind(AssertUnwindSafe(|| error.rethrow())).unwrap_err();
        assert_eq!(caught.downcast_ref::<&str>(), Some(&"inner"));
    }

    #[test]
    fn rethrow_passes_other_errors_through() {
        assert!(matches!(TaskError::Code(3).rethrow(), TaskError::Code(3)));
    }
}
