use super::core::{TaskId, TaskResult};
use super::state::Status;

use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// State a task shares with the handles observing it.
pub(crate) struct TaskState {
    pub(crate) id: TaskId,
    pub(crate) status: Cell<Status>,
    pub(crate) result: RefCell<Option<TaskResult>>,
}

impl TaskState {
    pub(crate) fn new(id: TaskId) -> Rc<Self> {
        Rc::new(Self {
            id,
            status: Cell::new(Status::Fresh),
            result: RefCell::new(None),
        })
    }

    /// Whether a [`TaskHandle`] is still alive for this task.
    pub(crate) fn is_observed(self: &Rc<Self>) -> bool {
        Rc::strong_count(self) > 1
    }
}

/// A handle to a spawned task.
///
/// A `TaskHandle` observes the task's status and collects its result once
/// it finished without a waiter. Dropping it does **not** cancel the task;
/// an error nobody observes is logged and discarded.
#[derive(Clone)]
pub struct TaskHandle {
    pub(crate) state: Rc<TaskState>,
}

impl TaskHandle {
    pub fn id(&self) -> TaskId {
        self.state.id
    }

    pub fn status(&self) -> Status {
        self.state.status.get()
    }

    pub fn is_finished(&self) -> bool {
        self.status().is_terminal()
    }

    /// Takes the task's result.
    ///
    /// Returns `None` while the task runs, after the result was taken, and
    /// when the result went to a waiter instead.
    pub fn take_result(&self) -> Option<TaskResult> {
        self.state.result.borrow_mut().take()
    }
}

impl std::fmt::Debug for TaskHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskHandle")
            .field("id", &self.id())
            .field("status", &self.status())
            .finish()
    }
}
