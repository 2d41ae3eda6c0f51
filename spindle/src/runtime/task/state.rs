/// Lifecycle state of a task.
///
/// A task starts `Fresh`, becomes `Executing` whenever the scheduler
/// resumes it and records why it suspended. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Created, never resumed.
    Fresh,

    /// Resumed this tick, or re-armed by a completion.
    Executing,

    /// Suspended for one round of the ready queue.
    Yield,

    /// Waiting on a child started with `join`.
    Waiting,

    /// Parked on an I/O request.
    WaitingFd,

    /// Parked on a timer.
    WaitingTimer,

    /// Forked an independent task and is re-polled within the same tick.
    PushTask,

    /// Parked until another task unpauses it.
    Paused,

    /// Finished successfully with nobody waiting on it.
    Done,

    /// Finished with an error.
    Error,

    /// Panicked.
    UnhandledException,

    /// Finished and handed its result to the task waiting on it.
    WakeParent,

    /// Destroyed at shutdown without finishing.
    Zombie,
}

impl Status {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Done
                | Status::Error
                | Status::UnhandledException
                | Status::WakeParent
                | Status::Zombie
        )
    }
}
