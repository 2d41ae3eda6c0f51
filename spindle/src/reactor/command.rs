use super::io::Handle;
use super::request::{Callback, IoSubmission};
use crate::runtime::task::TaskId;

/// Work a task hands to the scheduler outside of its own suspension.
///
/// Commands are queued by [`Ctx`](crate::Ctx) and applied by the scheduler
/// after the tick that produced them.
pub(crate) enum Command {
    /// Put a paused task back on the ready queue.
    Unpause { task: TaskId },

    /// Cancel every pending request of a handle and forget it.
    Deregister { handle: Handle },

    /// Submit a request whose completion invokes `callback`.
    Submit {
        submission: IoSubmission,
        callback: Callback,
    },
}
