use crate::runtime::task::TaskId;
use crate::time::TimeSource;

use std::cmp::Ordering;
use std::collections::{BinaryHeap, HashSet};
use std::sync::Arc;

/// Identifies one armed timer so it can be cancelled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct TimerKey(u64);

/// An entry in the timer heap.
struct TimerEntry {
    expiry: u64,
    seq: u64,
    task: TaskId,
}

impl Eq for TimerEntry {}

impl PartialEq for TimerEntry {
    fn eq(&self, other: &Self) -> bool {
        self.expiry == other.expiry && self.seq == other.seq
    }
}

impl Ord for TimerEntry {
    /// Orders entries by expiry, then by insertion.
    ///
    /// The comparison is **reversed** so that a `BinaryHeap<TimerEntry>`
    /// behaves as a min-heap.
    fn cmp(&self, other: &Self) -> Ordering {
        (other.expiry, other.seq).cmp(&(self.expiry, self.seq))
    }
}

impl PartialOrd for TimerEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Result of [`Clock::next`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Next {
    /// No timer is armed.
    Empty,

    /// The earliest timer has expired; its task is handed out.
    Expired(TaskId),

    /// Milliseconds until the earliest timer expires.
    Wait(u64),
}

/// Min-heap of task wake-up deadlines.
///
/// Entries with equal expiry fire in the order they were pushed. Cancelled
/// entries are dropped lazily when they reach the top of the heap.
pub(crate) struct Clock {
    heap: BinaryHeap<TimerEntry>,
    cancelled: HashSet<u64>,
    seq: u64,
    source: Arc<dyn TimeSource>,
}

impl Clock {
    pub(crate) fn new(source: Arc<dyn TimeSource>) -> Self {
        Self {
            heap: BinaryHeap::new(),
            cancelled: HashSet::new(),
            seq: 0,
            source,
        }
    }

    pub(crate) fn now(&self) -> u64 {
        self.source.now_ms()
    }

    /// Arms a timer firing `delay_ms` from now for `task`.
    pub(crate) fn push(&mut self, delay_ms: u64, task: TaskId) -> TimerKey {
        let seq = self.seq;
        self.seq += 1;

        self.heap.push(TimerEntry {
            expiry: self.now().saturating_add(delay_ms),
            seq,
            task,
        });

        TimerKey(seq)
    }

    /// Inspects the earliest live timer against `now`.
    pub(crate) fn next(&mut self, now: u64) -> Next {
        while let Some(top) = self.heap.peek() {
            if self.cancelled.remove(&top.seq) {
                self.heap.pop();
                continue;
            }

            if top.expiry > now {
                return Next::Wait(top.expiry - now);
            }

            let task = top.task;
            self.heap.pop();
            return Next::Expired(task);
        }

        Next::Empty
    }

    /// Disarms a timer that has not fired yet.
    pub(crate) fn cancel(&mut self, key: TimerKey) {
        if self.heap.iter().any(|entry| entry.seq == key.0) {
            self.cancelled.insert(key.0);
        }
    }

    /// Number of armed, non-cancelled timers.
    pub(crate) fn len(&self) -> usize {
        self.heap.len() - self.cancelled.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
