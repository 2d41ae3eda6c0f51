use super::core::Scheduler;
use crate::error::SchedulerError;
use crate::time::{MonotonicTime, TimeSource};

use std::sync::Arc;
use std::thread;

/// Settings the scheduler and its broker are started with.
#[derive(Clone)]
pub(crate) struct Config {
    pub(crate) workers: usize,
    pub(crate) queue_order: u32,
    pub(crate) fairness_quantum: usize,
    pub(crate) completion_batch: usize,
    pub(crate) max_events: usize,
    pub(crate) worker_stack_size: Option<usize>,
    pub(crate) shutdown_retries: u32,
    pub(crate) task_capacity: usize,
    pub(crate) request_capacity: usize,
    pub(crate) time: Arc<dyn TimeSource>,
}

/// Builder for configuring and creating a scheduler.
///
/// # Examples
///
/// ```rust
/// use spindle::SchedulerBuilder;
///
/// let scheduler = SchedulerBuilder::new()
///     .workers(2)
///     .queue_order(6)
///     .build()
///     .unwrap();
/// # drop(scheduler);
/// ```
pub struct SchedulerBuilder {
    config: Config,
}

impl SchedulerBuilder {
    /// Creates a new `SchedulerBuilder` with default configuration.
    ///
    /// By default, the number of broker workers is set to the number of
    /// available logical CPUs, falling back to `1` if unavailable.
    pub fn new() -> Self {
        let workers = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);

        Self {
            config: Config {
                workers,
                queue_order: 8,
                fairness_quantum: 8,
                completion_batch: 64,
                max_events: 64,
                worker_stack_size: None,
                shutdown_retries: 10,
                task_capacity: 64,
                request_capacity: 64,
                time: Arc::new(MonotonicTime::new()),
            },
        }
    }

    /// Sets the number of broker worker threads.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn workers(mut self, n: usize) -> Self {
        assert!(n > 0, "workers must be > 0");

        self.config.workers = n;
        self
    }

    /// Sets the capacity order of the broker's ring queues (`2^order`
    /// slots each).
    ///
    /// Orders above [`MAX_ORDER`](crate::sync::MAX_ORDER) make
    /// [`Scheduler::run`] fail with status `-2`.
    pub fn queue_order(mut self, order: u32) -> Self {
        self.config.queue_order = order;
        self
    }

    /// Sets how many ready-queue ticks run between two I/O phases.
    ///
    /// # Panics
    ///
    /// Panics if `n == 0`.
    pub fn fairness_quantum(mut self, n: usize) -> Self {
        assert!(n > 0, "fairness_quantum must be > 0");

        self.config.fairness_quantum = n;
        self
    }

    /// Sets how many readiness retries are attempted per loop iteration.
    pub fn completion_batch(mut self, n: usize) -> Self {
        self.config.completion_batch = n.max(1);
        self
    }

    /// Sets the maximum number of epoll events fetched per wait.
    pub fn max_events(mut self, n: usize) -> Self {
        self.config.max_events = n.max(1);
        self
    }

    pub fn worker_stack_size(mut self, bytes: usize) -> Self {
        self.config.worker_stack_size = Some(bytes);
        self
    }

    /// Sets how many backoff rounds shutdown waits for workers to exit.
    pub fn shutdown_retries(mut self, n: u32) -> Self {
        self.config.shutdown_retries = n;
        self
    }

    /// Sets the number of task slots reserved up front.
    pub fn task_capacity(mut self, n: usize) -> Self {
        self.config.task_capacity = n;
        self
    }

    /// Sets the number of in-flight request slots reserved up front.
    pub fn request_capacity(mut self, n: usize) -> Self {
        self.config.request_capacity = n;
        self
    }

    /// Replaces the monotonic clock timers are measured with.
    pub fn time_source(mut self, source: Arc<dyn TimeSource>) -> Self {
        self.config.time = source;
        self
    }

    /// Builds the scheduler.
    ///
    /// Task and request pools are reserved here; the broker is only started
    /// by [`Scheduler::run`].
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        Scheduler::new(self.config)
    }
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}
