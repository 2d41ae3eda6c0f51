use super::event::Event;
use super::poller::{Interest, Poller, Waker};
use super::request::IoRequest;
use super::worker;
use crate::error::BrokerError;
use crate::runtime::builder::Config;
use crate::sync::{RingQueue, Semaphore};
use crate::utils::ThreadPool;

use crossbeam_utils::Backoff;
use std::collections::VecDeque;
use std::io;
use std::os::fd::RawFd;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::Duration;
use tracing::{error, info, warn};

/// An item on the works ring.
pub(crate) enum Work {
    Io(IoRequest),

    /// Makes the worker that dequeues it exit.
    Abort,
}

/// State shared between the scheduler thread and the broker workers.
pub(crate) struct BrokerShared {
    pub(crate) works: RingQueue<Work>,
    pub(crate) consume: RingQueue<IoRequest>,
    pub(crate) semaphore: Semaphore,
    pub(crate) alive: AtomicUsize,
    pub(crate) waker: Arc<Waker>,
}

/// Epoll readiness plus a pool of blocking I/O workers.
///
/// Requests on offload-mode handles are published on the works ring and
/// come back, completed, on the consume ring. Readiness-mode handles are
/// only registered with the poller; their syscalls run on the scheduler
/// thread.
pub(crate) struct SocketBroker {
    poller: Poller,
    shared: Arc<BrokerShared>,
    pool: ThreadPool,
    workers: usize,
    shutdown_retries: u32,

    /// Requests that did not fit on the works ring, oldest first.
    backlog: VecDeque<IoRequest>,
    stopped: bool,
}

impl SocketBroker {
    /// Allocates both rings, creates the poller and spawns the workers.
    ///
    /// If only some workers could be spawned, those are shut down again
    /// before the error is returned.
    pub(crate) fn start(config: &Config) -> Result<Self, BrokerError> {
        let poller = Poller::new(config.max_events).map_err(BrokerError::Epoll)?;

        let shared = Arc::new(BrokerShared {
            works: RingQueue::new(config.queue_order)?,
            consume: RingQueue::new(config.queue_order)?,
            semaphore: Semaphore::new(),
            alive: AtomicUsize::new(0),
            waker: poller.waker(),
        });

        let mut broker = Self {
            poller,
            shared,
            pool: ThreadPool::new(),
            workers: 0,
            shutdown_retries: config.shutdown_retries,
            backlog: VecDeque::new(),
            stopped: false,
        };

        for index in 0..config.workers {
            let shared = broker.shared.clone();
            shared.alive.fetch_add(1, Ordering::AcqRel);

            let spawned = broker.pool.run(
                format!("spindle-io-{index}"),
                config.worker_stack_size,
                move || worker::run(&shared, index),
            );

            if let Err(source) = spawned {
                broker.shared.alive.fetch_sub(1, Ordering::AcqRel);
                error!(
                    requested = config.workers,
                    started = index,
                    "failed to spawn broker worker: {source}"
                );

                broker.shutdown();
                return Err(BrokerError::Spawn {
                    requested: config.workers,
                    started: index,
                    source,
                });
            }

            broker.workers += 1;
        }

        info!(
            workers = broker.workers,
            queue_capacity = broker.shared.works.capacity(),
            "socket broker started"
        );

        Ok(broker)
    }

    /// Hands a request on an offload-mode handle to the workers.
    ///
    /// When the works ring is saturated the request waits in the backlog,
    /// which is flushed on every loop iteration.
    pub(crate) fn offload(&mut self, request: IoRequest) {
        if !self.backlog.is_empty() {
            self.backlog.push_back(request);
            return;
        }

        if let Err(Work::Io(request)) = self.shared.works.enqueue(Work::Io(request)) {
            warn!(fd = request.fd, "works queue saturated, deferring request");
            self.backlog.push_back(request);
            return;
        }

        self.shared.semaphore.post(1);
    }

    /// Retries backlogged requests in order until the works ring fills up.
    pub(crate) fn flush_backlog(&mut self) {
        let mut published = 0;

        while let Some(request) = self.backlog.pop_front() {
            if let Err(Work::Io(request)) = self.shared.works.enqueue(Work::Io(request)) {
                self.backlog.push_front(request);
                break;
            }
            published += 1;
        }

        if published > 0 {
            self.shared.semaphore.post(published);
        }
    }

    /// Removes a request that is still waiting in the backlog.
    pub(crate) fn withdraw(&mut self, id: usize) -> Option<IoRequest> {
        let position = self.backlog.iter().position(|request| request.id == id)?;
        self.backlog.remove(position)
    }

    /// Takes one completion published by a worker.
    pub(crate) fn completion(&self) -> Option<IoRequest> {
        self.shared.consume.dequeue()
    }

    pub(crate) fn poll_op(&self, fd: RawFd, token: usize, interest: Interest) -> io::Result<()> {
        self.poller.poll_op(fd, token, interest)
    }

    pub(crate) fn poll_del(&self, fd: RawFd) -> io::Result<()> {
        self.poller.poll_del(fd)
    }

    /// Waits for readiness; see [`Poller::poll`].
    pub(crate) fn poll(&mut self, events: &mut Vec<Event>, timeout_ms: i32) -> io::Result<bool> {
        self.poller.poll(events, timeout_ms)
    }

    /// Stops every worker.
    ///
    /// One abort item is published per worker, then the live-worker count
    /// is awaited with exponential backoff for at most `shutdown_retries`
    /// rounds. Workers still running after that are detached.
    pub(crate) fn shutdown(&mut self) {
        if self.stopped {
            return;
        }
        self.stopped = true;

        if !self.backlog.is_empty() {
            warn!(
                requests = self.backlog.len(),
                "dropping backlogged requests at shutdown"
            );
            self.backlog.clear();
        }

        let mut aborts = 0;
        for _ in 0..self.workers {
            let backoff = Backoff::new();
            let mut work = Work::Abort;

            loop {
                match self.shared.works.enqueue(work) {
                    Ok(()) => {
                        aborts += 1;
                        break;
                    }
                    Err(back) if !backoff.is_completed() => {
                        work = back;
                        backoff.snooze();
                    }
                    Err(_) => break,
                }
            }
        }
        self.shared.semaphore.post(aborts);

        let mut delay = Duration::from_millis(1);
        for _ in 0..self.shutdown_retries {
            if self.shared.alive.load(Ordering::Acquire) == 0 {
                break;
            }
            thread::sleep(delay);
            delay *= 2;
        }

        let alive = self.shared.alive.load(Ordering::Acquire);
        if alive == 0 {
            let panicked = self.pool.wait_all();
            if panicked > 0 {
                warn!(panicked, "broker workers panicked");
            }
            info!(threads = self.pool.len(), "socket broker stopped");
        } else {
            error!(
                alive,
                workers = self.workers,
                "broker workers did not stop in time, detaching"
            );
            self.pool.detach_all();
        }
    }
}

impl Drop for SocketBroker {
    fn drop(&mut self) {
        self.shutdown();
    }
}
