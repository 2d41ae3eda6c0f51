use super::builder::Config;
use super::context::{Ctx, Shared};
use super::ready_queue::ReadyQueue;
use super::suspend::{Request, Resume};
use crate::error::SchedulerError;
use crate::reactor::broker::SocketBroker;
use crate::reactor::command::Command;
use crate::reactor::event::Event;
use crate::reactor::io::{self, Handle, HandleState, IoMode, Progress};
use crate::reactor::poller::Interest;
use crate::reactor::request::{Completion, IoRequest, IoSubmission, Op, Pending, Readiness, RequestId};
use crate::reactor::timer::{Clock, Next};
use crate::runtime::task::{
    Body, Continuation, Status, Task, TaskError, TaskHandle, TaskId, TaskResult,
};
use crate::utils::Pool;

use std::cell::RefCell;
use std::collections::VecDeque;
use std::mem;
use std::os::fd::RawFd;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::task::{Context, Poll, Waker};
use tracing::{debug, error, trace, warn};

/// The single-threaded task scheduler.
///
/// It owns the tasks, the ready queue, the timer heap, the handle registry
/// and the in-flight requests, and drives them together with a socket
/// broker whose workers perform blocking I/O.
///
/// # Examples
///
/// ```rust
/// use spindle::SchedulerBuilder;
///
/// let mut scheduler = SchedulerBuilder::new().workers(1).build().unwrap();
///
/// let handle = scheduler.spawn(|cx| async move {
///     cx.yield_now().await;
///     Ok(42)
/// });
///
/// assert_eq!(scheduler.run(), 0);
/// assert_eq!(handle.take_result().unwrap().unwrap(), 42);
/// ```
pub struct Scheduler {
    config: Config,
    tasks: Pool<Task>,
    ready: ReadyQueue,
    clock: Clock,
    requests: Pool<Pending>,

    /// Readiness-mode requests due for a non-blocking attempt.
    batch: VecDeque<RequestId>,
    shared: Rc<Shared>,
    broker: Option<SocketBroker>,
    events: Vec<Event>,
    ticks: u64,
}

impl Scheduler {
    pub(crate) fn new(config: Config) -> Result<Self, SchedulerError> {
        let shared = Rc::new(Shared {
            handles: RefCell::new(Pool::with_capacity(config.request_capacity)?),
            commands: RefCell::new(VecDeque::new()),
            time: config.time.clone(),
        });

        Ok(Self {
            tasks: Pool::with_capacity(config.task_capacity)?,
            ready: ReadyQueue::with_capacity(config.task_capacity)?,
            clock: Clock::new(config.time.clone()),
            requests: Pool::with_capacity(config.request_capacity)?,
            batch: VecDeque::new(),
            shared,
            broker: None,
            events: Vec::with_capacity(config.max_events),
            ticks: 0,
            config,
        })
    }

    /// Schedules `body` as a new task.
    pub fn spawn<F, Fut>(&mut self, body: F) -> TaskHandle
    where
        F: FnOnce(Ctx) -> Fut + 'static,
        Fut: Future<Output = TaskResult> + 'static,
    {
        let id = self.spawn_task(Continuation::new(body), None);
        self.handle(id)
    }

    /// Registers a descriptor; see [`Ctx::register`].
    pub fn register(&self, fd: RawFd, mode: IoMode) -> Handle {
        self.shared.register(fd, mode)
    }

    /// Runs until no task, timer or request is left.
    ///
    /// Returns `0` on success and the negative code of the
    /// [`SchedulerError`] otherwise.
    pub fn run(&mut self) -> i32 {
        match self.try_run() {
            Ok(()) => 0,
            Err(err) => {
                error!(code = err.code(), "scheduler stopped: {err}");
                err.code()
            }
        }
    }

    /// Starts the broker, drives the loop to completion and shuts down.
    ///
    /// Tasks still parked when the loop ends are destroyed as
    /// [`Status::Zombie`].
    pub fn try_run(&mut self) -> Result<(), SchedulerError> {
        let outcome = SocketBroker::start(&self.config)
            .map_err(SchedulerError::from)
            .and_then(|broker| {
                self.broker = Some(broker);
                self.drive()
            });

        self.stop();
        outcome
    }

    /// Resumes the task at the cursor once and advances the cursor.
    ///
    /// Returns `false` if the ready queue was empty.
    pub fn tick(&mut self) -> bool {
        if self.ready.is_empty() {
            self.apply_commands();
            return false;
        }

        let task = self.ready.get();
        self.resume(task);
        self.ready.mv_next();
        self.apply_commands();

        self.ticks += 1;
        true
    }

    /// Number of ticks run so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Number of tasks not reaped yet.
    pub fn live_tasks(&self) -> usize {
        self.tasks.len()
    }

    /// Number of I/O requests in flight.
    pub fn pending_requests(&self) -> usize {
        self.requests.len()
    }

    /// Current time of the scheduler's clock, in milliseconds.
    pub fn now(&self) -> u64 {
        self.clock.now()
    }

    fn drive(&mut self) -> Result<(), SchedulerError> {
        loop {
            let timeout = self.wake_timeout();
            if self.is_idle() {
                return Ok(());
            }

            self.poll(timeout)?;
            self.quantum();
            self.drain_completions();
            self.quantum();
        }
    }

    fn is_idle(&self) -> bool {
        self.ready.is_empty()
            && self.clock.is_empty()
            && self.requests.is_empty()
            && self.shared.commands.borrow().is_empty()
    }

    /// Fires every expired timer, then computes the epoll timeout.
    fn wake_timeout(&mut self) -> i32 {
        let now = self.clock.now();

        loop {
            let busy = !self.ready.is_empty() || !self.batch.is_empty();

            match self.clock.next(now) {
                Next::Expired(task) => self.fire_timer(task),
                Next::Wait(ms) if !busy => return i32::try_from(ms).unwrap_or(i32::MAX),
                Next::Empty if !busy => return -1,
                _ => return 0,
            }
        }
    }

    fn quantum(&mut self) {
        for _ in 0..self.config.fairness_quantum {
            if !self.tick() {
                break;
            }
        }
    }

    fn poll(&mut self, timeout: i32) -> Result<(), SchedulerError> {
        let Some(broker) = self.broker.as_mut() else {
            return Ok(());
        };

        broker.flush_backlog();

        let mut events = mem::take(&mut self.events);
        let polled = broker.poll(&mut events, timeout);

        for &event in &events {
            self.dispatch_event(event);
        }
        self.events = events;

        polled.map(|_| ()).map_err(SchedulerError::Poll)
    }

    /// Hands readiness to the request parked on it, or records it.
    fn dispatch_event(&mut self, event: Event) {
        let mut handles = self.shared.handles.borrow_mut();
        let Some(state) = handles.get_mut(event.token) else {
            return;
        };

        let directions = [
            (Readiness::Readable, event.readable),
            (Readiness::Writable, event.writable),
        ];

        for (direction, ready) in directions {
            if !ready {
                continue;
            }

            state.set_ready(direction, true);

            let Some(id) = *state.pending_mut(direction) else {
                continue;
            };

            if let Some(pending) = self.requests.get_mut(id) {
                if !pending.queued && pending.request.is_some() {
                    pending.queued = true;
                    self.batch.push_back(id);
                }
            }
        }
    }

    fn drain_completions(&mut self) {
        loop {
            let Some(request) = self.broker.as_ref().and_then(|broker| broker.completion())
            else {
                break;
            };
            self.complete_offloaded(request);
        }

        for _ in 0..self.config.completion_batch {
            let Some(id) = self.batch.pop_front() else {
                break;
            };
            self.attempt(id);
        }
    }

    fn spawn_task(&mut self, body: Continuation, waiter: Option<TaskId>) -> TaskId {
        let id = self
            .tasks
            .insert_with(|id| Task::new(id, body, waiter));

        self.ready.push(id);
        trace!(task = id, ?waiter, "task spawned");

        id
    }

    fn handle(&self, id: TaskId) -> TaskHandle {
        let state = match self.tasks.get(id) {
            Some(task) => task.state.clone(),
            None => unreachable!("handle requested for a reaped task"),
        };

        TaskHandle { state }
    }

    fn set_status(&self, id: TaskId, status: Status) {
        if let Some(task) = self.tasks.get(id) {
            task.state.status.set(status);
            trace!(task = id, ?status, "task transition");
        }
    }

    /// Polls the task at the cursor until it suspends or finishes.
    fn resume(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(id) else {
            warn!(task = id, "reaped task found on the ready queue");
            self.ready.pop();
            return;
        };

        let cell = task.cell.clone();
        let mut future = match mem::replace(&mut task.body, Body::Empty) {
            // The closure runs here, so it panics under the same guard as a poll.
            Body::Fresh(body) => {
                let ctx = Ctx::new(cell.clone(), self.shared.clone());
                match panic::catch_unwind(AssertUnwindSafe(|| body.start(ctx))) {
                    Ok(future) => future,
                    Err(payload) => {
                        return self.finish(id, Err(TaskError::from_panic(payload)));
                    }
                }
            }
            Body::Running(future) => future,
            Body::Empty => unreachable!("task {id} resumed while already running"),
        };

        self.set_status(id, Status::Executing);
        let mut cx = Context::from_waker(Waker::noop());

        let request = loop {
            let polled = panic::catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx)));

            match polled {
                Ok(Poll::Ready(result)) => return self.finish(id, result),
                Err(payload) => return self.finish(id, Err(TaskError::from_panic(payload))),
                Ok(Poll::Pending) => {}
            }

            match cell.request.take() {
                Some(Request::Push(body)) => {
                    let child = self.spawn_task(body, None);
                    cell.resume.set(Some(Resume::Spawned(self.handle(child))));
                    self.set_status(id, Status::PushTask);
                }
                request => break request,
            }
        };

        if let Some(task) = self.tasks.get_mut(id) {
            task.body = Body::Running(future);
        }

        self.park(id, request);
    }

    /// Applies the request a pending task suspended with.
    fn park(&mut self, id: TaskId, request: Option<Request>) {
        match request {
            // Pending without a request: a foreign future, retried next round.
            None => self.set_status(id, Status::Yield),

            Some(Request::Yield) => {
                self.resume_with(id, Resume::Woken);
                self.set_status(id, Status::Yield);
            }

            Some(Request::Await(body)) => {
                self.ready.erase();
                self.set_status(id, Status::Waiting);

                let child = self.spawn_task(body, Some(id));
                if let Some(task) = self.tasks.get_mut(id) {
                    task.child = Some(child);
                }
            }

            Some(Request::Push(_)) => unreachable!("forks are served while polling"),

            Some(Request::Sleep(ms)) => {
                self.ready.erase();
                self.set_status(id, Status::WaitingTimer);

                let key = self.clock.push(ms, id);
                if let Some(task) = self.tasks.get_mut(id) {
                    task.park.timer = Some(key);
                }
            }

            Some(Request::Io(submission)) => {
                self.ready.erase();
                self.set_status(id, Status::WaitingFd);

                let timeout = submission.timeout;
                let Some(request) = self.submit(submission, Completion::Resume(id)) else {
                    return;
                };

                let timer = timeout.map(|ms| self.clock.push(ms, id));
                if let Some(task) = self.tasks.get_mut(id) {
                    task.park.request = Some(request);
                    task.park.timer = timer;
                }
            }

            Some(Request::Pause) => {
                self.ready.erase();
                self.set_status(id, Status::Paused);
            }
        }
    }

    fn resume_with(&self, id: TaskId, resume: Resume) {
        if let Some(task) = self.tasks.get(id) {
            task.cell.resume.set(Some(resume));
        }
    }

    /// Re-arms a parked task and puts it back on the ready queue.
    fn wake(&mut self, id: TaskId, resume: Resume, head: bool) {
        if !self.tasks.contains(id) {
            return;
        }

        self.resume_with(id, resume);
        self.set_status(id, Status::Executing);

        if head {
            self.ready.push_head(id);
        } else {
            self.ready.push(id);
        }
    }

    /// Reaps the task at the cursor.
    fn finish(&mut self, id: TaskId, result: TaskResult) {
        self.ready.pop();
        let task = self.tasks.remove(id);

        let status = match &result {
            Ok(_) => Status::Done,
            Err(TaskError::Panicked { .. }) => Status::UnhandledException,
            Err(_) => Status::Error,
        };

        if let Some(waiter) = task.waiter {
            trace!(task = id, waiter, ?status, "task finished, waking parent");
            task.state.status.set(Status::WakeParent);

            if let Some(parent) = self.tasks.get_mut(waiter) {
                parent.child = None;
            }
            self.wake(waiter, Resume::Joined(result), false);
            return;
        }

        task.state.status.set(status);
        trace!(task = id, ?status, "task reaped");

        if task.state.is_observed() {
            *task.state.result.borrow_mut() = Some(result);
        } else if let Err(err) = result {
            warn!(task = id, "discarding unobserved task error: {err}");
        }
    }

    fn fire_timer(&mut self, id: TaskId) {
        let Some(task) = self.tasks.get_mut(id) else {
            return;
        };

        task.park.timer = None;
        let resume = match task.park.request.take() {
            Some(request) => {
                self.cancel_request(request);
                trace!(task = id, request, "I/O wait timed out");
                Resume::TimedOut
            }
            None => Resume::Woken,
        };

        self.wake(id, resume, true);
    }

    /// Gives a request an id and routes it by the mode of its handle.
    ///
    /// Returns `None` if the request completed on the spot.
    fn submit(&mut self, submission: IoSubmission, completion: Completion) -> Option<RequestId> {
        let IoSubmission { handle, op, timeout } = submission;

        let id = self.requests.insert(Pending {
            request: None,
            handle,
            completion,
            queued: false,
        });
        let mut request = IoRequest::new(id, handle.fd, op);

        match self.admit(handle, &request.op, timeout) {
            Err(errno) => {
                request.fail(errno);
                self.complete(request);
                None
            }

            Ok(IoMode::Offload) => {
                if let Some(broker) = self.broker.as_mut() {
                    broker.offload(request);
                }
                Some(id)
            }

            Ok(IoMode::Poll) => {
                let direction = request.op.direction();
                let attempt_now = request.op.needs_initiation();

                let ready = {
                    let mut handles = self.shared.handles.borrow_mut();
                    match handles.get_mut(handle.id) {
                        Some(state) => {
                            *state.pending_mut(direction) = Some(id);
                            state.is_ready(direction)
                        }
                        None => false,
                    }
                };

                if let Some(pending) = self.requests.get_mut(id) {
                    pending.request = Some(request);

                    if ready || attempt_now {
                        pending.queued = true;
                        self.batch.push_back(id);
                    }
                }

                Some(id)
            }
        }
    }

    /// Checks that `op` may be submitted on `handle` and registers the
    /// descriptor with epoll on first use. Fails with an `errno`.
    fn admit(&self, handle: Handle, op: &Op, timeout: Option<u64>) -> Result<IoMode, i32> {
        let mut handles = self.shared.handles.borrow_mut();
        let state = match handles.get_mut(handle.id) {
            Some(state) if state.fd == handle.fd => state,
            _ => return Err(libc::EBADF),
        };

        let Some(broker) = self.broker.as_ref() else {
            return Err(libc::ENOTCONN);
        };

        if state.mode == IoMode::Offload {
            return match timeout {
                Some(_) => Err(libc::EOPNOTSUPP),
                None => Ok(IoMode::Offload),
            };
        }

        if state.pending_mut(op.direction()).is_some() {
            return Err(libc::EBUSY);
        }

        watch(broker, state, handle)?;
        Ok(IoMode::Poll)
    }

    /// One non-blocking attempt at a batched request.
    fn attempt(&mut self, id: RequestId) {
        let Some(pending) = self.requests.get_mut(id) else {
            return;
        };

        pending.queued = false;
        let Some(mut request) = pending.request.take() else {
            return;
        };
        let handle = pending.handle;
        let direction = request.op.direction();

        match io::perform(&mut request) {
            Progress::Done => {
                if let Some(state) = self.shared.handles.borrow_mut().get_mut(handle.id) {
                    let slot = state.pending_mut(direction);
                    if *slot == Some(id) {
                        *slot = None;
                    }
                }

                self.complete(request);
            }

            Progress::WouldBlock => {
                if let Some(state) = self.shared.handles.borrow_mut().get_mut(handle.id) {
                    state.set_ready(direction, false);
                }

                pending.request = Some(request);
            }
        }
    }

    /// Resolves a request handed back by a worker.
    ///
    /// A worker that hit `EAGAIN` on a non-blocking descriptor returns the
    /// request unfinished; it then waits on epoll readiness like a
    /// readiness-mode request, keeping any partial progress.
    fn complete_offloaded(&mut self, mut request: IoRequest) {
        if request.error != -libc::EAGAIN {
            return self.complete(request);
        }

        let Some(handle) = self.requests.get(request.id).map(|pending| pending.handle) else {
            warn!(request = request.id, "completion for an unknown request");
            return;
        };
        let direction = request.op.direction();

        let parked = {
            let mut handles = self.shared.handles.borrow_mut();
            match (handles.get_mut(handle.id), self.broker.as_ref()) {
                (Some(state), Some(broker)) if state.fd == handle.fd => {
                    if state.pending_mut(direction).is_some() {
                        Err(libc::EBUSY)
                    } else {
                        watch(broker, state, handle).map(|()| {
                            *state.pending_mut(direction) = Some(request.id);
                            state.is_ready(direction)
                        })
                    }
                }
                (Some(_), None) => Err(libc::ENOTCONN),
                _ => Err(libc::EBADF),
            }
        };

        match parked {
            Ok(ready) => {
                let id = request.id;
                request.error = 0;
                trace!(
                    request = id,
                    fd = handle.fd,
                    "offloaded request would block, parked on readiness"
                );

                if let Some(pending) = self.requests.get_mut(id) {
                    pending.request = Some(request);

                    if ready {
                        pending.queued = true;
                        self.batch.push_back(id);
                    }
                }
            }
            Err(errno) => {
                request.fail(errno);
                self.complete(request);
            }
        }
    }

    fn complete(&mut self, request: IoRequest) {
        if !self.requests.contains(request.id) {
            warn!(request = request.id, "completion for an unknown request");
            return;
        }

        let pending = self.requests.remove(request.id);
        self.deliver(pending.completion, request);
    }

    /// Resolves a completed request: resume its task or run its callback.
    fn deliver(&mut self, completion: Completion, request: IoRequest) {
        match completion {
            Completion::Resume(task) => {
                if let Some(parked) = self.tasks.get_mut(task) {
                    parked.park.request = None;

                    if let Some(key) = parked.park.timer.take() {
                        self.clock.cancel(key);
                    }
                }

                self.wake(task, Resume::Io(request), false);
            }

            Completion::Callback(callback) => {
                match panic::catch_unwind(AssertUnwindSafe(|| callback(request))) {
                    Ok(Some(next)) => {
                        self.spawn_task(next, None);
                    }
                    Ok(None) => {}
                    Err(payload) => {
                        let err = TaskError::from_panic(payload);
                        warn!("I/O callback failed: {err}");
                    }
                }
            }
        }
    }

    /// Withdraws a request that has not completed yet.
    ///
    /// Requests already picked up by a worker cannot be withdrawn.
    fn cancel_request(&mut self, id: RequestId) -> Option<(Pending, IoRequest)> {
        let pending = self.requests.get_mut(id)?;

        let request = match pending.request.take() {
            Some(request) => request,
            None => self.broker.as_mut()?.withdraw(id)?,
        };

        let pending = self.requests.remove(id);

        if let Some(state) = self.shared.handles.borrow_mut().get_mut(pending.handle.id) {
            for direction in [Readiness::Readable, Readiness::Writable] {
                let slot = state.pending_mut(direction);
                if *slot == Some(id) {
                    *slot = None;
                }
            }
        }
        self.batch.retain(|&queued| queued != id);

        Some((pending, request))
    }

    fn deregister(&mut self, handle: Handle) {
        let (parked, registered) = {
            let mut handles = self.shared.handles.borrow_mut();
            match handles.get_mut(handle.id) {
                Some(state) if state.fd == handle.fd => {
                    (state.take_pending().collect::<Vec<_>>(), state.registered)
                }
                _ => {
                    warn!(handle = handle.id, fd = handle.fd, "deregistering an unknown handle");
                    return;
                }
            }
        };

        for id in parked {
            if let Some((pending, mut request)) = self.cancel_request(id) {
                request.fail(libc::ECANCELED);
                self.deliver(pending.completion, request);
            }
        }

        if registered {
            if let Some(broker) = self.broker.as_ref() {
                if let Err(err) = broker.poll_del(handle.fd) {
                    warn!(fd = handle.fd, "failed to remove descriptor from epoll: {err}");
                }
            }
        }

        self.shared.handles.borrow_mut().remove(handle.id);
        debug!(handle = handle.id, fd = handle.fd, "handle deregistered");
    }

    /// Applies the commands tasks queued during the last tick.
    fn apply_commands(&mut self) {
        loop {
            let Some(command) = self.shared.commands.borrow_mut().pop_front() else {
                break;
            };

            match command {
                Command::Unpause { task } => {
                    let paused = self
                        .tasks
                        .get(task)
                        .is_some_and(|t| t.state.status.get() == Status::Paused);

                    if paused {
                        self.wake(task, Resume::Woken, false);
                    }
                }

                Command::Deregister { handle } => self.deregister(handle),

                Command::Submit {
                    submission,
                    callback,
                } => {
                    self.submit(submission, Completion::Callback(callback));
                }
            }
        }
    }

    /// Shuts the broker down and destroys whatever the loop left behind.
    fn stop(&mut self) {
        if let Some(mut broker) = self.broker.take() {
            broker.shutdown();
        }

        self.shared.commands.borrow_mut().clear();
        self.batch.clear();

        let leaked = self.requests.indices();
        if !leaked.is_empty() {
            warn!(requests = leaked.len(), "dropping in-flight requests at shutdown");
            for id in leaked {
                self.requests.remove(id);
            }
        }

        {
            let mut handles = self.shared.handles.borrow_mut();
            for id in handles.indices() {
                if let Some(state) = handles.get_mut(id) {
                    state.registered = false;
                    state.readable = false;
                    state.writable = false;
                    state.pending_read = None;
                    state.pending_write = None;
                }
            }
        }

        if !self.clock.is_empty() {
            self.clock = Clock::new(self.config.time.clone());
        }

        self.ready.drain();

        let zombies = self.tasks.indices();
        if !zombies.is_empty() {
            warn!(tasks = zombies.len(), "destroying unfinished tasks at shutdown");
        }

        for id in zombies {
            let task = self.tasks.remove(id);
            task.state.status.set(Status::Zombie);
            debug!(task = id, child = ?task.child, "task destroyed as zombie");
        }
    }
}

/// Registers the descriptor behind `handle` with epoll on first use.
/// Fails with an `errno`.
fn watch(broker: &SocketBroker, state: &mut HandleState, handle: Handle) -> Result<(), i32> {
    if state.registered {
        return Ok(());
    }

    broker
        .poll_op(handle.fd, handle.id, Interest::BOTH)
        .map_err(|err| err.raw_os_error().unwrap_or(libc::EIO))?;

    state.registered = true;
    debug!(handle = handle.id, fd = handle.fd, "handle registered with epoll");
    Ok(())
}
