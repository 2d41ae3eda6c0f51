use super::broker::{BrokerShared, Work};
use super::io::perform_blocking;

use crossbeam_utils::Backoff;
use std::sync::atomic::Ordering;
use std::thread;
use tracing::{debug, trace};

/// Entry point of a broker worker thread.
///
/// Each semaphore permit stands for one item on the works ring. The worker
/// performs the request with blocking syscalls, publishes it on the consume
/// ring and wakes the scheduler, until it dequeues [`Work::Abort`].
pub(crate) fn run(shared: &BrokerShared, index: usize) {
    debug!(worker = index, "broker worker started");

    loop {
        shared.semaphore.wait();

        let Some(work) = shared.works.dequeue() else {
            // The permit was posted after a publish this worker cannot see
            // yet. Hand it back and retry.
            shared.semaphore.post(1);
            thread::yield_now();
            continue;
        };

        let mut request = match work {
            Work::Abort => break,
            Work::Io(request) => request,
        };

        perform_blocking(&mut request);
        trace!(
            worker = index,
            fd = request.fd,
            error = request.error,
            "request performed"
        );

        let backoff = Backoff::new();
        while let Err(back) = shared.consume.enqueue(request) {
            request = back;
            shared.waker.wake();
            backoff.snooze();
        }

        shared.waker.wake();
    }

    shared.alive.fetch_sub(1, Ordering::AcqRel);
    debug!(worker = index, "broker worker stopped");
}
