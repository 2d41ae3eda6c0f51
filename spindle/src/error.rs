//! Error types reported by scheduler setup and the socket broker.

use crate::sync::RingError;
use crate::utils::PoolError;

use std::io;

/// Failure to bring up or drive the socket broker.
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    #[error("failed to create the epoll instance: {0}")]
    Epoll(#[source] io::Error),

    #[error("failed to allocate a broker ring queue: {0}")]
    Queue(#[from] RingError),

    #[error("spawned {started} of {requested} broker workers: {source}")]
    Spawn {
        requested: usize,
        started: usize,
        #[source]
        source: io::Error,
    },
}

/// Failure that stops the scheduler.
///
/// Every variant maps to the negative status returned by
/// [`Scheduler::run`](crate::Scheduler::run).
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Broker(#[from] BrokerError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    #[error("epoll_wait failed: {0}")]
    Poll(#[source] io::Error),
}

impl SchedulerError {
    /// Status code reported by [`Scheduler::run`](crate::Scheduler::run).
    pub fn code(&self) -> i32 {
        match self {
            SchedulerError::Broker(BrokerError::Epoll(_)) => -1,
            SchedulerError::Broker(BrokerError::Queue(_)) => -2,
            SchedulerError::Broker(BrokerError::Spawn { .. }) => -3,
            SchedulerError::Pool(_) => -4,
            SchedulerError::Poll(_) => -5,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_setup_order() {
        let epoll = SchedulerError::from(BrokerError::Epoll(io::Error::other("x")));
        let queue = SchedulerError::from(BrokerError::Queue(RingError::OrderTooLarge(30)));
        let spawn = SchedulerError::from(BrokerError::Spawn {
            requested: 4,
            started: 1,
            source: io::Error::other("x"),
        });
        let poll = SchedulerError::Poll(io::Error::other("x"));

        assert_eq!(epoll.code(), -1);
        assert_eq!(queue.code(), -2);
        assert_eq!(spawn.code(), -3);
        assert_eq!(poll.code(), -5);
    }
}
