use std::sync::{Condvar, Mutex, PoisonError};

/// A counting semaphore used to wake idle broker workers.
///
/// Each permit corresponds to one item published on the works ring, so a
/// worker that acquires a permit is guaranteed to find work.
pub(crate) struct Semaphore {
    permits: Mutex<usize>,
    condvar: Condvar,
}

impl Semaphore {
    pub(crate) fn new() -> Self {
        Self {
            permits: Mutex::new(0),
            condvar: Condvar::new(),
        }
    }

    /// Releases `n` permits, waking up to `n` waiting threads.
    pub(crate) fn post(&self, n: usize) {
        let mut permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        *permits += n;
        drop(permits);

        for _ in 0..n {
            self.condvar.notify_one();
        }
    }

    /// Blocks until a permit is available and takes it.
    pub(crate) fn wait(&self) {
        let permits = self.permits.lock().unwrap_or_else(PoisonError::into_inner);
        let mut permits = self
            .condvar
            .wait_while(permits, |permits| *permits == 0)
            .unwrap_or_else(PoisonError::into_inner);

        *permits -= 1;
    }
}

#[cfg(test)]
mod tests {
    use super::Semaphore;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::thread;

    #[test]
    fn each_permit_releases_one_waiter() {
        let semaphore = Arc::new(Semaphore::new());
        let passed = Arc::new(AtomicUsize::new(0));

        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let semaphore = semaphore.clone();
                let passed = passed.clone();
                thread::spawn(move || {
                    semaphore.wait();
                    passed.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        semaphore.post(4);

        for waiter in waiters {
            waiter.join().unwrap();
        }
        assert_eq!(passed.load(Ordering::SeqCst), 4);
    }
}
