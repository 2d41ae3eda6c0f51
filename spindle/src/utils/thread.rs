use std::io;
use std::thread::{self, JoinHandle};

/// Identifier of a thread started by a [`ThreadPool`].
pub(crate) type ThreadId = usize;

/// Owner of the OS threads backing the socket broker's workers.
///
/// Threads are started with a name and an optional stack size, and can be
/// waited on individually by the identifier returned from [`run`](Self::run).
pub(crate) struct ThreadPool {
    threads: Vec<Option<JoinHandle<()>>>,
}

impl ThreadPool {
    pub(crate) fn new() -> Self {
        Self {
            threads: Vec::new(),
        }
    }

    /// Starts `entry` on a new named thread.
    ///
    /// The closure carries whatever argument the entry point needs.
    pub(crate) fn run<F>(
        &mut self,
        name: String,
        stack_size: Option<usize>,
        entry: F,
    ) -> io::Result<ThreadId>
    where
        F: FnOnce() + Send + 'static,
    {
        let mut builder = thread::Builder::new().name(name);
        if let Some(size) = stack_size {
            builder = builder.stack_size(size);
        }

        let handle = builder.spawn(entry)?;
        self.threads.push(Some(handle));

        Ok(self.threads.len() - 1)
    }

    /// Blocks until the thread `id` has exited.
    ///
    /// Waiting twice on the same thread is a no-op.
    pub(crate) fn wait(&mut self, id: ThreadId) -> thread::Result<()> {
        match self.threads.get_mut(id).and_then(Option::take) {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }

    /// Waits on every thread that has not been waited on yet.
    ///
    /// Returns the number of threads that panicked.
    pub(crate) fn wait_all(&mut self) -> usize {
        (0..self.threads.len())
            .filter(|&id| self.wait(id).is_err())
            .count()
    }

    /// Forgets every remaining thread without joining it.
    pub(crate) fn detach_all(&mut self) {
        self.threads.clear();
    }

    /// Number of threads ever started by this pool.
    pub(crate) fn len(&self) -> usize {
        self.threads.len()
    }
}
