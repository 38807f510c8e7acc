use std::{fmt, num::NonZeroUsize, thread};

use rayon::{ThreadPool, ThreadPoolBuilder};

use crate::Result;

/// The shared-memory execution resources of one worker: a fixed size thread pool.
///
/// Every parallel section of the engine runs inside `install`, nothing touches
/// rayon's global pool.
pub struct ExecutionContext {
    nthreads: NonZeroUsize,
    pool: ThreadPool,
}

impl fmt::Debug for ExecutionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecutionContext")
            .field("nthreads", &self.nthreads)
            .finish()
    }
}

impl ExecutionContext {
    /// Creates a new `ExecutionContext` with `nthreads` threads.
    ///
    /// # Returns
    /// An error if the thread pool can't be spawned.
    pub fn new(nthreads: NonZeroUsize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(nthreads.get())
            .thread_name(|i| format!("completion-{i}"))
            .build()?;

        Ok(Self { nthreads, pool })
    }

    #[inline]
    pub fn nthreads(&self) -> usize {
        self.nthreads.get()
    }

    /// Runs `op` inside this context's thread pool.
    pub fn install<OP, R>(&self, op: OP) -> R
    where
        OP: FnOnce() -> R + Send,
        R: Send,
    {
        self.pool.install(op)
    }
}

/// The amount of threads used when none is requested.
pub fn default_threads() -> NonZeroUsize {
    thread::available_parallelism().unwrap_or(NonZeroUsize::MIN)
}
