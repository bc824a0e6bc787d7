//! Running blocking work off the calling thread.
//!
//! A [`BlockingTask`] hands work to a [`BlockingExecutor`] and gives back a
//! [`Promise`] for the result. Two executors ship with the crate:
//! [`TokioExecutor`] uses Tokio's blocking pool and [`ThreadExecutor`]
//! starts one named OS thread per job.
//!
//! Work submitted here must not block on its own promise. Nothing checks this;
//! on a saturated pool it deadlocks.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use tokio::runtime::Handle;
use tracing::{debug, warn};

use crate::bridge::new_promise;
use crate::pair::{Downstream, Promise};
use crate::{panic_message, Error};

/// A unit of work for a [`BlockingExecutor`].
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An execution context that may block.
pub trait BlockingExecutor: Send + Sync {
    /// Schedules `job` to run. An `Err` means the job was dropped unrun.
    fn execute(&self, job: Job) -> Result<(), Error>;
}

/// Submits jobs to a Tokio runtime's blocking pool.
#[derive(Debug, Clone)]
pub struct TokioExecutor {
    handle: Handle,
}

impl TokioExecutor {
    pub fn new(handle: Handle) -> Self {
        Self { handle }
    }

    /// The runtime this thread is running inside.
    pub fn current() -> Result<Self, Error> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|err| Error::Executor(err.to_string()))
    }
}

impl BlockingExecutor for TokioExecutor {
    fn execute(&self, job: Job) -> Result<(), Error> {
        // Detached; the job reports through its promise.
        drop(self.handle.spawn_blocking(job));
        Ok(())
    }
}

/// Settings for [`ThreadExecutor`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadConfig {
    /// Threads are named `{name_prefix}-{n}`.
    pub name_prefix: String,
    /// Stack size in bytes; the platform default when `None`.
    pub stack_size: Option<usize>,
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            name_prefix: "promise-bridge-blocking".to_string(),
            stack_size: None,
        }
    }
}

impl ThreadConfig {
    pub fn with_name_prefix(mut self, name_prefix: impl Into<String>) -> Self {
        self.name_prefix = name_prefix.into();
        self
    }

    pub fn with_stack_size(mut self, stack_size: usize) -> Self {
        self.stack_size = Some(stack_size);
        self
    }
}

/// Runs every job on a fresh OS thread.
pub struct ThreadExecutor {
    config: ThreadConfig,
    spawned: AtomicUsize,
}

impl ThreadExecutor {
    pub fn new(config: ThreadConfig) -> Self {
        Self {
            config,
            spawned: AtomicUsize::new(0),
        }
    }

    pub fn config(&self) -> &ThreadConfig {
        &self.config
    }
}

impl Default for ThreadExecutor {
    fn default() -> Self {
        Self::new(ThreadConfig::default())
    }
}

impl fmt::Debug for ThreadExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadExecutor")
            .field("config", &self.config)
            .field("spawned", &self.spawned.load(Ordering::Relaxed))
            .finish()
    }
}

impl BlockingExecutor for ThreadExecutor {
    fn execute(&self, job: Job) -> Result<(), Error> {
        let n = self.spawned.fetch_add(1, Ordering::Relaxed);
        let mut builder = thread::Builder::new().name(format!("{}-{}", self.config.name_prefix, n));
        if let Some(stack_size) = self.config.stack_size {
            builder = builder.stack_size(stack_size);
        }
        builder
            .spawn(job)
            .map(drop)
            .map_err(|err| Error::Executor(err.to_string()))
    }
}

/// Promise-returning front end to a [`BlockingExecutor`].
#[derive(Debug, Clone)]
pub struct BlockingTask<X> {
    executor: X,
}

impl BlockingTask<TokioExecutor> {
    /// A task runner on the current Tokio runtime.
    pub fn current() -> Result<Self, Error> {
        TokioExecutor::current().map(Self::new)
    }
}

impl<X: BlockingExecutor> BlockingTask<X> {
    pub fn new(executor: X) -> Self {
        Self { executor }
    }

    pub fn executor(&self) -> &X {
        &self.executor
    }

    /// Runs `work` on the executor. The promise settles with its result, or
    /// fails with [`Error::Panicked`] if it panics and [`Error::Executor`] if
    /// the executor refuses it.
    ///
    /// # Examples
    ///
    /// ```
    /// use promise_bridge::{BlockingTask, Error, ThreadExecutor};
    ///
    /// let tasks = BlockingTask::new(ThreadExecutor::default());
    /// assert_eq!(tasks.run_blocking(|| Ok::<_, Error>(42)).wait(), Ok(42));
    /// ```
    pub fn run_blocking<V, E, W>(&self, work: W) -> Promise<V, E>
    where
        V: Send + 'static,
        E: From<Error> + Send + 'static,
        W: FnOnce() -> Result<V, E> + Send + 'static,
    {
        new_promise(|sink: Downstream<V, E>| {
            let job: Job = Box::new(move || match panic::catch_unwind(AssertUnwindSafe(work)) {
                Ok(result) => {
                    sink.accept(result);
                }
                Err(payload) => {
                    let message = panic_message(&*payload);
                    warn!(%message, "blocking work panicked");
                    sink.fail(Error::Panicked(message).into());
                }
            });
            self.executor.execute(job).map_err(|err| {
                debug!(%err, "blocking executor rejected work");
                E::from(err)
            })
        })
    }

    /// Sugar over [`new_promise`]: `producer` runs on the calling thread, not
    /// on the executor. Keeping that thread unblocked is up to the caller.
    pub fn run_async<V, E, P>(&self, producer: P) -> Promise<V, E>
    where
        P: FnOnce(Downstream<V, E>) -> Result<(), E>,
        E: From<Error>,
    {
        new_promise(producer)
    }
}

/// Runs `work` on the current Tokio runtime's blocking pool.
///
/// Outside a runtime the promise fails with [`Error::Executor`].
pub fn run_blocking<V, E, W>(work: W) -> Promise<V, E>
where
    V: Send + 'static,
    E: From<Error> + Send + 'static,
    W: FnOnce() -> Result<V, E> + Send + 'static,
{
    match BlockingTask::current() {
        Ok(tasks) => tasks.run_blocking(work),
        Err(err) => Promise::failed(err.into()),
    }
}
