use crate::runtime::partition::DEFAULT_SPLIT_FACTOR;
use crate::runtime::{NO_THREAD_NUM, ProfilerCallbacks, Scheduler};
use anyhow::{Context, Result, anyhow};
use std::fmt;
use std::sync::Arc;
use std::thread;

/// Maximum number of passes over the injector and peer queues when a steal
/// attempt races with another thread.
const MAX_STEAL_RETRIES: usize = 3;

/// Empty scans before a thread parks.
#[cfg(not(test))]
const SPIN_COUNT: u32 = 100;

#[cfg(test)]
const SPIN_COUNT: u32 = 8; // park sooner, tests oversubscribe the machine

#[derive(Clone)]
pub(crate) struct ThreadNameFn(pub(crate) Arc<dyn Fn(u32) -> String + Send + Sync + 'static>);

fn default_thread_name_fn() -> ThreadNameFn {
    ThreadNameFn(Arc::new(|thread_num| format!("taskweave-{thread_num}")))
}

impl fmt::Debug for ThreadNameFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ThreadNameFn").field(&"<function>").finish()
    }
}

/// Configures and starts a [`Scheduler`].
///
/// ```
/// use taskweave::Builder;
///
/// let scheduler = Builder::new()
///     .task_threads(4)
///     .external_task_threads(1)
///     .thread_name_fn(|n| format!("physics-{n}"))
///     .try_build()
///     .unwrap();
///
/// // Index 0 is the building thread, 1..=3 are workers, 4 is external.
/// assert_eq!(scheduler.num_task_threads(), 5);
/// assert_eq!(scheduler.thread_num(), Some(0));
/// ```
#[derive(Debug)]
pub struct Builder {
    /// Task threads including the initializing thread. Defaults to one per
    /// CPU core.
    task_threads: Option<u32>,

    /// Indices reserved for host threads registering later on.
    external_task_threads: u32,

    /// Name fn used for threads spawned by the scheduler.
    thread_name: ThreadNameFn,

    /// Stack size used for threads spawned by the scheduler.
    thread_stack_size: Option<usize>,

    max_steal_retries: usize,

    spin_count: u32,

    split_factor: u32,

    profiler: ProfilerCallbacks,
}

impl Default for Builder {
    fn default() -> Self {
        Self::new()
    }
}

impl Builder {
    pub fn new() -> Self {
        Self {
            task_threads: None,
            external_task_threads: 0,
            thread_name: default_thread_name_fn(),
            thread_stack_size: None,
            max_steal_retries: MAX_STEAL_RETRIES,
            spin_count: SPIN_COUNT,
            split_factor: DEFAULT_SPLIT_FACTOR,
            profiler: ProfilerCallbacks::default(),
        }
    }

    /// Total number of task threads, counting the thread that initializes the
    /// scheduler as index 0. `val - 1` worker threads are spawned.
    ///
    /// Defaults to 1 per CPU core.
    #[track_caller]
    pub fn task_threads(mut self, val: u32) -> Self {
        assert!(val > 0, "task_threads must be greater than 0");
        self.task_threads = Some(val);
        self
    }

    /// Reserves `val` task thread indices, right after the workers, for host
    /// threads that call
    /// [`Scheduler::register_external_task_thread`].
    pub fn external_task_threads(mut self, val: u32) -> Self {
        self.external_task_threads = val;
        self
    }

    /// Sets the name of every thread spawned by the scheduler.
    ///
    /// The default name is "taskweave-{N}", where N is the task thread index.
    pub fn thread_name(mut self, val: impl Into<String>) -> Self {
        let val = val.into();
        self.thread_name = ThreadNameFn(Arc::new(move |_| val.clone()));
        self
    }

    /// Sets a function that names spawned threads from their task thread
    /// index.
    pub fn thread_name_fn<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) -> String + Send + Sync + 'static,
    {
        self.thread_name = ThreadNameFn(Arc::new(f));
        self
    }

    /// Sets the stack size (in bytes) for worker threads.
    ///
    /// The actual stack size may be greater than this value if the platform
    /// specifies minimal stack size.
    pub fn thread_stack_size(mut self, val: usize) -> Self {
        self.thread_stack_size = Some(val);
        self
    }

    #[track_caller]
    pub fn max_steal_retries(mut self, val: usize) -> Self {
        assert!(val > 0, "max_steal_retries must be greater than 0");
        self.max_steal_retries = val;
        self
    }

    /// Number of consecutive empty scans for work before a thread parks.
    #[track_caller]
    pub fn spin_count(mut self, val: u32) -> Self {
        assert!(val > 0, "spin_count must be greater than 0");
        self.spin_count = val;
        self
    }

    /// Target number of runnable partitions per task thread for each task set
    /// submission. Higher values balance load better when partitions take
    /// uneven time, at the cost of more queue operations.
    #[track_caller]
    pub fn split_factor(mut self, val: u32) -> Self {
        assert!(val > 0, "split_factor must be greater than 0");
        self.split_factor = val;
        self
    }

    pub fn profiler_callbacks(mut self, callbacks: ProfilerCallbacks) -> Self {
        self.profiler = callbacks;
        self
    }

    /// Creates the scheduler and starts its worker threads. The calling thread
    /// becomes task thread 0.
    pub fn try_build(self) -> Result<Scheduler> {
        let mut scheduler = Scheduler::new();
        scheduler.initialize_with_builder(self)?;
        Ok(scheduler)
    }
}

/// Validated, immutable scheduler settings.
#[derive(Debug, Clone)]
pub(crate) struct SchedulerConfig {
    /// Initializing thread plus spawned workers.
    pub(crate) num_threads: u32,
    pub(crate) num_external_task_threads: u32,
    /// Every index a task thread can hold: `num_threads` plus external slots.
    pub(crate) num_task_threads: u32,
    pub(crate) thread_name: ThreadNameFn,
    pub(crate) thread_stack_size: Option<usize>,
    pub(crate) max_steal_retries: usize,
    pub(crate) spin_count: u32,
    pub(crate) split_factor: u32,
    pub(crate) profiler: ProfilerCallbacks,
}

impl SchedulerConfig {
    pub(crate) fn num_workers(&self) -> u32 {
        self.num_threads - 1
    }

    fn validate(&self) -> Result<()> {
        if self.num_threads == 0 {
            return Err(anyhow!("a scheduler needs at least one task thread"));
        }

        // `NO_THREAD_NUM` must never be a valid index.
        if self.num_task_threads >= NO_THREAD_NUM {
            return Err(anyhow!(
                "{} task threads exceed the supported maximum",
                self.num_task_threads
            ));
        }

        Ok(())
    }
}

impl TryFrom<Builder> for SchedulerConfig {
    type Error = anyhow::Error;

    fn try_from(builder: Builder) -> Result<Self, Self::Error> {
        let num_threads = match builder.task_threads {
            Some(n) => n,
            None => {
                let cores = thread::available_parallelism()
                    .context("failed to query available parallelism")?
                    .get();
                u32::try_from(cores).unwrap_or(u32::MAX)
            }
        };

        let num_task_threads = num_threads
            .checked_add(builder.external_task_threads)
            .ok_or_else(|| anyhow!("task thread count overflows u32"))?;

        let cfg = SchedulerConfig {
            num_threads,
            num_external_task_threads: builder.external_task_threads,
            num_task_threads,
            thread_name: builder.thread_name,
            thread_stack_size: builder.thread_stack_size,
            max_steal_retries: builder.max_steal_retries,
            spin_count: builder.spin_count,
            split_factor: builder.split_factor,
            profiler: builder.profiler,
        };

        cfg.validate()?;

        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    // Cloned into every worker thread.
    assert_impl_all!(SchedulerConfig: Send, Sync, Clone);
    assert_impl_all!(Builder: Send);

    #[test]
    fn test_config_from_builder() -> Result<()> {
        let cfg = SchedulerConfig::try_from(
            Builder::new()
                .task_threads(3)
                .external_task_threads(2)
                .split_factor(8),
        )?;

        assert_eq!(cfg.num_threads, 3);
        assert_eq!(cfg.num_workers(), 2);
        assert_eq!(cfg.num_task_threads, 5);
        assert_eq!(cfg.split_factor, 8);
        assert_eq!(cfg.max_steal_retries, MAX_STEAL_RETRIES);
        assert_eq!((cfg.thread_name.0)(4), "taskweave-4");
        Ok(())
    }

    #[test]
    fn test_default_task_threads_is_core_count() -> Result<()> {
        let cfg = SchedulerConfig::try_from(Builder::new())?;
        assert_eq!(
            cfg.num_threads as usize,
            thread::available_parallelism()?.get()
        );
        assert_eq!(cfg.num_external_task_threads, 0);
        Ok(())
    }

    #[test]
    fn test_too_many_task_threads() {
        let res = SchedulerConfig::try_from(
            Builder::new()
                .task_threads(u32::MAX - 1)
                .external_task_threads(1),
        );
        assert!(res.is_err());
    }

    #[test]
    fn test_thread_name() {
        let builder = Builder::new().thread_name("physics");
        assert_eq!((builder.thread_name.0)(3), "physics");
    }

    #[test]
    #[should_panic(expected = "task_threads must be greater than 0")]
    fn test_zero_task_threads_panics() {
        let _ = Builder::new().task_threads(0);
    }
}
