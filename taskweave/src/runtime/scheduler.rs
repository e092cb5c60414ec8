use crate::context::{self, ExternalSlots, Shared, ThreadContext, ThreadKind};
use crate::errors::SchedulerError;
use crate::queue::LocalQueues;
use crate::runtime::partition::{Partition, PartitionPlan};
use crate::runtime::pool::ThreadPool;
use crate::runtime::worker::{self, Worker};
use crate::runtime::{
    Builder, NO_THREAD_NUM, ProfilerCallbacks, ProfilerEvent, SchedulerConfig, SchedulerId,
};
use crate::task::{PinnedTask, Priority, TaskRef, TaskSet};
use crate::utils::ScopeGuard;
use anyhow::{Result, anyhow};
use smallvec::SmallVec;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

/// Initial partitions of one submission are collected on the stack first. The
/// policy yields about one per task thread.
const INLINE_PARTITIONS: usize = 16;

/// A work-stealing scheduler for [`TaskSet`]s and [`PinnedTask`]s.
///
/// The thread that initializes the scheduler becomes task thread 0 and takes
/// part in execution whenever it waits. Dropping the scheduler waits for all
/// submitted work, then stops and joins the workers.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU32, Ordering};
/// use taskweave::{PinnedTask, Scheduler};
///
/// let mut scheduler = Scheduler::new();
/// scheduler.initialize_with_threads(2).unwrap();
///
/// let hits = Arc::new(AtomicU32::new(0));
/// let task = PinnedTask::new(1, {
///     let hits = Arc::clone(&hits);
///     move || {
///         hits.fetch_add(1, Ordering::Relaxed);
///     }
/// });
///
/// scheduler.submit_pinned_task(&task);
/// scheduler.wait_for_all();
/// assert!(task.is_complete());
/// assert_eq!(hits.load(Ordering::Relaxed), 1);
/// ```
#[derive(Debug, Default)]
pub struct Scheduler {
    running: Option<Running>,
}

#[derive(Debug)]
struct Running {
    shared: Arc<Shared>,
    pool: ThreadPool,
}

impl Scheduler {
    /// Creates an uninitialized scheduler. Every other operation panics until
    /// one of the `initialize` functions succeeds.
    pub fn new() -> Self {
        Self { running: None }
    }

    pub fn builder() -> Builder {
        Builder::new()
    }

    /// Starts the scheduler with one task thread per CPU core.
    #[track_caller]
    pub fn initialize(&mut self) -> Result<()> {
        self.initialize_with_builder(Builder::new())
    }

    /// Starts the scheduler with `num_threads` task threads, the calling thread
    /// included.
    #[track_caller]
    pub fn initialize_with_threads(&mut self, num_threads: u32) -> Result<()> {
        self.initialize_with_builder(Builder::new().task_threads(num_threads))
    }

    #[track_caller]
    pub fn initialize_with_builder(&mut self, builder: Builder) -> Result<()> {
        assert!(self.running.is_none(), "scheduler is already initialized");

        let cfg = SchedulerConfig::try_from(builder)?;
        self.running = Some(Running::start(cfg)?);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.running.is_some()
    }

    #[track_caller]
    fn shared(&self) -> &Arc<Shared> {
        match &self.running {
            Some(running) => &running.shared,
            None => panic!("scheduler used before initialization"),
        }
    }

    pub fn id(&self) -> SchedulerId {
        self.shared().id
    }

    /// Every index a task thread can hold, external slots included. Fixed once
    /// initialized.
    pub fn num_task_threads(&self) -> u32 {
        self.shared().num_task_threads()
    }

    pub fn num_external_task_threads(&self) -> u32 {
        self.shared().cfg.num_external_task_threads
    }

    /// External indices not currently held by a registered thread.
    pub fn num_free_external_task_threads(&self) -> usize {
        self.shared().external.num_free()
    }

    /// Task thread index of the calling thread, if it holds one.
    pub fn thread_num(&self) -> Option<u32> {
        context::current_thread_num(self.shared().id)
    }

    pub fn profiler_callbacks(&self) -> &ProfilerCallbacks {
        self.shared().profiler()
    }

    /// True once shutdown started. Long running tasks may poll this to cut
    /// their work short.
    pub fn is_shutdown_requested(&self) -> bool {
        self.shared().is_shutdown()
    }

    /// Submits `task` over `[0, set_size)` with the task's own minimum range.
    /// Does not block.
    ///
    /// # Panics
    ///
    /// If `set_size` is 0 or the task set is still in flight.
    #[track_caller]
    pub fn submit_task_set(&self, task: &TaskSet, set_size: u32) {
        self.submit_task_set_min_range(task, set_size, task.min_range());
    }

    /// Submits `task` over `[0, set_size)`. No partition will be shorter than
    /// `min_range` unless the whole set is.
    #[track_caller]
    pub fn submit_task_set_min_range(&self, task: &TaskSet, set_size: u32, min_range: u32) {
        assert!(set_size > 0, "cannot submit a task set of size 0");
        assert!(
            task.is_complete(),
            "task set submitted while still in flight"
        );

        let shared = self.shared();
        let inner = task.inner();

        let plan = PartitionPlan::new(
            set_size,
            min_range,
            shared.num_task_threads(),
            shared.cfg.split_factor,
        );
        inner.prepare(set_size, plan.min_range, plan.range_to_run);

        let partitions = plan
            .initial_partitions()
            .map(|range| Partition::new(Arc::clone(inner), range))
            .collect::<SmallVec<[_; INLINE_PARTITIONS]>>();
        let num_partitions = partitions.len();

        // Account for the work before anyone can run it.
        inner.counter.add(num_partitions as u32);
        shared.task_submitted();

        match context::current(shared.id) {
            Some(ctx) => partitions.into_iter().for_each(|p| ctx.queues.push(p)),
            None => partitions.into_iter().for_each(|p| shared.global.push(p)),
        }

        shared
            .parker
            .unpark_for_work(inner.priority(), num_partitions);
    }

    /// Queues `task` on its target thread. Does not block.
    ///
    /// # Panics
    ///
    /// If the target index is not below [`Scheduler::num_task_threads`] or the
    /// task is still in flight.
    #[track_caller]
    pub fn submit_pinned_task(&self, task: &PinnedTask) {
        let shared = self.shared();
        let thread_num = task.thread_num();

        assert!(
            thread_num < shared.num_task_threads(),
            "pinned task targets thread {thread_num} but the scheduler has {} task threads",
            shared.num_task_threads()
        );
        assert!(task.is_complete(), "pinned task submitted while still in flight");

        let inner = task.inner();
        inner.complete.arm();
        shared.task_submitted();

        shared.pinned[thread_num as usize].push(Arc::clone(inner));
        shared.parker.unpark_thread(thread_num);
    }

    /// Runs every pinned task queued for the calling thread's index. No-op on
    /// threads that hold no index.
    pub fn run_pinned_tasks(&self) {
        let shared = self.shared();

        if let Some(ctx) = context::current(shared.id) {
            Worker::new(shared, &ctx).run_pinned_tasks(Priority::LOWEST);
        }
    }

    /// Parks the calling thread until a pinned task is queued for its index or
    /// shutdown starts. Returns immediately on threads that hold no index.
    pub fn wait_for_new_pinned_tasks(&self) {
        let shared = self.shared();

        if let Some(ctx) = context::current(shared.id) {
            Worker::new(shared, &ctx).wait_for_new_pinned_tasks();
        }
    }

    /// Blocks until `task` completes, running any ready work meanwhile.
    pub fn wait_for_task<'a>(&self, task: impl Into<TaskRef<'a>>) {
        self.wait_for_task_priority(task, Priority::LOWEST);
    }

    /// Like [`Scheduler::wait_for_task`], but only helps with work at `max`
    /// priority or above. The bound never excludes the awaited task's own
    /// tier, otherwise the caller could park on work only it can run.
    pub fn wait_for_task_priority<'a>(&self, task: impl Into<TaskRef<'a>>, max: Priority) {
        let task = task.into();
        let shared = self.shared();
        let max = max.max(task.priority());

        if !task.is_complete() {
            wait(shared, max, || task.is_complete());
        }
    }

    /// Blocks until every submitted task completed, running work meanwhile.
    ///
    /// # Panics
    ///
    /// When called from inside a task: that task would wait for itself.
    #[track_caller]
    pub fn wait_for_all(&self) {
        self.wait_for_all_priority(Priority::LOWEST);
    }

    /// Like [`Scheduler::wait_for_all`], but only helps with work at `max`
    /// priority or above. Less urgent work must be run by other threads for
    /// this to return.
    #[track_caller]
    pub fn wait_for_all_priority(&self, max: Priority) {
        let shared = self.shared();

        if let Some(ctx) = context::current(shared.id) {
            assert!(
                !ctx.is_running_task(),
                "wait_for_all called from inside a task running on thread {}",
                ctx.thread_num
            );
        }

        if !shared.all_tasks_complete() {
            wait(shared, max, || shared.all_tasks_complete());
        }
    }

    /// Registers the calling thread on the lowest free external index and
    /// returns it.
    pub fn register_external_task_thread(&self) -> Result<u32> {
        let shared = self.shared();
        ensure_unregistered(shared)?;

        let (thread_num, queues) = shared.external.reserve_any()?;
        enter_external(shared, thread_num, queues)?;
        Ok(thread_num)
    }

    /// Registers the calling thread on a specific external index.
    pub fn register_external_task_thread_at(&self, thread_num: u32) -> Result<()> {
        let shared = self.shared();
        ensure_unregistered(shared)?;

        let queues = shared.external.reserve(thread_num)?;
        enter_external(shared, thread_num, queues)
    }

    /// Hands the calling thread's external index back. Partitions left in its
    /// queues stay stealable.
    pub fn deregister_external_task_thread(&self) -> Result<()> {
        let shared = self.shared();

        let Some(ctx) = context::current(shared.id) else {
            return Err(SchedulerError::NotRegistered.into());
        };
        if ctx.kind != ThreadKind::External {
            return Err(SchedulerError::NotAnExternalSlot(ctx.thread_num).into());
        }
        drop(ctx);

        let ctx = context::exit(shared.id)?;
        debug!(scheduler_id = %shared.id, thread_num = ctx.thread_num, "external thread deregistered");
        shared.external.release(ctx.thread_num, ctx.queues);
        Ok(())
    }

    /// Waits for in-flight work, then stops and joins the worker threads.
    pub fn shutdown(mut self) -> Result<()> {
        self.shutdown_inner()
    }

    fn shutdown_inner(&mut self) -> Result<()> {
        let Some(running) = self.running.take() else {
            return Ok(());
        };
        let shared = &running.shared;

        let in_task = context::current(shared.id).is_some_and(|ctx| ctx.is_running_task());

        // Waiting while unwinding could hang on the very task that panicked.
        let done = || shared.all_tasks_complete() || shared.has_panicked_workers();
        if !in_task && !thread::panicking() && !done() {
            wait(shared, Priority::LOWEST, done);
        }

        let num_unparked = shared.request_shutdown();
        debug!(
            scheduler_id = %shared.id,
            num_unparked,
            outstanding = shared.num_outstanding(),
            "shutting down scheduler"
        );

        if in_task {
            // Joining would wait on the current thread. Workers exit on their
            // own once their current unit is done.
            return Err(anyhow!(
                "scheduler {} shut down from inside one of its tasks",
                shared.id
            ));
        }

        let res = running.pool.join_all();

        if context::current(shared.id).is_some()
            && let Err(e) = context::exit(shared.id)
        {
            error!(scheduler_id = %shared.id, error = %e, "failed to release thread context");
        }

        res.map_err(Into::into)
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown_inner() {
            error!(error = ?e, "error during scheduler shutdown");
        }
    }
}

impl Running {
    fn start(cfg: SchedulerConfig) -> Result<Self> {
        let id = SchedulerId::next();

        // Index layout: [0] initializing thread, [1..num_threads] workers,
        // then external slots.
        let (main_queues, main_stealers) = LocalQueues::new();
        let mut stealers = Vec::with_capacity(cfg.num_task_threads as usize);
        stealers.push(main_stealers);

        let workers = (1..cfg.num_threads)
            .map(|thread_num| {
                let (queues, s) = LocalQueues::new();
                stealers.push(s);
                (thread_num, queues)
            })
            .collect::<Vec<_>>();

        let external_queues = (0..cfg.num_external_task_threads)
            .map(|_| {
                let (queues, s) = LocalQueues::new();
                stealers.push(s);
                queues
            })
            .collect::<Vec<_>>();

        let external = ExternalSlots::new(cfg.num_threads, external_queues);

        debug!(
            scheduler_id = %id,
            num_workers = cfg.num_workers(),
            num_external = cfg.num_external_task_threads,
            "initializing scheduler"
        );

        let shared = Arc::new(Shared::new(id, cfg, stealers, external));

        context::enter(ThreadContext::new(&shared, 0, ThreadKind::Main, main_queues))?;

        match ThreadPool::spawn(&shared, workers) {
            Ok(pool) => Ok(Running { shared, pool }),
            Err(e) => {
                if let Err(exit_err) = context::exit(id) {
                    error!(scheduler_id = %id, error = %exit_err, "failed to release thread context");
                }
                Err(e.into())
            }
        }
    }
}

/// Registration guard shared by the external registration entry points.
fn ensure_unregistered(shared: &Shared) -> Result<(), SchedulerError> {
    match context::current_thread_num(shared.id) {
        Some(thread_num) => Err(SchedulerError::AlreadyRegistered(thread_num)),
        None => Ok(()),
    }
}

fn enter_external(shared: &Arc<Shared>, thread_num: u32, queues: LocalQueues) -> Result<()> {
    context::enter(ThreadContext::new(
        shared,
        thread_num,
        ThreadKind::External,
        queues,
    ))?;

    debug!(scheduler_id = %shared.id, thread_num, "external thread registered");
    Ok(())
}

/// Shared body of every wait call: runs work when the calling thread holds an
/// index, parks otherwise.
fn wait<F>(shared: &Shared, max: Priority, done: F)
where
    F: Fn() -> bool,
{
    let ctx = context::current(shared.id);
    let thread_num = ctx.as_ref().map_or(NO_THREAD_NUM, |ctx| ctx.thread_num);
    let profiler = shared.profiler();

    profiler.emit(ProfilerEvent::WaitForTaskCompleteStart, thread_num);
    let _stop = ScopeGuard::new(|| {
        profiler.emit(ProfilerEvent::WaitForTaskCompleteStop, thread_num)
    });

    match ctx {
        Some(ctx) => Worker::new(shared, &ctx).wait_until(max, done),
        None => worker::wait_unregistered(shared, done),
    }
}

#[cfg(test)]
impl Scheduler {
    pub(crate) fn expect_shared(&self) -> &Shared {
        self.shared()
    }

    pub(crate) fn worker_thread_names(&self) -> Vec<Option<String>> {
        self.running
            .as_ref()
            .map_or_else(Vec::new, |running| running.pool.thread_names())
    }

    pub(crate) fn num_workers(&self) -> usize {
        self.running.as_ref().map_or(0, |running| running.pool.len())
    }
}
