use crate::context::parker::ParkSlot;
use crate::context::{ParkReason, Shared, ThreadContext};
use crate::runtime::partition::Partition;
use crate::runtime::{NO_THREAD_NUM, ProfilerEvent};
use crate::task::{PinnedTaskInner, Priority};
use crate::utils::ScopeGuard;
use crossbeam_deque::Steal;
use std::hint;
use std::iter;
use std::sync::Arc;

/// A unit of work claimed by a task thread.
pub(crate) enum Runnable {
    Partition(Partition),
    Pinned(Arc<PinnedTaskInner>),
}

/// Execution logic of a registered task thread. The same loop drives spawned
/// workers, and the initializing or external threads while they wait.
pub(crate) struct Worker<'a> {
    shared: &'a Shared,
    ctx: &'a ThreadContext,
}

impl<'a> Worker<'a> {
    pub(crate) fn new(shared: &'a Shared, ctx: &'a ThreadContext) -> Self {
        debug_assert_eq!(shared.id, ctx.scheduler_id);
        Self { shared, ctx }
    }

    #[inline(always)]
    fn thread_num(&self) -> u32 {
        self.ctx.thread_num
    }

    /// Finds the most urgent runnable unit at `max` priority or above. Within
    /// a tier: own pinned tasks, own queue, injector, then peers.
    pub(crate) fn find_task(&self, max: Priority) -> Option<Runnable> {
        let pinned = &self.shared.pinned[self.thread_num() as usize];

        max.up_to().find_map(|priority| {
            pinned
                .pop(priority)
                .map(Runnable::Pinned)
                .or_else(|| self.ctx.queues.pop(priority).map(Runnable::Partition))
                .or_else(|| self.steal(priority).map(Runnable::Partition))
        })
    }

    fn steal(&self, priority: Priority) -> Option<Partition> {
        let stealers = &self.shared.stealers;
        let own = self.thread_num() as usize;

        iter::repeat_with(|| {
            // A batch from the injector lands in our own queue, where peers
            // can steal it in turn.
            self.shared
                .global
                .steal_into(priority, &self.ctx.queues)
                .or_else(|| {
                    // Random start so that idle threads do not all hammer the
                    // same victim. `collect` stops at the first success.
                    let offset = fastrand::usize(..stealers.len());
                    (0..stealers.len())
                        .map(|i| (offset + i) % stealers.len())
                        .filter(|i| *i != own)
                        .map(|i| stealers[i].steal(priority))
                        .collect::<Steal<_>>()
                })
        })
        .take(self.shared.cfg.max_steal_retries)
        .find(|s| !s.is_retry())
        .and_then(|s| s.success())
    }

    /// Cheap check used right before parking, under the parker lock.
    pub(crate) fn has_work(&self, max: Priority) -> bool {
        let shared = self.shared;

        !shared.pinned[self.thread_num() as usize].is_empty(max)
            || max.up_to().any(|priority| {
                !shared.global.is_empty(priority)
                    || shared.stealers.iter().any(|s| !s.is_empty(priority))
            })
    }

    pub(crate) fn run(&self, runnable: Runnable) {
        let thread_num = self.thread_num();
        let _running = self.ctx.enter_task();

        match runnable {
            Runnable::Partition(mut partition) => {
                if let Some(rest) = partition.split() {
                    let priority = rest.priority();
                    self.ctx.queues.push(rest);
                    self.shared.parker.unpark_for_work(priority, 1);
                }

                if partition.run(thread_num) {
                    self.shared.task_completed();
                }
            }
            Runnable::Pinned(task) => {
                debug_assert_eq!(task.thread_num(), thread_num);
                task.execute();
                task.complete.set();
                self.shared.task_completed();
            }
        }
    }

    /// Runs queued pinned tasks for this thread, most urgent first, until the
    /// list is empty. Tasks queued while draining run too.
    pub(crate) fn run_pinned_tasks(&self, max: Priority) -> usize {
        let pinned = &self.shared.pinned[self.thread_num() as usize];
        let mut num_run = 0;

        while let Some(task) = max.up_to().find_map(|p| pinned.pop(p)) {
            self.run(Runnable::Pinned(task));
            num_run += 1;
        }

        num_run
    }

    /// Runs work at `max` priority or above until `done` holds, parking when
    /// there is none.
    pub(crate) fn wait_until<F>(&self, max: Priority, done: F)
    where
        F: Fn() -> bool,
    {
        let mut spins = 0;

        while !done() {
            if let Some(task) = self.find_task(max) {
                self.run(task);
                spins = 0;
                continue;
            }

            spins += 1;
            if spins < self.shared.cfg.spin_count {
                hint::spin_loop();
                continue;
            }

            spins = 0;
            self.park(ParkReason::TaskComplete, Some(max), || {
                done() || self.has_work(max)
            });
        }
    }

    /// Parks until a pinned task is queued for this thread, or shutdown.
    pub(crate) fn wait_for_new_pinned_tasks(&self) {
        let pinned = &self.shared.pinned[self.thread_num() as usize];

        self.park(ParkReason::NewPinnedTask, None, || {
            self.shared.is_shutdown() || !pinned.is_empty(Priority::LOWEST)
        });
    }

    /// Main loop of spawned workers. Returns once shutdown is requested.
    pub(crate) fn event_loop(&self) {
        let thread_num = self.thread_num();
        let profiler = self.shared.profiler();

        profiler.emit(ProfilerEvent::ThreadStart, thread_num);
        let _stop = ScopeGuard::new(|| profiler.emit(ProfilerEvent::ThreadStop, thread_num));

        let mut spins = 0;

        while !self.shared.is_shutdown() {
            if let Some(task) = self.find_task(Priority::LOWEST) {
                self.run(task);
                spins = 0;
                continue;
            }

            spins += 1;
            if spins < self.shared.cfg.spin_count {
                hint::spin_loop();
                continue;
            }

            spins = 0;
            self.park(ParkReason::NewTask, Some(Priority::LOWEST), || {
                self.shared.is_shutdown() || self.has_work(Priority::LOWEST)
            });
        }
    }

    fn park<F>(&self, reason: ParkReason, max_priority: Option<Priority>, should_abort: F)
    where
        F: FnOnce() -> bool,
    {
        let slot = ParkSlot {
            reason,
            thread_num: Some(self.thread_num()),
            max_priority,
        };

        park_with_events(self.shared, slot, should_abort);
    }
}

/// Wait loop of threads that hold no task thread index. They cannot run
/// partitions, so they only park until `done` holds.
pub(crate) fn wait_unregistered<F>(shared: &Shared, done: F)
where
    F: Fn() -> bool,
{
    let slot = ParkSlot {
        reason: ParkReason::TaskComplete,
        thread_num: None,
        max_priority: None,
    };

    while !done() {
        park_with_events(shared, slot, &done);
    }
}

/// Parks the current thread, bracketed by the suspend profiler events that
/// match `slot.reason`.
fn park_with_events<F>(shared: &Shared, slot: ParkSlot, should_abort: F)
where
    F: FnOnce() -> bool,
{
    let (start, stop) = match slot.reason {
        ParkReason::NewTask | ParkReason::NewPinnedTask => (
            ProfilerEvent::WaitForNewTaskSuspendStart,
            ProfilerEvent::WaitForNewTaskSuspendStop,
        ),
        ParkReason::TaskComplete => (
            ProfilerEvent::WaitForTaskCompleteSuspendStart,
            ProfilerEvent::WaitForTaskCompleteSuspendStop,
        ),
    };

    let thread_num = slot.thread_num.unwrap_or(NO_THREAD_NUM);
    let profiler = shared.profiler();

    profiler.emit(start, thread_num);
    let _stop = ScopeGuard::new(|| profiler.emit(stop, thread_num));

    shared.parker.park_current_thread(slot, should_abort);
}
