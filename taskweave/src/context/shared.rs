use crate::context::{ExternalSlots, Parker};
use crate::queue::{GlobalQueues, PinnedTaskList, QueueStealers};
use crate::runtime::{ProfilerCallbacks, SchedulerConfig, SchedulerId};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// State shared by every task thread of one scheduler. Everything except the
/// queues, the parker and the counters is written once at initialization.
#[derive(Debug)]
pub struct Shared {
    pub(crate) id: SchedulerId,

    pub(crate) cfg: SchedulerConfig,

    /// Steal side of every task thread's local queues, indexed by thread
    /// number. Includes the owner's own entry.
    pub(crate) stealers: Vec<QueueStealers>,

    pub(crate) global: GlobalQueues,

    /// Pinned task lists, indexed by thread number.
    pub(crate) pinned: Vec<PinnedTaskList>,

    pub(crate) external: ExternalSlots,

    pub(crate) parker: Parker,

    /// Submitted tasks (sets and pinned) that have not completed yet.
    outstanding: AtomicUsize,

    pub(crate) shutdown: AtomicBool,

    /// Worker threads that unwound out of a task closure.
    panicked_workers: AtomicUsize,
}

impl Shared {
    pub(crate) fn new(
        id: SchedulerId,
        cfg: SchedulerConfig,
        stealers: Vec<QueueStealers>,
        external: ExternalSlots,
    ) -> Self {
        debug_assert_eq!(stealers.len(), cfg.num_task_threads as usize);

        let pinned = (0..cfg.num_task_threads)
            .map(|_| PinnedTaskList::new())
            .collect();

        Self {
            id,
            cfg,
            stealers,
            global: GlobalQueues::new(),
            pinned,
            external,
            parker: Parker::new(),
            outstanding: AtomicUsize::new(0),
            shutdown: AtomicBool::new(false),
            panicked_workers: AtomicUsize::new(0),
        }
    }

    #[inline(always)]
    pub(crate) fn num_task_threads(&self) -> u32 {
        self.cfg.num_task_threads
    }

    #[inline(always)]
    pub(crate) fn profiler(&self) -> &ProfilerCallbacks {
        &self.cfg.profiler
    }

    /// Must be called before the task becomes visible to other threads.
    #[inline(always)]
    pub(crate) fn task_submitted(&self) {
        self.outstanding.fetch_add(1, Ordering::Relaxed);
    }

    /// Called once per submission, after its completion counter or flag hit
    /// the done state.
    pub(crate) fn task_completed(&self) {
        let prev = self.outstanding.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "outstanding task counter underflow");

        self.parker.unpark_waiters();
    }

    #[inline(always)]
    pub(crate) fn all_tasks_complete(&self) -> bool {
        self.outstanding.load(Ordering::Acquire) == 0
    }

    pub(crate) fn num_outstanding(&self) -> usize {
        self.outstanding.load(Ordering::Acquire)
    }

    #[inline(always)]
    pub(crate) fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    pub(crate) fn request_shutdown(&self) -> usize {
        self.shutdown.store(true, Ordering::Release);
        self.parker.unpark_all()
    }

    pub(crate) fn worker_panicked(&self) {
        self.panicked_workers.fetch_add(1, Ordering::Release);
        // Waiters may be blocked on work this worker will never finish.
        self.parker.unpark_waiters();
    }

    pub(crate) fn has_panicked_workers(&self) -> bool {
        self.panicked_workers.load(Ordering::Acquire) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(Shared: Send, Sync);
}
