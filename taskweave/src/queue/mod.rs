//! Per-priority work queues.
//!
//! Every task thread owns one crossbeam LIFO deque per priority tier. Only the
//! owner pushes and pops; peers hold the matching [`Stealer`]s. Threads that
//! are not registered with the scheduler have no deque, so their submissions
//! land in the per-priority [`Injector`]s instead.

use crate::runtime::partition::Partition;
use crate::task::{NUM_PRIORITIES, Priority};
use crossbeam_deque::{Injector, Steal, Stealer, Worker as CbWorker};
use std::fmt;

pub(crate) mod pinned;
pub(crate) use pinned::PinnedTaskList;

/// Queues owned by one task thread. Not `Sync`: it lives in the owning
/// thread's context.
pub(crate) struct LocalQueues {
    queues: [CbWorker<Partition>; NUM_PRIORITIES],
}

impl LocalQueues {
    pub(crate) fn new() -> (Self, QueueStealers) {
        // LIFO so that the remainder a thread pushes back after splitting is
        // the next thing it pops, while the cache is still hot.
        let queues: [CbWorker<Partition>; NUM_PRIORITIES] =
            std::array::from_fn(|_| CbWorker::new_lifo());
        let stealers = queues.each_ref().map(|q| q.stealer());

        (Self { queues }, QueueStealers { stealers })
    }

    #[inline(always)]
    pub(crate) fn push(&self, partition: Partition) {
        self.queues[partition.priority().index()].push(partition);
    }

    #[inline(always)]
    pub(crate) fn pop(&self, priority: Priority) -> Option<Partition> {
        self.queues[priority.index()].pop()
    }

    pub(crate) fn queue(&self, priority: Priority) -> &CbWorker<Partition> {
        &self.queues[priority.index()]
    }

    pub(crate) fn len(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }
}

impl fmt::Debug for LocalQueues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalQueues")
            .field("len", &self.len())
            .finish()
    }
}

/// Steal side of one thread's [`LocalQueues`]. Cheap to clone.
#[derive(Clone)]
pub(crate) struct QueueStealers {
    stealers: [Stealer<Partition>; NUM_PRIORITIES],
}

impl QueueStealers {
    #[inline(always)]
    pub(crate) fn steal(&self, priority: Priority) -> Steal<Partition> {
        self.stealers[priority.index()].steal()
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self, priority: Priority) -> bool {
        self.stealers[priority.index()].is_empty()
    }
}

impl fmt::Debug for QueueStealers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lens = self.stealers.each_ref().map(|s| s.len());
        f.debug_struct("QueueStealers").field("lens", &lens).finish()
    }
}

/// Shared entry point for partitions submitted from unregistered threads.
pub(crate) struct GlobalQueues {
    injectors: [Injector<Partition>; NUM_PRIORITIES],
}

impl GlobalQueues {
    pub(crate) fn new() -> Self {
        Self {
            injectors: std::array::from_fn(|_| Injector::new()),
        }
    }

    pub(crate) fn push(&self, partition: Partition) {
        self.injectors[partition.priority().index()].push(partition);
    }

    /// Moves a batch into `dest` and pops one of them, so the rest become
    /// stealable from the calling thread.
    #[inline(always)]
    pub(crate) fn steal_into(&self, priority: Priority, dest: &LocalQueues) -> Steal<Partition> {
        self.injectors[priority.index()].steal_batch_and_pop(dest.queue(priority))
    }

    #[inline(always)]
    pub(crate) fn is_empty(&self, priority: Priority) -> bool {
        self.injectors[priority.index()].is_empty()
    }
}

impl fmt::Debug for GlobalQueues {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lens = self.injectors.each_ref().map(|i| i.len());
        f.debug_struct("GlobalQueues").field("lens", &lens).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{TaskSet, TaskSetPartition};
    use static_assertions::{assert_impl_all, assert_not_impl_any};
    use std::sync::Arc;

    assert_impl_all!(LocalQueues: Send);
    assert_not_impl_any!(LocalQueues: Sync);
    assert_impl_all!(QueueStealers: Send, Sync, Clone);
    assert_impl_all!(GlobalQueues: Send, Sync);

    fn partition(task: &TaskSet, start: u32, end: u32) -> Partition {
        Partition::new(Arc::clone(task.inner()), TaskSetPartition::new(start, end))
    }

    #[test]
    fn test_local_push_pop_by_priority() {
        let high = TaskSet::new(|_, _| {}).with_priority(Priority::High);
        let low = TaskSet::new(|_, _| {});
        let (local, stealers) = LocalQueues::new();

        local.push(partition(&low, 0, 1));
        local.push(partition(&high, 0, 1));
        local.push(partition(&high, 1, 2));

        assert_eq!(local.len(), 3);
        assert!(!stealers.is_empty(Priority::High));
        assert!(stealers.is_empty(Priority::Medium));

        // LIFO locally.
        assert_eq!(local.pop(Priority::High).map(|p| p.range().start), Some(1));

        // Peers steal from the other end.
        let stolen = stealers.steal(Priority::High).success();
        assert_eq!(stolen.map(|p| p.range().start), Some(0));

        assert!(local.pop(Priority::High).is_none());
        assert!(local.pop(Priority::Low).is_some());
    }

    #[test]
    fn test_injector_steal_into_local() {
        let task = TaskSet::new(|_, _| {}).with_priority(Priority::Medium);
        let global = GlobalQueues::new();
        let (local, _stealers) = LocalQueues::new();

        for i in 0..8 {
            global.push(partition(&task, i, i + 1));
        }
        assert!(!global.is_empty(Priority::Medium));
        assert!(global.is_empty(Priority::High));

        let mut seen = 0;
        while global.steal_into(Priority::Medium, &local).success().is_some() {
            seen += 1;
            while local.pop(Priority::Medium).is_some() {
                seen += 1;
            }
        }

        assert_eq!(seen, 8);
        assert!(global.is_empty(Priority::Medium));
    }
}
