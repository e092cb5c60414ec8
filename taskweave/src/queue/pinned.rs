use crate::task::{NUM_PRIORITIES, PinnedTaskInner, Priority};
use crossbeam_queue::SegQueue;
use std::fmt;
use std::sync::Arc;

/// Pinned tasks waiting to run on one task thread. Any thread may push, only
/// the owning thread pops. FIFO within a priority tier.
pub(crate) struct PinnedTaskList {
    queues: [SegQueue<Arc<PinnedTaskInner>>; NUM_PRIORITIES],
}

impl PinnedTaskList {
    pub(crate) fn new() -> Self {
        Self {
            queues: std::array::from_fn(|_| SegQueue::new()),
        }
    }

    pub(crate) fn push(&self, task: Arc<PinnedTaskInner>) {
        self.queues[task.priority().index()].push(task);
    }

    #[inline(always)]
    pub(crate) fn pop(&self, priority: Priority) -> Option<Arc<PinnedTaskInner>> {
        self.queues[priority.index()].pop()
    }

    /// True if no task at `max_priority` or above is queued.
    #[inline(always)]
    pub(crate) fn is_empty(&self, max_priority: Priority) -> bool {
        max_priority
            .up_to()
            .all(|p| self.queues[p.index()].is_empty())
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.queues.iter().map(|q| q.len()).sum()
    }
}

impl fmt::Debug for PinnedTaskList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let lens = self.queues.each_ref().map(|q| q.len());
        f.debug_struct("PinnedTaskList").field("lens", &lens).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::PinnedTask;
    use static_assertions::assert_impl_all;

    assert_impl_all!(PinnedTaskList: Send, Sync);

    #[test]
    fn test_fifo_within_priority() {
        let list = PinnedTaskList::new();
        let tasks = (0..3)
            .map(|_| PinnedTask::new(0, || {}).with_priority(Priority::Medium))
            .collect::<Vec<_>>();

        for task in &tasks {
            list.push(Arc::clone(task.inner()));
        }

        assert_eq!(list.len(), 3);
        assert!(list.is_empty(Priority::High));
        assert!(!list.is_empty(Priority::Medium));

        for task in &tasks {
            let popped = list.pop(Priority::Medium).expect("task queued");
            assert!(Arc::ptr_eq(&popped, task.inner()));
        }
        assert!(list.pop(Priority::Medium).is_none());
    }
}
