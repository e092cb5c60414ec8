use crate::task::Priority;
use crate::task::completion::CompletionFlag;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};

pub(crate) type ExecuteFn = dyn Fn() + Send + Sync + 'static;

pub(crate) struct PinnedTaskInner {
    func: Box<ExecuteFn>,

    /// Task thread index this task is bound to. Immutable.
    thread_num: u32,

    priority: AtomicU8,

    pub(crate) complete: CompletionFlag,
}

impl PinnedTaskInner {
    #[inline(always)]
    pub(crate) fn execute(&self) {
        (self.func)()
    }

    pub(crate) fn thread_num(&self) -> u32 {
        self.thread_num
    }

    pub(crate) fn priority(&self) -> Priority {
        Priority::from_index(self.priority.load(Ordering::Relaxed) as usize)
    }
}

/// A non-divisible unit of work that only ever runs on one task thread.
///
/// Pinned tasks bypass work stealing. They run when the owning thread polls
/// its pinned list: workers do so on every scan, other threads through
/// [`Scheduler::run_pinned_tasks`](crate::Scheduler::run_pinned_tasks) or
/// while waiting.
pub struct PinnedTask {
    inner: Arc<PinnedTaskInner>,
}

impl PinnedTask {
    pub fn new<F>(thread_num: u32, func: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(PinnedTaskInner {
                func: Box::new(func),
                thread_num,
                priority: AtomicU8::new(Priority::default() as u8),
                complete: CompletionFlag::new(),
            }),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.set_priority(priority);
        self
    }

    /// Panics if the task is in flight.
    #[track_caller]
    pub fn set_priority(&mut self, priority: Priority) {
        assert!(
            self.is_complete(),
            "PinnedTask::set_priority called while the task is in flight"
        );
        self.inner.priority.store(priority as u8, Ordering::Relaxed);
    }

    pub fn priority(&self) -> Priority {
        self.inner.priority()
    }

    pub fn thread_num(&self) -> u32 {
        self.inner.thread_num
    }

    pub fn is_complete(&self) -> bool {
        self.inner.complete.is_set()
    }

    pub(crate) fn inner(&self) -> &Arc<PinnedTaskInner> {
        &self.inner
    }
}

impl fmt::Debug for PinnedTask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PinnedTask")
            .field("thread_num", &self.thread_num())
            .field("priority", &self.priority())
            .field("complete", &self.is_complete())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(PinnedTask: Send, Sync);

    #[test]
    fn test_pinned_task_defaults() {
        let task = PinnedTask::new(2, || {}).with_priority(Priority::Medium);
        assert_eq!(task.thread_num(), 2);
        assert_eq!(task.priority(), Priority::Medium);
        assert!(task.is_complete());
    }

    #[test]
    #[should_panic(expected = "in flight")]
    fn test_set_priority_in_flight_panics() {
        let mut task = PinnedTask::new(0, || {});
        task.inner.complete.arm();
        task.set_priority(Priority::High);
    }
}
