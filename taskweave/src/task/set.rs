use crate::task::Priority;
use crate::task::completion::CompletionCounter;
use std::fmt;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU32, Ordering};

/// Contiguous sub-range `[start, end)` of a task set's index space. This is
/// the unit handed to the execution closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskSetPartition {
    pub start: u32,
    pub end: u32,
}

impl TaskSetPartition {
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end, "inverted partition [{start}, {end})");
        Self { start, end }
    }

    #[inline(always)]
    pub fn len(&self) -> u32 {
        self.end - self.start
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }

    pub fn as_range(&self) -> Range<u32> {
        self.start..self.end
    }
}

impl From<Range<u32>> for TaskSetPartition {
    fn from(range: Range<u32>) -> Self {
        Self::new(range.start, range.end)
    }
}

impl IntoIterator for TaskSetPartition {
    type Item = u32;
    type IntoIter = Range<u32>;

    fn into_iter(self) -> Self::IntoIter {
        self.as_range()
    }
}

pub(crate) type ExecuteRangeFn = dyn Fn(TaskSetPartition, u32) + Send + Sync + 'static;

/// Engine-visible state of a task set. Shared between the caller handle and
/// every queued partition.
pub(crate) struct TaskSetInner {
    func: Box<ExecuteRangeFn>,

    priority: AtomicU8,

    /// Minimum partition size requested by the caller.
    min_range: AtomicU32,

    /// Size of the last submission.
    set_size: AtomicU32,

    /// Partition size chosen at submission. Queued partitions longer than this
    /// are split again by the thread that picks them up.
    range_to_run: AtomicU32,

    pub(crate) counter: CompletionCounter,
}

impl TaskSetInner {
    #[inline(always)]
    pub(crate) fn execute(&self, partition: TaskSetPartition, thread_num: u32) {
        (self.func)(partition, thread_num)
    }

    pub(crate) fn priority(&self) -> Priority {
        Priority::from_index(self.priority.load(Ordering::Relaxed) as usize)
    }

    pub(crate) fn min_range(&self) -> u32 {
        self.min_range.load(Ordering::Relaxed)
    }

    pub(crate) fn range_to_run(&self) -> u32 {
        self.range_to_run.load(Ordering::Relaxed)
    }

    /// Records the submission parameters. Only called while the task is not
    /// in flight, before any partition is published.
    pub(crate) fn prepare(&self, set_size: u32, min_range: u32, range_to_run: u32) {
        self.set_size.store(set_size, Ordering::Relaxed);
        self.min_range.store(min_range, Ordering::Relaxed);
        self.range_to_run.store(range_to_run, Ordering::Relaxed);
    }
}

/// A divisible unit of work over the index range `[0, set_size)`.
///
/// The closure receives the partition to process and the index of the task
/// thread running it. Partitions of the same submission may run concurrently
/// on different threads, hence `Fn + Sync`.
///
/// ```
/// use std::sync::Arc;
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use taskweave::{Builder, TaskSet};
///
/// let scheduler = Builder::new().task_threads(2).try_build().unwrap();
/// let sum = Arc::new(AtomicU64::new(0));
///
/// let task = TaskSet::new({
///     let sum = Arc::clone(&sum);
///     move |range, _thread_num| {
///         let part: u64 = range.into_iter().map(u64::from).sum();
///         sum.fetch_add(part, Ordering::Relaxed);
///     }
/// });
///
/// scheduler.submit_task_set(&task, 100);
/// scheduler.wait_for_task(&task);
/// assert_eq!(sum.load(Ordering::Relaxed), 4950);
/// ```
pub struct TaskSet {
    inner: Arc<TaskSetInner>,
}

impl TaskSet {
    pub fn new<F>(func: F) -> Self
    where
        F: Fn(TaskSetPartition, u32) + Send + Sync + 'static,
    {
        Self {
            inner: Arc::new(TaskSetInner {
                func: Box::new(func),
                priority: AtomicU8::new(Priority::default() as u8),
                min_range: AtomicU32::new(1),
                set_size: AtomicU32::new(0),
                range_to_run: AtomicU32::new(1),
                counter: CompletionCounter::new(),
            }),
        }
    }

    pub fn with_priority(mut self, priority: Priority) -> Self {
        self.set_priority(priority);
        self
    }

    pub fn with_min_range(mut self, min_range: u32) -> Self {
        self.set_min_range(min_range);
        self
    }

    /// Panics if the task is in flight.
    #[track_caller]
    pub fn set_priority(&mut self, priority: Priority) {
        self.assert_idle("set_priority");
        self.inner.priority.store(priority as u8, Ordering::Relaxed);
    }

    pub fn priority(&self) -> Priority {
        self.inner.priority()
    }

    /// Minimum number of elements per partition used when the task is
    /// submitted without an explicit hint. Zero is treated as one.
    #[track_caller]
    pub fn set_min_range(&mut self, min_range: u32) {
        self.assert_idle("set_min_range");
        self.inner.min_range.store(min_range.max(1), Ordering::Relaxed);
    }

    pub fn min_range(&self) -> u32 {
        self.inner.min_range()
    }

    /// Size of the most recent submission, 0 if never submitted.
    pub fn set_size(&self) -> u32 {
        self.inner.set_size.load(Ordering::Relaxed)
    }

    /// Non-blocking completion poll. A task set that was never submitted is
    /// complete.
    pub fn is_complete(&self) -> bool {
        self.inner.counter.is_zero()
    }

    pub(crate) fn inner(&self) -> &Arc<TaskSetInner> {
        &self.inner
    }

    #[track_caller]
    fn assert_idle(&self, op: &str) {
        assert!(
            self.is_complete(),
            "TaskSet::{op} called while the task set is in flight"
        );
    }
}

impl fmt::Debug for TaskSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskSet")
            .field("priority", &self.priority())
            .field("min_range", &self.min_range())
            .field("set_size", &self.set_size())
            .field("outstanding", &self.inner.counter.outstanding())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(TaskSet: Send, Sync);
    assert_impl_all!(TaskSetInner: Send, Sync);

    #[test]
    fn test_partition_helpers() {
        let p = TaskSetPartition::from(3..10);
        assert_eq!(p.len(), 7);
        assert!(!p.is_empty());
        assert_eq!(p.into_iter().collect::<Vec<_>>(), (3..10).collect::<Vec<_>>());
        assert!(TaskSetPartition::new(4, 4).is_empty());
    }

    #[test]
    fn test_task_set_defaults() {
        let task = TaskSet::new(|_, _| {});
        assert!(task.is_complete());
        assert_eq!(task.priority(), Priority::Low);
        assert_eq!(task.min_range(), 1);
        assert_eq!(task.set_size(), 0);
    }

    #[test]
    fn test_task_set_setters() {
        let task = TaskSet::new(|_, _| {})
            .with_priority(Priority::High)
            .with_min_range(0);

        assert_eq!(task.priority(), Priority::High);
        assert_eq!(task.min_range(), 1, "zero min range is clamped");
    }

    #[test]
    #[should_panic(expected = "in flight")]
    fn test_set_priority_in_flight_panics() {
        let mut task = TaskSet::new(|_, _| {});
        task.inner.counter.add(1);
        task.set_priority(Priority::High);
    }
}
