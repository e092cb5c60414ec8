//! Range splitting policy for task sets.
//!
//! A submission is cut into a handful of large *initial* partitions, about one
//! per task thread, which are queued on the submitting thread. Whoever picks
//! one up runs only its head (`range_to_run` elements) and pushes the rest
//! back on its own queue, where idle threads can steal it. Large sets thus
//! spread out quickly without paying the queueing cost of every small piece up
//! front.
//!
//! Invariants:
//! - partitions exactly cover `[0, set_size)`,
//! - no partition is shorter than `min_range`, unless the whole set is, in
//!   which case there is exactly one partition.

use crate::task::{Priority, TaskSetInner, TaskSetPartition};
use std::fmt;
use std::sync::Arc;

/// Target number of runnable partitions per task thread. Higher values balance
/// load better at the cost of more queue traffic per element.
pub(crate) const DEFAULT_SPLIT_FACTOR: u32 = 4;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PartitionPlan {
    pub(crate) set_size: u32,
    pub(crate) min_range: u32,
    pub(crate) range_to_run: u32,
    pub(crate) range_to_split: u32,
}

impl PartitionPlan {
    pub(crate) fn new(set_size: u32, min_range: u32, num_threads: u32, split_factor: u32) -> Self {
        debug_assert!(set_size > 0, "empty task set");

        let min_range = min_range.max(1);
        let threads = num_threads.max(1);
        let target = threads.saturating_mul(split_factor.max(1));

        let range_to_run = set_size.div_ceil(target).max(min_range);
        let range_to_split = set_size.div_ceil(threads).max(range_to_run);

        Self {
            set_size,
            min_range,
            range_to_run,
            range_to_split,
        }
    }

    pub(crate) fn initial_partitions(&self) -> Splitter {
        Splitter {
            remaining: Some(TaskSetPartition::new(0, self.set_size)),
            chunk: self.range_to_split,
            min_range: self.min_range,
        }
    }
}

/// Cuts `range` after `chunk` elements. The remainder is only split off if it
/// is at least `min_range` long, otherwise the whole range is returned as the
/// head.
#[inline(always)]
pub(crate) fn split_front(
    range: TaskSetPartition,
    chunk: u32,
    min_range: u32,
) -> (TaskSetPartition, Option<TaskSetPartition>) {
    if range.len() <= chunk {
        return (range, None);
    }

    let mid = range.start + chunk;
    let rest = TaskSetPartition::new(mid, range.end);

    if rest.len() < min_range {
        (range, None)
    } else {
        (TaskSetPartition::new(range.start, mid), Some(rest))
    }
}

/// Iterator over consecutive partitions of at most `chunk` elements, with a
/// short tail merged into its predecessor.
#[derive(Debug)]
pub(crate) struct Splitter {
    remaining: Option<TaskSetPartition>,
    chunk: u32,
    min_range: u32,
}

impl Iterator for Splitter {
    type Item = TaskSetPartition;

    fn next(&mut self) -> Option<Self::Item> {
        let range = self.remaining.take()?;
        let (head, rest) = split_front(range, self.chunk, self.min_range);
        self.remaining = rest;
        Some(head)
    }
}

/// A queued slice of a task set. Owned by whichever queue holds it until a
/// thread claims it.
pub(crate) struct Partition {
    task: Arc<TaskSetInner>,
    range: TaskSetPartition,
}

impl Partition {
    pub(crate) fn new(task: Arc<TaskSetInner>, range: TaskSetPartition) -> Self {
        Self { task, range }
    }

    pub(crate) fn priority(&self) -> Priority {
        self.task.priority()
    }

    pub(crate) fn range(&self) -> TaskSetPartition {
        self.range
    }

    /// Shrinks this partition to `range_to_run` elements and returns the rest
    /// as a new partition. The completion counter accounts for the returned
    /// partition before this call returns, so the task cannot be observed as
    /// complete in between.
    pub(crate) fn split(&mut self) -> Option<Partition> {
        let (head, rest) = split_front(
            self.range,
            self.task.range_to_run(),
            self.task.min_range(),
        );
        self.range = head;

        rest.map(|rest| {
            self.task.counter.add(1);
            Partition::new(Arc::clone(&self.task), rest)
        })
    }

    /// Runs the partition. Returns true if this was the last outstanding
    /// partition of the task set.
    pub(crate) fn run(self, thread_num: u32) -> bool {
        self.task.execute(self.range, thread_num);
        self.task.counter.complete_one()
    }
}

impl fmt::Debug for Partition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Partition")
            .field("range", &self.range)
            .field("priority", &self.priority())
            .finish()
    }
}
