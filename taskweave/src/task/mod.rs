//! Caller-visible task handles.

pub(crate) mod completion;

pub mod pinned;
pub use pinned::PinnedTask;
pub(crate) use pinned::PinnedTaskInner;

pub mod priority;
pub use priority::{NUM_PRIORITIES, Priority};

pub mod set;
pub(crate) use set::TaskSetInner;
pub use set::{TaskSet, TaskSetPartition};

/// Borrowed view over either kind of task, used by the wait and completion
/// APIs. We dispatch with an enum rather than a trait object so both variants
/// stay visible to the scheduler.
#[derive(Debug, Clone, Copy)]
pub enum TaskRef<'a> {
    Set(&'a TaskSet),
    Pinned(&'a PinnedTask),
}

impl TaskRef<'_> {
    pub fn is_complete(&self) -> bool {
        match self {
            TaskRef::Set(task) => task.is_complete(),
            TaskRef::Pinned(task) => task.is_complete(),
        }
    }

    pub fn priority(&self) -> Priority {
        match self {
            TaskRef::Set(task) => task.priority(),
            TaskRef::Pinned(task) => task.priority(),
        }
    }
}

impl<'a> From<&'a TaskSet> for TaskRef<'a> {
    fn from(task: &'a TaskSet) -> Self {
        TaskRef::Set(task)
    }
}

impl<'a> From<&'a PinnedTask> for TaskRef<'a> {
    fn from(task: &'a PinnedTask) -> Self {
        TaskRef::Pinned(task)
    }
}
