//! A work-stealing scheduler for data-parallel and thread-pinned tasks.
//!
//! Work comes in two shapes:
//! - [`TaskSet`]: a closure over an index range `[0, set_size)`, split into
//!   partitions that run in parallel on every task thread.
//! - [`PinnedTask`]: a closure that always runs on one given task thread.
//!
//! Both carry a [`Priority`]. Threads always run the most urgent ready work
//! first, and threads that wait on a task help run work until it completes.

mod context;

pub mod errors;
pub use errors::SchedulerError;

mod queue;

pub mod runtime;
pub use runtime::{
    Builder, NO_THREAD_NUM, ProfilerCallback, ProfilerCallbacks, ProfilerEvent, Scheduler,
    SchedulerId,
};

pub mod task;
pub use task::{NUM_PRIORITIES, PinnedTask, Priority, TaskRef, TaskSet, TaskSetPartition};

mod utils;

#[cfg(test)]
mod test_utils;
