mod builder;
pub use builder::Builder;
pub(crate) use builder::SchedulerConfig;

mod id;
pub use id::SchedulerId;

pub(crate) mod partition;

mod pool;

pub mod profiler;
pub use profiler::{NO_THREAD_NUM, ProfilerCallback, ProfilerCallbacks, ProfilerEvent};

mod scheduler;
pub use scheduler::Scheduler;

pub(crate) mod worker;
