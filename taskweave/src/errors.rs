use std::io;

/// A centralized error type for the recoverable scheduler failures.
///
/// Contract violations (zero-size submissions, resubmitting an in-flight task,
/// out-of-range pinned thread indices, double initialization) are *not*
/// represented here: they panic at the call site.
#[derive(thiserror::Error, Debug)]
pub enum SchedulerError {
    /// The OS refused to spawn a worker thread.
    #[error("failed to spawn worker thread {thread_num}: {source}")]
    SpawnWorker {
        thread_num: u32,
        #[source]
        source: io::Error,
    },

    #[error("priority {0} is out of range")]
    PriorityOutOfRange(usize),

    /// Every reserved external task thread index is already taken.
    #[error("no free external task thread slot available")]
    NoFreeExternalSlot,

    #[error("thread index {0} is not an external task thread slot")]
    NotAnExternalSlot(u32),

    #[error("external task thread slot {0} is already taken")]
    ExternalSlotTaken(u32),

    /// The calling thread already owns a task thread index on this scheduler.
    #[error("current thread is already registered as task thread {0}")]
    AlreadyRegistered(u32),

    #[error("current thread is not registered as an external task thread")]
    NotRegistered,

    /// The thread context is still referenced, e.g. deregistering from inside
    /// a task running on this thread.
    #[error("task thread {0} is busy and cannot be deregistered")]
    ContextBusy(u32),

    #[error("{0} worker thread(s) panicked")]
    WorkersPanicked(usize),
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;

    assert_impl_all!(SchedulerError: Send, Sync);

    #[test]
    fn test_error_display() {
        assert_eq!(
            SchedulerError::PriorityOutOfRange(7).to_string(),
            "priority 7 is out of range"
        );
        assert_eq!(
            SchedulerError::WorkersPanicked(2).to_string(),
            "2 worker thread(s) panicked"
        );
    }
}
