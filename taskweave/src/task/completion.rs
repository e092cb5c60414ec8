use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

/// Outstanding partition counter of a task set. The task is complete once it
/// reaches zero.
///
/// The transition to zero is a `Release` decrement paired with `Acquire` loads
/// in [`CompletionCounter::is_zero`], so everything a partition wrote is
/// visible to whoever observes completion.
#[derive(Debug, Default)]
pub(crate) struct CompletionCounter {
    running: AtomicU32,
}

impl CompletionCounter {
    pub(crate) fn new() -> Self {
        Self {
            running: AtomicU32::new(0),
        }
    }

    /// Adds `n` outstanding partitions. Must happen before the partitions are
    /// made visible to other threads.
    #[inline(always)]
    pub(crate) fn add(&self, n: u32) {
        self.running.fetch_add(n, Ordering::Relaxed);
    }

    /// Marks one partition as finished. Returns true if it was the last one.
    #[inline(always)]
    #[track_caller]
    pub(crate) fn complete_one(&self) -> bool {
        let prev = self.running.fetch_sub(1, Ordering::Release);
        debug_assert!(prev > 0, "completion counter underflow");
        prev == 1
    }

    #[inline(always)]
    pub(crate) fn is_zero(&self) -> bool {
        self.running.load(Ordering::Acquire) == 0
    }

    pub(crate) fn outstanding(&self) -> u32 {
        self.running.load(Ordering::Acquire)
    }
}

/// Completion flag of a pinned task. Pinned tasks run exactly once per
/// submission, so a boolean is enough.
#[derive(Debug)]
pub(crate) struct CompletionFlag {
    complete: AtomicBool,
}

impl CompletionFlag {
    /// Tasks that were never submitted report complete.
    pub(crate) fn new() -> Self {
        Self {
            complete: AtomicBool::new(true),
        }
    }

    pub(crate) fn arm(&self) {
        self.complete.store(false, Ordering::Relaxed);
    }

    #[inline(always)]
    pub(crate) fn set(&self) {
        self.complete.store(true, Ordering::Release);
    }

    #[inline(always)]
    pub(crate) fn is_set(&self) -> bool {
        self.complete.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counter_reaches_zero_once() {
        let counter = CompletionCounter::new();
        assert!(counter.is_zero());

        counter.add(3);
        assert!(!counter.complete_one());
        assert!(!counter.complete_one());
        assert_eq!(counter.outstanding(), 1);

        // Remainder pushed back while the last partition is still running.
        counter.add(1);
        assert!(!counter.complete_one());
        assert!(counter.complete_one());
        assert!(counter.is_zero());
    }

    #[test]
    fn test_flag_lifecycle() {
        let flag = CompletionFlag::new();
        assert!(flag.is_set());

        flag.arm();
        assert!(!flag.is_set());

        flag.set();
        assert!(flag.is_set());
    }
}
