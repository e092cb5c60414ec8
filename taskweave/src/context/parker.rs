use crate::task::Priority;
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, Thread};
use tracing::trace;

/// Why a thread is parked. Decides which events wake it up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ParkReason {
    /// Idle worker, waiting for partitions or pinned tasks.
    NewTask,
    /// Caller inside a wait call. Woken by completions, and by new work it
    /// could contribute to.
    TaskComplete,
    /// Thread waiting for a pinned task to be queued for its index.
    NewPinnedTask,
}

/// How a parked thread registers itself.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ParkSlot {
    pub(crate) reason: ParkReason,

    /// Task thread index, `None` for unregistered threads.
    pub(crate) thread_num: Option<u32>,

    /// Least urgent partition tier this thread runs once woken. `None` if it
    /// does not run partitions at all.
    pub(crate) max_priority: Option<Priority>,
}

#[derive(Debug)]
struct ParkedThread {
    thread: Thread,
    slot: ParkSlot,
    should_unpark: Arc<AtomicBool>,
}

impl ParkedThread {
    fn unpark(self) {
        self.should_unpark.store(true, Ordering::Release);
        self.thread.unpark();
    }

    fn accepts_partition(&self, priority: Priority) -> bool {
        self.slot.max_priority.is_some_and(|max| priority <= max)
    }
}

/// The single suspension primitive shared by idle workers and wait calls.
///
/// Parking checks its abort condition *while holding the lock*, and every
/// producer publishes its work or completion *before* taking the lock to wake
/// threads up. One of the two always observes the other, so no wake-up is
/// lost.
#[derive(Debug, Default)]
pub(crate) struct Parker {
    /// LIFO: the most recently parked thread has the hottest cache.
    parked: Mutex<Vec<ParkedThread>>,
}

impl Parker {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Parks the current thread until it is explicitly unparked. Returns
    /// without parking if `should_abort` holds. Returns true if the thread
    /// actually parked.
    pub(crate) fn park_current_thread<F>(&self, slot: ParkSlot, should_abort: F) -> bool
    where
        F: FnOnce() -> bool,
    {
        let should_unpark = {
            let mut parked = self.parked.lock();

            if should_abort() {
                return false;
            }

            let should_unpark = Arc::new(AtomicBool::new(false));
            parked.push(ParkedThread {
                thread: thread::current(),
                slot,
                should_unpark: Arc::clone(&should_unpark),
            });
            should_unpark
        };

        trace!(?slot, "parking thread");

        // Loop to absorb spurious wake-ups.
        while !should_unpark.load(Ordering::Acquire) {
            thread::park();
        }

        trace!(?slot, "thread unparked");
        true
    }

    /// Wakes up to `max` threads that would run a partition at `priority`.
    pub(crate) fn unpark_for_work(&self, priority: Priority, max: usize) -> usize {
        let mut parked = self.parked.lock();
        let mut num_unparked = 0;

        while num_unparked < max {
            let Some(pos) = parked.iter().rposition(|p| p.accepts_partition(priority)) else {
                break;
            };
            parked.remove(pos).unpark();
            num_unparked += 1;
        }

        num_unparked
    }

    /// Wakes the thread owning `thread_num`, whatever it is parked for.
    pub(crate) fn unpark_thread(&self, thread_num: u32) -> bool {
        let mut parked = self.parked.lock();

        match parked
            .iter()
            .rposition(|p| p.slot.thread_num == Some(thread_num))
        {
            Some(pos) => {
                parked.remove(pos).unpark();
                true
            }
            None => false,
        }
    }

    /// Wakes every thread parked inside a wait call so it can re-check its
    /// condition.
    pub(crate) fn unpark_waiters(&self) -> usize {
        self.unpark_where(|p| p.slot.reason == ParkReason::TaskComplete)
    }

    pub(crate) fn unpark_all(&self) -> usize {
        self.unpark_where(|_| true)
    }

    #[cfg(test)]
    pub(crate) fn num_parked(&self) -> usize {
        self.parked.lock().len()
    }

    fn unpark_where<P>(&self, pred: P) -> usize
    where
        P: Fn(&ParkedThread) -> bool,
    {
        let mut parked = self.parked.lock();
        let (wake, keep): (Vec<_>, Vec<_>) = parked.drain(..).partition(|p| pred(p));
        *parked = keep;

        let num_unparked = wake.len();
        wake.into_iter().for_each(ParkedThread::unpark);
        num_unparked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use static_assertions::assert_impl_all;
    use std::time::{Duration, Instant};

    assert_impl_all!(Parker: Send, Sync);

    fn slot(reason: ParkReason, thread_num: u32, max_priority: Option<Priority>) -> ParkSlot {
        ParkSlot {
            reason,
            thread_num: Some(thread_num),
            max_priority,
        }
    }

    fn wait_for_parked(parker: &Parker, n: usize) {
        let start = Instant::now();
        while parker.num_parked() < n {
            assert!(start.elapsed() < Duration::from_secs(5), "threads never parked");
            thread::yield_now();
        }
    }

    #[test]
    fn test_abort_skips_parking() {
        let parker = Parker::new();
        let parked = parker.park_current_thread(slot(ParkReason::NewTask, 0, None), || true);
        assert!(!parked);
        assert_eq!(parker.num_parked(), 0);
    }

    #[test]
    fn test_unpark_for_work_respects_priority_bound() {
        let parker = Parker::new();

        thread::scope(|s| {
            s.spawn(|| {
                parker.park_current_thread(
                    slot(ParkReason::TaskComplete, 1, Some(Priority::High)),
                    || false,
                )
            });
            s.spawn(|| {
                parker.park_current_thread(slot(ParkReason::NewPinnedTask, 2, None), || false)
            });
            wait_for_parked(&parker, 2);

            // Neither accepts low priority partitions.
            assert_eq!(parker.unpark_for_work(Priority::Low, 4), 0);
            assert_eq!(parker.unpark_for_work(Priority::High, 4), 1);
            assert_eq!(parker.num_parked(), 1);

            assert!(parker.unpark_thread(2));
            assert!(!parker.unpark_thread(2));
        });

        assert_eq!(parker.num_parked(), 0);
    }

    #[test]
    fn test_unpark_waiters_only() {
        let parker = Parker::new();

        thread::scope(|s| {
            s.spawn(|| {
                parker.park_current_thread(
                    slot(ParkReason::TaskComplete, 0, Some(Priority::Low)),
                    || false,
                )
            });
            s.spawn(|| {
                parker.park_current_thread(
                    slot(ParkReason::NewTask, 1, Some(Priority::Low)),
                    || false,
                )
            });
            wait_for_parked(&parker, 2);

            assert_eq!(parker.unpark_waiters(), 1);
            assert_eq!(parker.num_parked(), 1);
            assert_eq!(parker.unpark_all(), 1);
        });
    }
}
