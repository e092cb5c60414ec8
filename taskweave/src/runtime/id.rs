use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};

/// An opaque ID that uniquely identifies a scheduler within the process.
///
/// Thread-local registrations are keyed by this ID, which is what allows
/// several independent schedulers to coexist, and one thread to be registered
/// with more than one of them.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct SchedulerId(NonZeroU64);

impl SchedulerId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);

        let id = COUNTER.fetch_add(1, Ordering::Relaxed);

        let Some(id) = NonZeroU64::new(id) else {
            Self::exhausted();
        };

        Self(id)
    }

    #[cold]
    fn exhausted() -> ! {
        panic!("failed to generate unique scheduler ID: bitspace exhausted")
    }

    pub fn as_u64(&self) -> u64 {
        self.0.get()
    }
}

impl fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_ids_are_unique_across_threads() {
        let ids = std::thread::scope(|s| {
            let handles = (0..4)
                .map(|_| s.spawn(|| (0..100).map(|_| SchedulerId::next()).collect::<Vec<_>>()))
                .collect::<Vec<_>>();

            handles
                .into_iter()
                .flat_map(|h| h.join().unwrap())
                .collect::<HashSet<_>>()
        });

        assert_eq!(ids.len(), 400);
    }
}
