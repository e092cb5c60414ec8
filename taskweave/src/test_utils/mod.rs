use crate::runtime::{Builder, Scheduler};
use crate::task::TaskSet;
use anyhow::Result;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Once};
use std::time::{Duration, Instant};

mod spy;
pub(crate) use spy::ProfilerSpy;

/// Installs a `tracing` subscriber once per test binary. Filter with
/// `RUST_LOG`, e.g. `RUST_LOG=taskweave=trace`.
pub(crate) fn init_tracing() {
    static INIT: Once = Once::new();

    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

#[must_use]
pub(crate) fn init_scheduler(task_threads: u32, builder: Option<Builder>) -> Result<Scheduler> {
    init_tracing();

    builder
        .unwrap_or_default()
        .task_threads(task_threads)
        .try_build()
}

/// Task set counting how many times each index ran.
pub(crate) fn counting_task_set(set_size: u32) -> (TaskSet, Arc<Vec<AtomicU32>>) {
    let hits = Arc::new((0..set_size).map(|_| AtomicU32::new(0)).collect::<Vec<_>>());

    let task = TaskSet::new({
        let hits = Arc::clone(&hits);
        move |range, _| {
            for i in range {
                hits[i as usize].fetch_add(1, Ordering::Relaxed);
            }
        }
    });

    (task, hits)
}

#[track_caller]
pub(crate) fn assert_each_ran_once(hits: &[AtomicU32]) {
    for (i, hit) in hits.iter().enumerate() {
        assert_eq!(hit.load(Ordering::Relaxed), 1, "index {i}");
    }
}

/// Spins until `cond` holds, failing the test after a generous timeout.
#[track_caller]
pub(crate) fn wait_for(cond: impl Fn() -> bool) {
    let start = Instant::now();

    while !cond() {
        assert!(
            start.elapsed() < Duration::from_secs(10),
            "condition never became true"
        );
        std::thread::yield_now();
    }
}
