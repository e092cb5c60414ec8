use crate::runtime::{ProfilerCallbacks, ProfilerEvent};
use dashmap::DashMap;
use std::sync::Arc;

/// Records every profiler event with the thread number it was emitted for.
#[derive(Debug, Clone)]
pub(crate) struct ProfilerSpy {
    calls: Arc<DashMap<ProfilerEvent, Vec<u32>>>,
}

impl ProfilerSpy {
    pub(crate) fn new() -> Self {
        let map = DashMap::new();
        for event in ProfilerEvent::ALL {
            map.insert(event, Vec::new());
        }

        Self {
            calls: Arc::new(map),
        }
    }

    /// Callback table feeding this spy.
    pub(crate) fn callbacks(&self) -> ProfilerCallbacks {
        ProfilerEvent::ALL
            .into_iter()
            .fold(ProfilerCallbacks::new(), |callbacks, event| {
                let spy = self.clone();
                callbacks.on(event, move |thread_num| spy.record(event, thread_num))
            })
    }

    pub(crate) fn record(&self, event: ProfilerEvent, thread_num: u32) {
        self.calls
            .get_mut(&event)
            .expect("event not found")
            .push(thread_num)
    }

    pub(crate) fn get_calls(&self, event: ProfilerEvent) -> Vec<u32> {
        self.calls
            .get(&event)
            .expect("event not found")
            .value()
            .clone()
    }

    pub(crate) fn num_calls(&self, event: ProfilerEvent) -> usize {
        self.calls.get(&event).map_or(0, |calls| calls.len())
    }
}
