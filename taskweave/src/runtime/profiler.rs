//! Profiling hooks.
//!
//! The scheduler never records anything itself. It calls the registered
//! callbacks at a few well-defined points and passes the task thread index of
//! the calling thread, or [`NO_THREAD_NUM`] when the thread is not registered.

use std::fmt;
use std::sync::Arc;

/// Thread number reported for threads that hold no task thread index.
pub const NO_THREAD_NUM: u32 = u32::MAX;

pub type ProfilerCallback = Arc<dyn Fn(u32) + Send + Sync + 'static>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProfilerEvent {
    /// A spawned worker entered its event loop.
    ThreadStart,
    /// A spawned worker is about to exit.
    ThreadStop,
    /// A thread found no work and parks until new work arrives.
    WaitForNewTaskSuspendStart,
    WaitForNewTaskSuspendStop,
    /// Entry of a wait call whose condition did not already hold.
    WaitForTaskCompleteStart,
    WaitForTaskCompleteStop,
    /// A thread inside a wait call parks.
    WaitForTaskCompleteSuspendStart,
    WaitForTaskCompleteSuspendStop,
}

impl ProfilerEvent {
    pub const ALL: [ProfilerEvent; 8] = [
        ProfilerEvent::ThreadStart,
        ProfilerEvent::ThreadStop,
        ProfilerEvent::WaitForNewTaskSuspendStart,
        ProfilerEvent::WaitForNewTaskSuspendStop,
        ProfilerEvent::WaitForTaskCompleteStart,
        ProfilerEvent::WaitForTaskCompleteStop,
        ProfilerEvent::WaitForTaskCompleteSuspendStart,
        ProfilerEvent::WaitForTaskCompleteSuspendStop,
    ];

    /// Event that closes the interval opened by `self`, if any.
    pub fn matching_stop(self) -> Option<ProfilerEvent> {
        match self {
            ProfilerEvent::ThreadStart => Some(ProfilerEvent::ThreadStop),
            ProfilerEvent::WaitForNewTaskSuspendStart => {
                Some(ProfilerEvent::WaitForNewTaskSuspendStop)
            }
            ProfilerEvent::WaitForTaskCompleteStart => Some(ProfilerEvent::WaitForTaskCompleteStop),
            ProfilerEvent::WaitForTaskCompleteSuspendStart => {
                Some(ProfilerEvent::WaitForTaskCompleteSuspendStop)
            }
            _ => None,
        }
    }
}

/// One optional callback per [`ProfilerEvent`]. Callbacks run inline on the
/// scheduler thread that triggers them and must not block.
#[derive(Clone, Default)]
pub struct ProfilerCallbacks {
    pub thread_start: Option<ProfilerCallback>,
    pub thread_stop: Option<ProfilerCallback>,
    pub wait_for_new_task_suspend_start: Option<ProfilerCallback>,
    pub wait_for_new_task_suspend_stop: Option<ProfilerCallback>,
    pub wait_for_task_complete_start: Option<ProfilerCallback>,
    pub wait_for_task_complete_stop: Option<ProfilerCallback>,
    pub wait_for_task_complete_suspend_start: Option<ProfilerCallback>,
    pub wait_for_task_complete_suspend_stop: Option<ProfilerCallback>,
}

impl ProfilerCallbacks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `f` for `event`, replacing any previous callback.
    pub fn on<F>(mut self, event: ProfilerEvent, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        *self.slot_mut(event) = Some(Arc::new(f));
        self
    }

    pub fn get(&self, event: ProfilerEvent) -> Option<&ProfilerCallback> {
        self.slot(event).as_ref()
    }

    pub fn is_empty(&self) -> bool {
        ProfilerEvent::ALL.iter().all(|e| self.slot(*e).is_none())
    }

    #[inline(always)]
    pub(crate) fn emit(&self, event: ProfilerEvent, thread_num: u32) {
        if let Some(f) = self.slot(event) {
            f(thread_num);
        }
    }

    fn slot(&self, event: ProfilerEvent) -> &Option<ProfilerCallback> {
        match event {
            ProfilerEvent::ThreadStart => &self.thread_start,
            ProfilerEvent::ThreadStop => &self.thread_stop,
            ProfilerEvent::WaitForNewTaskSuspendStart => &self.wait_for_new_task_suspend_start,
            ProfilerEvent::WaitForNewTaskSuspendStop => &self.wait_for_new_task_suspend_stop,
            ProfilerEvent::WaitForTaskCompleteStart => &self.wait_for_task_complete_start,
            ProfilerEvent::WaitForTaskCompleteStop => &self.wait_for_task_complete_stop,
            ProfilerEvent::WaitForTaskCompleteSuspendStart => {
                &self.wait_for_task_complete_suspend_start
            }
            ProfilerEvent::WaitForTaskCompleteSuspendStop => {
                &self.wait_for_task_complete_suspend_stop
            }
        }
    }

    fn slot_mut(&mut self, event: ProfilerEvent) -> &mut Option<ProfilerCallback> {
        match event {
            ProfilerEvent::ThreadStart => &mut self.thread_start,
            ProfilerEvent::ThreadStop => &mut self.thread_stop,
            ProfilerEvent::WaitForNewTaskSuspendStart => &mut self.wait_for_new_task_suspend_start,
            ProfilerEvent::WaitForNewTaskSuspendStop => &mut self.wait_for_new_task_suspend_stop,
            ProfilerEvent::WaitForTaskCompleteStart => &mut self.wait_for_task_complete_start,
            ProfilerEvent::WaitForTaskCompleteStop => &mut self.wait_for_task_complete_stop,
            ProfilerEvent::WaitForTaskCompleteSuspendStart => {
                &mut self.wait_for_task_complete_suspend_start
            }
            ProfilerEvent::WaitForTaskCompleteSuspendStop => {
                &mut self.wait_for_task_complete_suspend_stop
            }
        }
    }
}

impl fmt::Debug for ProfilerCallbacks {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let registered = ProfilerEvent::ALL
            .iter()
            .filter(|e| self.slot(**e).is_some())
            .collect::<Vec<_>>();

        f.debug_struct("ProfilerCallbacks")
            .field("registered", &registered)
            .finish()
    }
}
