//! Per-thread registration with a scheduler.
//!
//! A thread becomes a *task thread* of a scheduler by entering a
//! [`ThreadContext`]: it then owns a task thread index and the local queues
//! for that index. Contexts live in thread-local storage keyed by
//! [`SchedulerId`], so one thread may be registered with several schedulers.
//!
//! A scheduler may be dropped on another thread than the one it registered.
//! Contexts only hold a weak reference to their scheduler: once it is gone
//! they are invisible to lookups and pruned on the next [`enter`].

use crate::errors::SchedulerError;
use crate::queue::LocalQueues;
use crate::runtime::SchedulerId;
use crate::utils::ScopeGuard;
use smallvec::SmallVec;
use std::cell::{Cell, RefCell};
use std::mem;
use std::rc::Rc;
use std::sync::{Arc, Weak};
use std::thread_local;

pub(crate) mod parker;
pub(crate) use parker::{ParkReason, Parker};

pub(crate) mod shared;
pub(crate) use shared::Shared;

pub(crate) mod slots;
pub(crate) use slots::ExternalSlots;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ThreadKind {
    /// The thread that initialized the scheduler. Always index 0.
    Main,
    /// Spawned and owned by the scheduler.
    Worker,
    /// A host thread occupying one of the reserved external indices.
    External,
}

#[derive(Debug)]
pub(crate) struct ThreadContext {
    pub(crate) scheduler_id: SchedulerId,

    owner: Weak<Shared>,

    pub(crate) thread_num: u32,

    pub(crate) kind: ThreadKind,

    pub(crate) queues: LocalQueues,

    /// Number of task closures currently running on this thread. Above zero
    /// when a task waits on other tasks.
    task_depth: Cell<u32>,
}

impl ThreadContext {
    pub(crate) fn new(
        shared: &Arc<Shared>,
        thread_num: u32,
        kind: ThreadKind,
        queues: LocalQueues,
    ) -> Self {
        Self {
            scheduler_id: shared.id,
            owner: Arc::downgrade(shared),
            thread_num,
            kind,
            queues,
            task_depth: Cell::new(0),
        }
    }

    /// False once the owning scheduler is dropped.
    fn is_alive(&self) -> bool {
        self.owner.strong_count() > 0
    }

    pub(crate) fn is_running_task(&self) -> bool {
        self.task_depth.get() > 0
    }

    /// Marks a task as running on this thread until the guard drops.
    #[inline(always)]
    pub(crate) fn enter_task(&self) -> ScopeGuard<'_, impl FnOnce() + '_> {
        self.task_depth.set(self.task_depth.get() + 1);
        ScopeGuard::new(move || self.task_depth.set(self.task_depth.get() - 1))
    }
}

thread_local! {
    static CONTEXTS: RefCell<SmallVec<[Rc<ThreadContext>; 2]>> = RefCell::new(SmallVec::new());
}

/// Context of the current thread for the given scheduler. The returned `Rc`
/// is detached from the thread-local borrow, so tasks run through it may
/// freely register or look up other contexts.
#[inline(always)]
pub(crate) fn current(id: SchedulerId) -> Option<Rc<ThreadContext>> {
    CONTEXTS.with(|ctxs| {
        ctxs.borrow()
            .iter()
            .find(|ctx| ctx.scheduler_id == id && ctx.is_alive())
            .cloned()
    })
}

pub(crate) fn current_thread_num(id: SchedulerId) -> Option<u32> {
    current(id).map(|ctx| ctx.thread_num)
}

pub(crate) fn enter(ctx: ThreadContext) -> Result<Rc<ThreadContext>, SchedulerError> {
    drop(take_dead());

    CONTEXTS.with(|ctxs| {
        let mut ctxs = ctxs.borrow_mut();

        if let Some(existing) = ctxs.iter().find(|c| c.scheduler_id == ctx.scheduler_id) {
            return Err(SchedulerError::AlreadyRegistered(existing.thread_num));
        }

        let ctx = Rc::new(ctx);
        ctxs.push(Rc::clone(&ctx));
        Ok(ctx)
    })
}

/// Removes the contexts of dropped schedulers. They are returned so their
/// queues, and the tasks left in them, drop outside the thread-local borrow.
fn take_dead() -> SmallVec<[Rc<ThreadContext>; 2]> {
    CONTEXTS.with(|ctxs| {
        let mut ctxs = ctxs.borrow_mut();
        let (live, dead) = mem::take(&mut *ctxs)
            .into_iter()
            .partition(|ctx| ctx.is_alive());
        *ctxs = live;
        dead
    })
}

/// Removes and returns the current thread's context, handing its queues back
/// to the caller.
pub(crate) fn exit(id: SchedulerId) -> Result<ThreadContext, SchedulerError> {
    CONTEXTS.with(|ctxs| {
        let mut ctxs = ctxs.borrow_mut();

        let pos = ctxs
            .iter()
            .position(|c| c.scheduler_id == id)
            .ok_or(SchedulerError::NotRegistered)?;

        let ctx = ctxs.remove(pos);
        Rc::try_unwrap(ctx).map_err(|ctx| {
            let thread_num = ctx.thread_num;
            ctxs.push(ctx);
            SchedulerError::ContextBusy(thread_num)
        })
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::partition::Partition;
    use crate::runtime::{Builder, SchedulerConfig};
    use crate::task::{TaskSet, TaskSetPartition};

    fn new_shared() -> Arc<Shared> {
        let cfg = SchedulerConfig::try_from(Builder::new().task_threads(1)).unwrap();
        let stealers = vec![LocalQueues::new().1];

        Arc::new(Shared::new(
            SchedulerId::next(),
            cfg,
            stealers,
            ExternalSlots::new(1, Vec::new()),
        ))
    }

    fn new_ctx(shared: &Arc<Shared>, thread_num: u32) -> ThreadContext {
        ThreadContext::new(shared, thread_num, ThreadKind::External, LocalQueues::new().0)
    }

    #[test]
    fn test_enter_and_exit() {
        let shared = new_shared();
        let id = shared.id;
        assert!(current(id).is_none());

        let ctx = enter(new_ctx(&shared, 3)).unwrap();
        assert_eq!(current_thread_num(id), Some(3));

        // Still referenced.
        assert!(matches!(exit(id), Err(SchedulerError::ContextBusy(3))));
        assert_eq!(current_thread_num(id), Some(3));

        drop(ctx);
        let ctx = exit(id).unwrap();
        assert_eq!(ctx.thread_num, 3);
        assert!(current(id).is_none());
        assert!(matches!(exit(id), Err(SchedulerError::NotRegistered)));
    }

    #[test]
    fn test_one_context_per_scheduler() {
        let a = new_shared();
        let b = new_shared();

        drop(enter(new_ctx(&a, 0)).unwrap());
        drop(enter(new_ctx(&b, 5)).unwrap());
        assert!(matches!(
            enter(new_ctx(&a, 1)),
            Err(SchedulerError::AlreadyRegistered(0))
        ));

        assert_eq!(current_thread_num(a.id), Some(0));
        assert_eq!(current_thread_num(b.id), Some(5));

        exit(a.id).unwrap();
        exit(b.id).unwrap();
    }

    #[test]
    fn test_dropped_scheduler_context_is_pruned() {
        let dead = new_shared();
        let dead_id = dead.id;
        // A partition left behind in the dead thread's queue.
        let task = TaskSet::new(|_, _| {});
        let queues = LocalQueues::new().0;
        queues.push(Partition::new(
            Arc::clone(task.inner()),
            TaskSetPartition::new(0, 1),
        ));
        assert_eq!(Arc::strong_count(task.inner()), 2);

        drop(enter(ThreadContext::new(&dead, 0, ThreadKind::Main, queues)).unwrap());
        drop(dead);

        // Hidden as soon as its scheduler is gone.
        assert!(current(dead_id).is_none());
        assert_eq!(CONTEXTS.with(|ctxs| ctxs.borrow().len()), 1);

        let live = new_shared();
        drop(enter(new_ctx(&live, 1)).unwrap());

        assert_eq!(CONTEXTS.with(|ctxs| ctxs.borrow().len()), 1);
        assert_eq!(Arc::strong_count(task.inner()), 1);
        assert_eq!(current_thread_num(live.id), Some(1));
        exit(live.id).unwrap();
    }

    #[test]
    fn test_task_depth_guard() {
        let ctx = new_ctx(&new_shared(), 0);
        assert!(!ctx.is_running_task());
        {
            let _outer = ctx.enter_task();
            let _inner = ctx.enter_task();
            assert!(ctx.is_running_task());
        }
        assert!(!ctx.is_running_task());
    }
}
