use crate::context::{self, Shared, ThreadContext, ThreadKind};
use crate::errors::SchedulerError;
use crate::queue::LocalQueues;
use crate::runtime::worker::Worker;
use crate::utils::ScopeGuard;
use parking_lot::Mutex;
use std::io;
use std::mem;
use std::sync::Arc;
use std::thread;
use tracing::{debug, error};

/// Join handles of the spawned worker threads.
#[derive(Debug)]
pub(crate) struct ThreadPool {
    handles: Mutex<Vec<(u32, thread::JoinHandle<()>)>>,
}

impl ThreadPool {
    /// Spawns one thread per `(thread_num, queues)` pair. If any spawn fails,
    /// the threads already started are stopped and joined before returning.
    pub(crate) fn spawn(
        shared: &Arc<Shared>,
        workers: Vec<(u32, LocalQueues)>,
    ) -> Result<Self, SchedulerError> {
        let pool = ThreadPool {
            handles: Mutex::new(Vec::with_capacity(workers.len())),
        };

        for (thread_num, queues) in workers {
            match spawn_worker_thread(Arc::clone(shared), thread_num, queues) {
                Ok(handle) => pool.handles.lock().push((thread_num, handle)),
                Err(source) => {
                    shared.request_shutdown();
                    if let Err(e) = pool.join_all() {
                        error!(error = %e, "failed to stop workers after spawn failure");
                    }
                    return Err(SchedulerError::SpawnWorker { thread_num, source });
                }
            }
        }

        Ok(pool)
    }

    /// Joins every worker. Callers must have requested shutdown first.
    pub(crate) fn join_all(&self) -> Result<(), SchedulerError> {
        let handles = mem::take(&mut *self.handles.lock());

        let panicked = handles
            .into_iter()
            .filter_map(|(thread_num, handle)| handle.join().err().map(|_| thread_num))
            .inspect(|thread_num| error!(thread_num, "worker thread panicked"))
            .count();

        if panicked == 0 {
            Ok(())
        } else {
            Err(SchedulerError::WorkersPanicked(panicked))
        }
    }
}

#[cfg(test)]
impl ThreadPool {
    pub(crate) fn len(&self) -> usize {
        self.handles.lock().len()
    }

    /// Names of the spawned threads, ordered by task thread index.
    pub(crate) fn thread_names(&self) -> Vec<Option<String>> {
        self.handles
            .lock()
            .iter()
            .map(|(_, h)| h.thread().name().map(str::to_owned))
            .collect()
    }
}

fn spawn_worker_thread(
    shared: Arc<Shared>,
    thread_num: u32,
    queues: LocalQueues,
) -> io::Result<thread::JoinHandle<()>> {
    let mut builder = thread::Builder::new().name((shared.cfg.thread_name.0)(thread_num));

    if let Some(stack_size) = shared.cfg.thread_stack_size {
        builder = builder.stack_size(stack_size);
    }

    builder.spawn(move || {
        let ctx = ThreadContext::new(&shared, thread_num, ThreadKind::Worker, queues);

        // A fresh thread has no registration yet.
        let ctx = match context::enter(ctx) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(thread_num, error = %e, "failed to register worker thread");
                return;
            }
        };

        debug!(scheduler_id = %shared.id, thread_num, "worker started");

        // Only disarmed on a clean exit, so it fires when a task unwinds out
        // of the event loop.
        let on_panic = ScopeGuard::new(|| shared.worker_panicked());

        Worker::new(&shared, &ctx).event_loop();

        on_panic.disarm();
        drop(ctx);

        if let Err(e) = context::exit(shared.id) {
            error!(thread_num, error = %e, "failed to deregister worker thread");
        }

        debug!(scheduler_id = %shared.id, thread_num, "worker stopped");
    })
}
