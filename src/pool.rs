use crate::list::TaskList;
use crate::result::{ResultState, TaskResult};
use crate::task::{FireTask, QueueItem, TaskExec, ValueTask};
use derive_more::Debug;
use parking_lot::{Condvar, Mutex, MutexGuard};
use std::collections::VecDeque;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use thiserror::Error;

/// Error returned by the pool's submission operations.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum SubmitError {
    /// The pool has begun shutting down and accepts no further work.
    #[error("thread pool is shutting down")]
    Closed,
}

/// Default worker count: logical CPU count, floor 8.
pub(crate) fn default_worker_count() -> usize {
    num_cpus::get().max(8)
}

/// State shared between the pool handle, its workers, and the fences of
/// submitted lists.
#[derive(Debug)]
pub(crate) struct PoolShared {
    pub(crate) state: Mutex<PoolState>,
    pub(crate) worker_cv: Condvar,
    wait_cv: Condvar,
}

#[cfg(test)]
impl PoolShared {
    /// Shared state with no workers attached, for exercising list and
    /// builder internals deterministically.
    pub(crate) fn detached() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                lists: Vec::new(),
                running: true,
                worker_count: 1,
            }),
            worker_cv: Condvar::new(),
            wait_cv: Condvar::new(),
        })
    }
}

/// Everything guarded by the single pool mutex.
#[derive(Debug)]
pub(crate) struct PoolState {
    queue: VecDeque<QueueItem>,
    lists: Vec<ActiveList>,
    running: bool,
    worker_count: usize,
}

#[derive(Debug)]
struct ActiveList {
    list: TaskList,
    completion: Arc<ResultState<TaskList>>,
    retired: bool,
}

impl PoolState {
    /// Advance every active list in registration order, appending emitted
    /// tasks to the ready queue, and retire lists whose cursor reached the
    /// end with nothing left to emit. Returns the total emission count.
    fn drain_lists(&mut self) -> usize {
        let mut emitted_total = 0;
        let mut any_retired = false;

        let Self { queue, lists, .. } = self;
        for record in lists.iter_mut() {
            let (at_end, emitted) = record.list.advance(queue);
            if at_end && emitted == 0 {
                record.retired = true;
                any_retired = true;
            }
            emitted_total += emitted;
        }

        if any_retired {
            let mut index = 0;
            while index < self.lists.len() {
                if self.lists[index].retired {
                    let record = self.lists.remove(index);
                    record.completion.fulfill(Ok(record.list));
                } else {
                    index += 1;
                }
            }
        }

        emitted_total
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.lists.is_empty()
    }
}

/// The scheduling path each worker runs on wake-up. There is no dedicated
/// scheduler thread: whichever worker holds the lock refills the queue from
/// the active lists, wakes peers for the newly emitted tasks, and reports
/// idleness to `wait_idle` observers.
fn worker_loop(shared: &PoolShared) {
    let mut state = shared.state.lock();
    loop {
        if state.queue.is_empty() && !state.lists.is_empty() {
            let emitted = state.drain_lists();
            for _ in 0..emitted.min(state.worker_count) {
                shared.worker_cv.notify_one();
            }
        }
        if state.is_idle() {
            shared.wait_cv.notify_all();
        }
        if !state.running {
            break;
        }
        if let Some(item) = state.queue.pop_front() {
            MutexGuard::unlocked(&mut state, || item.run());
        } else {
            shared.worker_cv.wait(&mut state);
        }
    }
}

/// A fixed-size worker pool executing one-off tasks and built task lists.
///
/// The ready queue is strictly FIFO and active lists are drained in
/// registration order; there is no priority and no stealing. Multiple pools
/// may coexist, there is no global state.
///
/// Dropping the pool with outstanding work is a contract violation and
/// aborts the process; drain with [`wait_idle`](Self::wait_idle) first.
#[must_use]
#[derive(Debug)]
pub struct ThreadPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new()
    }
}

impl ThreadPool {
    /// Create a pool with the default worker count (logical CPU count,
    /// floor 8).
    pub fn new() -> Self {
        Self::with_threads(default_worker_count())
    }

    /// Create a pool with `worker_count` workers. A count of zero falls
    /// back to the default.
    ///
    /// # Panics
    /// If the operating system refuses to spawn a worker thread.
    pub fn with_threads(worker_count: usize) -> Self {
        let worker_count = if worker_count == 0 {
            default_worker_count()
        } else {
            worker_count
        };
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::with_capacity(4 * worker_count),
                lists: Vec::with_capacity(4 * worker_count),
                running: true,
                worker_count,
            }),
            worker_cv: Condvar::new(),
            wait_cv: Condvar::new(),
        });

        let workers = (0..worker_count)
            .map(|index| {
                let shared = Arc::clone(&shared);
                thread::Builder::new()
                    .name(format!("tgp-worker-{index}"))
                    .spawn(move || worker_loop(&shared))
                    .expect("ThreadPool::with_threads: failed to spawn worker thread")
            })
            .collect();

        Self { shared, workers }
    }

    /// Enqueue a one-off fire-and-forget task.
    pub fn execute<F>(&self, func: F) -> Result<(), SubmitError>
    where
        F: FnMut() + Send + 'static,
    {
        self.submit(Box::new(FireTask::new(func)))
    }

    /// Enqueue a one-off value-returning task and obtain the handle
    /// observing its outcome.
    pub fn invoke<F, R>(&self, func: F) -> Result<TaskResult<R>, SubmitError>
    where
        F: FnMut() -> R + Send + 'static,
        R: Send + 'static,
    {
        let slot = Arc::new(ResultState::new());
        self.submit(Box::new(ValueTask::new(func, Arc::clone(&slot))))?;
        Ok(TaskResult::new(slot))
    }

    fn submit(&self, task: Box<dyn TaskExec>) -> Result<(), SubmitError> {
        let mut state = self.shared.state.lock();
        if !state.running {
            return Err(SubmitError::Closed);
        }
        state.queue.push_back(QueueItem::Owned(task));
        drop(state);
        self.shared.worker_cv.notify_one();
        Ok(())
    }

    /// Submit a built list for execution.
    ///
    /// The list is re-armed for this submission (checkpoint counters and
    /// promises seeded, fences cleared and bound to this pool), registered,
    /// and drained immediately. The returned handle resolves to the
    /// consumed list once every entry has been processed, after which the
    /// list may be pushed again.
    pub fn push(&self, mut list: TaskList) -> Result<TaskResult<TaskList>, SubmitError> {
        list.reset(&self.shared);

        let mut state = self.shared.state.lock();
        if !state.running {
            return Err(SubmitError::Closed);
        }
        let completion = Arc::new(ResultState::new());
        state.lists.push(ActiveList {
            list,
            completion: Arc::clone(&completion),
            retired: false,
        });
        let emitted = state.drain_lists();
        let to_wake = emitted.min(state.worker_count);
        drop(state);

        for _ in 0..to_wake {
            self.shared.worker_cv.notify_one();
        }
        Ok(TaskResult::new(completion))
    }

    /// Block until the ready queue and the active-list registry are both
    /// empty.
    pub fn wait_idle(&self) {
        let mut state = self.shared.state.lock();
        while !state.is_idle() {
            self.shared.wait_cv.wait(&mut state);
        }
    }

    /// Number of worker threads owned by the pool.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock();
        if !state.is_idle() {
            // No graceful recovery exists here: queued callables may borrow
            // state that dies with the caller's scope.
            log::error!("thread pool dropped while work is still queued or active");
            std::process::abort();
        }
        state.running = false;
        drop(state);

        self.shared.worker_cv.notify_all();
        for worker in self.workers.drain(..) {
            if worker.join().is_err() {
                log::error!("worker thread panicked during shutdown");
            }
        }
    }
}
