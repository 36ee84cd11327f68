use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Error kind reported through an awaitable task handle.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum TaskError {
    /// The user-supplied callable panicked while the pool executed it.
    ///
    /// The captured panic message is preserved verbatim where the payload
    /// was a string, which covers `panic!` with a literal or a formatted
    /// message.
    #[error("task callable panicked: {0}")]
    CallableFailed(String),
    /// The value was already moved out by a previous `get` on the same
    /// submission.
    #[error("task result already retrieved")]
    Retrieved,
}

/// Contents of a result slot at a given point of the submission cycle.
#[derive(Debug)]
enum Slot<T> {
    /// Seeded but not yet produced.
    Pending,
    /// Produced and waiting for retrieval.
    Ready(Result<T, TaskError>),
    /// Moved out by `get`; stays in this state until the next reset.
    Taken,
}

/// One-shot, re-seedable rendezvous between a producer (a task holder, a
/// checkpoint, or the pool's retirement path) and any number of waiters.
///
/// The slot is fulfilled exactly once per submission and returns to
/// `Pending` when the owning list is pushed again.
#[derive(Debug)]
pub(crate) struct ResultState<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
}

impl<T> ResultState<T> {
    pub(crate) fn new() -> Self {
        Self {
            slot: Mutex::new(Slot::Pending),
            ready: Condvar::new(),
        }
    }

    /// Publish the outcome and release every waiter.
    pub(crate) fn fulfill(&self, value: Result<T, TaskError>) {
        let mut slot = self.slot.lock();
        debug_assert!(
            matches!(*slot, Slot::Pending),
            "ResultState::fulfill: slot fulfilled twice in one submission"
        );
        *slot = Slot::Ready(value);
        self.ready.notify_all();
    }

    /// Re-seed for the next submission cycle.
    pub(crate) fn reset(&self) {
        *self.slot.lock() = Slot::Pending;
    }

    fn wait(&self) {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.ready.wait(&mut slot);
        }
    }

    fn wait_until(&self, deadline: Instant) -> bool {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Pending) {
            if self.ready.wait_until(&mut slot, deadline).timed_out() {
                return !matches!(*slot, Slot::Pending);
            }
        }
        true
    }

    fn take(&self) -> Result<T, TaskError> {
        let mut slot = self.slot.lock();
        while matches!(*slot, Slot::Pending) {
            self.ready.wait(&mut slot);
        }
        match std::mem::replace(&mut *slot, Slot::Taken) {
            Slot::Ready(value) => value,
            Slot::Taken => Err(TaskError::Retrieved),
            Slot::Pending => unreachable!("ResultState::take: pending after wait"),
        }
    }

    fn valid(&self) -> bool {
        !matches!(*self.slot.lock(), Slot::Taken)
    }
}

/// Awaitable handle to the outcome of a submitted item.
///
/// Handles are produced by [`TaskBuilder::invoke`](crate::builder::TaskBuilder::invoke),
/// [`TaskBuilder::checkpoint`](crate::builder::TaskBuilder::checkpoint),
/// [`TaskBuilder::barrier`](crate::builder::TaskBuilder::barrier),
/// [`ThreadPool::invoke`](crate::pool::ThreadPool::invoke) and
/// [`ThreadPool::push`](crate::pool::ThreadPool::push). A handle stays bound
/// to its item across submissions: pushing the owning list again re-arms the
/// handle for the new cycle.
#[must_use]
#[derive(Debug)]
pub struct TaskResult<T> {
    state: Arc<ResultState<T>>,
}

/// Awaitable join signal of a checkpoint or barrier.
pub type TaskCheckpoint = TaskResult<()>;

impl<T> TaskResult<T> {
    pub(crate) fn new(state: Arc<ResultState<T>>) -> Self {
        Self { state }
    }

    /// Block until the outcome of the current submission is available.
    pub fn wait(&self) {
        self.state.wait();
    }

    /// Block until the outcome is available or `timeout` elapses.
    ///
    /// Returns whether the outcome became available. Expiration does not
    /// cancel the underlying work.
    pub fn wait_for(&self, timeout: Duration) -> bool {
        match Instant::now().checked_add(timeout) {
            Some(deadline) => self.state.wait_until(deadline),
            None => {
                self.state.wait();
                true
            }
        }
    }

    /// Block until the outcome is available or `deadline` passes.
    ///
    /// Returns whether the outcome became available.
    pub fn wait_until(&self, deadline: Instant) -> bool {
        self.state.wait_until(deadline)
    }

    /// Block until the outcome is available, then move it out.
    ///
    /// A callable failure captured during execution is surfaced here as
    /// [`TaskError::CallableFailed`]. Calling `get` a second time within the
    /// same submission reports [`TaskError::Retrieved`].
    pub fn get(&self) -> Result<T, TaskError> {
        self.state.take()
    }

    /// Whether an outcome can still be obtained for the current submission,
    /// that is, `get` has not already moved it out.
    pub fn valid(&self) -> bool {
        self.state.valid()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn fulfill_releases_waiters() {
        let state = Arc::new(ResultState::new());
        let producer = {
            let state = Arc::clone(&state);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                state.fulfill(Ok(7u32));
            })
        };
        let handle = TaskResult::new(Arc::clone(&state));
        handle.wait();
        assert_eq!(handle.get(), Ok(7));
        producer.join().unwrap();
    }

    #[test]
    fn wait_for_times_out_while_pending() {
        let handle = TaskResult::<u32>::new(Arc::new(ResultState::new()));
        let started = Instant::now();
        assert!(!handle.wait_for(Duration::from_millis(10)));
        assert!(started.elapsed() >= Duration::from_millis(10));
    }

    #[test]
    fn second_get_reports_retrieved() {
        let state = Arc::new(ResultState::new());
        state.fulfill(Ok(3u32));
        let handle = TaskResult::new(state);
        assert_eq!(handle.get(), Ok(3));
        assert!(!handle.valid());
        assert_eq!(handle.get(), Err(TaskError::Retrieved));
    }

    #[test]
    fn reset_reopens_the_slot() {
        let state = Arc::new(ResultState::new());
        state.fulfill(Ok(1u32));
        let handle = TaskResult::new(Arc::clone(&state));
        assert_eq!(handle.get(), Ok(1));

        state.reset();
        assert!(handle.valid());
        assert!(!handle.wait_for(Duration::from_millis(5)));
        state.fulfill(Ok(2));
        assert_eq!(handle.get(), Ok(2));
    }

    #[test]
    fn failure_is_surfaced_at_get() {
        let state = Arc::new(ResultState::<u32>::new());
        state.fulfill(Err(TaskError::CallableFailed(String::from("boom"))));
        let handle = TaskResult::new(state);
        assert_eq!(
            handle.get(),
            Err(TaskError::CallableFailed(String::from("boom")))
        );
    }
}
