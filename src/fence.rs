use crate::pool::PoolShared;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

/// Latch state shared between a [`TaskFence`] handle and the list entry
/// embedding it.
///
/// The flag is written with release ordering on signal and read with
/// acquire ordering by the scheduling cursor, so work emitted past the
/// fence observes everything the signaling thread published before it.
#[derive(Debug)]
pub(crate) struct FenceState {
    signaled: AtomicBool,
    pool: Mutex<Weak<PoolShared>>,
}

impl FenceState {
    pub(crate) fn new() -> Self {
        Self {
            signaled: AtomicBool::new(false),
            pool: Mutex::new(Weak::new()),
        }
    }

    /// Clear the flag and bind the latch to the pool the owning list was
    /// just pushed to. Runs once per submission, before any worker can
    /// observe the list.
    pub(crate) fn rearm(&self, pool: &Arc<PoolShared>) {
        self.signaled.store(false, Ordering::Release);
        *self.pool.lock() = Arc::downgrade(pool);
    }

    pub(crate) fn is_signaled(&self) -> bool {
        self.signaled.load(Ordering::Acquire)
    }

    fn signal(&self) {
        if self.signaled.swap(true, Ordering::Release) {
            // Repeated signals within one submission are a no-op.
            return;
        }
        if let Some(pool) = self.pool.lock().upgrade() {
            // Passing through the scheduler lock guarantees a worker that
            // already sampled the flag is parked before the notification
            // lands.
            drop(pool.state.lock());
            pool.worker_cv.notify_one();
        }
    }
}

/// Signal handle of a fence embedded in a task list.
///
/// List progression stops at the fence until `signal` is called for the
/// current submission. The fence is re-armed each time the owning list is
/// pushed, so signal it after the submission it belongs to; signaling
/// before the cursor reaches the fence is valid and makes it transparent.
#[must_use]
#[derive(Debug)]
pub struct TaskFence {
    state: Arc<FenceState>,
}

impl TaskFence {
    pub(crate) fn new(state: Arc<FenceState>) -> Self {
        Self { state }
    }

    /// Raise the flag and wake the pool so draining can resume past the
    /// fence. Signaling more than once per submission is a no-op.
    pub fn signal(&self) {
        self.state.signal();
    }
}
