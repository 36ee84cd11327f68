use crate::list::CheckpointEntry;
use crate::result::{ResultState, TaskError};
use derive_more::Debug;
use std::any::Any;
use std::ops::Range;
use std::panic::{self, AssertUnwindSafe};
use std::slice;
use std::sync::Arc;

/// A unit of work the pool can run.
///
/// Holders are invoked at most once per submission and re-seeded by `reset`
/// when the owning list is pushed again. Failures of the callable never
/// unwind out of `execute`.
pub(crate) trait TaskExec: Send {
    fn execute(&mut self);
    fn reset(&mut self);
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        (*message).to_owned()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("opaque panic payload")
    }
}

/// Fire-and-forget holder: the callable's outcome is not observable, so a
/// failure is logged and dropped to keep the rest of the graph progressing.
#[derive(Debug)]
pub(crate) struct FireTask<F> {
    #[debug(skip)]
    func: F,
}

impl<F: FnMut() + Send> FireTask<F> {
    pub(crate) fn new(func: F) -> Self {
        Self { func }
    }
}

impl<F: FnMut() + Send> TaskExec for FireTask<F> {
    fn execute(&mut self) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (self.func)())) {
            log::error!("task callable panicked: {}", panic_message(payload.as_ref()));
        }
    }

    fn reset(&mut self) {}
}

/// Value-returning holder: the callable's outcome, success or failure, is
/// published into the slot shared with the caller's handle.
#[derive(Debug)]
pub(crate) struct ValueTask<F, R> {
    #[debug(skip)]
    func: F,
    #[debug(skip)]
    slot: Arc<ResultState<R>>,
}

impl<F, R> ValueTask<F, R>
where
    F: FnMut() -> R + Send,
    R: Send,
{
    pub(crate) fn new(func: F, slot: Arc<ResultState<R>>) -> Self {
        Self { func, slot }
    }
}

impl<F, R> TaskExec for ValueTask<F, R>
where
    F: FnMut() -> R + Send,
    R: Send,
{
    fn execute(&mut self) {
        match panic::catch_unwind(AssertUnwindSafe(|| (self.func)())) {
            Ok(value) => self.slot.fulfill(Ok(value)),
            Err(payload) => self.slot.fulfill(Err(TaskError::CallableFailed(panic_message(
                payload.as_ref(),
            )))),
        }
    }

    fn reset(&mut self) {
        self.slot.reset();
    }
}

/// Non-owning handle to a task inside a submitted list, paired with the
/// checkpoints it must decrement on completion.
///
/// Validity is guaranteed by scheduling, not ownership: each task is emitted
/// at most once per submission, the list's buffers are never reallocated
/// after `build`, and the pool retires a list only after its terminal
/// barrier proves every task has completed.
#[derive(Debug)]
pub(crate) struct TaskRef {
    task: *mut dyn TaskExec,
    checkpoints: *const CheckpointEntry,
    checkpoint_count: usize,
}

// SAFETY: `TaskRef` crosses from the scheduling path into exactly one worker
// thread. The task pointer is dereferenced by that worker alone (one
// emission per submission), and the checkpoint slice is only read through
// `&self` methods backed by atomics and locks.
unsafe impl Send for TaskRef {}

impl TaskRef {
    pub(crate) fn new(
        task: &mut Box<dyn TaskExec>,
        checkpoints: &[CheckpointEntry],
        range: Range<usize>,
    ) -> Self {
        let checkpoints = &checkpoints[range];
        Self {
            task: task.as_mut(),
            checkpoints: checkpoints.as_ptr(),
            checkpoint_count: checkpoints.len(),
        }
    }

    /// Run the task and decrement its checkpoints.
    ///
    /// # Safety
    /// The list that owns the referenced task must still be registered with
    /// the pool (not retired, not dropped), and no other `TaskRef` to the
    /// same task may exist for the current submission.
    pub(crate) unsafe fn run(self) {
        let task = unsafe { &mut *self.task };
        task.execute();

        // The decrement runs even when the callable failed so downstream
        // segments cannot deadlock on an abandoned counter.
        let checkpoints = unsafe { slice::from_raw_parts(self.checkpoints, self.checkpoint_count) };
        for checkpoint in checkpoints {
            checkpoint.count_down();
        }
    }
}

/// Entry of the pool's ready queue: either a one-off task owned by the
/// queue itself, or a borrowed reference into a submitted list.
#[derive(Debug)]
pub(crate) enum QueueItem {
    Owned(#[debug(skip)] Box<dyn TaskExec>),
    Listed(TaskRef),
}

impl QueueItem {
    pub(crate) fn run(self) {
        match self {
            Self::Owned(mut task) => task.execute(),
            // SAFETY: the scheduler emitted this reference for the current
            // submission and the owning list stays registered until its
            // terminal barrier observes all tasks complete.
            Self::Listed(task) => unsafe { task.run() },
        }
    }
}
