use crate::fence::FenceState;
use crate::pool::PoolShared;
use crate::result::ResultState;
use crate::task::{QueueItem, TaskExec, TaskRef};
use derive_more::Debug;
use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A checkpoint owned by its list: a countdown seeded on push, fulfilled
/// exactly once per submission when it reaches zero.
///
/// The reset value is the number of tasks in the segment preceding the
/// checkpoint, plus one slot reserved for the scheduling cursor. A barrier
/// additionally gates the cursor: draining may not pass it while anything
/// but the cursor slot is outstanding.
#[derive(Debug)]
pub(crate) struct CheckpointEntry {
    counter: AtomicUsize,
    reset_value: usize,
    barrier: bool,
    signal: Arc<ResultState<()>>,
}

impl CheckpointEntry {
    pub(crate) fn new(barrier: bool, reset_value: usize, signal: Arc<ResultState<()>>) -> Self {
        Self {
            counter: AtomicUsize::new(0),
            reset_value,
            barrier,
            signal,
        }
    }

    pub(crate) fn reset(&self) {
        self.signal.reset();
        self.counter.store(self.reset_value, Ordering::Release);
    }

    /// Release one slot; the transition to zero fires the promise.
    pub(crate) fn count_down(&self) {
        let previous = self.counter.fetch_sub(1, Ordering::AcqRel);
        debug_assert!(previous > 0, "CheckpointEntry::count_down: counter underflow");
        if previous == 1 {
            self.signal.fulfill(Ok(()));
        }
    }

    /// Whether only the cursor slot is left outstanding.
    pub(crate) fn gate_open(&self) -> bool {
        self.counter.load(Ordering::Acquire) == 1
    }

    pub(crate) fn is_barrier(&self) -> bool {
        self.barrier
    }

    #[cfg(test)]
    pub(crate) fn reset_value(&self) -> usize {
        self.reset_value
    }
}

/// A task inside a built list together with the contiguous range of
/// list-owned checkpoints it must decrement on completion.
#[derive(Debug)]
pub(crate) struct TaskEntry {
    #[debug(skip)]
    pub(crate) holder: Box<dyn TaskExec>,
    pub(crate) checkpoints: Range<usize>,
}

/// One item of a built list. A tagged variant, matched on by the cursor.
#[derive(Debug)]
pub(crate) enum Entry {
    Task(TaskEntry),
    /// Index into the list's checkpoint vector.
    Checkpoint(usize),
    Fence(Arc<FenceState>),
}

/// A finalized, replayable sequence of tasks, checkpoints and fences.
///
/// Produced by [`TaskBuilder::build`](crate::builder::TaskBuilder::build),
/// consumed by one [`ThreadPool::push`](crate::pool::ThreadPool::push) at a
/// time, and handed back through the submission's completion handle once
/// fully executed. The entry and checkpoint buffers are sized at build time
/// and never reallocated, so indices and borrowed views into them stay
/// stable for the list's lifetime.
#[must_use]
#[derive(Debug)]
pub struct TaskList {
    pub(crate) entries: Vec<Entry>,
    pub(crate) checkpoints: Vec<CheckpointEntry>,
    pub(crate) cursor: usize,
}

impl TaskList {
    /// Seed every checkpoint, fence and value-returning task for a new
    /// submission cycle and rewind the cursor.
    pub(crate) fn reset(&mut self, pool: &Arc<PoolShared>) {
        for entry in &mut self.entries {
            match entry {
                Entry::Task(task) => task.holder.reset(),
                Entry::Checkpoint(_) => {}
                Entry::Fence(fence) => fence.rearm(pool),
            }
        }
        for checkpoint in &self.checkpoints {
            checkpoint.reset();
        }
        self.cursor = 0;
    }

    /// Advance the cursor, emitting ready tasks into the pool's queue.
    ///
    /// Returns whether the cursor reached the end of the list, and how many
    /// tasks were emitted. Draining stops early at a barrier whose segment
    /// is still outstanding and at an unsignaled fence; every checkpoint the
    /// cursor passes gives up its reserved slot, which is what fires a
    /// barrier's promise on the scheduling path.
    pub(crate) fn advance(&mut self, queue: &mut VecDeque<QueueItem>) -> (bool, usize) {
        let mut emitted = 0;
        while self.cursor < self.entries.len() {
            match &mut self.entries[self.cursor] {
                Entry::Checkpoint(index) => {
                    let checkpoint = &self.checkpoints[*index];
                    if checkpoint.is_barrier() && !checkpoint.gate_open() {
                        return (false, emitted);
                    }
                    checkpoint.count_down();
                }
                Entry::Task(task) => {
                    queue.push_back(QueueItem::Listed(TaskRef::new(
                        &mut task.holder,
                        &self.checkpoints,
                        task.checkpoints.clone(),
                    )));
                    emitted += 1;
                }
                Entry::Fence(fence) => {
                    if !fence.is_signaled() {
                        return (false, emitted);
                    }
                }
            }
            self.cursor += 1;
        }
        (true, emitted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::TaskBuilder;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration;

    fn drain_and_run(list: &mut TaskList) -> (bool, usize) {
        let mut queue = VecDeque::new();
        let result = list.advance(&mut queue);
        for item in queue {
            item.run();
        }
        result
    }

    #[test]
    fn build_appends_a_terminal_barrier() {
        let mut builder = TaskBuilder::with_thread_count(4);
        builder.execute(|| {});
        builder.execute(|| {});
        let list = builder.build();

        assert_eq!(list.entries.len(), 3);
        assert_eq!(list.checkpoints.len(), 1);
        assert!(list.checkpoints[0].is_barrier());
        // Two tasks plus the cursor slot.
        assert_eq!(list.checkpoints[0].reset_value(), 3);
    }

    #[test]
    fn checkpoint_ranges_cover_the_rest_of_the_segment() {
        let mut builder = TaskBuilder::with_thread_count(4);
        let _first = builder.checkpoint();
        builder.execute(|| {});
        let _second = builder.checkpoint();
        builder.execute(|| {});
        let list = builder.build();

        // first -> cursor only; second -> one task + cursor; terminal
        // barrier -> two tasks + cursor.
        let reset_values: Vec<_> = list.checkpoints.iter().map(|c| c.reset_value()).collect();
        assert_eq!(reset_values, [1, 2, 3]);

        let ranges: Vec<_> = list
            .entries
            .iter()
            .filter_map(|entry| match entry {
                Entry::Task(task) => Some(task.checkpoints.clone()),
                _ => None,
            })
            .collect();
        // The first task decrements the second checkpoint and the terminal
        // barrier; the second task only the terminal barrier.
        assert_eq!(ranges, [1..3, 2..3]);
    }

    #[test]
    fn advance_stops_at_a_barrier_until_its_segment_completes() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut builder = TaskBuilder::with_thread_count(4);
        for _ in 0..2 {
            let counter = Arc::clone(&counter);
            builder.execute(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        let gate = builder.barrier();
        {
            let counter = Arc::clone(&counter);
            builder.execute(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        let mut list = builder.build();
        list.reset(&PoolShared::detached());

        let mut queue = VecDeque::new();
        assert_eq!(list.advance(&mut queue), (false, 2));
        assert!(!gate.wait_for(Duration::ZERO));

        // Re-draining without progress stays blocked and emits nothing.
        assert_eq!(list.advance(&mut queue), (false, 0));

        for item in queue.drain(..) {
            item.run();
        }
        // Both tasks are done, but the barrier promise fires only when the
        // cursor passes it and gives up the reserved slot.
        assert!(!gate.wait_for(Duration::ZERO));

        assert_eq!(drain_and_run(&mut list), (false, 1));
        gate.wait();
        assert_eq!(drain_and_run(&mut list), (true, 0));
        assert_eq!(counter.load(Ordering::Relaxed), 3);
    }

    #[test]
    fn plain_checkpoint_fires_from_task_completions() {
        let mut builder = TaskBuilder::with_thread_count(4);
        builder.execute(|| {});
        builder.execute(|| {});
        let joined = builder.checkpoint();
        let mut list = builder.build();
        list.reset(&PoolShared::detached());

        let mut queue = VecDeque::new();
        // The cursor passes the plain checkpoint and gives up its slot, but
        // the promise stays pending until both tasks have run.
        assert_eq!(list.advance(&mut queue), (false, 2));
        assert!(!joined.wait_for(Duration::ZERO));

        let mut items = queue.drain(..);
        items.next().unwrap().run();
        assert!(!joined.wait_for(Duration::ZERO));
        items.next().unwrap().run();
        joined.wait();
    }

    #[test]
    fn advance_blocks_at_an_unsignaled_fence() {
        let mut builder = TaskBuilder::with_thread_count(4);
        builder.execute(|| {});
        let fence = builder.fence();
        builder.execute(|| {});
        let mut list = builder.build();
        list.reset(&PoolShared::detached());

        assert_eq!(drain_and_run(&mut list), (false, 1));
        assert_eq!(drain_and_run(&mut list), (false, 0));

        fence.signal();
        assert_eq!(drain_and_run(&mut list), (false, 1));
        assert_eq!(drain_and_run(&mut list), (true, 0));
    }

    #[test]
    fn reset_rearms_a_consumed_list() {
        let counter = Arc::new(AtomicU32::new(0));
        let mut builder = TaskBuilder::with_thread_count(4);
        {
            let counter = Arc::clone(&counter);
            builder.execute(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        let joined = builder.checkpoint();
        let mut list = builder.build();

        for run in 1..=2u32 {
            list.reset(&PoolShared::detached());
            assert_eq!(drain_and_run(&mut list), (false, 1));
            assert_eq!(drain_and_run(&mut list), (true, 0));
            joined.wait();
            assert_eq!(counter.load(Ordering::Relaxed), run);
        }
    }
}
