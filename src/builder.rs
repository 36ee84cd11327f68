use crate::fence::{FenceState, TaskFence};
use crate::list::{CheckpointEntry, Entry, TaskEntry, TaskList};
use crate::pool;
use crate::result::{ResultState, TaskCheckpoint, TaskResult};
use crate::task::{FireTask, TaskExec, ValueTask};
use derive_more::Debug;
use std::sync::Arc;
use thiserror::Error;

/// Error returned by [`TaskBuilder::dispatch`] for an unusable grid.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum DispatchError {
    /// One of the grid extents is zero; the grid contains no points.
    #[error("dispatch grid has a zero extent ({x}, {y}, {z})")]
    ZeroExtent {
        /// Requested extent along x.
        x: u32,
        /// Requested extent along y.
        y: u32,
        /// Requested extent along z.
        z: u32,
    },
    /// The grid's point count does not fit the 64-bit linear index space.
    #[error("dispatch grid ({x}, {y}, {z}) overflows the linear index space")]
    GridOverflow {
        /// Requested extent along x.
        x: u32,
        /// Requested extent along y.
        y: u32,
        /// Requested extent along z.
        z: u32,
    },
}

/// Builder-side entry, recorded in submission order and partitioned into
/// barrier-delimited segments by `build`.
#[derive(Debug)]
enum Staged {
    Task(#[debug(skip)] Box<dyn TaskExec>),
    Checkpoint {
        barrier: bool,
        signal: Arc<ResultState<()>>,
    },
    Fence(Arc<FenceState>),
}

/// Single-use assembler of ordered task lists.
///
/// Work items are recorded in submission order: individual tasks
/// ([`execute`](Self::execute), [`invoke`](Self::invoke)), 3D grid
/// dispatches sharded over the configured thread count
/// ([`dispatch`](Self::dispatch)), join signals
/// ([`checkpoint`](Self::checkpoint)), scheduling gates
/// ([`barrier`](Self::barrier)) and externally-signaled latches
/// ([`fence`](Self::fence)). [`build`](Self::build) consumes the builder
/// and produces the finalized [`TaskList`].
#[must_use]
#[derive(Debug)]
pub struct TaskBuilder {
    thread_count: usize,
    staged: Vec<Staged>,
}

impl Default for TaskBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskBuilder {
    /// Create a builder sharding dispatches over the default worker count
    /// (logical CPU count, floor 8).
    pub fn new() -> Self {
        Self::with_thread_count(pool::default_worker_count())
    }

    /// Create a builder sharding dispatches over `thread_count` shards.
    /// A count of zero falls back to the default.
    pub fn with_thread_count(thread_count: usize) -> Self {
        let thread_count = if thread_count == 0 {
            pool::default_worker_count()
        } else {
            thread_count
        };
        Self {
            thread_count,
            staged: Vec::with_capacity(32),
        }
    }

    /// Append a fire-and-forget task.
    pub fn execute<F>(&mut self, func: F)
    where
        F: FnMut() + Send + 'static,
    {
        self.staged.push(Staged::Task(Box::new(FireTask::new(func))));
    }

    /// Append a value-returning task and obtain the handle observing its
    /// outcome.
    #[must_use]
    pub fn invoke<F, R>(&mut self, func: F) -> TaskResult<R>
    where
        F: FnMut() -> R + Send + 'static,
        R: Send + 'static,
    {
        let slot = Arc::new(ResultState::new());
        self.staged
            .push(Staged::Task(Box::new(ValueTask::new(func, Arc::clone(&slot)))));
        TaskResult::new(slot)
    }

    /// Append an `x * y * z` grid invocation of `func`, called once per
    /// grid point with its `(ix, iy, iz)` coordinates.
    ///
    /// Small grids get one task per point; larger ones are split into
    /// contiguous shards, as evenly as possible across the builder's thread
    /// count, with any remainder going to the leading shards. Linear order
    /// is ascending, both across shards and within a shard, with `ix` the
    /// fastest-varying coordinate.
    pub fn dispatch<F>(&mut self, x: u32, y: u32, z: u32, func: F) -> Result<(), DispatchError>
    where
        F: FnMut(u32, u32, u32) + Clone + Send + 'static,
    {
        if x == 0 || y == 0 || z == 0 {
            return Err(DispatchError::ZeroExtent { x, y, z });
        }
        let total = u64::from(x)
            .checked_mul(u64::from(y))
            .and_then(|xy| xy.checked_mul(u64::from(z)))
            .ok_or(DispatchError::GridOverflow { x, y, z })?;

        if total < self.thread_count as u64 {
            for iz in 0..z {
                for iy in 0..y {
                    for ix in 0..x {
                        let mut func = func.clone();
                        self.execute(move || func(ix, iy, iz));
                    }
                }
            }
        } else {
            let per_shard = total / self.thread_count as u64;
            let mut remainder = total % self.thread_count as u64;
            let plane = u64::from(x) * u64::from(y);

            let mut start = 0u64;
            while start < total {
                let mut count = per_shard;
                if remainder > 0 {
                    count += 1;
                    remainder -= 1;
                }
                let mut func = func.clone();
                self.execute(move || {
                    for i in start..start + count {
                        let ix = (i % u64::from(x)) as u32;
                        let iy = (i / u64::from(x) % u64::from(y)) as u32;
                        let iz = (i / plane) as u32;
                        func(ix, iy, iz);
                    }
                });
                start += count;
            }
        }
        Ok(())
    }

    /// Append a plain checkpoint: a join signal for the tasks of the
    /// current segment recorded so far. It does not gate list progression.
    #[must_use]
    pub fn checkpoint(&mut self) -> TaskCheckpoint {
        self.push_checkpoint(false)
    }

    /// Append a barrier: a checkpoint that also blocks list progression
    /// until every task recorded before it in the segment has completed.
    pub fn barrier(&mut self) -> TaskCheckpoint {
        self.push_checkpoint(true)
    }

    fn push_checkpoint(&mut self, barrier: bool) -> TaskCheckpoint {
        let signal = Arc::new(ResultState::new());
        self.staged.push(Staged::Checkpoint {
            barrier,
            signal: Arc::clone(&signal),
        });
        TaskResult::new(signal)
    }

    /// Append a fence and obtain its signal handle. List progression stops
    /// at the fence until the handle is signaled for the submission.
    #[must_use]
    pub fn fence(&mut self) -> TaskFence {
        let state = Arc::new(FenceState::new());
        self.staged.push(Staged::Fence(Arc::clone(&state)));
        TaskFence::new(state)
    }

    /// Finalize the recorded stream into a [`TaskList`].
    ///
    /// Consuming the builder makes a second build impossible. The stream is
    /// closed with a trailing barrier (the pool detects list completion
    /// through it) and partitioned into barrier-delimited segments; within
    /// each segment every checkpoint learns its reset value and every task
    /// the range of checkpoints it must decrement.
    pub fn build(mut self) -> TaskList {
        let _ = self.barrier();

        let total_checkpoints = self
            .staged
            .iter()
            .filter(|staged| matches!(staged, Staged::Checkpoint { .. }))
            .count();
        let mut entries = Vec::with_capacity(self.staged.len());
        // Sized once; entry indices and borrowed views into this vector
        // stay valid for the list's lifetime.
        let mut checkpoints = Vec::with_capacity(total_checkpoints);

        let mut segment = Vec::new();
        for staged in self.staged.drain(..) {
            let closes_segment = matches!(&staged, Staged::Checkpoint { barrier: true, .. });
            segment.push(staged);
            if closes_segment {
                flush_segment(&mut segment, &mut entries, &mut checkpoints);
            }
        }
        debug_assert!(
            segment.is_empty(),
            "TaskBuilder::build: entries left over past the terminal barrier"
        );

        TaskList {
            entries,
            checkpoints,
            cursor: 0,
        }
    }
}

/// Move one barrier-closed segment into the output list, wiring reset
/// values and checkpoint ranges.
///
/// A checkpoint's reset value counts the segment's tasks recorded before
/// it, plus the cursor slot. A task decrements every checkpoint of its
/// segment recorded at or after it, which is the contiguous range from the
/// next checkpoint index to the segment's end.
fn flush_segment(
    segment: &mut Vec<Staged>,
    entries: &mut Vec<Entry>,
    checkpoints: &mut Vec<CheckpointEntry>,
) {
    let segment_end = checkpoints.len()
        + segment
            .iter()
            .filter(|staged| matches!(staged, Staged::Checkpoint { .. }))
            .count();
    let mut tasks_seen = 0usize;

    for staged in segment.drain(..) {
        match staged {
            Staged::Task(holder) => {
                entries.push(Entry::Task(TaskEntry {
                    holder,
                    checkpoints: checkpoints.len()..segment_end,
                }));
                tasks_seen += 1;
            }
            Staged::Checkpoint { barrier, signal } => {
                let index = checkpoints.len();
                checkpoints.push(CheckpointEntry::new(barrier, tasks_seen + 1, signal));
                entries.push(Entry::Checkpoint(index));
            }
            Staged::Fence(state) => entries.push(Entry::Fence(state)),
        }
    }
}
