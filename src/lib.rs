//! Thread pool executing pre-built, replayable task lists.
//!
//! This crate provides a worker pool for task graphs expressed as ordered
//! lists of heterogeneous work items. It:
//! - Assembles lists from individual tasks, 3D grid dispatches sharded over
//!   the pool size, checkpoints, barriers and fences, with dependency
//!   metadata wired in at build time.
//! - Schedules opportunistically: whichever worker wakes advances the
//!   active lists' cursors, stopping at barriers whose segment is still
//!   outstanding and at unsignaled fences, and feeds a strictly FIFO ready
//!   queue.
//! - Joins through awaitable handles (checkpoint signals, per-task results,
//!   list completion) fulfilled exactly once per submission and re-armed
//!   when a list is pushed again.
//!
//! Key modules:
//! - `builder`: records work items in submission order and finalizes them
//!   into a task list, partitioning the stream into barrier-delimited
//!   segments.
//! - `list`: the finalized list with its cursor, the checkpoint countdown
//!   objects it owns, and the advance/reset machinery the pool drives.
//! - `pool`: the fixed worker set, the ready queue, the active-list
//!   registry, list retirement, and shutdown.
//! - `result`: awaitable handles (`wait`, `wait_for`, `wait_until`, `get`)
//!   shared between the caller and the executing side.
//! - `fence`: externally-signaled latches embedded in a list.
//!
//! Quick start:
//! 1. Drive a `TaskBuilder`: record tasks with `execute`/`invoke`, spread a
//!    grid with `dispatch`, and place `checkpoint`/`barrier`/`fence` items
//!    where the graph needs joins or gates; keep the returned handles.
//! 2. Call `build` to obtain the `TaskList`.
//! 3. Submit it with `ThreadPool::push` and observe progress through the
//!    handles; the completion handle resolves to the consumed list, which
//!    may be pushed again.
//!
//! Within a segment tasks may run in any order and concurrently; a barrier
//! orders everything before it in the list ahead of everything after it; a
//! fence holds everything after it until the outside world signals. Across
//! distinct lists there are no ordering guarantees.

/// The task builder: ordered recording of tasks, dispatches, checkpoints,
/// barriers and fences, finalized by `build` into a [`list::TaskList`].
pub mod builder;
/// Externally-signaled latches gating list progression.
pub mod fence;
/// The finalized task list: entry variants, list-owned checkpoints, and
/// the cursor the pool advances.
pub mod list;
/// The worker pool: submission, scheduling, waiting, retirement.
pub mod pool;
/// Awaitable result handles and the error kinds they surface.
pub mod result;
mod task;
