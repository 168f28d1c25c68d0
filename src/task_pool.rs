//! The seam between the thread pool and its task sources.
//!
//! A [`TaskPool`] supplies ready-to-run tasks to workers via [`TaskPool::take`]
//! and announces the arrival of work through an installed notify callback.
//! The pool never knows which concrete source it is draining; `TaskQueue`,
//! `TaskMapper`, and the aggregating `TaskManager` all sit behind this trait.

use std::sync::Arc;
use std::time::Instant;

use crate::stdx::sorter::SortRecord;

/// Count type used for queue sizes and worker counts.
pub type SizeType = usize;

/// Index type used for task-source identity and mapper keys.
pub type IndexType = usize;

/// Monotonic timestamp used for scheduling decisions.
///
/// Wall-clock time is never used for ordering; only relative comparison of
/// monotonic instants matters.
pub type TimePoint = Instant;

/// An opaque unit of work. No parameters, no return value.
///
/// A task that panics is caught by the executing worker, logged at Error
/// level, and does not disturb the worker's lifecycle.
pub type Task = Box<dyn FnOnce() + Send>;

/// Callback installed into a task source by its consumer.
///
/// Invoked with the source's own index on the empty-to-non-empty transition
/// of pending work. Must be safe to call from any producer thread; sources
/// invoke it outside all of their internal locks.
pub type TaskNotify = Arc<dyn Fn(IndexType) + Send + Sync>;

/// Interface every task source exposes to its consumer.
///
/// Implementations are shared between producers and the pool, so every
/// method takes `&self` and must be safe under concurrent calls.
pub trait TaskPool: Send + Sync {
    /// Install (`Some`) or clear (`None`) the consumer's notify callback.
    fn configure(&self, notify: Option<TaskNotify>);

    /// The caller-assigned unique index of this source.
    fn index(&self) -> IndexType;

    /// True when nothing is currently schedulable.
    ///
    /// Note: for a keyed source this reflects the schedulable view, which can
    /// be empty while messages are still retained (see `TaskMapper`).
    fn is_empty(&self) -> bool;

    /// Number of pending work items, including retained ones.
    fn len(&self) -> SizeType;

    /// Timestamp of the oldest pending item, if any.
    fn time(&self) -> Option<TimePoint>;

    /// Remove and return the next task, or `None` when nothing is available.
    fn take(&self) -> Option<Task>;
}

/// Sort record shared by the timestamp-ordered schedulers.
///
/// Ordering is earlier-time-first with ties broken by smaller id, which keeps
/// iteration deterministic across runs. The derived lexicographic order on
/// `(time, id)` encodes exactly that.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub struct TimedRecord {
    pub time: TimePoint,
    pub id: IndexType,
}

impl SortRecord for TimedRecord {
    type Id = IndexType;

    fn id(&self) -> IndexType {
        self.id
    }
}
