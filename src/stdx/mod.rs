#![allow(dead_code)]
//! Small, self-contained data structures used across the crate.
//!
//! # Scope
//! `stdx` hosts narrow containers that back the scheduling core. They are
//! tuned for the access patterns of this crate rather than general-purpose
//! ergonomics.
//!
//! # Module map
//! - `double_queue`: bounded MPMC FIFO with independent entry/exit buffers.
//! - `sorter`: indexed ordered set keyed by id, ordered by record.
//! - `timeout_queue`: bounded time-ordered multimap with a membership index.

pub mod double_queue;
pub mod sorter;
pub mod timeout_queue;

pub use double_queue::DoubleQueue;
pub use sorter::{SortRecord, Sorter};
pub use timeout_queue::TimeoutQueue;
