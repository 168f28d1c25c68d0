//! In-process concurrent task execution engine.
//!
//! A bounded pool of reusable worker threads drains caller-registered task
//! sources under two scheduling disciplines: a FIFO queue of independent
//! jobs ([`TaskQueue`]) and a keyed actor dispatcher ([`TaskMapper`]) in
//! which every key owns a private message queue served serially or in
//! parallel. Sources register with the pool's aggregating [`TaskManager`],
//! which always drains the source with the oldest pending work.
//!
//! # Control flow
//!
//! ```text
//!  put() ──► TaskQueue / TaskMapper ──► TaskManager ──notify──► supervisor
//!                                           ▲                      │
//!                                           │ take() (fetch)       │ notify()
//!                                           └────── Worker ◄───────┘
//!                                                     │ reply(id, idle)
//!                                                     ▼
//!                                                 supervisor
//! ```
//!
//! Producers call `put` on a source. On the empty-to-non-empty transition
//! the source announces through the manager to the pool's supervisor, which
//! notifies idle workers. A notified worker self-pulls tasks through the
//! manager until it runs dry, reporting back after each task so the
//! supervisor's idle bookkeeping stays exact.
//!
//! # Guarantees
//!
//! - **Conservation of work**: every accepted task eventually runs; dropping
//!   the pool drains outstanding work before joining.
//! - **Key FIFO**: a serial mapper key processes messages one at a time in
//!   arrival order; across keys the oldest pending message wins, ties broken
//!   by key.
//! - **Panic isolation**: a panicking task or handler is caught, logged at
//!   Error level via the `log` facade, and never disturbs its worker.
//! - **Reusable workers**: a [`Worker`] can be destroyed and re-created in
//!   place; the pool grows and shrinks its worker list toward a runtime
//!   capacity target on a dedicated supervisor thread.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//! use taskpool_rs::{TaskMapper, TaskQueue, ThreadPool};
//!
//! let pool = ThreadPool::new(4);
//!
//! // Independent jobs through the FIFO queue.
//! let queue = TaskQueue::new(0);
//! pool.task_manager().insert(queue.clone());
//! let hits = Arc::new(AtomicUsize::new(0));
//! let h = Arc::clone(&hits);
//! queue.put(Box::new(move || {
//!     h.fetch_add(1, Ordering::Relaxed);
//! }));
//!
//! // Keyed messages through the actor dispatcher.
//! let mapper: Arc<TaskMapper<String>> = TaskMapper::new(1);
//! pool.task_manager().insert(mapper.clone());
//! mapper.set(7, Some(Arc::new(|message: &mut String| {
//!     println!("key 7 got {message}");
//! })), false);
//! mapper.put(7, "hello".to_owned());
//!
//! drop(pool); // drains outstanding work, then joins
//! ```

pub mod condition;
pub mod pool;
pub mod stdx;
pub mod task_manager;
pub mod task_mapper;
pub mod task_pool;
pub mod task_queue;
pub mod worker;

#[cfg(test)]
pub mod test_utils;

pub use condition::{Condition, Strategy};
pub use pool::ThreadPool;
pub use task_manager::{TaskManager, ThreadNotify};
pub use task_mapper::{Handle, TaskMapper};
pub use task_pool::{IndexType, SizeType, Task, TaskNotify, TaskPool, TimePoint, TimedRecord};
pub use task_queue::TaskQueue;
pub use worker::{FetchFn, ReplyFn, Worker, WorkerState};
