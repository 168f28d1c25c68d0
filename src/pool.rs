//! Thread pool with a supervising scaler thread.
//!
//! # Architecture
//!
//! ```text
//!   producers ──► TaskManager ──notify──► Supervisor ──notify()──► Worker
//!                     ▲                      │  ▲                    │
//!                     │ fetch (self-pull)    │  │ reply(id, idle)    │
//!                     └──────────────────────┼──┴────────────────────┘
//!                                            ▼
//!                            owns Vec<Worker>: scale up / delete / dispatch
//! ```
//!
//! The supervisor thread is the single owner of the worker list: scaling,
//! erase-on-shrink, and the dispatch walk all happen on that one thread, so
//! no concurrent container is needed. Everyone else communicates through
//! atomics (capacity) and the supervisor's [`Condition`] (wakeups).
//!
//! Workers self-serve: after each task they pull the next through the
//! installed `fetch` hook and only block when the manager runs dry, so the
//! supervisor is only woken on the edges that matter — new work arriving
//! into an empty manager, the first worker turning idle, or every worker
//! turning idle.
//!
//! # Shutdown
//!
//! Dropping the pool invalidates the supervisor and wakes it. The supervisor
//! keeps dispatching until the manager holds no messages at all and every
//! worker is idle, then destroys the workers in order. Outstanding work is
//! drained, never dropped; a parked mapper key with retained messages
//! blocks the drain until it is cleared.
//!
//! All callbacks installed into managers and workers capture weak references
//! to the pool core, so an installed callback can never keep a destroyed
//! pool's memory alive or fire into it.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread::{self, JoinHandle};

use crossbeam_utils::CachePadded;

use crate::condition::{Condition, Strategy};
use crate::task_manager::{TaskManager, ThreadNotify};
use crate::task_pool::SizeType;
use crate::worker::{FetchFn, ReplyFn, Worker};

struct PoolCore {
    valid: AtomicBool,
    condition: Condition,
    capacity: CachePadded<AtomicUsize>,
    total: CachePadded<AtomicUsize>,
    idle: CachePadded<AtomicUsize>,
    manager: TaskManager,
}

impl PoolCore {
    #[inline]
    fn is_valid(&self) -> bool {
        self.valid.load(Ordering::Relaxed)
    }
}

pub struct ThreadPool {
    core: Arc<PoolCore>,
    supervisor: Mutex<Option<JoinHandle<()>>>,
}

impl ThreadPool {
    /// Start a pool with `capacity` workers. A capacity of 0 is treated as 1.
    ///
    /// # Panics
    ///
    /// Panics when the OS refuses to spawn the supervisor or a worker thread;
    /// a pool that cannot thread is unusable.
    pub fn new(capacity: SizeType) -> Self {
        let capacity = capacity.max(1);

        let core = Arc::new(PoolCore {
            valid: AtomicBool::new(true),
            condition: Condition::new(),
            capacity: CachePadded::new(AtomicUsize::new(capacity)),
            total: CachePadded::new(AtomicUsize::new(capacity)),
            idle: CachePadded::new(AtomicUsize::new(capacity)),
            manager: TaskManager::new(),
        });

        // Manager announcement: new work arrived into an empty manager.
        let weak: Weak<PoolCore> = Arc::downgrade(&core);
        let notify: ThreadNotify = Arc::new(move || {
            if let Some(core) = weak.upgrade() {
                core.condition.notify_one(Strategy::Relaxed);
            }
        });
        core.manager.configure(Some(notify));

        // Worker self-pull: route back into the manager.
        let weak = Arc::downgrade(&core);
        let fetch: FetchFn = Arc::new(move || weak.upgrade().and_then(|core| core.manager.take()));

        // Worker completion: count idle transitions; the 0 -> 1 edge and the
        // all-idle edge are the only ones the supervisor must see.
        let weak = Arc::downgrade(&core);
        let reply: ReplyFn = Arc::new(move |_id, idle| {
            if !idle {
                return;
            }
            if let Some(core) = weak.upgrade() {
                let previous = core.idle.fetch_add(1, Ordering::Relaxed);
                if previous == 0
                    || core.idle.load(Ordering::Relaxed) >= core.total.load(Ordering::Relaxed)
                {
                    core.condition.notify_one(Strategy::Relaxed);
                }
            }
        });

        let mut workers = Vec::with_capacity(capacity);
        for _ in 0..capacity {
            workers.push(spawn_worker(&fetch, &reply));
        }

        let supervisor_core = Arc::clone(&core);
        let handle = thread::Builder::new()
            .name("taskpool-supervisor".into())
            .spawn(move || supervise(supervisor_core, workers, fetch, reply))
            .expect("failed to spawn supervisor thread");

        Self {
            core,
            supervisor: Mutex::new(Some(handle)),
        }
    }

    /// Number of worker threads the OS reports as worth running.
    pub fn hardware_concurrency() -> SizeType {
        thread::available_parallelism()
            .map(|count| count.get())
            .unwrap_or(1)
    }

    pub fn capacity(&self) -> SizeType {
        self.core.capacity.load(Ordering::Relaxed)
    }

    /// Request a new target worker count. Rejects 0. The supervisor converges
    /// the live count toward the target asynchronously.
    pub fn set_capacity(&self, capacity: SizeType) -> bool {
        if capacity == 0 {
            return false;
        }
        let previous = self.core.capacity.swap(capacity, Ordering::Relaxed);
        if previous != capacity {
            self.core.condition.notify_one(Strategy::Relaxed);
        }
        true
    }

    /// Current number of live workers.
    pub fn total_size(&self) -> SizeType {
        self.core.total.load(Ordering::Relaxed)
    }

    /// Current number of idle workers.
    pub fn idle_size(&self) -> SizeType {
        self.core.idle.load(Ordering::Relaxed)
    }

    /// The pool's task manager. Register task sources here.
    pub fn task_manager(&self) -> &TaskManager {
        &self.core.manager
    }

    /// Drain outstanding work, stop every worker, and join the supervisor.
    /// Idempotent; also runs on drop.
    pub fn shutdown(&self) {
        if !self.core.valid.swap(false, Ordering::Relaxed) {
            return;
        }

        self.core.condition.notify_all(Strategy::Relaxed);
        if let Some(handle) = self.supervisor.lock().expect("supervisor mutex poisoned").take()
        {
            let _ = handle.join();
        }

        self.core.capacity.store(0, Ordering::Relaxed);
        self.core.total.store(0, Ordering::Relaxed);
        self.core.idle.store(0, Ordering::Relaxed);
    }
}

impl Default for ThreadPool {
    fn default() -> Self {
        Self::new(Self::hardware_concurrency())
    }
}

impl Drop for ThreadPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn spawn_worker(fetch: &FetchFn, reply: &ReplyFn) -> Worker {
    let worker = Worker::new();
    worker.create();
    worker.configure_fetch(fetch.clone(), Some(reply.clone()));
    worker
}

/// Grow toward the capacity target. Returns the surplus worker count the
/// dispatch walk may delete (0 while at or below target).
fn adjust(core: &PoolCore, workers: &mut Vec<Worker>, fetch: &FetchFn, reply: &ReplyFn) -> usize {
    let total = core.total.load(Ordering::Relaxed);
    let capacity = core.capacity.load(Ordering::Relaxed);
    if total >= capacity {
        return total - capacity;
    }

    let missing = capacity - total;
    log::debug!("scaling up: {total} -> {capacity} workers");
    for _ in 0..missing {
        workers.push(spawn_worker(fetch, reply));
    }
    core.total.fetch_add(missing, Ordering::Relaxed);
    core.idle.fetch_add(missing, Ordering::Relaxed);
    0
}

/// Supervisor main loop. Exclusive owner of the worker list.
fn supervise(core: Arc<PoolCore>, mut workers: Vec<Worker>, fetch: FetchFn, reply: ReplyFn) {
    // Wake conditions:
    // - valid: work is schedulable and a worker is idle, or the live count
    //   is off target (grow eagerly, shrink only with idle workers).
    // - shutting down: work is schedulable and a worker is idle (drain), or
    //   every worker has gone idle (exit check).
    let mut predicate = || {
        let empty = core.manager.is_empty();
        let idle = core.idle.load(Ordering::Relaxed);
        let total = core.total.load(Ordering::Relaxed);
        if core.is_valid() {
            let capacity = core.capacity.load(Ordering::Relaxed);
            (!empty && idle > 0) || total < capacity || (idle > 0 && total > capacity)
        } else {
            (!empty && idle > 0) || idle >= total
        }
    };

    core.condition.wait_while(&mut predicate);

    // Exit only once invalidated, the manager retains nothing, and every
    // worker is idle again: outstanding work always drains first.
    while core.is_valid()
        || core.manager.valid()
        || core.idle.load(Ordering::Relaxed) < core.total.load(Ordering::Relaxed)
    {
        let mut surplus = adjust(&core, &mut workers, &fetch, &reply);

        let mut index = 0;
        while index < workers.len() && core.idle.load(Ordering::Relaxed) > 0 {
            let worker = &workers[index];
            if worker.is_idle() {
                if worker.notify() {
                    core.idle.fetch_sub(1, Ordering::Relaxed);
                } else if surplus > 0 {
                    // Idle with nothing to do and over target: delete.
                    let worker = workers.remove(index);
                    worker.destroy();
                    core.idle.fetch_sub(1, Ordering::Relaxed);
                    core.total.fetch_sub(1, Ordering::Relaxed);
                    surplus -= 1;
                    continue;
                }
            }
            index += 1;
        }

        core.condition.wait_while(&mut predicate);
    }

    log::debug!("supervisor exiting; destroying {} workers", workers.len());
    for worker in workers.drain(..) {
        worker.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::{Duration, Instant};

    use crate::task_queue::TaskQueue;

    fn wait_until(deadline: Duration, mut pred: impl FnMut() -> bool) -> bool {
        let start = Instant::now();
        while start.elapsed() < deadline {
            if pred() {
                return true;
            }
            thread::sleep(Duration::from_millis(1));
        }
        pred()
    }

    #[test]
    fn capacity_is_clamped_to_one() {
        let pool = ThreadPool::new(0);
        assert_eq!(pool.capacity(), 1);
        assert_eq!(pool.total_size(), 1);
    }

    #[test]
    fn set_capacity_rejects_zero() {
        let pool = ThreadPool::new(2);
        assert!(!pool.set_capacity(0));
        assert_eq!(pool.capacity(), 2);
        assert!(pool.set_capacity(3));
        assert_eq!(pool.capacity(), 3);
    }

    #[test]
    fn runs_tasks_from_registered_queue() {
        let pool = ThreadPool::new(2);
        let queue = TaskQueue::new(0);
        pool.task_manager().insert(queue.clone());

        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            assert!(queue.put(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            })));
        }

        assert!(wait_until(Duration::from_secs(5), || {
            counter.load(Ordering::SeqCst) == 100
        }));
    }

    #[test]
    fn shutdown_is_idempotent() {
        let pool = ThreadPool::new(2);
        pool.shutdown();
        assert_eq!(pool.total_size(), 0);
        pool.shutdown();
        assert_eq!(pool.total_size(), 0);
    }

    #[test]
    fn hardware_concurrency_is_positive() {
        assert!(ThreadPool::hardware_concurrency() >= 1);
    }
}
