//! Keyed actor-style task source.
//!
//! Each key owns a private message queue and a handler entry
//! `{handle, parallel, idle}`. Keys compete for workers through a sorter
//! ordered by the oldest pending message timestamp, ties broken by key, so
//! the key that has waited longest is always dispatched first.
//!
//! A serial handler (`parallel = false`) runs one message at a time: taking
//! a message marks the handler busy and removes the key from the schedule,
//! and the wrapped task's completion reply re-inserts it. A parallel handler
//! stays schedulable while prior messages are still running; its sorter
//! entry is refreshed on both take and reply so that messages arriving
//! between the two cannot escape scheduling.
//!
//! Replacing a handler with `None` parks the key: its messages are retained
//! and counted, but the key cannot be scheduled until a handler is
//! re-installed. Retained messages keep the owning pool's supervisor from
//! shutting down until they are cleared or drained.
//!
//! # Locking
//!
//! Routine key operations (`put`, `set`, `reply`, `clear_key`) take a coarse
//! gate shared and then a per-key mutex; `take` and `clear_all` take the gate
//! exclusively. Handler, queue, and sorter maps each sit behind their own
//! mutex, acquired in that order and released before the pool's notify
//! callback is invoked — no user callback ever runs under an internal lock.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};

use ahash::AHashMap;

use crate::stdx::sorter::Sorter;
use crate::task_pool::{
    IndexType, SizeType, Task, TaskNotify, TaskPool, TimePoint, TimedRecord,
};
use crate::worker::panic_message;

/// Message handler: consumes messages for one key.
pub type Handle<M> = Arc<dyn Fn(&mut M) + Send + Sync>;

struct HandlerEntry<M> {
    handle: Option<Handle<M>>,
    parallel: bool,
    idle: bool,
}

struct KeyQueue<M> {
    messages: VecDeque<M>,
    times: VecDeque<TimePoint>,
}

impl<M> KeyQueue<M> {
    fn new() -> Self {
        Self {
            messages: VecDeque::new(),
            times: VecDeque::new(),
        }
    }

    fn len(&self) -> usize {
        debug_assert_eq!(self.messages.len(), self.times.len());
        self.messages.len()
    }

    fn time(&self) -> Option<TimePoint> {
        self.times.front().copied()
    }

    /// Returns the queue length observed before the push.
    fn push(&mut self, message: M) -> usize {
        let previous = self.messages.len();
        self.messages.push_back(message);
        self.times.push_back(TimePoint::now());
        previous
    }

    fn push_batch(&mut self, messages: Vec<M>) -> usize {
        let previous = self.messages.len();
        let time = TimePoint::now();
        let count = messages.len();
        self.messages.extend(messages);
        self.times.extend(std::iter::repeat(time).take(count));
        previous
    }

    fn pop(&mut self) -> Option<M> {
        let message = self.messages.pop_front()?;
        self.times.pop_front();
        Some(message)
    }

    fn clear(&mut self) -> usize {
        let removed = self.messages.len();
        self.messages.clear();
        self.times.clear();
        removed
    }
}

/// Keyed actor dispatcher. Create with [`TaskMapper::new`]; the mapper lives
/// in an `Arc` so the tasks it emits can reply to it through a weak
/// reference without keeping it alive.
pub struct TaskMapper<M> {
    index: IndexType,
    me: Weak<TaskMapper<M>>,
    size: AtomicUsize,
    gate: RwLock<()>,
    key_mutexes: Mutex<AHashMap<IndexType, Arc<Mutex<()>>>>,
    handlers: Mutex<AHashMap<IndexType, Arc<Mutex<HandlerEntry<M>>>>>,
    queues: Mutex<AHashMap<IndexType, Arc<Mutex<KeyQueue<M>>>>>,
    sorter: Mutex<Sorter<TimedRecord>>,
    notify: Mutex<Option<TaskNotify>>,
}

impl<M: Send + 'static> TaskMapper<M> {
    pub fn new(index: IndexType) -> Arc<Self> {
        Arc::new_cyclic(|me| Self {
            index,
            me: me.clone(),
            size: AtomicUsize::new(0),
            gate: RwLock::new(()),
            key_mutexes: Mutex::new(AHashMap::new()),
            handlers: Mutex::new(AHashMap::new()),
            queues: Mutex::new(AHashMap::new()),
            sorter: Mutex::new(Sorter::new()),
            notify: Mutex::new(None),
        })
    }

    fn lock_sorter(&self) -> MutexGuard<'_, Sorter<TimedRecord>> {
        self.sorter.lock().expect("sort mutex poisoned")
    }

    fn key_mutex(&self, key: IndexType) -> Arc<Mutex<()>> {
        let mut map = self.key_mutexes.lock().expect("key mutex map poisoned");
        Arc::clone(map.entry(key).or_default())
    }

    fn find_handler(&self, key: IndexType) -> Option<Arc<Mutex<HandlerEntry<M>>>> {
        self.handlers
            .lock()
            .expect("handler mutex poisoned")
            .get(&key)
            .cloned()
    }

    fn insert_handler(&self, key: IndexType, entry: HandlerEntry<M>) {
        self.handlers
            .lock()
            .expect("handler mutex poisoned")
            .insert(key, Arc::new(Mutex::new(entry)));
    }

    fn find_queue(&self, key: IndexType) -> Option<Arc<Mutex<KeyQueue<M>>>> {
        self.queues
            .lock()
            .expect("queue mutex poisoned")
            .get(&key)
            .cloned()
    }

    fn get_queue(&self, key: IndexType) -> Arc<Mutex<KeyQueue<M>>> {
        let mut map = self.queues.lock().expect("queue mutex poisoned");
        Arc::clone(
            map.entry(key)
                .or_insert_with(|| Arc::new(Mutex::new(KeyQueue::new()))),
        )
    }

    fn queue_time(queue: &Arc<Mutex<KeyQueue<M>>>) -> Option<TimePoint> {
        queue.lock().expect("key queue poisoned").time()
    }

    /// Invoke the pool's notify callback. Callers must hold no internal
    /// lock, including the gate.
    fn announce(&self) {
        let notify = self
            .notify
            .lock()
            .expect("notify mutex poisoned")
            .clone();
        if let Some(notify) = notify {
            notify(self.index);
        }
    }

    /// Put `key` into the schedule at its queue's oldest timestamp. Returns
    /// true when this made the schedule non-empty, i.e. the pool needs an
    /// announcement once the caller has released its locks.
    fn schedule(&self, key: IndexType) -> bool {
        let Some(queue) = self.find_queue(key) else {
            return false;
        };
        let Some(time) = Self::queue_time(&queue) else {
            return false;
        };

        let mut sorter = self.lock_sorter();
        if sorter.contains(key) {
            return false;
        }
        let was_empty = sorter.is_empty();
        sorter.update(TimedRecord { time, id: key });
        was_empty
    }

    /// Schedule `key` only when its handler is installed and idle.
    fn try_schedule(&self, key: IndexType) -> bool {
        let Some(handler) = self.find_handler(key) else {
            return false;
        };
        let ready = {
            let state = handler.lock().expect("handler entry poisoned");
            state.handle.is_some() && state.idle
        };
        if ready {
            self.schedule(key)
        } else {
            false
        }
    }

    /// Pop the schedulable key that has waited longest. Keys whose handler
    /// entry has disappeared are dropped from the schedule on the way.
    fn pop_front_key(&self) -> Option<IndexType> {
        let mut sorter = self.lock_sorter();
        loop {
            let key = sorter.front()?.id;
            let known = self
                .handlers
                .lock()
                .expect("handler mutex poisoned")
                .contains_key(&key);
            if known {
                return Some(key);
            }
            sorter.remove(key);
        }
    }

    /// Completion callback baked into every task this mapper emits.
    fn reply(&self, key: IndexType) {
        let notifiable = {
            let _gate = self.gate.read().expect("gate poisoned");
            let key_mutex = self.key_mutex(key);
            let _key = key_mutex.lock().expect("key mutex poisoned");

            match self.find_handler(key) {
                Some(handler) => {
                    let reschedule = {
                        let mut state = handler.lock().expect("handler entry poisoned");
                        let was_idle = state.idle;
                        state.idle = true;
                        let valid = state.handle.is_some();
                        // Serial: re-arm after the busy -> idle edge. Parallel:
                        // always refresh, so messages that arrived between take
                        // and this reply cannot escape scheduling.
                        valid && (!was_idle || state.parallel)
                    };
                    if reschedule {
                        self.schedule(key)
                    } else {
                        false
                    }
                }
                None => false,
            }
        };

        if notifiable {
            self.announce();
        }
    }

    /// Install or replace the handler for `key`.
    ///
    /// `None` parks the key: it is removed from the schedule but its queue is
    /// untouched. Re-installing a handler over a parked key with pending
    /// messages makes it schedulable again immediately.
    pub fn set(&self, key: IndexType, handle: Option<Handle<M>>, parallel: bool) -> bool {
        let notifiable = {
            let _gate = self.gate.read().expect("gate poisoned");
            let key_mutex = self.key_mutex(key);
            let _key = key_mutex.lock().expect("key mutex poisoned");

            match self.find_handler(key) {
                Some(handler) => {
                    let installing = handle.is_some();
                    let (was_invalid, idle) = {
                        let mut state = handler.lock().expect("handler entry poisoned");
                        let was_invalid = state.handle.is_none();
                        state.handle = handle;
                        state.parallel = parallel;
                        (was_invalid, state.idle)
                    };

                    if !installing {
                        self.lock_sorter().remove(key);
                        false
                    } else if was_invalid && idle {
                        self.schedule(key)
                    } else {
                        false
                    }
                }
                None => {
                    if handle.is_none() {
                        // Parking a key that never had a handler: nothing to do.
                        false
                    } else {
                        self.insert_handler(
                            key,
                            HandlerEntry {
                                handle,
                                parallel,
                                idle: true,
                            },
                        );
                        self.schedule(key)
                    }
                }
            }
        };

        if notifiable {
            self.announce();
        }
        true
    }

    /// Append one message to `key`'s queue.
    pub fn put(&self, key: IndexType, message: M) {
        let notifiable = {
            let _gate = self.gate.read().expect("gate poisoned");
            let key_mutex = self.key_mutex(key);
            let _key = key_mutex.lock().expect("key mutex poisoned");

            let queue = self.get_queue(key);
            let previous = queue.lock().expect("key queue poisoned").push(message);
            self.size.fetch_add(1, Ordering::Relaxed);

            if previous == 0 {
                self.try_schedule(key)
            } else {
                false
            }
        };

        if notifiable {
            self.announce();
        }
    }

    /// Append a batch of messages to `key`'s queue, all stamped with one
    /// timestamp.
    pub fn put_batch(&self, key: IndexType, messages: Vec<M>) {
        if messages.is_empty() {
            return;
        }

        let notifiable = {
            let _gate = self.gate.read().expect("gate poisoned");
            let key_mutex = self.key_mutex(key);
            let _key = key_mutex.lock().expect("key mutex poisoned");

            let count = messages.len();
            let queue = self.get_queue(key);
            let previous = queue
                .lock()
                .expect("key queue poisoned")
                .push_batch(messages);
            self.size.fetch_add(count, Ordering::Relaxed);

            if previous == 0 {
                self.try_schedule(key)
            } else {
                false
            }
        };

        if notifiable {
            self.announce();
        }
    }

    /// Number of messages retained for `key`.
    pub fn len_key(&self, key: IndexType) -> SizeType {
        self.find_queue(key)
            .map(|queue| queue.lock().expect("key queue poisoned").len())
            .unwrap_or(0)
    }

    /// Drop every message for `key` and unschedule it.
    pub fn clear_key(&self, key: IndexType) {
        let _gate = self.gate.read().expect("gate poisoned");
        let key_mutex = self.key_mutex(key);
        let _key = key_mutex.lock().expect("key mutex poisoned");

        let Some(queue) = self.find_queue(key) else {
            return;
        };
        let removed = queue.lock().expect("key queue poisoned").clear();
        if removed > 0 {
            self.size.fetch_sub(removed, Ordering::Relaxed);
        }
        self.lock_sorter().remove(key);
    }

    /// Drop every message for every key.
    pub fn clear_all(&self) {
        let _gate = self.gate.write().expect("gate poisoned");

        self.lock_sorter().clear();
        self.size.store(0, Ordering::Relaxed);

        let queues: Vec<_> = self
            .queues
            .lock()
            .expect("queue mutex poisoned")
            .values()
            .cloned()
            .collect();
        for queue in queues {
            queue.lock().expect("key queue poisoned").clear();
        }
    }
}

impl<M: Send + 'static> TaskPool for TaskMapper<M> {
    fn configure(&self, notify: Option<TaskNotify>) {
        *self.notify.lock().expect("notify mutex poisoned") = notify;
    }

    fn index(&self) -> IndexType {
        self.index
    }

    /// Nothing schedulable. Parked keys with retained messages do not count;
    /// use [`TaskPool::len`] for the retained view.
    fn is_empty(&self) -> bool {
        self.lock_sorter().is_empty()
    }

    fn len(&self) -> SizeType {
        self.size.load(Ordering::Relaxed)
    }

    fn time(&self) -> Option<TimePoint> {
        self.lock_sorter().front().map(|record| record.time)
    }

    fn take(&self) -> Option<Task> {
        // Exclusive: two concurrent takes could otherwise pop the same front
        // key before either updates the schedule, breaking the serial-handler
        // one-at-a-time rule.
        let _gate = self.gate.write().expect("gate poisoned");

        let key = self.pop_front_key()?;
        let handler = self.find_handler(key)?;
        let queue = self.find_queue(key)?;
        let message = queue.lock().expect("key queue poisoned").pop()?;

        let (handle, parallel) = {
            let mut state = handler.lock().expect("handler entry poisoned");
            if !state.parallel {
                state.idle = false;
            }
            (state.handle.clone(), state.parallel)
        };

        {
            let mut sorter = self.lock_sorter();
            let mut keep = parallel;
            if keep {
                // A parallel key stays schedulable at its next message's
                // timestamp while this one is still running.
                match Self::queue_time(&queue) {
                    Some(time) => sorter.update(TimedRecord { time, id: key }),
                    None => keep = false,
                }
            }
            if !keep {
                sorter.remove(key);
            }
        }

        self.size.fetch_sub(1, Ordering::Relaxed);

        let mapper = self.me.clone();
        let mut message = message;
        Some(Box::new(move || {
            if let Some(handle) = handle {
                if let Err(payload) = catch_unwind(AssertUnwindSafe(|| handle(&mut message))) {
                    log::error!(
                        "handler for key {} panicked: {}",
                        key,
                        panic_message(payload.as_ref())
                    );
                }
            }
            if let Some(mapper) = mapper.upgrade() {
                mapper.reply(key);
            }
        }))
    }
}
