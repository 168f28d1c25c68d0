//! FIFO task source backed by a double-buffered queue.
//!
//! Tasks and their push timestamps live in lock-step deques: producers append
//! under the entry lock, consumers pop under the exit lock, and a consumer
//! that finds the exit side empty swaps both pairs from the entry side in
//! O(1). The notify callback fires on the empty-to-non-empty transition of
//! total size, outside any internal lock.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::task_pool::{IndexType, SizeType, Task, TaskNotify, TaskPool, TimePoint};

#[derive(Default)]
struct Buffers {
    tasks: VecDeque<Task>,
    times: VecDeque<TimePoint>,
}

pub struct TaskQueue {
    index: IndexType,
    capacity: AtomicUsize,
    size: AtomicUsize,
    entry: Mutex<Buffers>,
    exit: Mutex<Buffers>,
    notify: Mutex<Option<TaskNotify>>,
}

impl TaskQueue {
    /// Unbounded queue with the caller-assigned unique index.
    pub fn new(index: IndexType) -> Arc<Self> {
        Self::with_capacity(index, 0)
    }

    /// Capacity 0 means unbounded.
    pub fn with_capacity(index: IndexType, capacity: SizeType) -> Arc<Self> {
        Arc::new(Self {
            index,
            capacity: AtomicUsize::new(capacity),
            size: AtomicUsize::new(0),
            entry: Mutex::new(Buffers::default()),
            exit: Mutex::new(Buffers::default()),
            notify: Mutex::new(None),
        })
    }

    fn lock_entry(&self) -> MutexGuard<'_, Buffers> {
        self.entry.lock().expect("entry mutex poisoned")
    }

    fn lock_exit(&self) -> MutexGuard<'_, Buffers> {
        self.exit.lock().expect("exit mutex poisoned")
    }

    pub fn capacity(&self) -> SizeType {
        self.capacity.load(Ordering::Relaxed)
    }

    pub fn set_capacity(&self, capacity: SizeType) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    fn notify_consumer(&self) {
        let notify = self
            .notify
            .lock()
            .expect("notify mutex poisoned")
            .clone();
        if let Some(notify) = notify {
            notify(self.index);
        }
    }

    /// True when `extra` more tasks would still fit.
    fn fits(&self, extra: SizeType) -> bool {
        let capacity = self.capacity();
        if capacity == 0 {
            return true;
        }
        let size = self.len();
        size < capacity && extra <= capacity - size
    }

    /// Append one task. Returns false when the queue is at capacity.
    pub fn put(&self, task: Task) -> bool {
        let mut entry = self.lock_entry();
        if !self.fits(1) {
            return false;
        }

        entry.tasks.push_back(task);
        entry.times.push_back(TimePoint::now());
        let notifiable = self.size.fetch_add(1, Ordering::Relaxed) == 0;
        drop(entry);

        if notifiable {
            self.notify_consumer();
        }
        true
    }

    /// Append a batch, all stamped with one timestamp. All-or-nothing: on a
    /// capacity miss nothing is enqueued and false is returned.
    pub fn put_batch(&self, tasks: Vec<Task>) -> bool {
        let count = tasks.len();
        let time = TimePoint::now();

        let mut entry = self.lock_entry();
        if !self.fits(count) {
            return false;
        }

        entry.tasks.extend(tasks);
        entry.times.extend(std::iter::repeat(time).take(count));
        let notifiable = self.size.fetch_add(count, Ordering::Relaxed) == 0 && count > 0;
        drop(entry);

        if notifiable {
            self.notify_consumer();
        }
        true
    }

    /// Drain every pending task into `out` in FIFO order. Returns false when
    /// empty.
    pub fn take_all(&self, out: &mut Vec<Task>) -> bool {
        let mut exit = self.lock_exit();
        if self.is_empty() {
            return false;
        }

        out.extend(exit.tasks.drain(..));
        exit.times.clear();

        let mut entry = self.lock_entry();
        out.extend(entry.tasks.drain(..));
        entry.times.clear();

        self.size.store(0, Ordering::Relaxed);
        true
    }

    /// Drop every pending task. Returns the number removed.
    pub fn clear(&self) -> SizeType {
        // Exit before entry, the same order take uses.
        let mut exit = self.lock_exit();
        let mut entry = self.lock_entry();

        exit.tasks.clear();
        exit.times.clear();
        entry.tasks.clear();
        entry.times.clear();

        self.size.swap(0, Ordering::Relaxed)
    }
}

impl TaskPool for TaskQueue {
    fn configure(&self, notify: Option<TaskNotify>) {
        *self.notify.lock().expect("notify mutex poisoned") = notify;
    }

    fn index(&self) -> IndexType {
        self.index
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn len(&self) -> SizeType {
        self.size.load(Ordering::Relaxed)
    }

    fn time(&self) -> Option<TimePoint> {
        let exit = self.lock_exit();
        if self.is_empty() {
            return None;
        }

        if let Some(&front) = exit.times.front() {
            return Some(front);
        }
        let entry = self.lock_entry();
        entry.times.front().copied()
    }

    fn take(&self) -> Option<Task> {
        let mut exit = self.lock_exit();
        if self.is_empty() {
            return None;
        }

        if exit.tasks.is_empty() {
            let mut entry = self.lock_entry();
            std::mem::swap(&mut *exit, &mut *entry);
        }

        let task = exit.tasks.pop_front()?;
        exit.times.pop_front();
        self.size.fetch_sub(1, Ordering::Relaxed);
        Some(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn noop() -> Task {
        Box::new(|| {})
    }

    #[test]
    fn take_returns_tasks_in_fifo_order() {
        let queue = TaskQueue::new(0);
        let order = Arc::new(Mutex::new(Vec::new()));

        for value in 0..5 {
            let order = Arc::clone(&order);
            assert!(queue.put(Box::new(move || {
                order.lock().unwrap().push(value);
            })));
        }

        while let Some(task) = queue.take() {
            task();
        }
        assert_eq!(*order.lock().unwrap(), vec![0, 1, 2, 3, 4]);
        assert!(queue.is_empty());
    }

    #[test]
    fn notify_fires_only_on_empty_transition() {
        let queue = TaskQueue::new(7);
        let fired = Arc::new(AtomicUsize::new(0));
        let indices = Arc::new(Mutex::new(Vec::new()));

        let f = Arc::clone(&fired);
        let i = Arc::clone(&indices);
        queue.configure(Some(Arc::new(move |index| {
            f.fetch_add(1, Ordering::SeqCst);
            i.lock().unwrap().push(index);
        })));

        queue.put(noop());
        queue.put(noop());
        queue.put(noop());
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert_eq!(*indices.lock().unwrap(), vec![7]);

        // Drain, then the next put announces again.
        while queue.take().is_some() {}
        queue.put(noop());
        assert_eq!(fired.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn capacity_rejects_overflow() {
        let queue = TaskQueue::with_capacity(0, 2);
        assert!(queue.put(noop()));
        assert!(queue.put(noop()));
        assert!(!queue.put(noop()));

        queue.take();
        assert!(queue.put(noop()));
    }

    #[test]
    fn batch_put_is_all_or_nothing() {
        let queue = TaskQueue::with_capacity(0, 3);
        assert!(queue.put(noop()));

        let batch: Vec<Task> = (0..3).map(|_| noop()).collect();
        assert!(!queue.put_batch(batch));
        assert_eq!(queue.len(), 1);

        let batch: Vec<Task> = (0..2).map(|_| noop()).collect();
        assert!(queue.put_batch(batch));
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn batch_put_notifies_on_empty_transition() {
        let queue = TaskQueue::new(0);
        let fired = Arc::new(AtomicUsize::new(0));
        let f = Arc::clone(&fired);
        queue.configure(Some(Arc::new(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        })));

        assert!(queue.put_batch(vec![noop(), noop()]));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(queue.put_batch(vec![noop()]));
        assert_eq!(fired.load(Ordering::SeqCst), 1);

        // An empty batch on an empty queue announces nothing.
        queue.clear();
        assert!(queue.put_batch(Vec::new()));
        assert_eq!(fired.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn time_reports_oldest_pending() {
        let queue = TaskQueue::new(0);
        assert!(queue.time().is_none());

        let before = TimePoint::now();
        queue.put(noop());
        let after = TimePoint::now();

        let oldest = queue.time().unwrap();
        assert!(oldest >= before && oldest <= after);

        // Front moves forward as tasks drain.
        queue.put(noop());
        queue.take();
        assert!(queue.time().unwrap() >= oldest);

        queue.take();
        assert!(queue.time().is_none());
    }

    #[test]
    fn time_prefers_exit_buffer_front() {
        let queue = TaskQueue::new(0);
        queue.put(noop());
        // Swap the first task into the exit buffer.
        let staged = queue.take().unwrap();
        drop(staged);

        let before_second = TimePoint::now();
        queue.put(noop());
        queue.put(noop());
        // First remaining task is in the entry buffer now.
        let oldest = queue.time().unwrap();
        assert!(oldest >= before_second);

        // Pull one into exit; its timestamp must win over the entry front.
        let task = queue.take().unwrap();
        drop(task);
        let exit_front = queue.time().unwrap();
        assert!(exit_front >= oldest);
    }

    #[test]
    fn take_all_drains_everything() {
        let queue = TaskQueue::new(0);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..4 {
            let counter = Arc::clone(&counter);
            queue.put(Box::new(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        // Move part of the backlog into the exit buffer first.
        queue.take().unwrap()();

        let mut drained = Vec::new();
        assert!(queue.take_all(&mut drained));
        assert_eq!(drained.len(), 3);
        assert!(queue.is_empty());
        assert!(!queue.take_all(&mut drained));

        for task in drained {
            task();
        }
        assert_eq!(counter.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn clear_resets_size_and_time() {
        let queue = TaskQueue::new(0);
        queue.put(noop());
        queue.put(noop());
        assert_eq!(queue.clear(), 2);
        assert!(queue.is_empty());
        assert!(queue.time().is_none());
        assert!(queue.take().is_none());
    }
}
