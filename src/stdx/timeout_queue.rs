//! Bounded multimap ordered by time, with per-key membership.
//!
//! Elements are keyed twice: by a monotonically compared time for expiry
//! sweeps, and by a caller key for point removal. A sequence number
//! disambiguates entries that share a timestamp, so insertion order is
//! preserved among equal times.
//!
//! Capacity 0 means unbounded; a positive capacity rejects pushes at the
//! bound. A key can hold at most one pending element at a time.

use std::collections::BTreeMap;
use std::hash::Hash;

use ahash::AHashMap;

pub struct TimeoutQueue<T, K, E>
where
    T: Ord + Copy,
    K: Eq + Hash + Copy,
{
    capacity: usize,
    sequence: u64,
    // (time, seq) -> key keeps equal-time entries distinct and FIFO.
    queue: BTreeMap<(T, u64), K>,
    members: AHashMap<K, (E, T, u64)>,
}

impl<T, K, E> TimeoutQueue<T, K, E>
where
    T: Ord + Copy,
    K: Eq + Hash + Copy,
{
    /// Capacity 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            sequence: 0,
            queue: BTreeMap::new(),
            members: AHashMap::new(),
        }
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn set_capacity(&mut self, capacity: usize) {
        self.capacity = capacity;
    }

    #[inline]
    pub fn len(&self) -> usize {
        debug_assert_eq!(self.queue.len(), self.members.len());
        self.queue.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn contains(&self, key: K) -> bool {
        self.members.contains_key(&key)
    }

    /// Schedule `element` under `key` at `time`. Rejected when the queue is
    /// at capacity or the key is already pending.
    pub fn push(&mut self, key: K, element: E, time: T) -> bool {
        if self.capacity > 0 && self.len() >= self.capacity {
            return false;
        }
        if self.members.contains_key(&key) {
            return false;
        }

        let sequence = self.sequence;
        self.sequence = self.sequence.wrapping_add(1);

        self.queue.insert((time, sequence), key);
        self.members.insert(key, (element, time, sequence));
        true
    }

    /// Remove the pending element for `key`, if any.
    pub fn pop_key(&mut self, key: K) -> Option<E> {
        let (element, time, sequence) = self.members.remove(&key)?;
        self.queue.remove(&(time, sequence));
        Some(element)
    }

    /// Drain every element with `time <= deadline` into `out`, oldest first.
    /// Returns whether anything was drained.
    pub fn pop_until(&mut self, deadline: T, out: &mut Vec<(K, E)>) -> bool {
        let before = out.len();
        loop {
            match self.queue.first_key_value() {
                Some((&(time, _), _)) if time <= deadline => {}
                _ => break,
            }
            let ((_, _), key) = self.queue.pop_first().expect("non-empty queue");
            let (element, _, _) = self
                .members
                .remove(&key)
                .expect("queue entry without member");
            out.push((key, element));
        }
        out.len() > before
    }

    /// Drain everything into `out`, oldest first. Returns whether anything
    /// was drained.
    pub fn pop_all(&mut self, out: &mut Vec<(K, E)>) -> bool {
        if self.is_empty() {
            return false;
        }
        out.reserve(self.len());
        while let Some((_, key)) = self.queue.pop_first() {
            let (element, _, _) = self
                .members
                .remove(&key)
                .expect("queue entry without member");
            out.push((key, element));
        }
        true
    }

    pub fn clear(&mut self) {
        self.queue.clear();
        self.members.clear();
    }
}
