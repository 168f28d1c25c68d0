//! Bounded MPMC FIFO built from two buffers with independent locks.
//!
//! Producers only ever touch the entry buffer; consumers only ever touch the
//! exit buffer, except on underflow, where the consumer briefly takes both
//! locks and swaps the buffers in O(1). Producers and consumers therefore
//! contend only during that swap, not on every operation — a naive
//! single-mutex queue measurably halves throughput under mixed load.
//!
//! # Invariants
//! - `len()` equals the sum of both buffer lengths.
//! - A pop never observes an empty exit buffer without first attempting a
//!   swap from the entry buffer.
//! - Capacity 0 means unbounded; a positive capacity rejects pushes that
//!   would exceed it. Batch pushes are all-or-nothing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

pub struct DoubleQueue<T> {
    capacity: AtomicUsize,
    size: AtomicUsize,
    entry: Mutex<VecDeque<T>>,
    exit: Mutex<VecDeque<T>>,
}

impl<T> DoubleQueue<T> {
    /// Capacity 0 means unbounded.
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: AtomicUsize::new(capacity),
            size: AtomicUsize::new(0),
            entry: Mutex::new(VecDeque::new()),
            exit: Mutex::new(VecDeque::new()),
        }
    }

    fn lock_entry(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.entry.lock().expect("entry mutex poisoned")
    }

    fn lock_exit(&self) -> MutexGuard<'_, VecDeque<T>> {
        self.exit.lock().expect("exit mutex poisoned")
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity.load(Ordering::Relaxed)
    }

    /// Adjust the bound. Existing elements above a shrunken bound stay; only
    /// future pushes are rejected.
    pub fn set_capacity(&self, capacity: usize) {
        self.capacity.store(capacity, Ordering::Relaxed);
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when `extra` more elements would still fit.
    fn fits(&self, extra: usize) -> bool {
        let capacity = self.capacity();
        if capacity == 0 {
            return true;
        }
        let size = self.len();
        size < capacity && extra <= capacity - size
    }

    /// Append one element. Returns the size observed before the push, or
    /// `None` when the queue is at capacity.
    pub fn push(&self, element: T) -> Option<usize> {
        let mut entry = self.lock_entry();
        if !self.fits(1) {
            return None;
        }
        entry.push_back(element);
        Some(self.size.fetch_add(1, Ordering::Relaxed))
    }

    /// Append a batch, draining `elements` on success. All-or-nothing: on a
    /// capacity miss the batch is left untouched and `None` is returned.
    pub fn push_batch(&self, elements: &mut VecDeque<T>) -> Option<usize> {
        let mut entry = self.lock_entry();
        let count = elements.len();
        if !self.fits(count) {
            return None;
        }
        entry.append(elements);
        Some(self.size.fetch_add(count, Ordering::Relaxed))
    }

    /// Remove the front element, swapping buffers on exit underflow.
    pub fn pop(&self) -> Option<T> {
        let mut exit = self.lock_exit();
        if self.is_empty() {
            return None;
        }

        if exit.is_empty() {
            let mut entry = self.lock_entry();
            std::mem::swap(&mut *exit, &mut *entry);
        }

        let element = exit.pop_front()?;
        self.size.fetch_sub(1, Ordering::Relaxed);
        Some(element)
    }

    /// Drain everything into `out` in FIFO order. Returns false when empty.
    pub fn pop_all(&self, out: &mut VecDeque<T>) -> bool {
        let mut exit = self.lock_exit();
        if self.is_empty() {
            return false;
        }

        out.append(&mut exit);
        let mut entry = self.lock_entry();
        out.append(&mut entry);
        self.size.store(0, Ordering::Relaxed);
        true
    }

    /// Drop everything. Returns the number of elements removed.
    pub fn clear(&self) -> usize {
        // Exit before entry, the same order pop uses.
        let mut exit = self.lock_exit();
        let mut entry = self.lock_entry();
        exit.clear();
        entry.clear();
        self.size.swap(0, Ordering::Relaxed)
    }
}
