//! Suspend/notify primitive with a permanent exit state.
//!
//! A [`Condition`] pairs a mutex and condvar with a validity flag. While
//! valid, it behaves like an ordinary condition variable. Once [`exit`] has
//! been called, every current waiter is released and every future wait
//! returns immediately, which gives shutdown paths a deterministic way to
//! unblock threads without racing their predicates.
//!
//! # No lost wakeups
//!
//! The contract mirrors the classic monitor discipline: a producer that
//! mutates state and then notifies is guaranteed to release any waiter whose
//! predicate observes that state, provided the waiter uses
//! [`Condition::wait_while`] (or tolerates spurious returns). The
//! [`Strategy`] chosen by the notifier decides whether the wake happens with
//! the mutex held (`Strict`, ordering-safe when the waiter's predicate reads
//! state the notifier just wrote) or after release (`Relaxed`, lower
//! contention when the predicate is independent).
//!
//! [`exit`]: Condition::exit

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Condvar, Mutex, MutexGuard};

/// How a notify call interleaves with the internal mutex.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Strategy {
    /// Wake while holding the mutex. The waiter cannot slip between the
    /// notifier's state change and the wake.
    Strict,
    /// Release the mutex, then wake. Legal when the waiter's predicate does
    /// not depend on state the notifier just mutated.
    Relaxed,
}

/// Mutex + condvar + validity flag.
pub struct Condition {
    mutex: Mutex<()>,
    condvar: Condvar,
    validity: AtomicBool,
}

impl Condition {
    pub fn new() -> Self {
        Self {
            mutex: Mutex::new(()),
            condvar: Condvar::new(),
            validity: AtomicBool::new(true),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.mutex.lock().expect("condition mutex poisoned")
    }

    /// True until [`Condition::exit`] is called.
    #[inline]
    pub fn is_valid(&self) -> bool {
        self.validity.load(Ordering::Relaxed)
    }

    /// Re-arm after an exit. The flag is flipped under the mutex so that a
    /// concurrent `wait` observes either the old or the new epoch, never a
    /// torn one.
    pub fn enter(&self) {
        let _guard = self.lock();
        self.validity.store(true, Ordering::Relaxed);
    }

    /// Invalidate and release all current and future waiters. Idempotent.
    pub fn exit(&self) {
        let guard = self.lock();
        if !self.is_valid() {
            return;
        }
        self.validity.store(false, Ordering::Relaxed);
        drop(guard);
        self.condvar.notify_all();
    }

    /// Block until notified. No-op once exited. Subject to spurious wakeups;
    /// prefer [`Condition::wait_while`] with a predicate.
    pub fn wait(&self) {
        let guard = self.lock();
        if self.is_valid() {
            let _guard = self
                .condvar
                .wait(guard)
                .expect("condition mutex poisoned");
        }
    }

    /// Block until `pred()` is true or the condition has been exited.
    ///
    /// The predicate is evaluated under the internal mutex, so state mutated
    /// by a `Strict` notifier is observed consistently.
    pub fn wait_while<P>(&self, mut pred: P)
    where
        P: FnMut() -> bool,
    {
        let guard = self.lock();
        let _guard = self
            .condvar
            .wait_while(guard, |_| self.is_valid() && !pred())
            .expect("condition mutex poisoned");
    }

    /// Bounded variant of [`Condition::wait_while`]. Returns true when the
    /// wait ended because the predicate was satisfied or the condition
    /// exited, false on timeout.
    pub fn wait_while_timeout<P>(&self, timeout: std::time::Duration, mut pred: P) -> bool
    where
        P: FnMut() -> bool,
    {
        let guard = self.lock();
        let (_guard, result) = self
            .condvar
            .wait_timeout_while(guard, timeout, |_| self.is_valid() && !pred())
            .expect("condition mutex poisoned");
        !result.timed_out()
    }

    /// Wake one waiter.
    pub fn notify_one(&self, strategy: Strategy) {
        let guard = self.lock();
        match strategy {
            Strategy::Strict => self.condvar.notify_one(),
            Strategy::Relaxed => {
                drop(guard);
                self.condvar.notify_one();
            }
        }
    }

    /// Wake all waiters.
    pub fn notify_all(&self, strategy: Strategy) {
        let guard = self.lock();
        match strategy {
            Strategy::Strict => self.condvar.notify_all(),
            Strategy::Relaxed => {
                drop(guard);
                self.condvar.notify_all();
            }
        }
    }

    /// Wake up to `count` waiters.
    pub fn notify_n(&self, count: usize, strategy: Strategy) {
        let guard = self.lock();
        if let Strategy::Relaxed = strategy {
            drop(guard);
            for _ in 0..count {
                self.condvar.notify_one();
            }
            return;
        }
        for _ in 0..count {
            self.condvar.notify_one();
        }
    }

    /// Wake one waiter only if `pred()` holds while the mutex is held.
    pub fn notify_one_if<P>(&self, pred: P)
    where
        P: FnOnce() -> bool,
    {
        let guard = self.lock();
        if pred() {
            drop(guard);
            self.condvar.notify_one();
        }
    }

    /// Wake all waiters only if `pred()` holds while the mutex is held.
    pub fn notify_all_if<P>(&self, pred: P)
    where
        P: FnOnce() -> bool,
    {
        let guard = self.lock();
        if pred() {
            drop(guard);
            self.condvar.notify_all();
        }
    }
}

impl Default for Condition {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Condition {
    fn drop(&mut self) {
        self.exit();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn starts_valid() {
        let cond = Condition::new();
        assert!(cond.is_valid());
    }

    #[test]
    fn exit_is_idempotent() {
        let cond = Condition::new();
        cond.exit();
        assert!(!cond.is_valid());
        cond.exit();
        assert!(!cond.is_valid());
    }

    #[test]
    fn enter_rearms_after_exit() {
        let cond = Condition::new();
        cond.exit();
        cond.enter();
        assert!(cond.is_valid());
    }

    #[test]
    fn wait_returns_immediately_when_exited() {
        let cond = Condition::new();
        cond.exit();
        // Would hang forever if the exit state were ignored.
        cond.wait();
        cond.wait_while(|| false);
    }

    #[test]
    fn wait_while_observes_predicate() {
        let cond = Arc::new(Condition::new());
        let flag = Arc::new(AtomicBool::new(false));

        let c = Arc::clone(&cond);
        let f = Arc::clone(&flag);
        let waiter = thread::spawn(move || {
            c.wait_while(|| f.load(Ordering::SeqCst));
        });

        thread::sleep(Duration::from_millis(20));
        flag.store(true, Ordering::SeqCst);
        cond.notify_one(Strategy::Strict);

        waiter.join().unwrap();
    }

    #[test]
    fn strict_notify_before_wait_is_not_lost() {
        // Mutate-then-notify from the producer must release a waiter whose
        // predicate reads the mutated state, regardless of arrival order.
        for _ in 0..50 {
            let cond = Arc::new(Condition::new());
            let flag = Arc::new(AtomicBool::new(false));

            let c = Arc::clone(&cond);
            let f = Arc::clone(&flag);
            let waiter = thread::spawn(move || {
                c.wait_while(|| f.load(Ordering::SeqCst));
            });

            flag.store(true, Ordering::SeqCst);
            cond.notify_one(Strategy::Strict);
            waiter.join().unwrap();
        }
    }

    #[test]
    fn exit_unblocks_all_waiters() {
        let cond = Arc::new(Condition::new());
        let released = Arc::new(AtomicUsize::new(0));
        const WAITERS: usize = 16;

        let handles: Vec<_> = (0..WAITERS)
            .map(|_| {
                let c = Arc::clone(&cond);
                let r = Arc::clone(&released);
                thread::spawn(move || {
                    // Never-true predicate: only exit can release us.
                    c.wait_while(|| false);
                    r.fetch_add(1, Ordering::SeqCst);
                })
            })
            .collect();

        thread::sleep(Duration::from_millis(30));
        cond.exit();

        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(released.load(Ordering::SeqCst), WAITERS);
    }

    #[test]
    fn wait_while_timeout_times_out() {
        let cond = Condition::new();
        let start = std::time::Instant::now();
        let satisfied = cond.wait_while_timeout(Duration::from_millis(30), || false);
        assert!(!satisfied);
        assert!(start.elapsed() >= Duration::from_millis(25));
    }

    #[test]
    fn notify_one_if_skips_false_predicate() {
        let cond = Arc::new(Condition::new());
        let flag = Arc::new(AtomicBool::new(false));

        let c = Arc::clone(&cond);
        let f = Arc::clone(&flag);
        let waiter = thread::spawn(move || {
            c.wait_while(|| f.load(Ordering::SeqCst));
        });

        thread::sleep(Duration::from_millis(20));
        // Predicate false: must not wake the waiter.
        cond.notify_one_if(|| false);
        thread::sleep(Duration::from_millis(20));
        assert!(!waiter.is_finished());

        flag.store(true, Ordering::SeqCst);
        cond.notify_one_if(|| true);
        waiter.join().unwrap();
    }
}
