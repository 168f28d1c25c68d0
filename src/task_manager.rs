//! Aggregating task manager: one front for several task sources.
//!
//! Sub-pools register by index. The manager keeps a sorter of each pool's
//! oldest pending timestamp and always drains the pool that has waited
//! longest, ties broken by index. Inserting a pool installs the manager's
//! own task-notify callback into it, so a pool announcing new work re-ranks
//! itself and wakes the thread pool; removing or replacing a pool clears the
//! installed callback first.
//!
//! Two emptiness views exist on purpose: [`TaskManager::is_empty`] reports
//! whether anything is *schedulable*, while [`TaskManager::valid`] reports
//! whether any sub-pool still *retains* messages. The supervisor drains
//! until `valid()` turns false, which is what lets a parked mapper key hold
//! a pool open until it is cleared.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock, Weak};

use crate::stdx::sorter::Sorter;
use crate::task_pool::{IndexType, SizeType, Task, TaskNotify, TaskPool, TimedRecord};

/// Callback that wakes the owning thread pool's supervisor.
pub type ThreadNotify = Arc<dyn Fn() + Send + Sync>;

struct PoolTable {
    pools: BTreeMap<IndexType, Arc<dyn TaskPool>>,
    sorter: Sorter<TimedRecord>,
}

struct ManagerCore {
    notify: Mutex<Option<ThreadNotify>>,
    task_notify: TaskNotify,
    // Number of schedulable sub-pools; mirrors sorter.len().
    size: AtomicUsize,
    table: RwLock<PoolTable>,
}

impl ManagerCore {
    fn notify_thread(&self) {
        let notify = self
            .notify
            .lock()
            .expect("notify mutex poisoned")
            .clone();
        if let Some(notify) = notify {
            notify();
        }
    }

    /// A sub-pool announced new work: re-rank it and wake the supervisor.
    fn on_task_notify(&self, index: IndexType) {
        let notifiable = {
            let mut table = self.table.write().expect("pool table poisoned");
            let PoolTable { pools, sorter } = &mut *table;
            match pools.get(&index).and_then(|pool| pool.time()) {
                Some(time) => {
                    sorter.update(TimedRecord { time, id: index });
                    self.size.store(sorter.len(), Ordering::Relaxed);
                    true
                }
                None => false,
            }
        };

        if notifiable {
            self.notify_thread();
        }
    }
}

/// Shared handle to the aggregator. Cloning shares the same registry.
#[derive(Clone)]
pub struct TaskManager {
    core: Arc<ManagerCore>,
}

impl TaskManager {
    pub fn new() -> Self {
        let core = Arc::new_cyclic(|weak: &Weak<ManagerCore>| {
            let weak = weak.clone();
            let task_notify: TaskNotify = Arc::new(move |index| {
                if let Some(core) = weak.upgrade() {
                    core.on_task_notify(index);
                }
            });
            ManagerCore {
                notify: Mutex::new(None),
                task_notify,
                size: AtomicUsize::new(0),
                table: RwLock::new(PoolTable {
                    pools: BTreeMap::new(),
                    sorter: Sorter::new(),
                }),
            }
        });
        Self { core }
    }

    /// Install (`Some`) or clear (`None`) the supervisor wake callback, and
    /// re-install the manager's task-notify into every registered pool.
    pub fn configure(&self, notify: Option<ThreadNotify>) {
        let notifiable = {
            let table = self.core.table.write().expect("pool table poisoned");
            *self.core.notify.lock().expect("notify mutex poisoned") = notify.clone();
            for pool in table.pools.values() {
                pool.configure(Some(self.core.task_notify.clone()));
            }
            !table.sorter.is_empty()
        };

        if notifiable {
            if let Some(notify) = notify {
                notify();
            }
        }
    }

    /// True while any sub-pool still retains messages, schedulable or not.
    pub fn valid(&self) -> bool {
        let table = self.core.table.read().expect("pool table poisoned");
        table.pools.values().any(|pool| pool.len() > 0)
    }

    /// True when no sub-pool is schedulable.
    pub fn is_empty(&self) -> bool {
        self.core.size.load(Ordering::Relaxed) == 0
    }

    /// Total retained messages across all sub-pools.
    pub fn len(&self) -> SizeType {
        let table = self.core.table.read().expect("pool table poisoned");
        table.pools.values().map(|pool| pool.len()).sum()
    }

    /// Drain the sub-pool with the oldest pending work.
    pub fn take(&self) -> Option<Task> {
        let mut table = self.core.table.write().expect("pool table poisoned");
        let PoolTable { pools, sorter } = &mut *table;

        loop {
            let index = sorter.front()?.id;
            let Some(pool) = pools.get(&index) else {
                sorter.remove(index);
                self.core.size.store(sorter.len(), Ordering::Relaxed);
                continue;
            };

            let task = pool.take();
            let still_scheduled = match pool.time() {
                Some(time) => {
                    sorter.update(TimedRecord { time, id: index });
                    true
                }
                None => {
                    sorter.remove(index);
                    false
                }
            };
            self.core.size.store(sorter.len(), Ordering::Relaxed);

            match task {
                Some(task) => return Some(task),
                // The pool yielded nothing but still reports pending time:
                // bail rather than spin on it.
                None if still_scheduled => return None,
                None => continue,
            }
        }
    }

    /// Find a registered sub-pool by index.
    pub fn find(&self, index: IndexType) -> Option<Arc<dyn TaskPool>> {
        let table = self.core.table.read().expect("pool table poisoned");
        table.pools.get(&index).cloned()
    }

    /// Register `pool` under its own index, replacing (and unwiring) any
    /// previous pool there, and wire it to this manager.
    pub fn insert(&self, pool: Arc<dyn TaskPool>) {
        let index = pool.index();
        let notifiable = {
            let mut table = self.core.table.write().expect("pool table poisoned");
            let PoolTable { pools, sorter } = &mut *table;

            if let Some(previous) = pools.insert(index, Arc::clone(&pool)) {
                if !Arc::ptr_eq(&previous, &pool) {
                    previous.configure(None);
                }
            }
            pool.configure(Some(self.core.task_notify.clone()));

            if let Some(time) = pool.time() {
                sorter.update(TimedRecord { time, id: index });
                self.core.size.store(sorter.len(), Ordering::Relaxed);
            }
            !pool.is_empty()
        };

        if notifiable {
            self.core.notify_thread();
        }
    }

    /// Unregister the pool at `index`, clearing its notify callback.
    pub fn remove(&self, index: IndexType) -> bool {
        let mut table = self.core.table.write().expect("pool table poisoned");
        let PoolTable { pools, sorter } = &mut *table;

        match pools.remove(&index) {
            Some(pool) => {
                pool.configure(None);
                sorter.remove(index);
                self.core.size.store(sorter.len(), Ordering::Relaxed);
                true
            }
            None => false,
        }
    }

    /// Unregister everything, clearing each pool's notify callback.
    pub fn clear(&self) {
        let mut table = self.core.table.write().expect("pool table poisoned");
        let PoolTable { pools, sorter } = &mut *table;

        self.core.size.store(0, Ordering::Relaxed);
        sorter.clear();
        for pool in pools.values() {
            pool.configure(None);
        }
        pools.clear();
    }
}

impl Default for TaskManager {
    fn default() -> Self {
        Self::new()
    }
}
