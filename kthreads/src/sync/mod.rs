//! Synchronization primitives.
//!
//! - [`Semaphore`]: a counter that threads wait on until it is positive.
//! - [`Lock`]: a mutual exclusion lock whose waiters donate their priority to
//!   the holder.
//! - [`ConditionVariable`]: lets a lock holder wait for a condition signalled
//!   by another holder of the same lock.
//!
//! Each primitive is a small copyable handle. The state behind it (counter,
//! holder, waiters) lives in the [`Kernel`], so that the scheduler can follow
//! a waiting thread to the lock it waits on and from there to the holder.
//!
//! Waiters are always woken highest priority first, and a woken thread does
//! not have to retry: the semaphore unit, the lock or the condition is handed
//! to it by the thread that wakes it.
//!
//! [`Kernel`]: crate::Kernel
pub mod condition_variable;
pub mod lock;
pub mod semaphore;

pub use abyss::spinlock::WouldBlock;
pub use condition_variable::ConditionVariable;
pub use lock::Lock;
pub use semaphore::Semaphore;

use crate::thread::{Tid, queue::WaitQueue};
use alloc::collections::btree_map::BTreeMap;
use condition_variable::ConditionState;
use lock::LockState;
use semaphore::SemaphoreState;

/// The states behind every synchronization handle.
pub(crate) struct SyncObjects {
    next_id: u64,
    pub(crate) semaphores: BTreeMap<u64, SemaphoreState>,
    pub(crate) locks: BTreeMap<u64, LockState>,
    pub(crate) conditions: BTreeMap<u64, ConditionState>,
}

impl SyncObjects {
    pub(crate) const fn new() -> Self {
        Self {
            next_id: 0,
            semaphores: BTreeMap::new(),
            locks: BTreeMap::new(),
            conditions: BTreeMap::new(),
        }
    }

    pub(crate) fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    pub(crate) fn semaphore_mut(&mut self, sema: Semaphore) -> &mut SemaphoreState {
        self.semaphores
            .get_mut(&sema.id)
            .unwrap_or_else(|| panic!("{sema:?} is destroyed."))
    }

    pub(crate) fn semaphore(&self, sema: Semaphore) -> &SemaphoreState {
        self.semaphores
            .get(&sema.id)
            .unwrap_or_else(|| panic!("{sema:?} is destroyed."))
    }

    pub(crate) fn lock(&self, lock: Lock) -> &LockState {
        self.locks
            .get(&lock.id)
            .unwrap_or_else(|| panic!("{lock:?} is destroyed."))
    }

    pub(crate) fn lock_mut(&mut self, lock: Lock) -> &mut LockState {
        self.locks
            .get_mut(&lock.id)
            .unwrap_or_else(|| panic!("{lock:?} is destroyed."))
    }

    pub(crate) fn condition_mut(&mut self, cond: ConditionVariable) -> &mut ConditionState {
        self.conditions
            .get_mut(&cond.id)
            .unwrap_or_else(|| panic!("{cond:?} is destroyed."))
    }

    pub(crate) fn condition(&self, cond: ConditionVariable) -> &ConditionState {
        self.conditions
            .get(&cond.id)
            .unwrap_or_else(|| panic!("{cond:?} is destroyed."))
    }

    /// A lock held by `tid`, if any.
    pub(crate) fn lock_held_by(&self, tid: Tid) -> Option<Lock> {
        self.locks
            .iter()
            .find(|(_, state)| state.holder == Some(tid))
            .map(|(id, _)| Lock { id: *id })
    }

    /// Every waiter queue, named by its kind of object.
    pub(crate) fn waiter_lists(&self) -> impl Iterator<Item = (&'static str, &WaitQueue)> + '_ {
        let semaphores = self.semaphores.values().map(|s| ("a semaphore", &s.waiters));
        let locks = self.locks.values().map(|l| ("a lock", &l.waiters));
        let conditions = self
            .conditions
            .values()
            .map(|c| ("a condition variable", &c.waiters));
        semaphores.chain(locks).chain(conditions)
    }
}
