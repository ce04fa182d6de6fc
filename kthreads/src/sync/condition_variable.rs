//! Condition variable.
//!
//! A condition variable lets a thread that holds a [`Lock`] give the lock up
//! and wait until another thread, holding the same lock, signals that the
//! condition it waits for may have become true.
//!
//! A signalled waiter is not made runnable directly. It is moved onto the
//! lock's waiter queue, as if it had called [`Lock::acquire`], and donates its
//! priority to the signalling thread. When the signaller releases the lock,
//! the waiter receives the lock along with the CPU and returns from
//! [`ConditionVariable::wait`] already holding it.
//!
//! Waiters are signalled in priority order.
use super::Lock;
use crate::{
    Kernel, KernelError,
    thread::{ThreadState, Tid, queue::WaitQueue},
};
use abyss::{Machine, interrupt::InterruptGuard};
use log::trace;

pub(crate) struct ConditionState {
    /// The lock every waiter uses, fixed by the first wait.
    pub(crate) lock: Option<Lock>,
    pub(crate) waiters: WaitQueue,
}

/// A handle to a condition variable.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConditionVariable {
    pub(crate) id: u64,
}

impl ConditionVariable {
    /// Creates a condition variable.
    pub fn new<M: Machine>(kernel: &mut Kernel<M>) -> Self {
        let id = kernel.objects.allocate_id();
        kernel.objects.conditions.insert(
            id,
            ConditionState {
                lock: None,
                waiters: WaitQueue::new(),
            },
        );
        Self { id }
    }

    /// Releases `lock` and waits for a signal. The caller holds `lock` again
    /// when it resumes.
    ///
    /// # Panics
    /// If the caller does not hold `lock`, if `lock` differs from the lock
    /// used by earlier waiters, or if called from an interrupt handler.
    pub fn wait<M: Machine>(self, kernel: &mut Kernel<M>, lock: Lock) {
        assert!(
            !kernel.machine.is_interrupt_context(),
            "{self:?} waited on in an external interrupt handler."
        );
        assert!(
            lock.held_by_current(kernel),
            "Waiting on {self:?} without holding {lock:?}."
        );
        let tid = kernel.current().tid();
        let guard = InterruptGuard::new(&kernel.machine);
        let state = kernel.objects.condition_mut(self);
        match state.lock {
            Some(bound) => assert_eq!(bound, lock, "{self:?} is used with two locks."),
            None => state.lock = Some(lock),
        }
        state.waiters.push(tid);
        lock.hand_over(kernel, tid);
        trace!("thread {tid} waits on {self:?}");
        kernel.do_schedule(ThreadState::Blocked);
        guard.release(&kernel.machine);
    }

    /// Wakes the highest-priority waiter, if any. Returns true if a waiter
    /// was woken.
    ///
    /// # Panics
    /// If the caller does not hold `lock`.
    pub fn signal<M: Machine>(self, kernel: &mut Kernel<M>, lock: Lock) -> bool {
        assert!(
            lock.held_by_current(kernel),
            "Signalling {self:?} without holding {lock:?}."
        );
        let guard = InterruptGuard::new(&kernel.machine);
        let woken = self.requeue_one(kernel, lock);
        guard.release(&kernel.machine);
        woken.is_some()
    }

    /// Wakes every waiter. Returns the number of waiters woken.
    ///
    /// # Panics
    /// If the caller does not hold `lock`.
    pub fn broadcast<M: Machine>(self, kernel: &mut Kernel<M>, lock: Lock) -> usize {
        assert!(
            lock.held_by_current(kernel),
            "Broadcasting {self:?} without holding {lock:?}."
        );
        let guard = InterruptGuard::new(&kernel.machine);
        let mut woken = 0;
        while self.requeue_one(kernel, lock).is_some() {
            woken += 1;
        }
        guard.release(&kernel.machine);
        woken
    }

    /// Moves the highest-priority waiter onto the waiter queue of `lock`,
    /// which the running thread holds.
    fn requeue_one<M: Machine>(self, kernel: &mut Kernel<M>, lock: Lock) -> Option<Tid> {
        let threads = &kernel.threads;
        let state = kernel
            .objects
            .conditions
            .get_mut(&self.id)
            .unwrap_or_else(|| panic!("{self:?} is destroyed."));
        let tid = state.waiters.pop_max_by_key(|tid| threads[&tid].priority)?;
        let holder = kernel.current;
        kernel.objects.lock_mut(lock).waiters.push(tid);
        kernel.th_mut(tid).wait_on_lock = Some(lock);
        kernel.th_mut(holder).donations.push(tid);
        kernel.donate_priority(tid);
        trace!("{self:?} signals thread {tid}");
        Some(tid)
    }

    /// Number of threads waiting on the condition variable.
    pub fn waiters<M: Machine>(self, kernel: &Kernel<M>) -> usize {
        kernel.objects.condition(self).waiters.len()
    }

    /// Destroys the condition variable.
    ///
    /// # Errors
    /// [`KernelError::Busy`] if threads are waiting on it.
    pub fn destroy<M: Machine>(self, kernel: &mut Kernel<M>) -> Result<(), KernelError> {
        if !kernel.objects.condition(self).waiters.is_empty() {
            return Err(KernelError::Busy);
        }
        kernel.objects.conditions.remove(&self.id);
        Ok(())
    }
}
