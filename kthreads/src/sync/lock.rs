//! Lock with priority donation.
//!
//! A [`Lock`] is held by at most one thread at a time. Unlike a semaphore
//! with a count of one, a lock has an owner: only the holder may release it,
//! and the holder may not acquire it again.
//!
//! ## Priority donation
//!
//! Suppose a low-priority thread L holds a lock that a high-priority thread H
//! waits for, while a medium-priority thread M is ready. Under strict priority
//! scheduling M runs, L never gets the CPU to release the lock, and H waits
//! behind a thread it outranks. This is *priority inversion*.
//!
//! To prevent it, a thread that has to wait for a lock *donates* its
//! effective priority to the holder. Donation is transitive: if the holder
//! itself waits for another lock, the donation continues to that lock's
//! holder, and so on along the chain. A holder runs with the maximum of its
//! base priority and the priorities of all the threads donating to it.
//!
//! When the holder releases the lock, the donations received through this
//! lock are withdrawn and its priority falls back to what its remaining
//! donors and base priority justify. The lock is handed directly to the
//! highest-priority waiter, and the other waiters of the lock now donate to
//! the new holder.
//!
//! A chain of waits that leads back to the thread trying to acquire a lock is
//! a deadlock. It is detected while walking the chain and halts the kernel.
use super::WouldBlock;
use crate::{
    Kernel, KernelError,
    thread::{ThreadState, Tid, queue::WaitQueue},
};
use abyss::{Machine, interrupt::InterruptGuard};
use alloc::vec::Vec;
use log::trace;

pub(crate) struct LockState {
    pub(crate) holder: Option<Tid>,
    pub(crate) waiters: WaitQueue,
}

/// A handle to a lock.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lock {
    pub(crate) id: u64,
}

impl Lock {
    /// Creates a free lock.
    pub fn new<M: Machine>(kernel: &mut Kernel<M>) -> Self {
        let id = kernel.objects.allocate_id();
        kernel.objects.locks.insert(
            id,
            LockState {
                holder: None,
                waiters: WaitQueue::new(),
            },
        );
        Self { id }
    }

    /// Acquires the lock, waiting until it is free.
    ///
    /// While waiting, the caller donates its priority along the chain of
    /// holders.
    ///
    /// # Panics
    /// If the caller already holds the lock, if called from an interrupt
    /// handler, or if waiting would close a cycle of waits.
    pub fn acquire<M: Machine>(self, kernel: &mut Kernel<M>) {
        assert!(
            !kernel.machine.is_interrupt_context(),
            "{self:?} acquired in an external interrupt handler."
        );
        let tid = kernel.current().tid();
        let guard = InterruptGuard::new(&kernel.machine);
        let state = kernel.objects.lock_mut(self);
        match state.holder {
            None => state.holder = Some(tid),
            Some(holder) => {
                assert_ne!(holder, tid, "Thread {tid} acquires {self:?} twice.");
                state.waiters.push(tid);
                kernel.th_mut(tid).wait_on_lock = Some(self);
                kernel.th_mut(holder).donations.push(tid);
                kernel.donate_priority(tid);
                trace!("thread {tid} waits on {self:?} held by {holder}");
                kernel.do_schedule(ThreadState::Blocked);
            }
        }
        guard.release(&kernel.machine);
    }

    /// Acquires the lock if it is free, without waiting.
    pub fn try_acquire<M: Machine>(self, kernel: &mut Kernel<M>) -> Result<(), WouldBlock> {
        let tid = kernel.current().tid();
        let guard = InterruptGuard::new(&kernel.machine);
        let state = kernel.objects.lock_mut(self);
        let result = match state.holder {
            None => {
                state.holder = Some(tid);
                Ok(())
            }
            Some(_) => Err(WouldBlock),
        };
        guard.release(&kernel.machine);
        result
    }

    /// Releases the lock, handing it to the highest-priority waiter.
    ///
    /// The caller loses the donations it received through this lock and
    /// yields if it is no longer the highest-priority runnable thread.
    ///
    /// # Panics
    /// If the caller does not hold the lock.
    pub fn release<M: Machine>(self, kernel: &mut Kernel<M>) {
        let tid = kernel.current().tid();
        let guard = InterruptGuard::new(&kernel.machine);
        self.hand_over(kernel, tid);
        guard.release(&kernel.machine);
        kernel.preempt();
    }

    /// Releases the lock held by `holder` without preemption. Returns the new
    /// holder, if any.
    pub(crate) fn hand_over<M: Machine>(self, kernel: &mut Kernel<M>, holder: Tid) -> Option<Tid> {
        let state = kernel.objects.lock_mut(self);
        assert_eq!(
            state.holder,
            Some(holder),
            "Thread {holder} releases {self:?}, which it does not hold."
        );
        state.holder = None;
        let waiters: Vec<Tid> = state.waiters.iter().collect();
        kernel
            .th_mut(holder)
            .donations
            .retain(|donor| !waiters.contains(&donor));
        kernel.refresh_priority(holder);

        let threads = &kernel.threads;
        let state = kernel
            .objects
            .locks
            .get_mut(&self.id)
            .unwrap_or_else(|| panic!("{self:?} is destroyed."));
        let next = state.waiters.pop_max_by_key(|tid| threads[&tid].priority)?;
        state.holder = Some(next);
        let th = kernel.th_mut(next);
        th.wait_on_lock = None;
        for donor in waiters.into_iter().filter(|donor| *donor != next) {
            th.donations.push(donor);
        }
        kernel.refresh_priority(next);
        kernel.unblock(next);
        trace!("{self:?} handed from thread {holder} to {next}");
        Some(next)
    }

    /// Returns true if the running thread holds the lock.
    pub fn held_by_current<M: Machine>(self, kernel: &Kernel<M>) -> bool {
        kernel.objects.lock(self).holder == Some(kernel.current().tid())
    }

    /// The thread holding the lock.
    pub fn holder<M: Machine>(self, kernel: &Kernel<M>) -> Option<Tid> {
        kernel.objects.lock(self).holder
    }

    /// Number of threads waiting for the lock.
    pub fn waiters<M: Machine>(self, kernel: &Kernel<M>) -> usize {
        kernel.objects.lock(self).waiters.len()
    }

    /// Destroys the lock.
    ///
    /// # Errors
    /// [`KernelError::Busy`] if the lock is held.
    pub fn destroy<M: Machine>(self, kernel: &mut Kernel<M>) -> Result<(), KernelError> {
        if kernel.objects.lock(self).holder.is_some() {
            return Err(KernelError::Busy);
        }
        kernel.objects.locks.remove(&self.id);
        Ok(())
    }
}

impl<M: Machine> Kernel<M> {
    /// Propagates the priority of `donor`, which has just started waiting,
    /// along the chain of lock holders it waits for.
    ///
    /// The walk visits each holder once; a chain longer than the number of
    /// live threads, or one that returns to `donor`, is a cycle of waits.
    pub(crate) fn donate_priority(&mut self, donor: Tid) {
        let mut waiter = donor;
        let mut depth = 0;
        while let Some(lock) = self.th(waiter).wait_on_lock {
            let holder = self
                .objects
                .lock(lock)
                .holder
                .unwrap_or_else(|| panic!("Thread {waiter} waits on {lock:?}, which is free."));
            assert_ne!(
                holder, donor,
                "Deadlock: thread {donor} waits for itself through {lock:?}."
            );
            depth += 1;
            assert!(
                depth <= self.threads.len(),
                "Deadlock: the waits of thread {donor} form a cycle."
            );
            let priority = self.refresh_priority(holder);
            trace!("thread {waiter} donates to {holder}, now at priority {priority}");
            waiter = holder;
        }
    }
}
