//! Counting semaphore.
//!
//! A semaphore is a non-negative counter with two atomic operations:
//!
//! - [`Semaphore::down`] waits until the counter is positive and then
//!   decrements it.
//! - [`Semaphore::up`] increments the counter, or, if threads are waiting,
//!   passes the unit directly to the waiter with the highest priority.
//!
//! Because `up` hands the unit over instead of incrementing the counter, a
//! woken waiter owns it the moment it becomes ready; no thread that calls
//! `down` later can take it away.
//!
//! A semaphore initialized to 0 is used to wait for an event that happens
//! exactly once; one initialized to 1 guards a resource.
use super::WouldBlock;
use crate::{
    Kernel, KernelError,
    thread::{ThreadState, Tid, queue::WaitQueue},
};
use abyss::{Machine, interrupt::InterruptGuard};
use log::trace;

pub(crate) struct SemaphoreState {
    pub(crate) value: usize,
    pub(crate) waiters: WaitQueue,
}

/// A handle to a counting semaphore.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Semaphore {
    pub(crate) id: u64,
}

impl Semaphore {
    /// Creates a semaphore whose counter starts at `value`.
    pub fn new<M: Machine>(kernel: &mut Kernel<M>, value: usize) -> Self {
        let id = kernel.objects.allocate_id();
        kernel.objects.semaphores.insert(
            id,
            SemaphoreState {
                value,
                waiters: WaitQueue::new(),
            },
        );
        Self { id }
    }

    /// Waits until the counter is positive and decrements it.
    ///
    /// # Panics
    /// If the call would block inside an interrupt handler.
    pub fn down<M: Machine>(self, kernel: &mut Kernel<M>) {
        let tid = kernel.current().tid();
        let guard = InterruptGuard::new(&kernel.machine);
        let state = kernel.objects.semaphore_mut(self);
        if state.value > 0 {
            state.value -= 1;
        } else {
            assert!(
                !kernel.machine.is_interrupt_context(),
                "{self:?} would block in an external interrupt handler."
            );
            state.waiters.push(tid);
            trace!("thread {tid} waits on {self:?}");
            kernel.do_schedule(ThreadState::Blocked);
        }
        guard.release(&kernel.machine);
    }

    /// Decrements the counter if it is positive, without waiting.
    ///
    /// This may be called from an interrupt handler.
    pub fn try_down<M: Machine>(self, kernel: &mut Kernel<M>) -> Result<(), WouldBlock> {
        let guard = InterruptGuard::new(&kernel.machine);
        let state = kernel.objects.semaphore_mut(self);
        let result = if state.value > 0 {
            state.value -= 1;
            Ok(())
        } else {
            Err(WouldBlock)
        };
        guard.release(&kernel.machine);
        result
    }

    /// Increments the counter, or wakes the highest-priority waiter.
    ///
    /// If the woken thread outranks the caller, the caller yields to it (when
    /// the handler returns, if called from an interrupt handler).
    pub fn up<M: Machine>(self, kernel: &mut Kernel<M>) {
        let guard = InterruptGuard::new(&kernel.machine);
        let woken = self.wake_one(kernel);
        guard.release(&kernel.machine);
        if woken.is_some() {
            kernel.preempt();
        }
    }

    /// `up` without preemption. Returns the woken thread, if any.
    pub(crate) fn wake_one<M: Machine>(self, kernel: &mut Kernel<M>) -> Option<Tid> {
        let state = kernel.objects.semaphores.get_mut(&self.id);
        let state = state.unwrap_or_else(|| panic!("{self:?} is destroyed."));
        let threads = &kernel.threads;
        match state.waiters.pop_max_by_key(|tid| threads[&tid].priority) {
            Some(tid) => {
                kernel.unblock(tid);
                Some(tid)
            }
            None => {
                state.value += 1;
                None
            }
        }
    }

    /// Current value of the counter.
    pub fn value<M: Machine>(self, kernel: &Kernel<M>) -> usize {
        kernel.objects.semaphore(self).value
    }

    /// Number of threads waiting on the semaphore.
    pub fn waiters<M: Machine>(self, kernel: &Kernel<M>) -> usize {
        kernel.objects.semaphore(self).waiters.len()
    }

    /// Destroys the semaphore.
    ///
    /// # Errors
    /// [`KernelError::Busy`] if threads are waiting on it.
    pub fn destroy<M: Machine>(self, kernel: &mut Kernel<M>) -> Result<(), KernelError> {
        if !kernel.objects.semaphore(self).waiters.is_empty() {
            return Err(KernelError::Busy);
        }
        kernel.objects.semaphores.remove(&self.id);
        Ok(())
    }
}
