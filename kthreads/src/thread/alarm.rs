//! Timed sleep.
//!
//! A sleeping thread is BLOCKED and waits in the sleep list with the tick it
//! wants to wake up at. The timer interrupt sweeps the list once per tick and
//! readies every thread whose tick has come, earliest first.
use super::{ThreadState, Tid};
use crate::Kernel;
use abyss::{Machine, interrupt::InterruptGuard};
use core::cmp::Reverse;
use log::trace;

impl<M: Machine> Kernel<M> {
    /// Blocks the running thread until the tick counter reaches `until`.
    ///
    /// Returns immediately if `until` is not in the future, or if called by
    /// the idle thread.
    ///
    /// # Panics
    /// If called from an interrupt handler.
    pub fn sleep(&mut self, until: u64) {
        assert!(
            !self.machine.is_interrupt_context(),
            "Sleeping in an external interrupt handler."
        );
        let tid = self.current().tid();
        if tid == self.idle || until <= self.machine.ticks() {
            return;
        }

        let guard = InterruptGuard::new(&self.machine);
        self.th_mut(tid).wakeup_tick = Some(until);
        self.sleepers.push(tid);
        trace!("thread {tid} sleeps until tick {until}");
        self.do_schedule(ThreadState::Blocked);
        guard.release(&self.machine);
    }

    /// Blocks the running thread for `ticks` timer ticks.
    pub fn sleep_for(&mut self, ticks: u64) {
        let now = self.machine.ticks();
        self.sleep(now.saturating_add(ticks));
    }

    /// Wakes every sleeping thread whose wakeup tick is at or before `now`,
    /// earliest first, and returns how many were woken.
    ///
    /// If a woken thread outranks the running one, the running thread is
    /// preempted (when the interrupt handler returns, if called from one).
    pub fn tick_wakeup(&mut self, now: u64) -> usize {
        let guard = InterruptGuard::new(&self.machine);
        let mut woken = 0;
        while let Some(tid) = self.earliest_sleeper() {
            if self.th(tid).wakeup_tick.is_some_and(|tick| tick > now) {
                break;
            }
            self.sleepers.remove(tid);
            self.th_mut(tid).wakeup_tick = None;
            self.unblock(tid);
            trace!("thread {tid} wakes up at tick {now}");
            woken += 1;
        }
        guard.release(&self.machine);
        if woken > 0 {
            self.preempt();
        }
        woken
    }

    fn earliest_sleeper(&self) -> Option<Tid> {
        let threads = &self.threads;
        self.sleepers
            .peek_max_by_key(|tid| Reverse(threads[&tid].wakeup_tick))
    }
}
