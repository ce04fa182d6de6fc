//! External interrupt entry and exit.
//!
//! Device drivers run their handlers through [`Kernel::handle_interrupt`].
//! A handler runs in interrupt context with interrupts disabled: it may wake
//! threads, but it never blocks. A thread switch it decides on (time slice
//! expiry, or a woken thread that outranks the running one) is carried out
//! after the handler has left interrupt context, before the interrupted
//! thread resumes.
//!
//! The timer driver advances the machine's tick counter and then calls
//! [`Kernel::timer_interrupt`] once per tick.
use crate::{Kernel, thread::ThreadState};
use abyss::{Machine, interrupt::InterruptGuard};

impl<M: Machine> Kernel<M> {
    /// Runs `handler` as an external interrupt handler.
    ///
    /// On return from the handler, a yield requested with
    /// [`Kernel::yield_on_return`] (directly, or by waking a thread that
    /// outranks the interrupted one) is performed. An interrupted idle thread
    /// always goes back through the scheduler.
    ///
    /// # Panics
    /// If called from inside another interrupt handler.
    pub fn handle_interrupt<R>(&mut self, handler: impl FnOnce(&mut Self) -> R) -> R {
        let guard = InterruptGuard::new(&self.machine);
        self.machine.set_interrupt_context(true);
        let r = handler(self);
        self.machine.set_interrupt_context(false);
        self.interrupt_return();
        guard.release(&self.machine);
        r
    }

    fn interrupt_return(&mut self) {
        let yield_on_return = core::mem::take(&mut self.yield_on_return);
        if self.current == self.idle {
            // The idle thread halts after blocking itself; every interrupt
            // resumes it only to block again.
            self.do_schedule(ThreadState::Blocked);
        } else if yield_on_return {
            self.yield_now();
        }
    }

    /// Handles one timer tick.
    pub fn timer_interrupt(&mut self) {
        self.handle_interrupt(|k| {
            let now = k.machine.ticks();
            k.thread_tick();
            k.tick_wakeup(now);
        });
    }

    /// Requests a yield once the running interrupt handler returns.
    ///
    /// # Panics
    /// If called outside an interrupt handler.
    pub fn yield_on_return(&mut self) {
        assert!(
            self.machine.is_interrupt_context(),
            "Yield on return requested outside an interrupt handler."
        );
        self.yield_on_return = true;
    }
}
