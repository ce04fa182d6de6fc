//! Interrupt state and interrupt-masked sections.
#[cfg(doc)]
use crate::spinlock::SpinLock;
use crate::machine::Machine;
use core::sync::atomic::{Ordering, fence};

/// Enumeration representing the interrupt state.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum InterruptState {
    /// Interrupts are enabled.
    On,
    /// Interrupts are disabled.
    Off,
}

/// A guard for a section that runs with interrupts disabled.
///
/// When an `InterruptGuard` is created, the current interrupt state is saved
/// and interrupts are disabled. The saved state is restored by
/// [`InterruptGuard::release`].
///
/// The guard does not restore anything on drop. A thread that blocks inside
/// a masked section leaves it through the context switch and only resumes
/// the section once it is dispatched again, so the end of a section is
/// always spelled out, the same way [`SpinLock`] guards are unlocked
/// explicitly.
///
/// Guards nest: an inner guard saves [`InterruptState::Off`] and therefore
/// leaves interrupts disabled when it is released.
#[must_use = "interrupts stay disabled until the guard is released"]
pub struct InterruptGuard {
    state: InterruptState,
}

impl InterruptGuard {
    /// Saves the interrupt state of `machine` and disables interrupts.
    pub fn new<M: Machine + ?Sized>(machine: &M) -> Self {
        let state = machine.interrupt_state();
        unsafe { machine.disable_interrupt() };
        fence(Ordering::SeqCst);
        Self { state }
    }

    /// The interrupt state at the time the guard was created.
    pub fn saved_state(&self) -> InterruptState {
        self.state
    }

    /// Restores the interrupt state saved by [`InterruptGuard::new`].
    pub fn release<M: Machine + ?Sized>(self, machine: &M) {
        fence(Ordering::SeqCst);
        if self.state == InterruptState::On {
            unsafe { machine.enable_interrupt() };
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::sim::SimMachine;

    #[test]
    fn nested_guards_restore_outer_state() {
        let machine = SimMachine::new();
        unsafe { machine.enable_interrupt() };

        let outer = InterruptGuard::new(&machine);
        assert_eq!(machine.interrupt_state(), InterruptState::Off);
        let inner = InterruptGuard::new(&machine);
        assert_eq!(inner.saved_state(), InterruptState::Off);

        inner.release(&machine);
        assert_eq!(
            machine.interrupt_state(),
            InterruptState::Off,
            "Releasing an inner guard must keep interrupts masked."
        );
        outer.release(&machine);
        assert_eq!(machine.interrupt_state(), InterruptState::On);
    }

    #[test]
    fn guard_keeps_disabled_state() {
        let machine = SimMachine::new();
        assert_eq!(machine.interrupt_state(), InterruptState::Off);
        let guard = InterruptGuard::new(&machine);
        guard.release(&machine);
        assert_eq!(machine.interrupt_state(), InterruptState::Off);
    }
}
