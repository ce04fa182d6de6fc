#![allow(dead_code)]

use abyss::{Machine, sim::SimMachine};
use kthreads::{Kernel, SystemConfiguration};

pub type SimKernel = Kernel<SimMachine>;

/// Boots a kernel on a fresh host machine. `main` is thread 1 and `idle` is
/// thread 2.
pub fn boot() -> SimKernel {
    boot_on(SimMachine::new())
}

pub fn boot_on(machine: SimMachine) -> SimKernel {
    let k = Kernel::new(machine, SystemConfiguration::default()).expect("boot must succeed");
    k.validate();
    k
}

/// Delivers one timer tick.
pub fn tick(k: &mut SimKernel) {
    k.machine().advance();
    k.timer_interrupt();
}

pub fn ticks(k: &mut SimKernel, n: u64) {
    for _ in 0..n {
        tick(k);
    }
}

/// Runs `f` as an external interrupt handler.
pub fn in_interrupt<R>(k: &mut SimKernel, f: impl FnOnce(&mut SimKernel) -> R) -> R {
    k.handle_interrupt(f)
}
