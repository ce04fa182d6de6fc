//! The abyss of the thread core: the machine underneath it.
//!
//! The scheduler and synchronization primitives in `kthreads` never touch the
//! hardware directly. Everything that is inherently machine specific (masking
//! interrupts, telling whether an external interrupt handler is running,
//! reading the tick counter, handing out pages for kernel stacks, and the
//! context switch itself) is reached through the [`Machine`] trait defined
//! here.
//!
//! You are **not** required to understand every line of this crate to follow
//! the scheduler. The parts that matter are:
//! - [`interrupt::InterruptGuard`]: how a critical section is opened and
//!   closed.
//! - [`context::Context`]: what a thread leaves behind when it is switched out.
//! - [`page::Page`]: the frame that backs a thread's stack.
//!
//! With the `sim` feature the crate also provides [`sim::SimMachine`], a
//! single-CPU machine that runs on the host. Its context switch returns to the
//! caller immediately, which then continues on behalf of the dispatched thread,
//! so the whole thread core can be driven step by step from ordinary tests.
#![cfg_attr(not(test), no_std)]
#![deny(missing_docs)]
#![allow(clippy::missing_safety_doc)]

use core::sync::atomic::AtomicBool;

extern crate alloc;

#[macro_use]
pub mod kprint;
pub mod context;
pub mod interrupt;
pub mod machine;
pub mod page;
#[cfg(any(test, feature = "sim"))]
pub mod sim;
pub mod spinlock;
pub mod x86_64;

pub use machine::Machine;

/// Silences [`info!`], [`warning!`] and the kernel logger when set.
#[doc(hidden)]
pub static QUITE: AtomicBool = AtomicBool::new(false);
