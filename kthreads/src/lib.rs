//! # kthreads: the thread core of a teaching kernel
//!
//! This crate implements the part of a small kernel that decides which thread
//! owns the single CPU, and the primitives threads use to wait for each other.
//!
//! ## The threading model
//!
//! Every thread has a control block ([`thread::Thread`]), its own kernel stack
//! page and a priority between [`thread::PRI_MIN`] and [`thread::PRI_MAX`].
//! A thread is always in exactly one of four states:
//!
//! ```text
//!                 create            schedule
//!   (allocated) ---------> READY ------------> RUNNING ----> DYING
//!                            ^   <------------    |   exit
//!                            |   yield/preempt    |
//!                            |                    | block (sema, lock,
//!                            +----- BLOCKED <-----+        sleep)
//!                    unblock
//! ```
//!
//! The scheduler is a strict priority scheduler: the running thread always has
//! the highest effective priority among the runnable threads, and threads of
//! equal priority take turns every [`config::TIME_SLICE`] ticks. A thread that
//! waits for a [`sync::Lock`] lends its priority to the holder (and to whoever
//! the holder itself waits for), so a low-priority holder cannot starve a
//! high-priority waiter behind a medium-priority thread.
//!
//! ## The kernel context
//!
//! All scheduler state lives in one [`Kernel`] value, generic over the
//! [`Machine`] that provides interrupts, ticks, pages and the context switch.
//! Operations are methods that borrow the kernel mutably and run on behalf of
//! the current thread. When an operation blocks or yields, the switch happens
//! at the very end of the call; on the simulated machine the caller then
//! simply continues as the thread that was dispatched.
//!
//! ```
//! use abyss::sim::SimMachine;
//! use kthreads::{Kernel, SystemConfiguration, sync::Semaphore, thread::PRI_DEFAULT};
//!
//! let mut k = Kernel::new(SimMachine::new(), SystemConfiguration::default()).unwrap();
//! let main = k.tid();
//! let sema = Semaphore::new(&mut k, 0);
//!
//! // The worker outranks main and runs immediately.
//! let worker = k.create("worker", PRI_DEFAULT + 1, || {}).unwrap();
//! assert_eq!(k.tid(), worker);
//!
//! // The worker waits for the semaphore; main runs again.
//! sema.down(&mut k);
//! assert_eq!(k.tid(), main);
//!
//! // Main hands the semaphore to the worker, which preempts it.
//! sema.up(&mut k);
//! assert_eq!(k.tid(), worker);
//! ```
//!
//! ## Crate layout
//!
//! - [`thread`]: control blocks, thread creation and priorities, the
//!   scheduler and the sleep list.
//! - [`sync`]: semaphores, priority-donating locks and condition variables.
//! - [`interrupt`]: the timer interrupt entry.
//! - [`config`]: boot-time configuration.
//! - `task`, `process` (feature `userprog`): the hooks that connect a thread to
//!   the user process it runs.
#![cfg_attr(not(test), no_std)]
#![deny(missing_docs, rustdoc::broken_intra_doc_links)]

extern crate alloc;

pub mod config;
pub mod interrupt;
mod kernel;
#[cfg(feature = "userprog")]
pub mod process;
pub mod sync;
#[cfg(feature = "userprog")]
pub mod task;
pub mod thread;

pub use abyss::{Machine, info, print, println, warning};
pub use config::{SystemConfiguration, SystemConfigurationBuilder};
pub use kernel::Kernel;

/// Enum representing errors that can occur during a kernel operation.
///
/// Each variant corresponds to a recoverable failure of a thread-core
/// operation. Invariant violations are not errors: they halt the kernel with
/// a panic.
#[derive(Debug, Eq, PartialEq, Clone, Copy)]
pub enum KernelError {
    /// Operation is not permitted. (EPERM)
    OperationNotPermitted,
    /// No such entry. (ENOENT)
    NoSuchEntry,
    /// Out of memory. (ENOMEM)
    NoMemory,
    /// Device or resource busy. (EBUSY)
    Busy,
    /// Invalid arguement. (EINVAL)
    InvalidArgument,
}

impl KernelError {
    /// Converts the [`KernelError`] enum into a corresponding `usize` error
    /// code. The result is cast to `usize` for use as a return value in
    /// system calls.
    pub fn into_usize(self) -> usize {
        (match self {
            KernelError::OperationNotPermitted => -1isize,
            KernelError::NoSuchEntry => -2,
            KernelError::NoMemory => -12,
            KernelError::Busy => -16,
            KernelError::InvalidArgument => -22,
        }) as usize
    }
}

/// The given `isize` does not indicate an [`KernelError`].
#[derive(Debug, Eq, PartialEq)]
pub struct TryFromError {
    e: isize,
}

impl TryFrom<isize> for KernelError {
    type Error = TryFromError;

    fn try_from(value: isize) -> Result<Self, Self::Error> {
        match value {
            -1 => Ok(Self::OperationNotPermitted),
            -2 => Ok(Self::NoSuchEntry),
            -12 => Ok(Self::NoMemory),
            -16 => Ok(Self::Busy),
            -22 => Ok(Self::InvalidArgument),
            e => Err(TryFromError { e }),
        }
    }
}
