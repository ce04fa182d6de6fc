//! The capabilities the thread core needs from the machine.
use crate::{context::Context, interrupt::InterruptState, page::Page};

/// A single CPU together with its timer and page allocator.
///
/// Every method takes `&self`: the machine is hardware, and its state (the
/// interrupt flag, the tick counter, the pool of free pages) changes under the
/// kernel's feet.
pub trait Machine {
    /// Reads the current interrupt state.
    fn interrupt_state(&self) -> InterruptState;

    /// Enables maskable interrupts (`sti`).
    unsafe fn enable_interrupt(&self);

    /// Disables maskable interrupts (`cli`).
    unsafe fn disable_interrupt(&self);

    /// Returns true while an external interrupt handler is running.
    fn is_interrupt_context(&self) -> bool;

    /// Marks the entry to (`true`) or the exit from (`false`) an external
    /// interrupt handler.
    fn set_interrupt_context(&self, on: bool);

    /// Number of timer ticks since boot.
    fn ticks(&self) -> u64;

    /// Allocates a zero-filled page, or returns `None` when memory is
    /// exhausted.
    fn alloc_page(&self) -> Option<Page>;

    /// Returns `page` to the allocator.
    fn free_page(&self, page: Page);

    /// Saves the running context into `current` and resumes `next`.
    ///
    /// A context that has never run starts its thread function.
    ///
    /// # Safety
    /// Interrupts must be disabled. `current` must belong to the thread that
    /// is on the CPU and `next` to a thread that is not.
    unsafe fn switch(&self, current: &mut Context, next: &mut Context);
}
