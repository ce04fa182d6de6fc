//! A deterministic single-CPU machine that runs on the host.
//!
//! [`SimMachine`] keeps the interrupt flag in an emulated RFLAGS register,
//! counts ticks only when told to ([`SimMachine::advance`]), and hands out
//! pages from a [`PagePool`] that can be bounded to exercise allocation
//! failure.
//!
//! Its context switch does not transfer control. The kernel call that
//! switched returns normally, and the caller carries on as the thread that
//! was dispatched. A thread function runs to completion on the first switch
//! into its context.
use crate::{
    Machine,
    context::Context,
    interrupt::InterruptState,
    page::{Page, PagePool},
    x86_64::Rflags,
};
use core::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

/// The host machine.
pub struct SimMachine {
    rflags: AtomicU64,
    interrupt_context: AtomicBool,
    ticks: AtomicU64,
    switches: AtomicUsize,
    pages: PagePool,
}

impl SimMachine {
    /// A machine straight out of reset, with unlimited memory.
    pub fn new() -> Self {
        Self::with_pool(PagePool::unbounded())
    }

    /// A machine that can hand out at most `pages` pages at a time.
    pub fn with_page_limit(pages: usize) -> Self {
        Self::with_pool(PagePool::with_capacity(pages))
    }

    fn with_pool(pages: PagePool) -> Self {
        Self {
            rflags: AtomicU64::new(Rflags::RESET),
            interrupt_context: AtomicBool::new(false),
            ticks: AtomicU64::new(0),
            switches: AtomicUsize::new(0),
            pages,
        }
    }

    /// Advances the timer by one tick and returns the new tick count.
    pub fn advance(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Number of context switches performed so far.
    pub fn switch_count(&self) -> usize {
        self.switches.load(Ordering::SeqCst)
    }

    /// Number of pages currently allocated.
    pub fn pages_in_use(&self) -> usize {
        self.pages.in_use()
    }

    /// Current value of the emulated RFLAGS register.
    pub fn rflags(&self) -> Rflags {
        Rflags::from_bits_truncate(self.rflags.load(Ordering::SeqCst))
    }
}

impl Default for SimMachine {
    fn default() -> Self {
        Self::new()
    }
}

impl Machine for SimMachine {
    fn interrupt_state(&self) -> InterruptState {
        if self.rflags().contains(Rflags::IF) {
            InterruptState::On
        } else {
            InterruptState::Off
        }
    }

    unsafe fn enable_interrupt(&self) {
        self.rflags.fetch_or(Rflags::IF.bits(), Ordering::SeqCst);
    }

    unsafe fn disable_interrupt(&self) {
        self.rflags.fetch_and(!Rflags::IF.bits(), Ordering::SeqCst);
    }

    fn is_interrupt_context(&self) -> bool {
        self.interrupt_context.load(Ordering::SeqCst)
    }

    fn set_interrupt_context(&self, on: bool) {
        let prev = self.interrupt_context.swap(on, Ordering::SeqCst);
        assert_ne!(prev, on, "Unbalanced external interrupt entry/exit.");
    }

    fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::SeqCst)
    }

    fn alloc_page(&self) -> Option<Page> {
        self.pages.alloc()
    }

    fn free_page(&self, page: Page) {
        self.pages.free(page)
    }

    unsafe fn switch(&self, current: &mut Context, next: &mut Context) {
        assert_eq!(
            self.interrupt_state(),
            InterruptState::Off,
            "Context switch with interrupts enabled."
        );
        assert_ne!(current.sp, next.sp, "Switching to the running context.");
        self.switches.fetch_add(1, Ordering::SeqCst);
        if let Some(entry) = next.take_entry() {
            entry();
        }
    }
}
