//! Saved execution context of a thread that is off the CPU.
use alloc::boxed::Box;

/// The function a thread starts executing on its first dispatch.
pub type ThreadFn = Box<dyn FnOnce() + Send + 'static>;

/// Execution context of a thread.
///
/// While a thread runs, its registers live on the CPU. When it is switched
/// out, [`Machine::switch`] stores what is needed to resume it here. A
/// context that has never run carries the thread function instead, which is
/// launched on the first switch into it.
///
/// [`Machine::switch`]: crate::Machine::switch
pub struct Context {
    /// A stack pointer on context switch.
    pub sp: usize,
    entry: Option<ThreadFn>,
}

impl Context {
    /// Context of a thread whose code is already on the CPU or is provided by
    /// the kernel itself, such as the boot and idle threads.
    pub const fn new(sp: usize) -> Self {
        Self { sp, entry: None }
    }

    /// Context that launches `entry` on the stack whose top is `sp`.
    pub fn with_entry(sp: usize, entry: ThreadFn) -> Self {
        Self {
            sp,
            entry: Some(entry),
        }
    }

    /// Returns true if the thread function has been launched.
    pub fn is_launched(&self) -> bool {
        self.entry.is_none()
    }

    /// Takes the thread function out of a context that has never run.
    pub fn take_entry(&mut self) -> Option<ThreadFn> {
        self.entry.take()
    }
}

impl core::fmt::Debug for Context {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Context")
            .field("sp", &format_args!("{:#x}", self.sp))
            .field("launched", &self.is_launched())
            .finish()
    }
}
