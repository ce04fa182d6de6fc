//! Thread abstraction.
//!
//! ## The threading model
//!
//! An executing kernel consists of a collection of threads, each with its own
//! stack and local state. A thread is represented by its control block,
//! [`Thread`], which records who the thread is (id and name), whether it can
//! run ([`ThreadState`]), how urgent it is (its priority), and what it is
//! waiting for.
//!
//! ## Priorities
//!
//! Each thread has a *base* priority, chosen at creation and changed with
//! [`Kernel::set_priority`], and an *effective* priority that the scheduler
//! uses. The effective priority is the base priority raised by donations:
//! while a thread waits for a lock, every holder along the chain of locks it
//! transitively waits for runs with at least the waiter's priority.
//!
//! ## Stack canary
//!
//! The control block is paired with a page that serves as the thread's kernel
//! stack. The stack grows down toward the base of the page, where
//! [`THREAD_MAGIC`] is written at creation. A thread that overflows its stack
//! overwrites the magic first, and the next [`Kernel::current`] call detects
//! it.
pub mod alarm;
pub mod queue;
pub mod scheduler;

use crate::{KernelError, Kernel, sync::Lock};
#[cfg(feature = "userprog")]
use crate::{process::ProcessInfo, task::Task};
use abyss::{
    Machine,
    context::Context,
    interrupt::InterruptGuard,
    page::{PAGE_SIZE, Page},
};
use alloc::boxed::Box;
use arrayvec::ArrayString;
use log::{debug, warn};
use queue::WaitQueue;

/// Thread identifier.
pub type Tid = u64;
/// Thread priority.
pub type Priority = u8;

/// Lowest priority.
pub const PRI_MIN: Priority = 0;
/// Default priority.
pub const PRI_DEFAULT: Priority = 31;
/// Highest priority.
pub const PRI_MAX: Priority = 63;
/// Maximum length of a thread name in bytes.
pub const NAME_MAX: usize = 16;
/// Thread magic to detect stack overflow.
pub const THREAD_MAGIC: usize = 0xcd6a_bf4b;

/// A possible state of the thread.
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
pub enum ThreadState {
    /// Thread is running on the CPU.
    Running,
    /// Thread is runnable and waits in the ready queue.
    Ready,
    /// Thread waits for an event.
    Blocked,
    /// Thread has exited and is about to be destroyed.
    Dying,
}

/// The kernel stack of a thread.
pub(crate) struct ThreadStack {
    page: Page,
}

impl ThreadStack {
    pub(crate) fn new(mut page: Page) -> Self {
        page.write_word(0, THREAD_MAGIC);
        Self { page }
    }

    pub(crate) fn magic(&self) -> usize {
        self.page.read_word(0)
    }

    /// Initial stack pointer: the last word of the page.
    pub(crate) fn top(&self) -> usize {
        self.page.kva() + PAGE_SIZE - core::mem::size_of::<usize>()
    }
}

/// A thread control block.
pub struct Thread {
    pub(crate) context: Context,
    pub(crate) stack: ThreadStack,
    tid: Tid,
    name: ArrayString<NAME_MAX>,
    pub(crate) state: ThreadState,
    /// Priority set at creation or by [`Kernel::set_priority`].
    pub(crate) base_priority: Priority,
    /// Base priority raised by donations.
    pub(crate) priority: Priority,
    pub(crate) wait_on_lock: Option<Lock>,
    /// Threads donating their priority to this thread.
    pub(crate) donations: WaitQueue,
    pub(crate) wakeup_tick: Option<u64>,
    #[cfg(feature = "userprog")]
    pub(crate) process: ProcessInfo,
    #[cfg(feature = "userprog")]
    pub(crate) task: Option<Box<dyn Task>>,
}

impl Thread {
    pub(crate) fn new(
        tid: Tid,
        name: &str,
        priority: Priority,
        stack: ThreadStack,
        context: Context,
    ) -> Box<Self> {
        Box::new(Self {
            context,
            stack,
            tid,
            name: truncate(name),
            state: ThreadState::Blocked,
            base_priority: priority,
            priority,
            wait_on_lock: None,
            donations: WaitQueue::new(),
            wakeup_tick: None,
            #[cfg(feature = "userprog")]
            process: ProcessInfo::new(),
            #[cfg(feature = "userprog")]
            task: None,
        })
    }

    /// Thread id.
    pub fn tid(&self) -> Tid {
        self.tid
    }

    /// Thread name.
    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    /// Current state.
    pub fn state(&self) -> ThreadState {
        self.state
    }

    /// Effective priority.
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Priority without donations.
    pub fn base_priority(&self) -> Priority {
        self.base_priority
    }

    /// The lock this thread waits for, if any.
    pub fn waiting_on(&self) -> Option<Lock> {
        self.wait_on_lock
    }

    /// Threads currently donating their priority to this one.
    pub fn donors(&self) -> impl Iterator<Item = Tid> + '_ {
        self.donations.iter()
    }

    /// The tick this thread sleeps until.
    pub fn wakeup_tick(&self) -> Option<u64> {
        self.wakeup_tick
    }

    #[cfg(test)]
    pub(crate) fn stack_mut(&mut self) -> &mut [u8] {
        self.stack.page.inner_mut()
    }

    pub(crate) fn into_stack_page(self: Box<Self>) -> Page {
        self.stack.page
    }
}

impl core::fmt::Debug for Thread {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Thread")
            .field("tid", &self.tid)
            .field("name", &self.name())
            .field("state", &self.state)
            .field("priority", &self.priority)
            .field("base_priority", &self.base_priority)
            .finish()
    }
}

fn truncate(name: &str) -> ArrayString<NAME_MAX> {
    let mut out = ArrayString::new();
    for c in name.chars() {
        if out.try_push(c).is_err() {
            break;
        }
    }
    out
}

/// A builder for a new thread.
///
/// ```
/// use abyss::sim::SimMachine;
/// use kthreads::{Kernel, SystemConfiguration, thread::ThreadBuilder};
///
/// let mut k = Kernel::new(SimMachine::new(), SystemConfiguration::default()).unwrap();
/// let tid = ThreadBuilder::new("worker")
///     .priority(10)
///     .spawn(&mut k, || {})
///     .unwrap();
/// assert_eq!(k.thread(tid).unwrap().name(), "worker");
/// ```
pub struct ThreadBuilder {
    name: ArrayString<NAME_MAX>,
    priority: Priority,
    #[cfg(feature = "userprog")]
    task: Option<Box<dyn Task>>,
}

impl ThreadBuilder {
    /// Creates a builder for a thread named `name`, truncated to
    /// [`NAME_MAX`] bytes, with [`PRI_DEFAULT`].
    pub fn new<I: AsRef<str>>(name: I) -> Self {
        Self {
            name: truncate(name.as_ref()),
            priority: PRI_DEFAULT,
            #[cfg(feature = "userprog")]
            task: None,
        }
    }

    /// Sets the base priority of the new thread.
    pub fn priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Attaches a user task to the new thread.
    #[cfg(feature = "userprog")]
    pub fn attach_task(mut self, task: Box<dyn Task>) -> Self {
        self.task = Some(task);
        self
    }

    /// Creates the thread and admits it to the ready queue.
    ///
    /// `thread_fn` runs when the thread is dispatched for the first time. If
    /// the new thread outranks the caller, the caller yields to it before
    /// this returns.
    ///
    /// # Errors
    /// [`KernelError::NoMemory`] if no page is available for the stack.
    ///
    /// # Panics
    /// If the priority is outside [`PRI_MIN`]..=[`PRI_MAX`].
    pub fn spawn<M, F>(self, kernel: &mut Kernel<M>, thread_fn: F) -> Result<Tid, KernelError>
    where
        M: Machine,
        F: FnOnce() + Send + 'static,
    {
        kernel.spawn(self, Box::new(thread_fn))
    }
}

impl<M: Machine> Kernel<M> {
    /// Creates a thread named `name` with `priority` that runs `thread_fn`.
    ///
    /// See [`ThreadBuilder::spawn`].
    pub fn create<F>(&mut self, name: &str, priority: Priority, thread_fn: F) -> Result<Tid, KernelError>
    where
        F: FnOnce() + Send + 'static,
    {
        ThreadBuilder::new(name).priority(priority).spawn(self, thread_fn)
    }

    fn spawn(
        &mut self,
        builder: ThreadBuilder,
        entry: abyss::context::ThreadFn,
    ) -> Result<Tid, KernelError> {
        let priority = builder.priority;
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "Priority {priority} is out of range."
        );
        let creator = self.current().tid();
        let tid = match self.init_thread(&builder.name, priority, Some(entry)) {
            Ok(tid) => tid,
            Err(e) => {
                warn!("thread {}: cannot create {}: {e:?}", creator, builder.name);
                return Err(e);
            }
        };
        #[cfg(feature = "userprog")]
        {
            self.th_mut(tid).task = builder.task;
            self.adopt(creator, tid);
        }
        debug!("thread {creator} created {tid} ({}), priority {priority}", builder.name);

        self.unblock(tid);
        self.preempt();
        Ok(tid)
    }

    /// The control block of the running thread.
    ///
    /// # Panics
    /// If the block is not RUNNING or its stack canary is corrupted, which
    /// means the thread overflowed its stack.
    pub fn current(&self) -> &Thread {
        let th = self.th(self.current);
        if th.stack.magic() != THREAD_MAGIC {
            panic!(
                "Stack overflow detected! Thread {} ({}) corrupted its canary.",
                th.tid,
                th.name()
            );
        }
        assert_eq!(
            th.state,
            ThreadState::Running,
            "Current thread {} is not running.",
            th.tid
        );
        th
    }

    /// Id of the running thread.
    pub fn tid(&self) -> Tid {
        self.current().tid()
    }

    /// Name of the running thread.
    pub fn name(&self) -> &str {
        self.current().name()
    }

    /// Sets the base priority of the running thread.
    ///
    /// Donations still apply on top of the new base priority. If the running
    /// thread no longer has the highest priority, it yields.
    ///
    /// # Panics
    /// If `priority` is outside [`PRI_MIN`]..=[`PRI_MAX`].
    pub fn set_priority(&mut self, priority: Priority) {
        assert!(
            (PRI_MIN..=PRI_MAX).contains(&priority),
            "Priority {priority} is out of range."
        );
        let tid = self.current().tid();
        let guard = InterruptGuard::new(&self.machine);
        self.th_mut(tid).base_priority = priority;
        self.refresh_priority(tid);
        guard.release(&self.machine);
        self.preempt();
    }

    /// Effective priority of the running thread.
    pub fn get_priority(&self) -> Priority {
        self.current().priority
    }

    /// Recomputes the effective priority of `tid` from its base priority and
    /// its donors, and returns it.
    pub(crate) fn refresh_priority(&mut self, tid: Tid) -> Priority {
        let th = self.th(tid);
        let priority = th
            .donations
            .iter()
            .map(|donor| self.th(donor).priority)
            .fold(th.base_priority, Priority::max);
        self.th_mut(tid).priority = priority;
        priority
    }
}
