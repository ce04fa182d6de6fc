use crate::{
    KernelError,
    config::SystemConfiguration,
    sync::SyncObjects,
    thread::{
        PRI_MIN, Priority, THREAD_MAGIC, Thread, ThreadStack, ThreadState, Tid, queue::WaitQueue,
        scheduler::ThreadStats,
    },
};
use abyss::{
    Machine,
    context::Context,
    interrupt::{InterruptGuard, InterruptState},
};
use alloc::{boxed::Box, collections::btree_map::BTreeMap, vec::Vec};
use crossbeam_queue::SegQueue;
use log::info;

/// The thread core of one CPU.
///
/// A `Kernel` owns every thread control block, the ready queue, the sleep
/// list, every synchronization object and the tick statistics. Operations
/// borrow it mutably, which gives the same exclusion as running them with
/// interrupts disabled on a single CPU: no two operations interleave.
///
/// Operations run on behalf of the *current* thread. An operation that
/// dispatches another thread does so as its last step, and the caller
/// continues as the dispatched thread.
pub struct Kernel<M: Machine> {
    pub(crate) machine: M,
    pub(crate) config: SystemConfiguration,
    /// Every live thread, by id. Blocks are boxed so that a saved context
    /// keeps its address while the map changes.
    pub(crate) threads: BTreeMap<Tid, Box<Thread>>,
    next_tid: Tid,
    pub(crate) current: Tid,
    pub(crate) idle: Tid,
    pub(crate) ready: WaitQueue,
    pub(crate) sleepers: WaitQueue,
    /// Dying threads whose stacks are freed by the next scheduling pass.
    pub(crate) destruction_req: SegQueue<Box<Thread>>,
    pub(crate) objects: SyncObjects,
    /// Ticks since the current thread was dispatched.
    pub(crate) thread_ticks: u64,
    pub(crate) yield_on_return: bool,
    pub(crate) stats: ThreadStats,
}

impl<M: Machine> Kernel<M> {
    /// Boots the thread core on `machine`.
    ///
    /// The code that is running becomes the `main` thread, the idle thread is
    /// created, and interrupts are enabled. Interrupts must be disabled on
    /// entry.
    ///
    /// # Errors
    /// [`KernelError::NoMemory`] if the machine cannot provide the stacks of
    /// the main and idle threads.
    pub fn new(machine: M, config: SystemConfiguration) -> Result<Self, KernelError> {
        assert_eq!(
            machine.interrupt_state(),
            InterruptState::Off,
            "The thread core must be booted with interrupts disabled."
        );
        let main_priority = config.main_priority();
        let mut kernel = Self {
            machine,
            config,
            threads: BTreeMap::new(),
            next_tid: 1,
            current: 0,
            idle: 0,
            ready: WaitQueue::new(),
            sleepers: WaitQueue::new(),
            destruction_req: SegQueue::new(),
            objects: SyncObjects::new(),
            thread_ticks: 0,
            yield_on_return: false,
            stats: ThreadStats::default(),
        };

        let main = kernel.init_thread("main", main_priority, None)?;
        kernel.th_mut(main).state = ThreadState::Running;
        kernel.current = main;
        kernel.idle = kernel.init_thread("idle", PRI_MIN, None)?;

        unsafe { kernel.machine.enable_interrupt() };
        info!("threads: main is {main}, idle is {}", kernel.idle);
        Ok(kernel)
    }

    /// Allocates a stack and registers a new BLOCKED thread.
    pub(crate) fn init_thread(
        &mut self,
        name: &str,
        priority: Priority,
        entry: Option<abyss::context::ThreadFn>,
    ) -> Result<Tid, KernelError> {
        let page = self.machine.alloc_page().ok_or(KernelError::NoMemory)?;
        let tid = self.next_tid;
        self.next_tid += 1;

        let stack = ThreadStack::new(page);
        let context = match entry {
            Some(entry) => Context::with_entry(stack.top(), entry),
            None => Context::new(stack.top()),
        };
        self.threads
            .insert(tid, Thread::new(tid, name, priority, stack, context));
        Ok(tid)
    }

    /// The machine the kernel runs on.
    pub fn machine(&self) -> &M {
        &self.machine
    }

    /// The configuration the kernel was booted with.
    pub fn config(&self) -> &SystemConfiguration {
        &self.config
    }

    /// Looks up a live thread.
    ///
    /// Returns `None` once the thread has exited.
    pub fn thread(&self, tid: Tid) -> Option<&Thread> {
        self.threads.get(&tid).map(Box::as_ref)
    }

    pub(crate) fn th(&self, tid: Tid) -> &Thread {
        self.threads
            .get(&tid)
            .unwrap_or_else(|| panic!("Thread {tid} is not registered."))
    }

    pub(crate) fn th_mut(&mut self, tid: Tid) -> &mut Thread {
        self.threads
            .get_mut(&tid)
            .unwrap_or_else(|| panic!("Thread {tid} is not registered."))
    }

    /// Id of the idle thread.
    pub fn idle_tid(&self) -> Tid {
        self.idle
    }

    /// Ids of the ready threads, in the order they were admitted.
    pub fn ready_threads(&self) -> Vec<Tid> {
        self.ready.iter().collect()
    }

    /// Ids of the sleeping threads, in the order they went to sleep.
    pub fn sleeping_threads(&self) -> Vec<Tid> {
        self.sleepers.iter().collect()
    }

    /// Number of live threads, including the idle thread.
    pub fn live_threads(&self) -> usize {
        self.threads.len()
    }

    /// Number of dying threads whose stacks are not yet freed.
    pub fn pending_destruction(&self) -> usize {
        self.destruction_req.len()
    }

    /// Checks the scheduler invariants and panics on the first violation.
    ///
    /// - exactly one thread is RUNNING, and it is the current thread;
    /// - the ready queue holds exactly the READY threads, never the idle
    ///   thread;
    /// - sleeping threads and waiters are BLOCKED, and no thread waits in two
    ///   places;
    /// - a thread waiting for a lock is queued on that lock;
    /// - every effective priority is the maximum of the base priority and
    ///   the donors' priorities;
    /// - every stack canary is intact.
    pub fn validate(&self) {
        let running: Vec<Tid> = self
            .threads
            .values()
            .filter(|th| th.state == ThreadState::Running)
            .map(|th| th.tid())
            .collect();
        assert_eq!(running, [self.current], "Running threads: {running:?}");

        let mut queued: BTreeMap<Tid, &'static str> = BTreeMap::new();
        let mut enroll = |tid: Tid, place: &'static str| {
            if let Some(prev) = queued.insert(tid, place) {
                panic!("Thread {tid} waits in both {prev} and {place}.");
            }
        };
        for tid in self.ready.iter() {
            assert_ne!(tid, self.idle, "The idle thread is in the ready queue.");
            assert_eq!(self.th(tid).state, ThreadState::Ready, "Thread {tid}");
            enroll(tid, "the ready queue");
        }
        for tid in self.sleepers.iter() {
            let th = self.th(tid);
            assert_eq!(th.state, ThreadState::Blocked, "Sleeping thread {tid}");
            assert!(th.wakeup_tick.is_some(), "Thread {tid} sleeps without a wakeup tick.");
            enroll(tid, "the sleep list");
        }
        for (place, waiters) in self.objects.waiter_lists() {
            for tid in waiters.iter() {
                assert_eq!(self.th(tid).state, ThreadState::Blocked, "Waiter {tid} of {place}");
                enroll(tid, place);
            }
        }

        for th in self.threads.values() {
            let tid = th.tid();
            assert_eq!(th.stack.magic(), THREAD_MAGIC, "Stack overflow detected! Thread {tid}");
            if th.state == ThreadState::Ready {
                assert!(self.ready.contains(tid), "Ready thread {tid} is not queued.");
            }
            if let Some(lock) = th.wait_on_lock {
                assert!(
                    self.objects.lock(lock).waiters.contains(tid),
                    "Thread {tid} waits on {lock:?} but is not queued there."
                );
            }
            let donated = th.donations.iter().map(|d| self.th(d).priority).max();
            let expected = donated.map_or(th.base_priority, |p| p.max(th.base_priority));
            assert_eq!(th.priority, expected, "Effective priority of thread {tid}");
        }
    }
}

impl<M: Machine> Drop for Kernel<M> {
    fn drop(&mut self) {
        let guard = InterruptGuard::new(&self.machine);
        while let Some(th) = self.destruction_req.pop() {
            self.machine.free_page(th.into_stack_page());
        }
        for (_, th) in core::mem::take(&mut self.threads) {
            self.machine.free_page(th.into_stack_page());
        }
        guard.release(&self.machine);
    }
}
