//! Thread scheduler.
//!
//! The scheduler decides which thread owns the CPU. It keeps the READY
//! threads in the ready queue and follows three rules:
//!
//! 1. **Strict priority.** The thread chosen to run is the ready thread with
//!    the highest *effective* priority. Whenever an operation makes a thread
//!    ready that outranks the running one, or lowers the running thread's
//!    priority below a ready thread, the running thread is preempted right
//!    away (or, inside an interrupt handler, when the handler returns).
//! 2. **Round robin among equals.** Threads of the same priority are served in
//!    the order they became ready, and a running thread yields after
//!    [`TIME_SLICE`] ticks so that its peers get their turn.
//! 3. **Idle.** When nothing is ready, the idle thread runs. It is never in
//!    the ready queue.
//!
//! ## Switching threads
//!
//! Every switch goes through [`Kernel::do_schedule`], which runs with
//! interrupts disabled:
//!
//! 1. Stacks of threads that died during earlier switches are returned to
//!    the machine. A dying thread cannot free the stack it is running on, so
//!    its control block is queued until the next scheduling pass.
//! 2. The running thread takes its new state (READY, BLOCKED or DYING).
//! 3. The next thread is selected, marked RUNNING and given a fresh time
//!    slice. If it runs a user task, the task's address space is activated.
//! 4. If the next thread differs from the previous one, [`Machine::switch`]
//!    saves the previous context and resumes the next.
//!
//! [`TIME_SLICE`]: crate::config::TIME_SLICE
use super::{Thread, ThreadState, Tid};
use crate::Kernel;
use abyss::{
    Machine,
    context::Context,
    interrupt::{InterruptGuard, InterruptState},
    println,
};
use alloc::boxed::Box;
use log::{debug, trace};

/// Tick statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct ThreadStats {
    /// Ticks spent in the idle thread.
    pub idle_ticks: u64,
    /// Ticks spent in kernel threads.
    pub kernel_ticks: u64,
    /// Ticks spent in threads that run a user task.
    pub user_ticks: u64,
}

impl core::fmt::Display for ThreadStats {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "Thread: {} idle ticks, {} kernel ticks, {} user ticks",
            self.idle_ticks, self.kernel_ticks, self.user_ticks
        )
    }
}

impl<M: Machine> Kernel<M> {
    /// Puts the running thread to sleep until [`Kernel::unblock`] wakes it.
    ///
    /// Interrupts must be disabled by the caller, typically with an
    /// [`InterruptGuard`] that is released after this returns.
    ///
    /// # Panics
    /// If interrupts are enabled or if called from an interrupt handler.
    pub fn block(&mut self) {
        assert!(
            !self.machine.is_interrupt_context(),
            "Blocking in an external interrupt handler."
        );
        assert_eq!(
            self.machine.interrupt_state(),
            InterruptState::Off,
            "Blocking with interrupts enabled."
        );
        self.do_schedule(ThreadState::Blocked);
    }

    /// Moves the BLOCKED thread `tid` to the ready queue.
    ///
    /// This never preempts the running thread: callers that want the woken
    /// thread to run as soon as it outranks them do so themselves.
    ///
    /// # Panics
    /// If `tid` is not a BLOCKED thread, or is the idle thread.
    pub fn unblock(&mut self, tid: Tid) {
        assert_ne!(tid, self.idle, "The idle thread cannot be unblocked.");
        let guard = InterruptGuard::new(&self.machine);
        let th = self.th_mut(tid);
        assert_eq!(
            th.state,
            ThreadState::Blocked,
            "Unblocking thread {tid}, which is not blocked."
        );
        th.state = ThreadState::Ready;
        self.ready.push(tid);
        guard.release(&self.machine);
    }

    /// Yields the CPU. The running thread stays ready and may be selected
    /// again immediately.
    ///
    /// # Panics
    /// If called from an interrupt handler.
    pub fn yield_now(&mut self) {
        assert!(
            !self.machine.is_interrupt_context(),
            "Yielding in an external interrupt handler."
        );
        let tid = self.current().tid();
        let guard = InterruptGuard::new(&self.machine);
        if tid == self.idle {
            self.do_schedule(ThreadState::Blocked);
        } else {
            self.ready.push(tid);
            self.do_schedule(ThreadState::Ready);
        }
        guard.release(&self.machine);
    }

    /// Terminates the running thread. It never runs again, and its stack is
    /// freed by a later scheduling pass.
    ///
    /// The thread's exit status is delivered to its parent and an attached
    /// task is torn down first.
    ///
    /// On a machine whose switch suspends the caller, this call does not
    /// return. The signature is not `-> !` because the host `SimMachine`
    /// switch returns to the caller: there, and only there, `exit` returns
    /// and the caller carries on as the thread that was dispatched.
    ///
    /// # Panics
    /// If called from an interrupt handler, by the idle thread, or while
    /// holding a lock.
    pub fn exit(&mut self) {
        assert!(
            !self.machine.is_interrupt_context(),
            "Exiting in an external interrupt handler."
        );
        let tid = self.current().tid();
        assert_ne!(tid, self.idle, "The idle thread cannot exit.");
        if let Some(lock) = self.objects.lock_held_by(tid) {
            panic!("Thread {tid} exits while holding {lock:?}.");
        }
        #[cfg(feature = "userprog")]
        self.process_exit(tid);
        debug!("thread {tid} ({}) exits", self.th(tid).name());

        let guard = InterruptGuard::new(&self.machine);
        self.do_schedule(ThreadState::Dying);
        // Reached only on machines whose switch returns to the caller, which
        // then acts for the dispatched thread.
        guard.release(&self.machine);
    }

    /// Ends the running thread's turn with `status` and dispatches the next
    /// thread.
    pub(crate) fn do_schedule(&mut self, status: ThreadState) {
        assert_eq!(self.machine.interrupt_state(), InterruptState::Off);
        assert_eq!(self.th(self.current).state, ThreadState::Running);
        while let Some(victim) = self.destruction_req.pop() {
            trace!("reclaiming the stack of thread {}", victim.tid());
            self.machine.free_page(victim.into_stack_page());
        }
        self.th_mut(self.current).state = status;
        self.schedule();
    }

    fn next_thread_to_run(&mut self) -> Tid {
        let threads = &self.threads;
        self.ready
            .pop_max_by_key(|tid| threads[&tid].priority)
            .unwrap_or(self.idle)
    }

    fn schedule(&mut self) {
        let prev = self.current;
        let next = self.next_thread_to_run();
        assert_eq!(self.machine.interrupt_state(), InterruptState::Off);
        assert_ne!(self.th(prev).state, ThreadState::Running);

        let th = self.th_mut(next);
        assert_eq!(
            th.stack.magic(),
            super::THREAD_MAGIC,
            "Stack overflow detected! Thread {next} is selected with a corrupted canary."
        );
        th.state = ThreadState::Running;
        #[cfg(feature = "userprog")]
        if let Some(task) = th.task.as_mut() {
            task.activate();
        }
        self.thread_ticks = 0;
        if prev == next {
            return;
        }

        self.current = next;
        trace!("switch {prev} -> {next}");
        let mut retired = None;
        if self.th(prev).state == ThreadState::Dying {
            let dying: Box<Thread> = self
                .threads
                .remove(&prev)
                .unwrap_or_else(|| panic!("Thread {prev} is not registered."));
            // The dying thread is never resumed, so its last context is not
            // kept in the block.
            retired = Some(Context::new(dying.context.sp));
            self.destruction_req.push(dying);
        }
        let prev_ctx: *mut Context = match retired.as_mut() {
            Some(ctx) => ctx,
            None => &mut self.th_mut(prev).context,
        };
        let next_ctx: *mut Context = &mut self.th_mut(next).context;
        unsafe { self.machine.switch(&mut *prev_ctx, &mut *next_ctx) };
    }

    /// Returns true if a ready thread should run instead of the current one.
    pub(crate) fn outranked(&self) -> bool {
        let threads = &self.threads;
        match self.ready.peek_max_by_key(|tid| threads[&tid].priority) {
            Some(best) => {
                self.current == self.idle
                    || threads[&best].priority > threads[&self.current].priority
            }
            None => false,
        }
    }

    /// Gives the CPU to a ready thread that outranks the running one.
    ///
    /// Inside an interrupt handler the yield is deferred until
    /// [`Kernel::handle_interrupt`] returns from the handler.
    pub(crate) fn preempt(&mut self) {
        if self.outranked() {
            if self.machine.is_interrupt_context() {
                self.yield_on_return = true;
            } else {
                self.yield_now();
            }
        }
    }

    /// Accounts the current tick and enforces the time slice. Runs in the
    /// timer interrupt handler.
    pub(crate) fn thread_tick(&mut self) {
        if self.current == self.idle {
            self.stats.idle_ticks += 1;
        } else if self.runs_user_task() {
            self.stats.user_ticks += 1;
        } else {
            self.stats.kernel_ticks += 1;
        }

        self.thread_ticks += 1;
        if self.thread_ticks >= self.config.time_slice() {
            self.yield_on_return = true;
        }
    }

    #[cfg(feature = "userprog")]
    fn runs_user_task(&self) -> bool {
        self.th(self.current).task.is_some()
    }

    #[cfg(not(feature = "userprog"))]
    fn runs_user_task(&self) -> bool {
        false
    }

    /// Tick statistics since boot.
    pub fn stats(&self) -> ThreadStats {
        self.stats
    }

    /// Prints the tick statistics to the console.
    pub fn print_stats(&self) {
        println!("{}", self.stats);
    }
}
