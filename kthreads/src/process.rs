//! Process bookkeeping between parent and child threads.
//!
//! Every thread remembers the thread that created it, and a parent keeps one
//! record per child. The record carries two handshakes:
//!
//! - *fork*: the parent waits with [`Kernel::wait_fork`] until the child
//!   reports with [`Kernel::fork_done`] that it finished copying the
//!   parent's state (or until the child exits).
//! - *exit*: when the child exits, its exit status is stored in the record and
//!   a parent blocked in [`Kernel::wait`] is woken. The status outlives the
//!   child's control block and is collected at most once.
//!
//! When a parent exits first, its children are orphaned and their statuses
//! are discarded.
use crate::{Kernel, KernelError, sync::Semaphore, thread::Tid};
use abyss::Machine;
use alloc::{collections::btree_map::BTreeMap, vec::Vec};
use log::debug;

pub(crate) struct ProcessInfo {
    pub(crate) parent: Option<Tid>,
    pub(crate) children: BTreeMap<Tid, ChildRecord>,
    pub(crate) exit_status: i32,
}

impl ProcessInfo {
    pub(crate) fn new() -> Self {
        Self {
            parent: None,
            children: BTreeMap::new(),
            exit_status: -1,
        }
    }
}

pub(crate) struct ChildRecord {
    fork_sema: Semaphore,
    exit_sema: Semaphore,
    forked: bool,
    exit_status: Option<i32>,
}

/// Outcome of [`Kernel::try_wait`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildStatus {
    /// The child exited with this status. The status is now collected.
    Exited(i32),
    /// The child is still running. Nothing was collected.
    Running,
}

impl<M: Machine> Kernel<M> {
    /// Creates the record of `child` in `parent`.
    pub(crate) fn adopt(&mut self, parent: Tid, child: Tid) {
        let record = ChildRecord {
            fork_sema: Semaphore::new(self, 0),
            exit_sema: Semaphore::new(self, 0),
            forked: false,
            exit_status: None,
        };
        self.th_mut(parent).process.children.insert(child, record);
        self.th_mut(child).process.parent = Some(parent);
    }

    /// Parent of the running thread, unless it has exited.
    pub fn parent(&self) -> Option<Tid> {
        self.current().process.parent
    }

    /// Children of the running thread whose status is not yet collected.
    pub fn children(&self) -> Vec<Tid> {
        self.current().process.children.keys().copied().collect()
    }

    /// Exit status of the running thread, `-1` unless set.
    pub fn exit_status(&self) -> i32 {
        self.current().process.exit_status
    }

    /// Sets the status that [`Kernel::exit`] reports to the parent.
    pub fn set_exit_status(&mut self, status: i32) {
        let tid = self.current().tid();
        self.th_mut(tid).process.exit_status = status;
    }

    /// Reports to the parent that the running thread finished forking.
    ///
    /// # Errors
    /// [`KernelError::OperationNotPermitted`] if the running thread has no
    /// parent or already reported.
    pub fn fork_done(&mut self) -> Result<(), KernelError> {
        let tid = self.current().tid();
        let parent = self
            .th(tid)
            .process
            .parent
            .ok_or(KernelError::OperationNotPermitted)?;
        let record = self
            .th_mut(parent)
            .process
            .children
            .get_mut(&tid)
            .ok_or(KernelError::OperationNotPermitted)?;
        if record.forked {
            return Err(KernelError::OperationNotPermitted);
        }
        record.forked = true;
        let sema = record.fork_sema;
        sema.up(self);
        Ok(())
    }

    /// Waits until `child` reports the end of its fork or exits.
    ///
    /// # Errors
    /// [`KernelError::NoSuchEntry`] if `child` is not a child of the running
    /// thread.
    pub fn wait_fork(&mut self, child: Tid) -> Result<(), KernelError> {
        let tid = self.current().tid();
        let sema = self.record(tid, child)?.fork_sema;
        sema.down(self);
        Ok(())
    }

    /// Collects the exit status of `child` if it has exited, without
    /// blocking.
    ///
    /// # Errors
    /// [`KernelError::NoSuchEntry`] if `child` is not a child of the running
    /// thread, or its status was already collected.
    pub fn try_wait(&mut self, child: Tid) -> Result<ChildStatus, KernelError> {
        let tid = self.current().tid();
        self.collect(tid, child)
    }

    /// Waits until `child` exits and collects its exit status.
    ///
    /// The status is forgotten once collected. A child that has already
    /// exited is collected without blocking.
    ///
    /// On a machine whose switch returns to the caller, which then acts for
    /// the dispatched thread (the host `SimMachine`), a `wait` that blocks
    /// cannot complete in the same call. It returns [`KernelError::Busy`] on behalf
    /// of the dispatched thread, and the waiting thread collects the status
    /// with [`Kernel::try_wait`] once it runs again.
    ///
    /// # Errors
    /// - [`KernelError::NoSuchEntry`] if `child` is not a child of the
    ///   running thread, or its status was already collected.
    /// - [`KernelError::Busy`] as described above.
    pub fn wait(&mut self, child: Tid) -> Result<i32, KernelError> {
        let tid = self.current().tid();
        let exit_sema = match self.collect(tid, child)? {
            ChildStatus::Exited(status) => return Ok(status),
            ChildStatus::Running => self.record(tid, child)?.exit_sema,
        };
        exit_sema.down(self);
        if self.current != tid {
            return Err(KernelError::Busy);
        }
        match self.collect(tid, child)? {
            ChildStatus::Exited(status) => Ok(status),
            ChildStatus::Running => {
                unreachable!("Thread {tid} woke before child {child} exited.")
            }
        }
    }

    fn record(&self, parent: Tid, child: Tid) -> Result<&ChildRecord, KernelError> {
        self.th(parent)
            .process
            .children
            .get(&child)
            .ok_or(KernelError::NoSuchEntry)
    }

    fn collect(&mut self, parent: Tid, child: Tid) -> Result<ChildStatus, KernelError> {
        let Some(status) = self.record(parent, child)?.exit_status else {
            return Ok(ChildStatus::Running);
        };
        if let Some(record) = self.th_mut(parent).process.children.remove(&child) {
            self.forget(&record);
        }
        Ok(ChildStatus::Exited(status))
    }

    fn forget(&mut self, record: &ChildRecord) {
        self.objects.semaphores.remove(&record.fork_sema.id);
        self.objects.semaphores.remove(&record.exit_sema.id);
    }

    /// Tears down the process side of the exiting thread `tid`.
    pub(crate) fn process_exit(&mut self, tid: Tid) {
        let th = self.th_mut(tid);
        let status = th.process.exit_status;
        if let Some(task) = th.task.as_mut() {
            task.exit(status);
        }
        let parent = th.process.parent.take();
        let children = core::mem::take(&mut th.process.children);

        for (child, record) in children {
            if let Some(th) = self.threads.get_mut(&child) {
                th.process.parent = None;
            }
            self.forget(&record);
        }

        let Some(parent) = parent else {
            return;
        };
        let Some(record) = self
            .threads
            .get_mut(&parent)
            .and_then(|th| th.process.children.get_mut(&tid))
        else {
            return;
        };
        record.exit_status = Some(status);
        let notify_fork = !core::mem::replace(&mut record.forked, true);
        let (fork_sema, exit_sema) = (record.fork_sema, record.exit_sema);
        if notify_fork {
            fork_sema.wake_one(self);
        }
        exit_sema.wake_one(self);
        debug!("thread {tid} reports exit status {status} to {parent}");
    }
}
