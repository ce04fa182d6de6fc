//! Task trait for interacting with the user process a thread runs.

/// Represents a **task** executed by a thread.
///
/// A thread created with [`ThreadBuilder::attach_task`] runs a user process.
/// The scheduler calls back into the task at the two points where the
/// process layer must act: when the thread gets the CPU, and when it exits.
/// Ticks spent in such a thread are accounted as user ticks.
///
/// [`ThreadBuilder::attach_task`]: crate::thread::ThreadBuilder::attach_task
pub trait Task: Send {
    /// Called each time the thread is dispatched, before it resumes.
    ///
    /// Implementations load the task's page table here.
    fn activate(&mut self) {}

    /// Called once when the thread exits, before it is marked dying.
    ///
    /// Implementations release the process resources (address space, open
    /// files) here.
    #[allow(unused_variables)]
    fn exit(&mut self, status: i32) {}
}

impl Task for () {}
