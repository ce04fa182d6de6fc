//! Spinlock.
//!
//! The thread core runs on a single CPU, so a spinlock only ever guards state
//! that is shared with code outside the scheduler's exclusive context: the
//! registered console.
//!
//! A guard is released with an explicit [`SpinLockGuard::unlock`]. A guard
//! that is dropped while still locked panics and names the place that took
//! the lock.

use core::{
    cell::UnsafeCell,
    ops::{Deref, DerefMut},
    panic::Location,
    sync::atomic::{AtomicBool, Ordering},
};
use crossbeam_utils::Backoff;

/// Returned by non-blocking operations that could only succeed by waiting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WouldBlock;

/// A busy-waiting lock around a `T`.
///
/// ```
/// use abyss::spinlock::SpinLock;
///
/// let sink = SpinLock::new(Vec::new());
/// let mut guard = sink.lock();
/// guard.push("boot");
/// guard.unlock();
/// assert_eq!(sink.into_inner(), ["boot"]);
/// ```
pub struct SpinLock<T: ?Sized> {
    held: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: ?Sized + Send> Send for SpinLock<T> {}
unsafe impl<T: ?Sized + Send> Sync for SpinLock<T> {}

impl<T> SpinLock<T> {
    /// A free lock around `data`.
    pub const fn new(data: T) -> Self {
        Self {
            held: AtomicBool::new(false),
            data: UnsafeCell::new(data),
        }
    }

    /// Unwraps the protected value.
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> SpinLock<T> {
    fn try_take(&self) -> bool {
        self.held
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Spins until the lock is free and takes it.
    #[track_caller]
    pub fn lock(&self) -> SpinLockGuard<'_, T> {
        let backoff = Backoff::new();
        while !self.try_take() {
            backoff.snooze();
        }
        SpinLockGuard {
            owner: Location::caller(),
            lock: self,
        }
    }

    /// Takes the lock if it is free.
    ///
    /// # Errors
    /// [`WouldBlock`] if the lock is held.
    #[track_caller]
    pub fn try_lock(&self) -> Result<SpinLockGuard<'_, T>, WouldBlock> {
        let backoff = Backoff::new();
        // compare_exchange_weak may fail spuriously on a free lock.
        while !self.held.load(Ordering::Relaxed) {
            if self.try_take() {
                return Ok(SpinLockGuard {
                    owner: Location::caller(),
                    lock: self,
                });
            }
            backoff.spin();
        }
        Err(WouldBlock)
    }
}

/// Access to the data of a held [`SpinLock`].
pub struct SpinLockGuard<'a, T: ?Sized + 'a> {
    owner: &'static Location<'static>,
    lock: &'a SpinLock<T>,
}

impl<T: ?Sized> Deref for SpinLockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for SpinLockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> SpinLockGuard<'_, T> {
    /// Frees the lock.
    pub fn unlock(self) {
        self.lock.held.store(false, Ordering::Release);
        core::mem::forget(self);
    }
}

impl<T: ?Sized> Drop for SpinLockGuard<'_, T> {
    fn drop(&mut self) {
        panic!(
            "SpinLockGuard dropped without `.unlock()`; taken at {}.",
            self.owner
        );
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn try_lock_would_block_while_held() {
        let lock = SpinLock::new(1);
        let guard = lock.lock();
        assert_eq!(lock.try_lock().err(), Some(WouldBlock));
        guard.unlock();

        let mut guard = lock.try_lock().expect("lock is free");
        *guard = 5;
        guard.unlock();
        assert_eq!(lock.into_inner(), 5);
    }

    #[test]
    #[should_panic(expected = "without `.unlock()`")]
    fn dropping_guard_panics() {
        let lock = SpinLock::new(());
        let _guard = lock.lock();
    }
}
