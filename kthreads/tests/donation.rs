//! Priority donation through locks.
mod common;

use common::*;
use kthreads::{
    sync::{Lock, WouldBlock},
    thread::{PRI_DEFAULT, ThreadState},
    KernelError,
};

/// A waiter lends its priority to the holder until the lock is released,
/// and then receives the lock together with the CPU.
#[test]
fn donate_one() {
    let mut k = boot();
    let main = k.tid();
    let lock = Lock::new(&mut k);
    lock.acquire(&mut k);

    let high = k.create("high", PRI_DEFAULT + 1, || {}).unwrap();
    assert_eq!(k.tid(), high);
    lock.acquire(&mut k);

    assert_eq!(k.tid(), main, "The waiter blocks and main resumes.");
    assert_eq!(k.get_priority(), PRI_DEFAULT + 1, "Main runs with the donated priority.");
    assert_eq!(k.current().base_priority(), PRI_DEFAULT);
    assert_eq!(k.current().donors().collect::<Vec<_>>(), [high]);
    assert_eq!(k.thread(high).unwrap().waiting_on(), Some(lock));
    k.validate();

    lock.release(&mut k);
    assert_eq!(k.tid(), high, "The lock is handed to the waiter, which preempts.");
    assert_eq!(lock.holder(&k), Some(high));
    assert_eq!(k.thread(main).unwrap().priority(), PRI_DEFAULT);
    assert_eq!(k.current().waiting_on(), None);
    k.validate();

    lock.release(&mut k);
    k.exit();
    assert_eq!(k.tid(), main);
    assert_eq!(k.get_priority(), PRI_DEFAULT);
    k.validate();
}

/// Releasing one lock withdraws only the donations received through it.
#[test]
fn donate_multiple() {
    let mut k = boot();
    let main = k.tid();
    let a = Lock::new(&mut k);
    let b = Lock::new(&mut k);
    a.acquire(&mut k);
    b.acquire(&mut k);

    let h1 = k.create("h1", PRI_DEFAULT + 1, || {}).unwrap();
    a.acquire(&mut k);
    let h2 = k.create("h2", PRI_DEFAULT + 2, || {}).unwrap();
    assert_eq!(k.tid(), h2);
    b.acquire(&mut k);
    assert_eq!(k.tid(), main);
    assert_eq!(k.get_priority(), PRI_DEFAULT + 2);
    k.validate();

    b.release(&mut k);
    assert_eq!(k.tid(), h2);
    assert_eq!(k.thread(main).unwrap().priority(), PRI_DEFAULT + 1);
    b.release(&mut k);
    k.exit();

    assert_eq!(k.tid(), main);
    assert_eq!(k.get_priority(), PRI_DEFAULT + 1);
    a.release(&mut k);
    assert_eq!(k.tid(), h1);
    assert_eq!(k.thread(main).unwrap().priority(), PRI_DEFAULT);
    k.validate();
}

/// Donation follows the chain of holders: H waits for M, which waits for
/// main.
#[test]
fn donate_nest() {
    let mut k = boot();
    let main = k.tid();
    let a = Lock::new(&mut k);
    let b = Lock::new(&mut k);
    a.acquire(&mut k);

    let m = k.create("medium", PRI_DEFAULT + 1, || {}).unwrap();
    b.acquire(&mut k);
    a.acquire(&mut k);
    assert_eq!(k.tid(), main);
    assert_eq!(k.get_priority(), PRI_DEFAULT + 1);

    let h = k.create("high", PRI_DEFAULT + 2, || {}).unwrap();
    assert_eq!(k.tid(), h);
    b.acquire(&mut k);
    assert_eq!(k.tid(), main);
    assert_eq!(k.get_priority(), PRI_DEFAULT + 2, "Donation must reach main through medium.");
    assert_eq!(k.thread(m).unwrap().priority(), PRI_DEFAULT + 2);
    assert_eq!(k.thread(h).unwrap().state(), ThreadState::Blocked);
    k.validate();

    a.release(&mut k);
    assert_eq!(k.tid(), m);
    assert_eq!(k.get_priority(), PRI_DEFAULT + 2);
    assert_eq!(k.thread(main).unwrap().priority(), PRI_DEFAULT);

    a.release(&mut k);
    assert_eq!(k.tid(), m);
    b.release(&mut k);
    assert_eq!(k.tid(), h);
    assert_eq!(k.thread(m).unwrap().priority(), PRI_DEFAULT + 1);
    b.release(&mut k);
    k.exit();

    assert_eq!(k.tid(), m);
    k.exit();
    assert_eq!(k.tid(), main);
    k.validate();
}

/// The waiters left behind on a lock donate to its next holder.
#[test]
fn remaining_waiters_donate_to_new_holder() {
    let mut k = boot();
    let main = k.tid();
    let lock = Lock::new(&mut k);
    lock.acquire(&mut k);

    let w1 = k.create("w1", PRI_DEFAULT + 1, || {}).unwrap();
    lock.acquire(&mut k);
    let w3 = k.create("w3", PRI_DEFAULT + 3, || {}).unwrap();
    lock.acquire(&mut k);
    assert_eq!(k.tid(), main);
    assert_eq!(lock.waiters(&k), 2);

    lock.release(&mut k);
    assert_eq!(k.tid(), w3);
    assert_eq!(k.current().donors().collect::<Vec<_>>(), [w1]);
    k.set_priority(PRI_DEFAULT);
    assert_eq!(k.tid(), w3, "Donations keep the holder above the base priority.");
    assert_eq!(k.get_priority(), PRI_DEFAULT + 1);
    k.validate();

    lock.release(&mut k);
    assert_eq!(k.tid(), w1);
    assert_eq!(k.thread(w3).unwrap().priority(), PRI_DEFAULT);
    lock.release(&mut k);
    k.exit();
    // w3 and main share a priority; main became ready first.
    assert_eq!(k.tid(), main);
    assert_eq!(k.ready_threads(), [w3]);
    k.yield_now();
    assert_eq!(k.tid(), w3);
    k.exit();
    assert_eq!(k.tid(), main);
    k.validate();
}

/// Lowering the base priority of a holder keeps the donated priority.
#[test]
fn donate_lower() {
    let mut k = boot();
    let main = k.tid();
    let lock = Lock::new(&mut k);
    lock.acquire(&mut k);
    let high = k.create("high", PRI_DEFAULT + 10, || {}).unwrap();
    lock.acquire(&mut k);

    k.set_priority(PRI_DEFAULT - 10);
    assert_eq!(k.tid(), main);
    assert_eq!(k.get_priority(), PRI_DEFAULT + 10);

    lock.release(&mut k);
    assert_eq!(k.tid(), high);
    assert_eq!(k.thread(main).unwrap().priority(), PRI_DEFAULT - 10);
}

#[test]
fn try_acquire_does_not_wait() {
    let mut k = boot();
    let lock = Lock::new(&mut k);
    assert_eq!(lock.try_acquire(&mut k), Ok(()));
    assert!(lock.held_by_current(&k));

    let other = k.create("other", PRI_DEFAULT + 1, || {}).unwrap();
    assert_eq!(k.tid(), other);
    assert_eq!(lock.try_acquire(&mut k), Err(WouldBlock));
    assert!(!lock.held_by_current(&k));
    assert_eq!(k.current().donors().count(), 0);
}

#[test]
fn destroy_requires_free_lock() {
    let mut k = boot();
    let lock = Lock::new(&mut k);
    lock.acquire(&mut k);
    assert_eq!(lock.destroy(&mut k), Err(KernelError::Busy));
    lock.release(&mut k);
    assert_eq!(lock.destroy(&mut k), Ok(()));
}

/// Two threads that each wait for the lock the other holds.
#[test]
#[should_panic(expected = "Deadlock")]
fn cycle_of_waits_is_detected() {
    let mut k = boot();
    let a = Lock::new(&mut k);
    let b = Lock::new(&mut k);
    a.acquire(&mut k);

    k.create("other", PRI_DEFAULT + 1, || {}).unwrap();
    b.acquire(&mut k);
    a.acquire(&mut k);
    b.acquire(&mut k);
}

#[test]
#[should_panic(expected = "twice")]
fn acquire_twice() {
    let mut k = boot();
    let lock = Lock::new(&mut k);
    lock.acquire(&mut k);
    lock.acquire(&mut k);
}

#[test]
#[should_panic(expected = "does not hold")]
fn release_by_non_holder() {
    let mut k = boot();
    let lock = Lock::new(&mut k);
    lock.acquire(&mut k);
    k.create("other", PRI_DEFAULT + 1, || {}).unwrap();
    lock.release(&mut k);
}

#[test]
#[should_panic(expected = "while holding")]
fn exit_while_holding() {
    let mut k = boot();
    let lock = Lock::new(&mut k);
    k.create("holder", PRI_DEFAULT + 1, || {}).unwrap();
    lock.acquire(&mut k);
    k.exit();
}
