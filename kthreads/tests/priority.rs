//! Strict priority scheduling and round robin among equals.
mod common;

use common::*;
use kthreads::{
    sync::Semaphore,
    thread::{PRI_DEFAULT, PRI_MAX, PRI_MIN, ThreadBuilder, ThreadState},
};

/// A new thread that outranks its creator runs before `create` returns.
#[test]
fn create_preempts_lower_creator() {
    let mut k = boot();
    let main = k.tid();
    let hi = k.create("high", PRI_DEFAULT + 1, || {}).unwrap();

    assert_eq!(k.tid(), hi, "A higher-priority thread must run immediately.");
    assert_eq!(k.ready_threads(), [main]);
    assert_eq!(k.thread(main).unwrap().state(), ThreadState::Ready);
    k.validate();
}

#[test]
fn create_lower_or_equal_does_not_preempt() {
    let mut k = boot();
    let main = k.tid();
    let lo = k.create("low", PRI_DEFAULT - 1, || {}).unwrap();
    let eq = k.create("equal", PRI_DEFAULT, || {}).unwrap();

    assert_eq!(k.tid(), main);
    assert_eq!(k.ready_threads(), [lo, eq]);
    k.validate();
}

/// The entry function runs on the first dispatch only.
#[test]
fn entry_runs_once_on_first_dispatch() {
    use std::sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    };

    let mut k = boot();
    let runs = Arc::new(AtomicUsize::new(0));
    let counter = runs.clone();
    let t = k
        .create("once", PRI_DEFAULT, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
    assert_eq!(runs.load(Ordering::SeqCst), 0, "Not dispatched yet.");

    k.yield_now();
    assert_eq!(k.tid(), t);
    k.yield_now();
    k.yield_now();
    assert_eq!(runs.load(Ordering::SeqCst), 1);
}

#[test]
fn lowering_priority_yields() {
    let mut k = boot();
    let main = k.tid();
    let w = k.create("worker", PRI_DEFAULT - 1, || {}).unwrap();
    assert_eq!(k.tid(), main);

    k.set_priority(PRI_DEFAULT - 2);
    assert_eq!(k.tid(), w, "Main no longer has the highest priority.");
    k.exit();

    assert_eq!(k.tid(), main);
    assert_eq!(k.get_priority(), PRI_DEFAULT - 2);
    k.validate();
}

#[test]
fn raising_priority_keeps_cpu() {
    let mut k = boot();
    let main = k.tid();
    k.create("worker", PRI_DEFAULT, || {}).unwrap();
    k.set_priority(PRI_MAX);
    assert_eq!(k.tid(), main);
    assert_eq!(k.get_priority(), PRI_MAX);
    assert_eq!(k.current().base_priority(), PRI_MAX);
}

/// Threads of equal priority run in the order they became ready.
#[test]
fn yield_round_robin_among_equals() {
    let mut k = boot();
    let main = k.tid();
    let a = k.create("a", PRI_DEFAULT, || {}).unwrap();
    let b = k.create("b", PRI_DEFAULT, || {}).unwrap();
    let c = k.create("c", PRI_DEFAULT, || {}).unwrap();

    let mut order = Vec::new();
    for _ in 0..8 {
        k.yield_now();
        order.push(k.tid());
        k.validate();
    }
    assert_eq!(order, [a, b, c, main, a, b, c, main]);
}

#[test]
fn yield_alone_keeps_running() {
    let mut k = boot();
    let main = k.tid();
    let switches = k.machine().switch_count();
    k.yield_now();
    assert_eq!(k.tid(), main);
    assert_eq!(k.machine().switch_count(), switches, "No switch to itself.");
}

#[test]
fn yield_never_picks_lower_priority() {
    let mut k = boot();
    let main = k.tid();
    k.create("low", PRI_MIN, || {}).unwrap();
    k.yield_now();
    assert_eq!(k.tid(), main);
}

/// A thread of equal priority takes over once the time slice expires.
#[test]
fn time_slice_rotates_equals() {
    let mut k = boot();
    let main = k.tid();
    let peer = k.create("peer", PRI_DEFAULT, || {}).unwrap();

    ticks(&mut k, 3);
    assert_eq!(k.tid(), main, "The slice is four ticks long.");
    tick(&mut k);
    assert_eq!(k.tid(), peer);
    ticks(&mut k, 4);
    assert_eq!(k.tid(), main);
    assert_eq!(k.stats().kernel_ticks, 8);
    k.validate();
}

#[test]
fn time_slice_is_configurable() {
    use abyss::sim::SimMachine;
    use kthreads::{Kernel, SystemConfiguration};

    let config = SystemConfiguration::builder().time_slice(1).build().unwrap();
    let mut k = Kernel::new(SimMachine::new(), config).unwrap();
    let main = k.tid();
    let peer = k.create("peer", PRI_DEFAULT, || {}).unwrap();
    tick(&mut k);
    assert_eq!(k.tid(), peer);
    tick(&mut k);
    assert_eq!(k.tid(), main);
}

/// Ten threads wait on a semaphore; each `up` hands the unit to the
/// highest-priority waiter, which runs at once.
#[test]
fn semaphore_wakes_in_priority_order() {
    let mut k = boot();
    let main = k.tid();
    k.set_priority(PRI_MIN);
    let sema = Semaphore::new(&mut k, 0);

    for i in 0..10u8 {
        let priority = PRI_DEFAULT - (i + 3) % 10 - 1;
        let t = ThreadBuilder::new(format!("priority {priority}"))
            .priority(priority)
            .spawn(&mut k, || {})
            .unwrap();
        assert_eq!(k.tid(), t);
        sema.down(&mut k);
        assert_eq!(k.tid(), main);
    }
    assert_eq!(sema.waiters(&k), 10);

    let mut woken = Vec::new();
    for _ in 0..10 {
        sema.up(&mut k);
        assert_ne!(k.tid(), main, "The woken thread must preempt main.");
        woken.push(k.get_priority());
        k.exit();
        assert_eq!(k.tid(), main);
        k.validate();
    }
    let expected: Vec<u8> = (21..=30).rev().collect();
    assert_eq!(woken, expected);
}

#[test]
#[should_panic(expected = "out of range")]
fn set_priority_out_of_range() {
    let mut k = boot();
    k.set_priority(PRI_MAX + 1);
}

#[test]
#[should_panic(expected = "out of range")]
fn create_priority_out_of_range() {
    let mut k = boot();
    let _ = k.create("bad", PRI_MAX + 1, || {});
}
