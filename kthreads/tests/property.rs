//! Randomized schedules checked against the scheduler invariants.
mod common;

use common::*;
use kthreads::{
    sync::{Lock, Semaphore},
    thread::{PRI_MAX, PRI_MIN, ThreadState},
};
use rand::{Rng, SeedableRng, rngs::StdRng};

const STEPS: usize = 2_000;
const MAX_THREADS: usize = 16;

/// The running thread is never outranked by a ready thread, and the idle
/// thread runs only when nothing is ready.
fn check_dispatch(k: &SimKernel) {
    k.validate();
    let best_ready = k
        .ready_threads()
        .into_iter()
        .map(|tid| k.thread(tid).unwrap().priority())
        .max();
    if k.tid() == k.idle_tid() {
        assert_eq!(best_ready, None, "Idle runs while threads are ready.");
    } else if let Some(best) = best_ready {
        assert!(
            k.get_priority() >= best,
            "Thread {} runs at {} while a thread of priority {best} is ready.",
            k.tid(),
            k.get_priority()
        );
    }
}

fn run(seed: u64) {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut k = boot();
    let main = k.tid();
    let semas = [Semaphore::new(&mut k, 0), Semaphore::new(&mut k, 1)];
    // Locks are always taken in index order, so waits never form a cycle.
    let locks = [Lock::new(&mut k), Lock::new(&mut k)];

    for _ in 0..STEPS {
        let tid = k.tid();
        let held: Vec<usize> = (0..locks.len())
            .filter(|i| locks[*i].holder(&k) == Some(tid))
            .collect();

        if tid == k.idle_tid() {
            if rng.gen_bool(0.5) {
                tick(&mut k);
            } else {
                semas[rng.gen_range(0..semas.len())].up(&mut k);
            }
            check_dispatch(&k);
            continue;
        }

        match rng.gen_range(0..10) {
            0 if k.live_threads() < MAX_THREADS => {
                let priority = rng.gen_range(PRI_MIN..=PRI_MAX);
                k.create("random", priority, || {}).unwrap();
            }
            1 => k.yield_now(),
            2 => k.set_priority(rng.gen_range(PRI_MIN..=PRI_MAX)),
            3 => tick(&mut k),
            4 => semas[rng.gen_range(0..semas.len())].up(&mut k),
            5 => semas[rng.gen_range(0..semas.len())].down(&mut k),
            6 => {
                let next = held.last().map_or(0, |i| i + 1);
                if next < locks.len() {
                    locks[rng.gen_range(next..locks.len())].acquire(&mut k);
                }
            }
            7 => {
                if let Some(i) = held.last() {
                    locks[*i].release(&mut k);
                }
            }
            8 => k.sleep_for(rng.gen_range(1..5)),
            9 if tid != main && held.is_empty() => k.exit(),
            _ => tick(&mut k),
        }
        check_dispatch(&k);
        assert_eq!(k.current().state(), ThreadState::Running);
    }
}

#[test]
fn random_schedules_keep_invariants() {
    for seed in 0..8 {
        run(seed);
    }
}
