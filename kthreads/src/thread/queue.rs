//! Ordered wait queue.
//!
//! Threads waiting for the CPU, for a semaphore, for a lock or for a wakeup
//! tick all wait in a [`WaitQueue`]. The queue only remembers arrival order;
//! the rank of an entry is supplied by the caller when an entry is taken out.
//! Priorities change while threads wait (a waiter may receive a donation), so
//! ranking at removal time always sees the current values.
//!
//! Among entries of equal rank, the one that arrived first wins.
use super::Tid;
use alloc::collections::VecDeque;

/// A queue of thread ids in arrival order.
#[derive(Clone, Debug, Default)]
pub struct WaitQueue {
    entries: VecDeque<Tid>,
}

impl WaitQueue {
    /// Creates an empty queue.
    pub const fn new() -> Self {
        Self {
            entries: VecDeque::new(),
        }
    }

    /// Appends `tid` to the queue.
    pub fn push(&mut self, tid: Tid) {
        debug_assert!(!self.contains(tid), "Thread {tid} is queued twice.");
        self.entries.push_back(tid);
    }

    /// Removes `tid` from the queue. Returns false if it was not queued.
    pub fn remove(&mut self, tid: Tid) -> bool {
        match self.entries.iter().position(|t| *t == tid) {
            Some(idx) => {
                self.entries.remove(idx);
                true
            }
            None => false,
        }
    }

    /// Returns true if `tid` is queued.
    pub fn contains(&self, tid: Tid) -> bool {
        self.entries.contains(&tid)
    }

    /// Number of queued threads.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no thread is queued.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over the queued threads in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = Tid> + '_ {
        self.entries.iter().copied()
    }

    fn position_max<K: Ord>(&self, key: impl Fn(Tid) -> K) -> Option<usize> {
        let mut best: Option<(usize, K)> = None;
        for (idx, tid) in self.entries.iter().enumerate() {
            let k = key(*tid);
            match &best {
                Some((_, b)) if *b >= k => {}
                _ => best = Some((idx, k)),
            }
        }
        best.map(|(idx, _)| idx)
    }

    /// The earliest-arrived entry with the largest `key`.
    pub fn peek_max_by_key<K: Ord>(&self, key: impl Fn(Tid) -> K) -> Option<Tid> {
        self.position_max(key).map(|idx| self.entries[idx])
    }

    /// Removes and returns the earliest-arrived entry with the largest `key`.
    pub fn pop_max_by_key<K: Ord>(&mut self, key: impl Fn(Tid) -> K) -> Option<Tid> {
        self.position_max(key)
            .and_then(|idx| self.entries.remove(idx))
    }

    /// Keeps only the entries for which `f` returns true.
    pub fn retain(&mut self, mut f: impl FnMut(Tid) -> bool) {
        self.entries.retain(|tid| f(*tid));
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use core::cmp::Reverse;

    fn rank(tid: Tid) -> u8 {
        match tid {
            1 | 4 => 10,
            2 | 5 => 30,
            _ => 20,
        }
    }

    #[test]
    fn max_first_fifo_among_equals() {
        let mut q = WaitQueue::new();
        for tid in [1, 2, 3, 4, 5, 6] {
            q.push(tid);
        }
        let order: alloc::vec::Vec<Tid> =
            core::iter::from_fn(|| q.pop_max_by_key(rank)).collect();
        assert_eq!(order, [2, 5, 3, 6, 1, 4]);
        assert!(q.is_empty());
    }

    #[test]
    fn ranks_are_read_at_removal() {
        let mut q = WaitQueue::new();
        q.push(7);
        q.push(8);
        let boosted = 8;
        assert_eq!(q.peek_max_by_key(|tid| tid == boosted), Some(8));
        assert_eq!(q.peek_max_by_key(|_| 0), Some(7));
        assert_eq!(q.pop_max_by_key(|tid| Reverse(tid)), Some(7));
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn remove_and_retain() {
        let mut q = WaitQueue::new();
        q.push(1);
        q.push(2);
        q.push(3);
        assert!(q.remove(2));
        assert!(!q.remove(2));
        assert!(!q.contains(2));
        q.retain(|tid| tid != 1);
        assert_eq!(q.iter().collect::<alloc::vec::Vec<_>>(), [3]);
        assert_eq!(WaitQueue::new().pop_max_by_key(rank), None);
    }
}
