//! A fixed size pool of queue node slots, addressed by index.
//!
//! Queue locks pass nodes from one acquirer to the next. Instead of passing
//! pointers to nodes that some thread may free at any time, the locks in this
//! crate pass slot indices of an arena owned by the lock itself. A slot is
//! never freed while the lock is alive, so a stale index is at worst a logic
//! error, never a dangling reference.

use alloc::boxed::Box;
use alloc::vec::Vec;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::cfg::atomic::AtomicUsize;

/// The number of slots tracked by one word of the occupancy bitmap.
const BITS: usize = usize::BITS as usize;

/// An index value that never addresses a slot.
pub const NONE: usize = usize::MAX;

pub struct Arena<T> {
    slots: Box<[CachePadded<T>]>,
    used: Box<[AtomicUsize]>,
}

impl<T> Arena<T> {
    /// Creates a new arena with `capacity` slots, of which the first
    /// `reserved` ones are marked as claimed from the start.
    pub fn new<F>(capacity: usize, reserved: usize, mut init: F) -> Self
    where
        F: FnMut(usize) -> T,
    {
        debug_assert!(reserved <= capacity);
        let slots = (0..capacity).map(|index| CachePadded::new(init(index))).collect();
        let words = capacity.div_ceil(BITS);
        let used = (0..words)
            .map(|word| {
                let start = word * BITS;
                let mask = (0..BITS)
                    .filter(|bit| {
                        let index = start + bit;
                        index < reserved || index >= capacity
                    })
                    .fold(0, |mask, bit| mask | 1 << bit);
                AtomicUsize::new(mask)
            })
            .collect::<Vec<_>>()
            .into_boxed_slice();
        Self { slots, used }
    }

    /// Returns the total number of slots.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Returns a shared reference to the slot at `index`.
    pub fn get(&self, index: usize) -> &T {
        &self.slots[index]
    }

    /// Claims a free slot, returning its index.
    ///
    /// Returns `None` if all slots are claimed.
    pub fn claim(&self) -> Option<usize> {
        for (word, used) in self.used.iter().enumerate() {
            let mut current = used.load(Relaxed);
            while current != usize::MAX {
                let bit = (!current).trailing_zeros() as usize;
                let new = current | 1 << bit;
                match used.compare_exchange_weak(current, new, Acquire, Relaxed) {
                    Ok(_) => return Some(word * BITS + bit),
                    Err(actual) => current = actual,
                }
            }
        }
        None
    }

    /// Returns the slot at `index` to the pool.
    pub fn reclaim(&self, index: usize) {
        let (word, bit) = (index / BITS, index % BITS);
        let prev = self.used[word].fetch_and(!(1 << bit), Release);
        debug_assert!(prev & 1 << bit != 0, "reclaimed a slot that was not claimed");
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::collections::BTreeSet;
    use std::sync::Arc;
    use std::thread;
    use std::vec::Vec;

    use super::Arena;

    #[test]
    fn claims_every_slot_once() {
        let arena = Arena::new(70, 0, |index| index);
        let claimed = (0..70).map(|_| arena.claim().unwrap()).collect::<BTreeSet<_>>();
        assert_eq!(claimed.len(), 70);
        assert!(claimed.iter().all(|&index| *arena.get(index) == index));
        assert_eq!(arena.claim(), None);
    }

    #[test]
    fn reserved_slots_are_skipped() {
        let arena = Arena::new(3, 1, |_| ());
        assert_eq!(arena.claim(), Some(1));
        assert_eq!(arena.claim(), Some(2));
        assert_eq!(arena.claim(), None);
    }

    #[test]
    fn reclaimed_slots_are_reused() {
        let arena = Arena::new(2, 0, |_| ());
        let first = arena.claim().unwrap();
        let second = arena.claim().unwrap();
        assert_eq!(arena.claim(), None);
        arena.reclaim(first);
        assert_eq!(arena.claim(), Some(first));
        arena.reclaim(second);
        assert_eq!(arena.claim(), Some(second));
    }

    #[test]
    fn concurrent_claims_are_disjoint() {
        const THREADS: usize = 8;
        const PER_THREAD: usize = 16;
        let arena = Arc::new(Arena::new(THREADS * PER_THREAD, 0, |_| ()));
        let handles = (0..THREADS)
            .map(|_| {
                let arena = Arc::clone(&arena);
                thread::spawn(move || {
                    (0..PER_THREAD).map(|_| arena.claim().unwrap()).collect::<Vec<_>>()
                })
            })
            .collect::<Vec<_>>();
        let mut all = BTreeSet::new();
        for handle in handles {
            for index in handle.join().unwrap() {
                assert!(all.insert(index));
            }
        }
        assert_eq!(all.len(), THREADS * PER_THREAD);
    }
}
