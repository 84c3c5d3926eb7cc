//! The compact NUMA-aware (CNA) queue lock.
//!
//! CNA is an MCS lock whose releases prefer waiters on the releaser's own
//! NUMA node. When the lock holder finds that its immediate successor runs on
//! another node, it looks further down the queue for a waiter on its own node.
//! If it finds one, it moves the waiters it skipped to a secondary queue and
//! hands the lock over to the local waiter. The secondary queue travels along
//! with the lock, encoded in the flag the next holder was spinning on.
//!
//! Local hand-offs are bounded: after `local_handoff_limit` of them in a row,
//! the next release hands the lock to the head of the secondary queue, or to
//! the next waiter if there is no secondary queue, whatever its node. A waiter
//! on a remote node is therefore served within `local_handoff_limit + 1`
//! hand-offs of being skipped.
//!
//! Waiters spin on their own node, which is only written to by the thread
//! that grants them the lock. Nodes are slots of an arena owned by the lock,
//! and queue links are slot indices.

use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::arena::{Arena, NONE};
use crate::cfg::{self, atomic::fence, atomic::AtomicU32, atomic::AtomicUsize};
use crate::error::NodeError;
use crate::lock::RawLock;
use crate::numa::{Topology, Uniform};
use crate::relax::{Relax, Spin};

/// The default number of consecutive local hand-offs before a hand-off to a
/// remote node is forced.
pub const DEFAULT_LOCAL_HANDOFFS: u32 = 64;

/// The default number of nodes a [`CnaLock`] can hand out at once.
pub const DEFAULT_CNA_CAPACITY: usize = 128;

/// The value of `spin` while a node waits.
const WAITING: usize = 0;

/// The value of `spin` once a node holds the lock, with no secondary queue.
const GRANTED: usize = 1;

/// The value of `spin` once a node holds the lock, along with the secondary
/// queue starting at slot `head`.
const fn granted_with(head: usize) -> usize {
    head + 2
}

/// The head of the secondary queue carried by `spin`, if any.
const fn secondary_head(spin: usize) -> Option<usize> {
    if spin > GRANTED {
        Some(spin - 2)
    } else {
        None
    }
}

struct Slot {
    spin: AtomicUsize,
    next: AtomicUsize,
    // Only meaningful on the head of a secondary queue.
    sec_tail: AtomicUsize,
    numa: AtomicUsize,
}

impl Slot {
    fn new() -> Self {
        Self {
            spin: AtomicUsize::new(WAITING),
            next: AtomicUsize::new(NONE),
            sec_tail: AtomicUsize::new(NONE),
            numa: AtomicUsize::new(0),
        }
    }
}

/// The configuration of a [`CnaLock`].
///
/// # Example
///
/// ```
/// use qlocks::cna::{CnaConfig, CnaLock};
/// use qlocks::numa::Uniform;
///
/// let config = CnaConfig::new().capacity(16).local_handoff_limit(8);
/// let lock = CnaLock::<qlocks::relax::Spin>::with_config(config, Uniform);
/// assert_eq!(lock.capacity(), 16);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CnaConfig {
    capacity: usize,
    local_handoff_limit: u32,
}

impl CnaConfig {
    /// Returns the default configuration: [`DEFAULT_CNA_CAPACITY`] nodes and
    /// [`DEFAULT_LOCAL_HANDOFFS`] local hand-offs.
    pub const fn new() -> Self {
        Self { capacity: DEFAULT_CNA_CAPACITY, local_handoff_limit: DEFAULT_LOCAL_HANDOFFS }
    }

    /// Sets the number of nodes the lock can hand out at once, at least one.
    #[must_use]
    pub const fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity;
        self
    }

    /// Sets how many hand-offs in a row may stay on the releaser's NUMA node.
    ///
    /// Zero disables NUMA awareness: the lock behaves like an MCS lock.
    #[must_use]
    pub const fn local_handoff_limit(mut self, limit: u32) -> Self {
        self.local_handoff_limit = limit;
        self
    }
}

impl Default for CnaConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A compact NUMA-aware queue lock, with a bounded pool of nodes.
///
/// FIFO among waiters of a same NUMA node. Waiters of other nodes may be
/// overtaken, by at most the configured number of local hand-offs at a time.
///
/// The NUMA node of an acquirer is decided when its [`CnaNode`] is created,
/// by the lock's [`Topology`] (see [`RawLock::node`]), or explicitly with
/// [`CnaLock::node_on`].
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use qlocks::cna::{CnaConfig, CnaLock};
/// use qlocks::numa::Interleaved;
/// use qlocks::relax::Yield;
///
/// type Lock = CnaLock<Yield, Interleaved>;
///
/// let lock = Lock::with_config(CnaConfig::new(), Interleaved::new(2));
/// let mutex = Arc::new(qlocks::Mutex::with_lock(0, lock));
/// let handles = (0..4)
///     .map(|_| Arc::clone(&mutex))
///     .map(|mutex| thread::spawn(move || mutex.lock_then(|data| *data += 1)))
///     .collect::<Vec<_>>();
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert_eq!(mutex.lock_then(|data| *data), 4);
/// ```
pub struct CnaLock<R = Spin, T = Uniform> {
    tail: CachePadded<AtomicUsize>,
    // Consecutive local hand-offs, only accessed by the lock holder.
    handoffs: AtomicU32,
    local_handoff_limit: u32,
    slots: Arena<Slot>,
    topology: T,
    relax: PhantomData<R>,
}

impl<R, T: Topology> CnaLock<R, T> {
    /// Creates a new, unlocked lock with the given configuration and
    /// topology.
    pub fn with_config(config: CnaConfig, topology: T) -> Self {
        let capacity = config.capacity.max(1);
        let slots = Arena::new(capacity, 0, |_| Slot::new());
        let tail = CachePadded::new(AtomicUsize::new(NONE));
        let handoffs = AtomicU32::new(0);
        let local_handoff_limit = config.local_handoff_limit;
        Self { tail, handoffs, local_handoff_limit, slots, topology, relax: PhantomData }
    }

    /// Returns a new record for this lock, bound to the NUMA node `numa`
    /// regardless of the lock's topology.
    ///
    /// Aborts the process if the lock has run out of records.
    pub fn node_on(&self, numa: usize) -> CnaNode<'_, R, T> {
        match self.claim(numa) {
            Ok(node) => node,
            Err(err) => cfg::misuse(format_args!("{err}")),
        }
    }

    /// Returns the topology this lock was built with.
    pub const fn topology(&self) -> &T {
        &self.topology
    }
}

impl<R, T: Topology + Default> CnaLock<R, T> {
    /// Creates a new, unlocked lock with the default configuration and
    /// topology.
    pub fn new() -> Self {
        Self::with_config(CnaConfig::new(), T::default())
    }
}

impl<R, T> CnaLock<R, T> {
    /// Returns the number of nodes this lock can hand out at once.
    pub fn capacity(&self) -> usize {
        self.slots.capacity()
    }

    /// Returns the number of consecutive local hand-offs allowed.
    pub const fn local_handoff_limit(&self) -> u32 {
        self.local_handoff_limit
    }

    fn slot(&self, index: usize) -> &Slot {
        self.slots.get(index)
    }

    fn claim(&self, numa: usize) -> Result<CnaNode<'_, R, T>, NodeError> {
        let capacity = self.capacity();
        let slot = self.slots.claim().ok_or(NodeError::Exhausted { capacity })?;
        Ok(CnaNode { lock: self, slot, numa, held: false })
    }

    fn check_owner(&self, node: &CnaNode<'_, R, T>, op: &str) {
        if !ptr::eq(node.lock, self) {
            cfg::misuse(format_args!("{op} a CNA lock with a node of another lock"));
        }
    }

    /// Resets the node's slot before it is enqueued.
    fn prepare(&self, node: &CnaNode<'_, R, T>) -> &Slot {
        let slot = self.slot(node.slot);
        slot.spin.store(WAITING, Relaxed);
        slot.next.store(NONE, Relaxed);
        slot.sec_tail.store(NONE, Relaxed);
        slot.numa.store(node.numa, Relaxed);
        slot
    }

    /// Grants the lock to `slot`, passing `spin` along.
    fn grant(&self, slot: usize, spin: usize, handoffs: u32) {
        self.handoffs.store(handoffs, Relaxed);
        self.slot(slot).spin.store(spin, Release);
    }

    /// Looks for a waiter on `numa` from `next` on.
    ///
    /// If `next` itself is not on `numa` but some later waiter is, moves the
    /// waiters in between to the end of the secondary queue. Returns the
    /// waiter found and the `spin` value to grant it with.
    fn find_successor(&self, numa: usize, next: usize, spin: usize) -> Option<(usize, usize)> {
        if self.slot(next).numa.load(Relaxed) == numa {
            return Some((next, spin));
        }
        let mut last = next;
        let mut cur = self.slot(next).next.load(Acquire);
        while cur != NONE {
            if self.slot(cur).numa.load(Relaxed) == numa {
                self.slot(last).next.store(NONE, Relaxed);
                let spin = match secondary_head(spin) {
                    Some(head) => {
                        let head = self.slot(head);
                        let tail = head.sec_tail.load(Relaxed);
                        self.slot(tail).next.store(next, Relaxed);
                        head.sec_tail.store(last, Relaxed);
                        spin
                    }
                    None => {
                        self.slot(next).sec_tail.store(last, Relaxed);
                        granted_with(next)
                    }
                };
                tracing::trace!(
                    first = next,
                    last,
                    successor = cur,
                    "moved remote waiters to secondary queue"
                );
                return Some((cur, spin));
            }
            last = cur;
            cur = self.slot(cur).next.load(Acquire);
        }
        None
    }
}

// SAFETY: A node only returns from `acquire` after finding the queue empty or
// after its `spin` was set by the previous holder with release ordering, read
// with acquire ordering. Every release grants exactly one node: the head of
// the secondary queue, a queued successor, or nobody if the tail could be
// reset.
unsafe impl<R: Relax, T: Topology> RawLock for CnaLock<R, T> {
    type Node<'a>
        = CnaNode<'a, R, T>
    where
        Self: 'a;

    fn try_node(&self) -> Result<CnaNode<'_, R, T>, NodeError> {
        self.claim(self.topology.current_node())
    }

    fn acquire(&self, node: &mut CnaNode<'_, R, T>) {
        self.check_owner(node, "acquired");
        if node.held {
            cfg::misuse(format_args!("acquired a CNA lock with a node that already holds it"));
        }
        let slot = self.prepare(node);
        let pred = self.tail.swap(node.slot, AcqRel);
        if pred == NONE {
            slot.spin.store(GRANTED, Relaxed);
        } else {
            self.slot(pred).next.store(node.slot, Release);
            let mut relax = R::new();
            while slot.spin.load(Relaxed) == WAITING {
                relax.relax();
            }
            fence(Acquire);
        }
        node.held = true;
    }

    fn try_acquire(&self, node: &mut CnaNode<'_, R, T>) -> bool {
        self.check_owner(node, "acquired");
        if node.held {
            cfg::misuse(format_args!("acquired a CNA lock with a node that already holds it"));
        }
        let slot = self.prepare(node);
        let cas = self.tail.compare_exchange(NONE, node.slot, AcqRel, Relaxed);
        if cas.is_ok() {
            slot.spin.store(GRANTED, Relaxed);
            node.held = true;
        }
        node.held
    }

    fn release(&self, node: &mut CnaNode<'_, R, T>) {
        self.check_owner(node, "released");
        if !node.held {
            cfg::misuse(format_args!("released a CNA lock with a node that does not hold it"));
        }
        node.held = false;
        let me = node.slot;
        let slot = self.slot(me);
        let spin = slot.spin.load(Relaxed);
        let mut next = slot.next.load(Acquire);
        if next == NONE {
            match secondary_head(spin) {
                None => {
                    self.handoffs.store(0, Relaxed);
                    if self.tail.compare_exchange(me, NONE, Release, Relaxed).is_ok() {
                        return;
                    }
                }
                Some(head) => {
                    let sec_tail = self.slot(head).sec_tail.load(Relaxed);
                    let cas = self.tail.compare_exchange(me, sec_tail, Release, Relaxed);
                    if cas.is_ok() {
                        self.grant(head, GRANTED, 0);
                        return;
                    }
                }
            }
            let mut relax = R::new();
            loop {
                next = slot.next.load(Acquire);
                if next != NONE {
                    break;
                }
                relax.relax();
            }
        }
        let handoffs = self.handoffs.load(Relaxed);
        if handoffs < self.local_handoff_limit {
            let numa = slot.numa.load(Relaxed);
            if let Some((succ, spin)) = self.find_successor(numa, next, spin) {
                self.grant(succ, spin, handoffs + 1);
                return;
            }
        }
        match secondary_head(spin) {
            Some(head) => {
                tracing::trace!(handoffs, head, "handing off to the secondary queue");
                let sec_tail = self.slot(head).sec_tail.load(Relaxed);
                self.slot(sec_tail).next.store(next, Relaxed);
                self.grant(head, GRANTED, 0);
            }
            None => self.grant(next, GRANTED, 0),
        }
    }

    fn is_locked(&self) -> bool {
        self.tail.load(Relaxed) != NONE
    }
}

impl<R, T: Topology + Default> Default for CnaLock<R, T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R, T: Debug> Debug for CnaLock<R, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CnaLock")
            .field("locked", &(self.tail.load(Relaxed) != NONE))
            .field("capacity", &self.capacity())
            .field("local_handoff_limit", &self.local_handoff_limit)
            .field("topology", &self.topology)
            .finish_non_exhaustive()
    }
}

/// A per-acquirer record of a [`CnaLock`].
///
/// Holds one node slot of the lock it was obtained from for its whole
/// lifetime, and the NUMA node it acquires from. Dropping it while it holds
/// the lock aborts the process.
pub struct CnaNode<'a, R = Spin, T = Uniform> {
    lock: &'a CnaLock<R, T>,
    slot: usize,
    numa: usize,
    held: bool,
}

impl<R, T> CnaNode<'_, R, T> {
    /// Returns the NUMA node this record acquires from.
    pub const fn numa(&self) -> usize {
        self.numa
    }

    /// Returns `true` if this node holds its lock.
    pub const fn is_held(&self) -> bool {
        self.held
    }
}

impl<R, T> Drop for CnaNode<'_, R, T> {
    fn drop(&mut self) {
        if self.held {
            cfg::misuse(format_args!("dropped a CNA node that holds the lock"));
        }
        self.lock.slots.reclaim(self.slot);
    }
}

impl<R, T> Debug for CnaNode<'_, R, T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("CnaNode")
            .field("slot", &self.slot)
            .field("numa", &self.numa)
            .field("held", &self.held)
            .finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::Arc;
    use std::thread::{self, JoinHandle};
    use std::vec::Vec;

    use super::{CnaConfig, CnaLock, NONE};
    use crate::error::NodeError;
    use crate::lock::RawLock;
    use crate::numa::{Interleaved, Uniform};
    use crate::relax::Yield;
    use crate::test::tests::{self, lock_suite};
    use crate::Mutex;

    type Lock = CnaLock<Yield, Uniform>;

    lock_suite!(Lock);

    fn tail(lock: &Lock) -> usize {
        lock.tail.load(Relaxed)
    }

    /// Returns `true` once a waiter swapped itself in after `before` and
    /// linked itself to it.
    fn linked_after(lock: &Lock, before: usize) -> bool {
        let tail = tail(lock);
        tail != before && lock.slot(before).next.load(Relaxed) == tail
    }

    /// Enqueues one waiter per entry of `numas`, in order, while the main
    /// thread holds the lock from NUMA node 0. Returns the order in which
    /// they were served, as indices into `numas`.
    fn served_order(limit: u32, numas: &[usize]) -> Vec<usize> {
        let config = CnaConfig::new().local_handoff_limit(limit);
        let mutex = Arc::new(Mutex::with_lock(Vec::new(), Lock::with_config(config, Uniform)));
        let mut node = mutex.raw().node_on(0);
        mutex.raw().acquire(&mut node);
        let handles = numas
            .iter()
            .enumerate()
            .map(|(index, &numa)| {
                let before = tail(mutex.raw());
                let c_mutex = Arc::clone(&mutex);
                let handle = thread::spawn(move || {
                    let mut node = c_mutex.raw().node_on(numa);
                    c_mutex.lock_with_then(&mut node, |order| order.push(index));
                });
                while !linked_after(mutex.raw(), before) {
                    thread::yield_now();
                }
                handle
            })
            .collect::<Vec<JoinHandle<()>>>();
        mutex.raw().release(&mut node);
        for handle in handles {
            handle.join().unwrap();
        }
        mutex.lock_with_then(&mut node, |order| order.clone())
    }

    #[test]
    fn fifo_order() {
        tests::fifo_order(Lock::new(), 8, tail);
    }

    #[test]
    fn remote_waiter_served_within_bound() {
        for limit in [0, 1, 2, 4, 8] {
            let local = limit as usize + 2;
            let mut numas = std::vec![1];
            numas.extend(std::iter::repeat(0).take(local));
            let order = served_order(limit, &numas);
            // The remote waiter is enqueued first, and overtaken by exactly
            // `limit` local ones.
            assert_eq!(order.iter().position(|&index| index == 0), Some(limit as usize));
            let locals = order.iter().filter(|&&index| index != 0).copied().collect::<Vec<_>>();
            assert_eq!(locals, (1..=local).collect::<Vec<_>>());
        }
    }

    #[test]
    fn secondary_queue_keeps_its_order() {
        // Two remote waiters are skipped together, then served in order once
        // the local one releases with an empty main queue.
        let order = served_order(4, &[1, 1, 0]);
        assert_eq!(order, [2, 0, 1]);
    }

    #[test]
    fn secondary_queue_grows() {
        // The remote waiters are appended to the secondary queue by two
        // separate hand-offs.
        let order = served_order(8, &[1, 0, 1, 0]);
        assert_eq!(order, [1, 3, 0, 2]);
    }

    #[test]
    fn zero_limit_is_fifo() {
        let order = served_order(0, &[1, 0, 1, 0]);
        assert_eq!(order, [0, 1, 2, 3]);
    }

    #[test]
    fn interleaved_scratch_byte() {
        for limit in [0, 1, 64] {
            let config = CnaConfig::new().local_handoff_limit(limit);
            let new = || CnaLock::<Yield, Interleaved>::with_config(config, Interleaved::new(2));
            tests::scratch_byte_with(8, 50, new);
        }
    }

    #[test]
    fn nodes_are_bounded() {
        let lock = Lock::with_config(CnaConfig::new().capacity(1), Uniform);
        let node = lock.try_node().unwrap();
        assert_eq!(node.numa(), 0);
        assert_eq!(lock.try_node().unwrap_err(), NodeError::Exhausted { capacity: 1 });
        drop(node);
        let mut node = lock.node_on(3);
        assert_eq!(node.numa(), 3);
        assert!(lock.try_acquire(&mut node));
        assert!(node.is_held());
        lock.release(&mut node);
        assert_eq!(tail(&lock), NONE);
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::cna::{CnaConfig, CnaLock};
    use crate::loom::models;
    use crate::numa::Uniform;
    use crate::relax::Yield;

    fn new() -> CnaLock<Yield> {
        CnaLock::with_config(CnaConfig::new().capacity(4), Uniform)
    }

    #[test]
    fn try_lock_join() {
        models::try_lock_join(new);
    }

    #[test]
    fn lock_join() {
        models::lock_join(new);
    }

    #[test]
    fn mixed_lock_join() {
        models::mixed_lock_join(new);
    }

    #[test]
    fn handover() {
        models::handover(new);
    }
}
