//! The CLH queue lock.
//!
//! Acquirers form an implicit queue: each one swaps its own node into the
//! lock's tail and spins on the flag of the node it swapped out, its
//! predecessor. Every waiter spins on a different cache line, and a release is
//! a single store to the releaser's own flag.
//!
//! A releaser can not reuse its own node, since its successor may still be
//! reading it. It takes over its predecessor's node instead, which nobody else
//! references anymore. Nodes are slots of an arena owned by the lock and are
//! handed over by index, so a [`ClhNode`] changes slot every time it is
//! released.

use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::ptr;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::arena::Arena;
use crate::cfg::{self, atomic::fence, atomic::AtomicBool, atomic::AtomicUsize};
use crate::error::NodeError;
use crate::lock::RawLock;
use crate::relax::{Relax, Spin};

/// The default number of nodes a [`ClhLock`] can hand out at once.
pub const DEFAULT_CLH_CAPACITY: usize = 128;

/// The tail packs a slot index in its low half and the epoch of the slot in
/// its high half.
const INDEX_BITS: u32 = usize::BITS / 2;
const INDEX_MASK: usize = (1 << INDEX_BITS) - 1;

/// The largest number of nodes a lock can be configured with.
pub const MAX_CLH_CAPACITY: usize = INDEX_MASK - 1;

/// The slot the tail starts at, never handed out before the first release.
const INITIAL: usize = 0;

const fn pack(index: usize, epoch: usize) -> usize {
    (epoch << INDEX_BITS) | index
}

const fn index(tail: usize) -> usize {
    tail & INDEX_MASK
}

struct Slot {
    locked: AtomicBool,
    // Bumped by the owner of the slot every time it is enqueued, so that
    // `try_acquire` can tell a tail that was re-enqueued from an idle one.
    epoch: AtomicUsize,
}

impl Slot {
    fn new() -> Self {
        Self { locked: AtomicBool::new(false), epoch: AtomicUsize::new(0) }
    }
}

/// A CLH queue lock, with a bounded pool of nodes.
///
/// Strictly FIFO. Acquiring requires a [`ClhNode`] obtained from the same
/// lock, see [`RawLock::node`]. A node can be reused for any number of
/// acquisitions, and is returned to the pool when dropped.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use qlocks::clh::ClhLock;
/// use qlocks::relax::Yield;
///
/// type Mutex<T> = qlocks::Mutex<T, ClhLock<Yield>>;
///
/// let mutex = Arc::new(Mutex::with_lock(0, ClhLock::with_capacity(4)));
/// let handles = (0..4)
///     .map(|_| Arc::clone(&mutex))
///     .map(|mutex| {
///         thread::spawn(move || {
///             let mut node = mutex.node();
///             for _ in 0..10 {
///                 mutex.lock_with_then(&mut node, |data| *data += 1);
///             }
///         })
///     })
///     .collect::<Vec<_>>();
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert_eq!(Arc::try_unwrap(mutex).ok().unwrap().into_inner(), 40);
/// ```
pub struct ClhLock<R = Spin> {
    tail: CachePadded<AtomicUsize>,
    slots: Arena<Slot>,
    relax: PhantomData<R>,
}

impl<R> ClhLock<R> {
    /// Creates a new, unlocked lock with [`DEFAULT_CLH_CAPACITY`] nodes.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CLH_CAPACITY)
    }

    /// Creates a new, unlocked lock that can hand out up to `capacity` nodes
    /// at once.
    ///
    /// The capacity is clamped to `1..=MAX_CLH_CAPACITY`.
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, MAX_CLH_CAPACITY);
        let slots = Arena::new(capacity + 1, 1, |_| Slot::new());
        let tail = CachePadded::new(AtomicUsize::new(pack(INITIAL, 0)));
        Self { tail, slots, relax: PhantomData }
    }

    /// Returns the number of nodes this lock can hand out at once.
    pub fn capacity(&self) -> usize {
        self.slots.capacity() - 1
    }

    fn slot(&self, index: usize) -> &Slot {
        self.slots.get(index)
    }

    /// Marks the node's slot as locked and returns its next tail value.
    fn prepare(&self, node: &ClhNode<'_, R>) -> usize {
        let slot = self.slot(node.slot);
        // Only the owner of a slot writes its epoch.
        let epoch = slot.epoch.load(Relaxed).wrapping_add(1);
        slot.epoch.store(epoch, Relaxed);
        slot.locked.store(true, Relaxed);
        pack(node.slot, epoch)
    }

    fn check_owner(&self, node: &ClhNode<'_, R>, op: &str) {
        if !ptr::eq(node.lock, self) {
            cfg::misuse(format_args!("{op} a CLH lock with a node of another lock"));
        }
    }
}

// SAFETY: The tail swap orders every acquirer behind exactly one predecessor,
// and an acquirer only returns once its predecessor's flag was cleared by a
// release store, read with acquire ordering. `try_acquire` only succeeds if
// the tail it observed was released and has not been enqueued since.
unsafe impl<R: Relax> RawLock for ClhLock<R> {
    type Node<'a>
        = ClhNode<'a, R>
    where
        Self: 'a;

    fn try_node(&self) -> Result<ClhNode<'_, R>, NodeError> {
        let capacity = self.capacity();
        let slot = self.slots.claim().ok_or(NodeError::Exhausted { capacity })?;
        Ok(ClhNode { lock: self, slot, pred: None })
    }

    fn acquire(&self, node: &mut ClhNode<'_, R>) {
        self.check_owner(node, "acquired");
        if node.pred.is_some() {
            cfg::misuse(format_args!("acquired a CLH lock with a node that already holds it"));
        }
        let tail = self.prepare(node);
        let pred = index(self.tail.swap(tail, AcqRel));
        let locked = &self.slot(pred).locked;
        let mut relax = R::new();
        while locked.load(Relaxed) {
            relax.relax();
        }
        fence(Acquire);
        node.pred = Some(pred);
    }

    fn try_acquire(&self, node: &mut ClhNode<'_, R>) -> bool {
        self.check_owner(node, "acquired");
        if node.pred.is_some() {
            cfg::misuse(format_args!("acquired a CLH lock with a node that already holds it"));
        }
        let current = self.tail.load(Acquire);
        if self.slot(index(current)).locked.load(Acquire) {
            return false;
        }
        let tail = self.prepare(node);
        match self.tail.compare_exchange(current, tail, AcqRel, Relaxed) {
            Ok(_) => {
                node.pred = Some(index(current));
                true
            }
            Err(_) => {
                self.slot(node.slot).locked.store(false, Relaxed);
                false
            }
        }
    }

    fn release(&self, node: &mut ClhNode<'_, R>) {
        self.check_owner(node, "released");
        let Some(pred) = node.pred.take() else {
            cfg::misuse(format_args!("released a CLH lock with a node that does not hold it"));
        };
        self.slot(node.slot).locked.store(false, Release);
        node.slot = pred;
    }

    fn is_locked(&self) -> bool {
        let tail = self.tail.load(Relaxed);
        self.slot(index(tail)).locked.load(Relaxed)
    }
}

impl<R> Default for ClhLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Debug for ClhLock<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let tail = self.tail.load(Relaxed);
        f.debug_struct("ClhLock")
            .field("tail", &index(tail))
            .field("capacity", &self.capacity())
            .finish_non_exhaustive()
    }
}

/// A per-acquirer record of a [`ClhLock`].
///
/// Holds one node slot of the lock it was obtained from, and the slot of its
/// predecessor while the lock is held. Dropping it while it holds the lock
/// aborts the process.
pub struct ClhNode<'a, R = Spin> {
    lock: &'a ClhLock<R>,
    slot: usize,
    pred: Option<usize>,
}

impl<R> ClhNode<'_, R> {
    /// Returns `true` if this node holds its lock.
    pub fn is_held(&self) -> bool {
        self.pred.is_some()
    }
}

impl<R> Drop for ClhNode<'_, R> {
    fn drop(&mut self) {
        if self.pred.is_some() {
            cfg::misuse(format_args!("dropped a CLH node that holds the lock"));
        }
        self.lock.slots.reclaim(self.slot);
    }
}

impl<R> Debug for ClhNode<'_, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClhNode").field("slot", &self.slot).field("held", &self.is_held()).finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::Ordering::Relaxed;

    use super::{index, ClhLock, DEFAULT_CLH_CAPACITY, INITIAL};
    use crate::error::NodeError;
    use crate::lock::RawLock;
    use crate::relax::Yield;
    use crate::test::tests::{self, lock_suite};

    lock_suite!(ClhLock<Yield>);

    fn tail(lock: &ClhLock<Yield>) -> usize {
        lock.tail.load(Relaxed)
    }

    #[test]
    fn fifo_order() {
        tests::fifo_order(ClhLock::<Yield>::new(), 8, tail);
    }

    #[test]
    fn release_hands_over_predecessor_slot() {
        let lock = ClhLock::<Yield>::new();
        let mut node = lock.node();
        let own = node.slot;
        assert_ne!(own, INITIAL);
        lock.acquire(&mut node);
        assert!(node.is_held());
        assert_eq!(index(tail(&lock)), own);
        lock.release(&mut node);
        assert!(!node.is_held());
        assert_eq!(node.slot, INITIAL);
        // The released slot stays the tail, to be taken by the next acquirer.
        lock.acquire(&mut node);
        lock.release(&mut node);
        assert_eq!(node.slot, own);
    }

    #[test]
    fn nodes_are_bounded() {
        let lock = ClhLock::<Yield>::with_capacity(2);
        assert_eq!(lock.capacity(), 2);
        let first = lock.try_node().unwrap();
        let second = lock.try_node().unwrap();
        assert_eq!(lock.try_node().unwrap_err(), NodeError::Exhausted { capacity: 2 });
        drop(first);
        let third = lock.try_node().unwrap();
        drop((second, third));
    }

    #[test]
    fn dropped_nodes_keep_slots_balanced() {
        let lock = ClhLock::<Yield>::with_capacity(1);
        for _ in 0..10 {
            let mut node = lock.node();
            lock.acquire(&mut node);
            lock.release(&mut node);
        }
        let _node = lock.try_node().unwrap();
        assert!(lock.try_node().is_err());
    }

    #[test]
    fn try_acquire_sees_reenqueued_tail() {
        let lock = ClhLock::<Yield>::with_capacity(2);
        let mut first = lock.node();
        let mut second = lock.node();
        let observed = tail(&lock);
        // The initial slot is enqueued again by `first`'s second acquisition.
        lock.acquire(&mut first);
        lock.release(&mut first);
        lock.acquire(&mut first);
        assert_eq!(index(tail(&lock)), INITIAL);
        assert_ne!(tail(&lock), observed);
        assert!(!lock.try_acquire(&mut second));
        lock.release(&mut first);
        assert!(lock.try_acquire(&mut second));
        assert!(lock.is_locked());
        lock.release(&mut second);
        assert!(!lock.is_locked());
    }

    #[test]
    fn default_capacity() {
        assert_eq!(ClhLock::<Yield>::default().capacity(), DEFAULT_CLH_CAPACITY);
        assert_eq!(ClhLock::<Yield>::with_capacity(0).capacity(), 1);
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::clh::ClhLock;
    use crate::loom::models;
    use crate::relax::Yield;

    fn new() -> ClhLock<Yield> {
        ClhLock::with_capacity(4)
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
