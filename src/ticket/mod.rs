//! FIFO locks built on a pair of ticket counters.
//!
//! An acquirer draws a ticket from `next` and waits until `serving` reaches
//! it, a release advances `serving` by one. Acquirers are therefore served in
//! the order they drew their tickets.
//!
//! Both counters are 32 bit wide and wrap around. Comparisons are done with
//! wrapping arithmetic, which is exact as long as fewer than `2^31` threads
//! wait at once.
//!
//! [`TicketLock`] makes every waiter spin on `serving`. [`ParkingTicketLock`]
//! only lets the waiter next in line spin, and parks the others on a bounded
//! array of slots.

use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crossbeam_utils::CachePadded;

use crate::cfg::{self, atomic::fence, atomic::AtomicU32};
use crate::error::NodeError;
use crate::lock::RawLock;
use crate::relax::{Relax, Spin};

mod parking;

pub use parking::{ParkingTicketConfig, ParkingTicketLock};
pub use parking::{DEFAULT_MAX_WAITERS, DEFAULT_SPIN_DISTANCE};

/// The two counters shared by both ticket locks.
///
/// They are kept on separate cache lines: newcomers hammer `next` while
/// waiters read `serving`.
pub(crate) struct Tickets {
    pub(crate) next: CachePadded<AtomicU32>,
    pub(crate) serving: CachePadded<AtomicU32>,
}

impl Tickets {
    #[cfg(not(all(loom, test)))]
    pub(crate) const fn new() -> Self {
        let next = CachePadded::new(AtomicU32::new(0));
        let serving = CachePadded::new(AtomicU32::new(0));
        Self { next, serving }
    }

    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub(crate) fn new() -> Self {
        let next = CachePadded::new(AtomicU32::new(0));
        let serving = CachePadded::new(AtomicU32::new(0));
        Self { next, serving }
    }

    /// Starts both counters at `start` instead of zero.
    #[cfg(all(not(loom), test))]
    pub(crate) fn starting_at(start: u32) -> Self {
        let next = CachePadded::new(AtomicU32::new(start));
        let serving = CachePadded::new(AtomicU32::new(start));
        Self { next, serving }
    }

    /// Draws a ticket.
    pub(crate) fn draw(&self) -> u32 {
        self.next.fetch_add(1, Acquire)
    }

    /// Takes the ticket being served if nobody else holds or waits for it.
    pub(crate) fn try_draw(&self) -> bool {
        let serving = self.serving.load(Acquire);
        let next = serving.wrapping_add(1);
        self.next.compare_exchange(serving, next, Acquire, Relaxed).is_ok()
    }

    /// Returns the ticket that follows the one being served, the one to be
    /// published by the holder's release.
    ///
    /// Aborts if the lock is not held.
    pub(crate) fn next_to_serve(&self, kind: &str) -> u32 {
        // Only the holder writes `serving`.
        let serving = self.serving.load(Relaxed);
        if self.next.load(Relaxed) == serving {
            cfg::misuse(format_args!("released a {kind} that was not held"));
        }
        serving.wrapping_add(1)
    }

    /// Returns the number of tickets drawn and not yet served, the holder's
    /// included.
    pub(crate) fn queue_len(&self) -> u32 {
        let next = self.next.load(Relaxed);
        next.wrapping_sub(self.serving.load(Relaxed))
    }
}

impl Debug for Tickets {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tickets")
            .field("next", &self.next.load(Relaxed))
            .field("serving", &self.serving.load(Relaxed))
            .finish()
    }
}

/// A ticket lock where every waiter spins on the `serving` counter.
///
/// Strictly FIFO. The cost of a hand-off grows with the number of waiters,
/// since all of them re-read `serving` every time it changes.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use qlocks::relax::Yield;
/// use qlocks::ticket::TicketLock;
///
/// type Mutex<T> = qlocks::Mutex<T, TicketLock<Yield>>;
///
/// let mutex = Arc::new(Mutex::new(0));
/// let handles = (0..4)
///     .map(|_| Arc::clone(&mutex))
///     .map(|mutex| thread::spawn(move || mutex.lock_then(|data| *data += 1)))
///     .collect::<Vec<_>>();
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert_eq!(mutex.lock_then(|data| *data), 4);
/// ```
pub struct TicketLock<R = Spin> {
    tickets: Tickets,
    relax: PhantomData<R>,
}

impl<R> TicketLock<R> {
    /// Creates a new, unlocked ticket lock.
    #[cfg(not(all(loom, test)))]
    pub const fn new() -> Self {
        Self { tickets: Tickets::new(), relax: PhantomData }
    }

    /// Creates a new, unlocked ticket lock with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn new() -> Self {
        Self { tickets: Tickets::new(), relax: PhantomData }
    }

    /// Returns the number of threads holding or waiting for this lock.
    ///
    /// The value is only a snapshot, it may be stale as soon as it returns.
    pub fn queue_len(&self) -> u32 {
        self.tickets.queue_len()
    }
}

// SAFETY: A thread only returns from `acquire` once `serving` equals its own
// ticket, and tickets are unique. `serving` is only advanced by the holder,
// with release ordering, and read by the next holder with acquire ordering.
unsafe impl<R: Relax> RawLock for TicketLock<R> {
    type Node<'a>
        = ()
    where
        Self: 'a;

    fn try_node(&self) -> Result<(), NodeError> {
        Ok(())
    }

    fn acquire(&self, (): &mut ()) {
        let ticket = self.tickets.draw();
        let mut relax = R::new();
        while self.tickets.serving.load(Relaxed) != ticket {
            relax.relax();
        }
        fence(Acquire);
    }

    fn try_acquire(&self, (): &mut ()) -> bool {
        self.tickets.try_draw()
    }

    fn release(&self, (): &mut ()) {
        let next = self.tickets.next_to_serve("ticket lock");
        self.tickets.serving.store(next, Release);
    }

    fn is_locked(&self) -> bool {
        self.tickets.queue_len() != 0
    }
}

#[cfg(not(all(loom, test)))]
impl<R> Default for TicketLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> Debug for TicketLock<R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("TicketLock").field("tickets", &self.tickets).finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use core::marker::PhantomData;
    use std::sync::atomic::Ordering::Relaxed;

    use super::{TicketLock, Tickets};
    use crate::lock::RawLock;
    use crate::relax::Yield;
    use crate::test::tests::{self, lock_suite};

    lock_suite!(TicketLock<Yield>);

    fn next_ticket(lock: &TicketLock<Yield>) -> usize {
        lock.tickets.next.load(Relaxed) as usize
    }

    #[test]
    fn fifo_order() {
        tests::fifo_order(TicketLock::<Yield>::new(), 8, next_ticket);
    }

    #[test]
    fn queue_len_counts_holder_and_waiters() {
        let lock = TicketLock::<Yield>::new();
        assert_eq!(lock.queue_len(), 0);
        lock.acquire(&mut ());
        assert_eq!(lock.queue_len(), 1);
        assert!(!lock.try_acquire(&mut ()));
        lock.release(&mut ());
        assert_eq!(lock.queue_len(), 0);
        assert!(!lock.is_locked());
    }

    #[test]
    fn counters_wrap_around() {
        let tickets = Tickets::starting_at(u32::MAX - 2);
        let lock = TicketLock::<Yield> { tickets, relax: PhantomData };
        for _ in 0..6 {
            lock.acquire(&mut ());
            assert!(lock.is_locked());
            lock.release(&mut ());
            assert!(!lock.is_locked());
        }
        assert_eq!(lock.tickets.serving.load(Relaxed), 3);
        assert!(lock.try_acquire(&mut ()));
        lock.release(&mut ());
    }

    #[test]
    fn scratch_byte_across_wraparound() {
        let new = || {
            let tickets = Tickets::starting_at(u32::MAX - 50);
            TicketLock::<Yield> { tickets, relax: PhantomData }
        };
        tests::scratch_byte_with(8, 20, new);
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;
    use crate::relax::Yield;
    use crate::ticket::TicketLock;

    #[test]
    fn try_lock_join() {
        models::try_lock_join(TicketLock::<Yield>::new);
    }

    #[test]
    fn lock_join() {
        models::lock_join(TicketLock::<Yield>::new);
    }

    #[test]
    fn mixed_lock_join() {
        models::mixed_lock_join(TicketLock::<Yield>::new);
    }

    #[test]
    fn handover() {
        models::handover(TicketLock::<Yield>::new);
    }
}
