use alloc::boxed::Box;
use alloc::vec::Vec;
use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Release};

use crossbeam_utils::CachePadded;

use super::Tickets;
use crate::cfg;
use crate::error::NodeError;
use crate::lock::RawLock;
use crate::park::{Backend, DefaultBackend, ParkCell, ParkOrdering};
use crate::relax::{Relax, Spin};

/// The default number of waiters a [`ParkingTicketLock`] has room for.
pub const DEFAULT_MAX_WAITERS: usize = 128;

/// The default distance, in tickets, under which a waiter spins instead of
/// parking.
pub const DEFAULT_SPIN_DISTANCE: u32 = 1;

/// The largest slot array a lock may have. Two slot generations must fit in
/// a 32 bit tag.
const MAX_SLOTS: usize = 1 << 31;

/// The value of a slot no ticket has been granted through yet. It is odd, so
/// it never reads as a grant.
const VACANT: u32 = u32::MAX;

/// The configuration of a [`ParkingTicketLock`].
///
/// # Example
///
/// ```
/// use qlocks::park::ParkOrdering;
/// use qlocks::ticket::{ParkingTicketConfig, ParkingTicketLock};
///
/// let config = ParkingTicketConfig::new()
///     .max_waiters(16)
///     .spin_distance(2)
///     .ordering(ParkOrdering::Strict);
/// let lock = ParkingTicketLock::<qlocks::park::DefaultBackend>::with_config(config);
/// assert!(lock.capacity() >= 16);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParkingTicketConfig {
    max_waiters: usize,
    spin_distance: u32,
    ordering: ParkOrdering,
}

impl ParkingTicketConfig {
    /// Returns the default configuration: [`DEFAULT_MAX_WAITERS`] waiters,
    /// [`DEFAULT_SPIN_DISTANCE`] and [`ParkOrdering::Strict`].
    pub const fn new() -> Self {
        Self {
            max_waiters: DEFAULT_MAX_WAITERS,
            spin_distance: DEFAULT_SPIN_DISTANCE,
            ordering: ParkOrdering::Strict,
        }
    }

    /// Sets the maximum number of threads that may wait at once, not counting
    /// the holder.
    ///
    /// The lock rounds it up so that its slot array has a power of two
    /// length. Exceeding it at runtime aborts the process.
    #[must_use]
    pub const fn max_waiters(mut self, max_waiters: usize) -> Self {
        self.max_waiters = max_waiters;
        self
    }

    /// Sets how many tickets ahead of the one being served a waiter may be
    /// and still spin rather than park. Zero parks every waiter.
    #[must_use]
    pub const fn spin_distance(mut self, spin_distance: u32) -> Self {
        self.spin_distance = spin_distance;
        self
    }

    /// Sets the orderings of the park cells backing the slots.
    ///
    /// Anything weaker than [`ParkOrdering::Strict`] may lose wake-ups.
    #[must_use]
    pub const fn ordering(mut self, ordering: ParkOrdering) -> Self {
        self.ordering = ordering;
        self
    }
}

impl Default for ParkingTicketConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A ticket lock that parks waiters far from the head of the line.
///
/// The waiter whose ticket is next, and those within the configured spin
/// distance, spin on `serving` like in [`TicketLock`]. Everyone else registers
/// in the slot its ticket maps to and parks on it. A release tags the slot of
/// the next ticket as granted and wakes it if its owner registered there.
///
/// Slot values carry the generation of the ticket they refer to (the ticket
/// divided by the number of slots), so a grant left over from a previous lap
/// around the slot array is never mistaken for a current one.
///
/// The number of simultaneous waiters is bounded by [`capacity`]. A waiter
/// that finds more tickets ahead of it than that aborts the process, since
/// two live waiters would otherwise share a slot.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use qlocks::park::DefaultBackend;
/// use qlocks::ticket::ParkingTicketLock;
///
/// type Mutex<T> = qlocks::Mutex<T, ParkingTicketLock<DefaultBackend>>;
///
/// let mutex = Arc::new(Mutex::with_lock(0, ParkingTicketLock::with_capacity(8)));
/// let handles = (0..4)
///     .map(|_| Arc::clone(&mutex))
///     .map(|mutex| thread::spawn(move || mutex.lock_then(|data| *data += 1)))
///     .collect::<Vec<_>>();
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert_eq!(mutex.lock_then(|data| *data), 4);
/// ```
///
/// [`TicketLock`]: super::TicketLock
/// [`capacity`]: ParkingTicketLock::capacity
pub struct ParkingTicketLock<B = DefaultBackend, R = Spin> {
    tickets: Tickets,
    slots: Box<[CachePadded<ParkCell<B>>]>,
    shift: u32,
    spin_distance: u32,
    relax: PhantomData<R>,
}

impl<B: Backend, R> ParkingTicketLock<B, R> {
    /// Creates a new, unlocked lock with the default configuration.
    pub fn new() -> Self {
        Self::with_config(ParkingTicketConfig::new())
    }

    /// Creates a new, unlocked lock with room for `max_waiters` waiters.
    pub fn with_capacity(max_waiters: usize) -> Self {
        Self::with_config(ParkingTicketConfig::new().max_waiters(max_waiters))
    }

    /// Creates a new, unlocked lock with the given configuration.
    pub fn with_config(config: ParkingTicketConfig) -> Self {
        Self::with_tickets(config, Tickets::new())
    }

    fn with_tickets(config: ParkingTicketConfig, tickets: Tickets) -> Self {
        // The slot of a parked ticket must not be reachable from any other
        // live ticket, hence the extra slot for the holder.
        let len = config.max_waiters.saturating_add(1).clamp(2, MAX_SLOTS).next_power_of_two();
        let ordering = config.ordering;
        let slots = (0..len)
            .map(|_| CachePadded::new(ParkCell::with_ordering(VACANT, ordering)))
            .collect::<Vec<_>>()
            .into_boxed_slice();
        let shift = len.trailing_zeros();
        let spin_distance = config.spin_distance;
        Self { tickets, slots, shift, spin_distance, relax: PhantomData }
    }
}

impl<B, R> ParkingTicketLock<B, R> {
    /// Returns the number of threads that may wait for this lock at once, not
    /// counting the holder.
    pub fn capacity(&self) -> usize {
        self.slots.len() - 1
    }

    /// Returns the number of threads holding or waiting for this lock.
    ///
    /// The value is only a snapshot, it may be stale as soon as it returns.
    pub fn queue_len(&self) -> u32 {
        self.tickets.queue_len()
    }

    fn slot(&self, ticket: u32) -> &ParkCell<B> {
        &self.slots[ticket as usize & (self.slots.len() - 1)]
    }

    /// The slot value that grants the lock to `ticket`.
    const fn granted(&self, ticket: u32) -> u32 {
        (ticket >> self.shift) << 1
    }

    /// The slot value registering `ticket` as parked.
    const fn waiting(&self, ticket: u32) -> u32 {
        self.granted(ticket) | 1
    }
}

impl<B: Backend, R: Relax> ParkingTicketLock<B, R> {
    /// Registers `ticket` in its slot and parks until the slot changes.
    ///
    /// Returns `true` if the grant was already there. The registration has
    /// overwritten it, so the caller must not park again and spins instead.
    fn park(&self, ticket: u32) -> bool {
        let slot = self.slot(ticket);
        let waiting = self.waiting(ticket);
        if slot.value().swap(waiting, AcqRel) == self.granted(ticket) {
            return true;
        }
        tracing::trace!(ticket, "ticket waiter parking");
        slot.wait(waiting);
        false
    }

    /// Checks that `ticket` is within reach of the slot array.
    ///
    /// `serving` may be stale, so the count is confirmed against the latest
    /// value before giving up.
    #[cold]
    fn check_capacity(&self, ticket: u32) {
        let serving = self.tickets.serving.fetch_add(0, Acquire);
        let ahead = ticket.wrapping_sub(serving);
        if ahead as usize > self.capacity() {
            let capacity = self.capacity();
            cfg::misuse(format_args!(
                "{ahead} tickets ahead of a parking ticket lock waiter, room for {capacity}"
            ));
        }
    }
}

// SAFETY: The lock is granted exactly as in `TicketLock`, through the
// `serving` counter. Slots only decide whether a waiter sleeps, and a waiter
// re-checks `serving` every time it wakes up.
unsafe impl<B: Backend, R: Relax> RawLock for ParkingTicketLock<B, R> {
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
        let mut granted = false;
        loop {
            let serving = self.tickets.serving.load(Acquire);
            let ahead = ticket.wrapping_sub(serving);
            if ahead == 0 {
                return;
            }
            if granted || ahead <= self.spin_distance {
                relax.relax();
            } else if ahead as usize > self.capacity() {
                self.check_capacity(ticket);
                relax.relax();
            } else {
                granted = self.park(ticket);
            }
        }
    }

    fn try_acquire(&self, (): &mut ()) -> bool {
        self.tickets.try_draw()
    }

    fn release(&self, (): &mut ()) {
        let next = self.tickets.next_to_serve("parking ticket lock");
        let slot = self.slot(next);
        // The grant must land before `serving` moves on. Once it has, tickets
        // a full lap ahead may reuse slots of tickets up to `next`.
        let prev = slot.value().swap(self.granted(next), AcqRel);
        self.tickets.serving.store(next, Release);
        if prev == self.waiting(next) {
            tracing::trace!(ticket = next, "waking parked ticket holder");
            slot.wake_one();
        }
    }

    fn is_locked(&self) -> bool {
        self.tickets.queue_len() != 0
    }
}

impl<B: Backend, R> Default for ParkingTicketLock<B, R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B, R> Debug for ParkingTicketLock<B, R> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParkingTicketLock")
            .field("tickets", &self.tickets)
            .field("capacity", &self.capacity())
            .field("spin_distance", &self.spin_distance)
            .finish_non_exhaustive()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::mpsc::channel;
    use std::thread;
    use std::time::Duration;

    use super::{ParkingTicketConfig, ParkingTicketLock, Tickets, VACANT};
    use crate::lock::RawLock;
    use crate::park::{Backend, DefaultBackend, SpinWait};
    use crate::relax::Yield;
    use crate::test::tests::{self, lock_suite};

    type Lock = ParkingTicketLock<DefaultBackend, Yield>;

    lock_suite!(Lock);

    const TIMEOUT: Duration = Duration::from_secs(60);

    fn next_ticket(lock: &Lock) -> usize {
        lock.tickets.next.load(Relaxed) as usize
    }

    /// Parks every waiter and starts the tickets a few laps short of the
    /// counter's wraparound.
    fn parking_near_wraparound<B: Backend>(max_waiters: usize) -> ParkingTicketLock<B, Yield> {
        let config = ParkingTicketConfig::new().max_waiters(max_waiters).spin_distance(0);
        let lock = ParkingTicketLock::<B, Yield>::with_config(config);
        let start = u32::MAX - 3 * lock.slots.len() as u32;
        ParkingTicketLock::with_tickets(config, Tickets::starting_at(start))
    }

    fn stress_with_timeout<B: Backend + Send + Sync + 'static>(threads: usize, max_waiters: usize) {
        let (tx, rx) = channel();
        thread::spawn(move || {
            tests::scratch_byte_with(threads, 500, || parking_near_wraparound::<B>(max_waiters));
            tx.send(()).unwrap();
        });
        rx.recv_timeout(TIMEOUT).expect("a parked ticket was never woken");
    }

    #[test]
    fn fifo_order() {
        tests::fifo_order(Lock::new(), 8, next_ticket);
    }

    #[test]
    fn fifo_order_all_parked() {
        let lock = Lock::with_config(ParkingTicketConfig::new().spin_distance(0));
        tests::fifo_order(lock, 8, next_ticket);
    }

    #[test]
    fn capacity_is_rounded_up() {
        assert_eq!(Lock::with_capacity(0).capacity(), 1);
        assert_eq!(Lock::with_capacity(3).capacity(), 3);
        assert_eq!(Lock::with_capacity(4).capacity(), 7);
        assert_eq!(Lock::new().capacity(), 255);
    }

    #[test]
    fn tags_are_distinct_across_generations() {
        let lock = Lock::with_capacity(3);
        assert_eq!(lock.slots.len(), 4);
        for ticket in [0, 5, 1 << 20, u32::MAX - 4, u32::MAX] {
            let next_lap = ticket.wrapping_add(4);
            assert_ne!(lock.granted(ticket), lock.waiting(ticket));
            assert_ne!(lock.granted(ticket), lock.granted(next_lap));
            assert_ne!(lock.granted(ticket), lock.waiting(next_lap));
            assert_ne!(lock.granted(ticket), VACANT);
        }
        // Same slot, same lap.
        assert_eq!(lock.granted(4), lock.granted(7));
    }

    #[test]
    fn stale_grant_is_not_taken() {
        let lock = Lock::with_capacity(3);
        // Ticket 0 released, granting ticket 1 that nobody holds.
        lock.acquire(&mut ());
        lock.release(&mut ());
        let slot = lock.slot(1);
        assert_eq!(slot.value().load(Relaxed), lock.granted(1));
        // Ticket 5 shares the slot, one lap later.
        assert_ne!(slot.value().load(Relaxed), lock.granted(5));
    }

    #[test]
    fn weakened_orderings_single_thread() {
        use crate::park::ParkOrdering::{Relaxed, RelaxedWait, RelaxedWake};

        for ordering in [RelaxedWait, RelaxedWake, Relaxed] {
            let config = ParkingTicketConfig::new().max_waiters(3).ordering(ordering);
            let lock = Lock::with_config(config);
            for _ in 0..10 {
                lock.acquire(&mut ());
                assert!(!lock.try_acquire(&mut ()));
                lock.release(&mut ());
            }
            assert!(!lock.is_locked());
        }
    }

    #[test]
    fn wraparound_spin_wait() {
        stress_with_timeout::<SpinWait<Yield>>(3, 3);
    }

    #[test]
    fn wraparound_default_backend() {
        stress_with_timeout::<DefaultBackend>(3, 3);
    }

    #[test]
    fn wraparound_condvar() {
        stress_with_timeout::<crate::park::Condvar>(4, 3);
    }

    #[test]
    fn no_missed_wakeup_single_waiter() {
        stress_with_timeout::<DefaultBackend>(2, 1);
    }

    #[test]
    fn debug() {
        use std::format;
        let lock = Lock::with_capacity(3);
        let debug = format!("{lock:?}");
        assert!(debug.starts_with("ParkingTicketLock { tickets: Tickets { next: 0, serving: 0 }"));
        assert!(debug.contains("capacity: 3"));
    }
}

#[cfg(all(loom, test))]
mod model {
    use super::{ParkingTicketConfig, ParkingTicketLock};
    use crate::loom::models;
    use crate::park::{Condvar, SpinWait};
    use crate::relax::Yield;

    // A spin distance of zero makes every waiter park.
    const CONFIG: ParkingTicketConfig = ParkingTicketConfig::new().max_waiters(1).spin_distance(0);

    fn condvar() -> ParkingTicketLock<Condvar, Yield> {
        ParkingTicketLock::with_config(CONFIG)
    }

    fn spin_wait() -> ParkingTicketLock<SpinWait<Yield>, Yield> {
        ParkingTicketLock::with_config(CONFIG)
    }

    #[test]
    fn try_lock_join() {
        models::try_lock_join(condvar);
    }

    #[test]
    fn lock_join() {
        models::lock_join(condvar);
    }

    #[test]
    fn mixed_lock_join() {
        models::mixed_lock_join(condvar);
    }

    #[test]
    fn handover() {
        models::handover(condvar);
    }

    #[test]
    fn spin_wait_handover() {
        models::handover(spin_wait);
    }
}
