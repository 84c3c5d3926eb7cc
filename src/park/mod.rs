//! A generic wait/wake primitive, in the spirit of a futex.
//!
//! A [`ParkCell`] pairs a monitored 32 bit word with a generation counter.
//! [`ParkCell::wait`] puts the calling thread to sleep only if the monitored
//! word still holds the expected value, and [`ParkCell::wake_one`] bumps the
//! generation before notifying sleepers. A waiter samples the generation
//! before it checks the word, so a wake that lands between the check and the
//! actual sleep is never lost: the sleep itself is conditioned on the
//! generation it sampled.
//!
//! How a thread sleeps is decided by the [`Backend`] type parameter:
//!
//! - [`Futex`]: a kernel futex on the generation counter (`futex` feature).
//! - [`Condvar`]: a mutex and condition variable pair (`std` feature).
//! - [`SpinWait`]: a busy-wait on the generation counter, always available.
//!
//! The orderings used by the sleep decision and by the wake-up are picked at
//! construction time through [`ParkOrdering`], so that experiments can weaken
//! them on purpose.
//!
//! Waking may be spurious. Callers must re-check their own condition after
//! [`ParkCell::wait`] returns.

use core::fmt::{self, Debug, Formatter};
use core::sync::atomic::Ordering::{self, Acquire, Relaxed, Release};

use crate::cfg::atomic::AtomicU32;

mod backend;
pub mod policy;

pub use backend::{Backend, SpinWait};

#[cfg(any(feature = "std", test))]
pub use backend::Condvar;

#[cfg(all(feature = "futex", not(all(loom, test))))]
pub use backend::Futex;

/// The backend used by locks of this crate when none is specified.
#[cfg(all(feature = "futex", not(all(loom, test))))]
pub type DefaultBackend = Futex;

/// The backend used by locks of this crate when none is specified.
#[cfg(all(feature = "std", not(all(feature = "futex", not(all(loom, test))))))]
pub type DefaultBackend = Condvar;

/// The backend used by locks of this crate when none is specified.
#[cfg(not(feature = "std"))]
pub type DefaultBackend = SpinWait;

/// The memory orderings a [`ParkCell`] applies to its own accesses.
///
/// Only [`ParkOrdering::Strict`] guarantees that a wake-up is never missed.
/// The weakened variants exist to study what breaks, and how often, when the
/// sleep decision or the wake-up are not ordered with the surrounding lock
/// protocol.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ParkOrdering {
    /// Acquire loads before sleeping, release increments when waking.
    #[default]
    Strict,
    /// Relaxed loads before sleeping, release increments when waking.
    RelaxedWait,
    /// Acquire loads before sleeping, relaxed increments when waking.
    RelaxedWake,
    /// Relaxed on both sides.
    Relaxed,
}

impl ParkOrdering {
    /// The ordering of the loads that decide whether to go to sleep.
    pub const fn wait(self) -> Ordering {
        match self {
            Self::Strict | Self::RelaxedWake => Acquire,
            Self::RelaxedWait | Self::Relaxed => Relaxed,
        }
    }

    /// The ordering of the generation increment that signals a wake-up.
    pub const fn wake(self) -> Ordering {
        match self {
            Self::Strict | Self::RelaxedWait => Release,
            Self::RelaxedWake | Self::Relaxed => Relaxed,
        }
    }
}

/// A monitored word that threads can sleep on until it changes.
pub struct ParkCell<B = DefaultBackend> {
    value: AtomicU32,
    generation: AtomicU32,
    ordering: ParkOrdering,
    backend: B,
}

impl<B: Backend> ParkCell<B> {
    /// Creates a new cell holding `value`, with [`ParkOrdering::Strict`].
    #[cfg(not(all(loom, test)))]
    pub const fn new(value: u32) -> Self {
        Self::with_ordering(value, ParkOrdering::Strict)
    }

    /// Creates a new cell holding `value`, with the given orderings (const).
    #[cfg(not(all(loom, test)))]
    pub const fn with_ordering(value: u32, ordering: ParkOrdering) -> Self {
        let value = AtomicU32::new(value);
        let generation = AtomicU32::new(0);
        Self { value, generation, ordering, backend: B::INIT }
    }

    /// Creates a new cell holding `value`, with [`ParkOrdering::Strict`].
    #[cfg(all(loom, test))]
    pub fn new(value: u32) -> Self {
        Self::with_ordering(value, ParkOrdering::Strict)
    }

    /// Creates a new cell holding `value`, with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    pub fn with_ordering(value: u32, ordering: ParkOrdering) -> Self {
        let value = AtomicU32::new(value);
        let generation = AtomicU32::new(0);
        Self { value, generation, ordering, backend: B::init() }
    }

    /// Blocks the current thread if the monitored word equals `expected`,
    /// until some later call to `wake_one` or `wake_all`.
    ///
    /// Returns immediately if the word holds anything else. May return
    /// spuriously.
    pub fn wait(&self, expected: u32) {
        let order = self.ordering.wait();
        let observed = self.generation.load(order);
        if self.value.load(order) != expected {
            return;
        }
        tracing::trace!(expected, generation = observed, "parking");
        self.backend.block(&self.generation, observed);
    }

    /// Wakes at least one thread currently parked on this cell, if any.
    ///
    /// This function never blocks. Callers must publish their update to the
    /// monitored word before calling it.
    pub fn wake_one(&self) {
        self.generation.fetch_add(1, self.ordering.wake());
        self.backend.notify_one(&self.generation);
    }

    /// Wakes all threads currently parked on this cell.
    pub fn wake_all(&self) {
        self.generation.fetch_add(1, self.ordering.wake());
        self.backend.notify_all(&self.generation);
    }
}

impl<B> ParkCell<B> {
    /// Returns a reference to the monitored word.
    pub const fn value(&self) -> &AtomicU32 {
        &self.value
    }

    /// Returns the orderings this cell was configured with.
    pub const fn ordering(&self) -> ParkOrdering {
        self.ordering
    }
}

impl<B> Debug for ParkCell<B> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ParkCell")
            .field("value", &self.value)
            .field("generation", &self.generation)
            .field("ordering", &self.ordering)
            .finish_non_exhaustive()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::Ordering::{Relaxed, SeqCst};
    use std::sync::mpsc::channel;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::time::Duration;

    use super::{Backend, ParkCell, ParkOrdering, SpinWait};
    use crate::relax::Yield;

    const TIMEOUT: Duration = Duration::from_secs(10);

    fn wait_returns_if_value_changed<B: Backend>() {
        let cell = ParkCell::<B>::new(1);
        cell.wait(0);
        cell.value().store(2, Relaxed);
        cell.wait(1);
    }

    // Replays `wait` by hand with the wake-up landing after the waiter checked
    // the monitored word but before it went to sleep. It must not block.
    fn wake_before_wait_is_not_lost<B: Backend>() {
        let cell = ParkCell::<B>::new(0);
        let observed = cell.generation.load(SeqCst);
        assert_eq!(cell.value().load(SeqCst), 0);
        cell.value().store(1, SeqCst);
        cell.wake_one();
        cell.backend.block(&cell.generation, observed);
    }

    // Hammers the window between the waiter's check of the monitored word and
    // its sleep. A lost wake-up shows as a timeout.
    fn no_missed_wakeup<B: Backend + Send + Sync + 'static>() {
        const ROUNDS: u32 = 500;
        let cell = Arc::new(ParkCell::<B>::new(0));
        let barrier = Arc::new(Barrier::new(2));
        let (tx, rx) = channel();
        let waiter = {
            let (cell, barrier) = (Arc::clone(&cell), Arc::clone(&barrier));
            thread::spawn(move || {
                for round in 0..ROUNDS {
                    barrier.wait();
                    while cell.value().load(SeqCst) == round * 2 {
                        cell.wait(round * 2);
                    }
                }
                tx.send(()).unwrap();
            })
        };
        for round in 0..ROUNDS {
            barrier.wait();
            cell.value().store(round * 2 + 2, SeqCst);
            cell.wake_one();
        }
        rx.recv_timeout(TIMEOUT).expect("a wake-up was lost");
        waiter.join().unwrap();
    }

    fn wake_all_wakes_every_waiter<B: Backend + Send + Sync + 'static>() {
        const WAITERS: usize = 4;
        let cell = Arc::new(ParkCell::<B>::new(0));
        let (tx, rx) = channel();
        for _ in 0..WAITERS {
            let (cell, tx) = (Arc::clone(&cell), tx.clone());
            thread::spawn(move || {
                while cell.value().load(SeqCst) == 0 {
                    cell.wait(0);
                }
                tx.send(()).unwrap();
            });
        }
        thread::sleep(Duration::from_millis(20));
        cell.value().store(1, SeqCst);
        cell.wake_all();
        for _ in 0..WAITERS {
            rx.recv_timeout(TIMEOUT).expect("a waiter was not woken");
        }
    }

    const WEAKENED: [ParkOrdering; 3] =
        [ParkOrdering::RelaxedWait, ParkOrdering::RelaxedWake, ParkOrdering::Relaxed];

    #[test]
    fn weakened_orderings_single_thread() {
        for ordering in WEAKENED {
            let cell = ParkCell::<SpinWait<Yield>>::with_ordering(1, ordering);
            assert_eq!(cell.ordering(), ordering);
            cell.wait(0);
            let observed = cell.generation.load(SeqCst);
            cell.wake_one();
            cell.backend.block(&cell.generation, observed);
            let observed = cell.generation.load(SeqCst);
            cell.wake_all();
            cell.backend.block(&cell.generation, observed);
            assert_eq!(cell.generation.load(SeqCst), 2);
        }
    }

    #[test]
    fn orderings() {
        use std::sync::atomic::Ordering::{Acquire, Release};
        assert_eq!(ParkOrdering::default(), ParkOrdering::Strict);
        assert_eq!(ParkOrdering::Strict.wait(), Acquire);
        assert_eq!(ParkOrdering::Strict.wake(), Release);
        assert_eq!(ParkOrdering::RelaxedWait.wait(), Relaxed);
        assert_eq!(ParkOrdering::RelaxedWait.wake(), Release);
        assert_eq!(ParkOrdering::RelaxedWake.wait(), Acquire);
        assert_eq!(ParkOrdering::RelaxedWake.wake(), Relaxed);
        assert_eq!(ParkOrdering::Relaxed.wait(), Relaxed);
        assert_eq!(ParkOrdering::Relaxed.wake(), Relaxed);
    }

    #[test]
    fn spin_wait_returns_if_value_changed() {
        wait_returns_if_value_changed::<SpinWait<Yield>>();
    }

    #[test]
    fn spin_wait_wake_before_wait() {
        wake_before_wait_is_not_lost::<SpinWait<Yield>>();
    }

    #[test]
    fn spin_wait_no_missed_wakeup() {
        no_missed_wakeup::<SpinWait<Yield>>();
    }

    #[test]
    fn spin_wait_wake_all() {
        wake_all_wakes_every_waiter::<SpinWait<Yield>>();
    }

    #[test]
    fn condvar_returns_if_value_changed() {
        wait_returns_if_value_changed::<super::Condvar>();
    }

    #[test]
    fn condvar_wake_before_wait() {
        wake_before_wait_is_not_lost::<super::Condvar>();
    }

    #[test]
    fn condvar_no_missed_wakeup() {
        no_missed_wakeup::<super::Condvar>();
    }

    #[test]
    fn condvar_wake_all() {
        wake_all_wakes_every_waiter::<super::Condvar>();
    }

    #[cfg(feature = "futex")]
    #[test]
    fn futex_returns_if_value_changed() {
        wait_returns_if_value_changed::<super::Futex>();
    }

    #[cfg(feature = "futex")]
    #[test]
    fn futex_wake_before_wait() {
        wake_before_wait_is_not_lost::<super::Futex>();
    }

    #[cfg(feature = "futex")]
    #[test]
    fn futex_no_missed_wakeup() {
        no_missed_wakeup::<super::Futex>();
    }

    #[cfg(feature = "futex")]
    #[test]
    fn futex_wake_all() {
        wake_all_wakes_every_waiter::<super::Futex>();
    }
}
