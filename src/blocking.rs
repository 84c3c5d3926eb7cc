//! A blocking mutex over the park primitive.
//!
//! The lock word has three states: unlocked, locked, and locked with possible
//! sleepers. An uncontended acquisition and release are a single atomic
//! operation each, and a release only pays for a wake-up when some waiter
//! announced itself by moving the word to the contended state.
//!
//! Waiters first spin for a while according to their [`ParkPolicy`], then go
//! to sleep on the lock word through a [`ParkCell`]. Which sleeper is woken
//! is up to the park backend, and a woken thread competes with newcomers for
//! the lock: there is no fairness guarantee, and a waiter may starve under
//! adversarial scheduling.

use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::cfg;
use crate::error::NodeError;
use crate::lock::RawLock;
use crate::park::policy::{ParkPolicy, SpinThenPark};
use crate::park::{Backend, DefaultBackend, ParkCell, ParkOrdering};
use crate::relax::Relax;

const UNLOCKED: u32 = 0;
const LOCKED: u32 = 1;
const CONTENDED: u32 = 2;

/// A tri-state blocking mutex.
///
/// `B` is the park backend sleepers block on, and `P` decides how long a
/// contended acquirer spins before parking.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use qlocks::blocking::BlockingMutex;
///
/// type Mutex<T> = qlocks::Mutex<T, BlockingMutex>;
///
/// let mutex = Arc::new(Mutex::new(0));
/// let handles = (0..4)
///     .map(|_| Arc::clone(&mutex))
///     .map(|mutex| thread::spawn(move || mutex.lock_then(|data| *data += 1)))
///     .collect::<Vec<_>>();
/// for handle in handles {
///     handle.join().unwrap();
/// }
/// assert_eq!(Arc::try_unwrap(mutex).ok().unwrap().into_inner(), 4);
/// ```
pub struct BlockingMutex<B = DefaultBackend, P = SpinThenPark> {
    cell: ParkCell<B>,
    policy: PhantomData<P>,
}

impl<B: Backend, P> BlockingMutex<B, P> {
    /// Creates a new, unlocked mutex.
    #[cfg(not(all(loom, test)))]
    pub const fn new() -> Self {
        Self::with_ordering(ParkOrdering::Strict)
    }

    /// Creates a new, unlocked mutex whose park cell uses `ordering`.
    #[cfg(not(all(loom, test)))]
    pub const fn with_ordering(ordering: ParkOrdering) -> Self {
        Self { cell: ParkCell::with_ordering(UNLOCKED, ordering), policy: PhantomData }
    }

    /// Creates a new, unlocked mutex with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn new() -> Self {
        Self::with_ordering(ParkOrdering::Strict)
    }

    /// Creates a new, unlocked mutex with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn with_ordering(ordering: ParkOrdering) -> Self {
        Self { cell: ParkCell::with_ordering(UNLOCKED, ordering), policy: PhantomData }
    }
}

impl<B: Backend, P: ParkPolicy> BlockingMutex<B, P> {
    #[cold]
    fn acquire_contended(&self) {
        let state = self.cell.value();
        let mut policy = P::new();
        let mut relax = <P::Relax as Relax>::new();
        while !policy.should_park() {
            if state.load(Relaxed) == UNLOCKED {
                let cas = state.compare_exchange_weak(UNLOCKED, LOCKED, Acquire, Relaxed);
                if cas.is_ok() {
                    return;
                }
            }
            policy.on_failure();
            relax.relax();
        }
        tracing::trace!("blocking mutex contended");
        // Once parked, the lock is only ever taken back in the contended
        // state, since other sleepers may still be waiting.
        while state.swap(CONTENDED, Acquire) != UNLOCKED {
            self.cell.wait(CONTENDED);
        }
    }
}

// SAFETY: The lock is only acquired by the thread that moved the word from
// unlocked to another state with acquire ordering, and released by a swap
// back to unlocked with release ordering. Sleepers re-check the word after
// every wake-up.
unsafe impl<B: Backend, P: ParkPolicy> RawLock for BlockingMutex<B, P> {
    type Node<'a>
        = ()
    where
        Self: 'a;

    fn try_node(&self) -> Result<(), NodeError> {
        Ok(())
    }

    fn acquire(&self, (): &mut ()) {
        let state = self.cell.value();
        if state.compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed).is_err() {
            self.acquire_contended();
        }
    }

    fn try_acquire(&self, (): &mut ()) -> bool {
        self.cell.value().compare_exchange(UNLOCKED, LOCKED, Acquire, Relaxed).is_ok()
    }

    fn release(&self, (): &mut ()) {
        match self.cell.value().swap(UNLOCKED, Release) {
            UNLOCKED => cfg::misuse(format_args!("released a blocking mutex that was not held")),
            CONTENDED => self.cell.wake_one(),
            _ => {}
        }
    }

    fn is_locked(&self) -> bool {
        self.cell.value().load(Relaxed) != UNLOCKED
    }
}

#[cfg(not(all(loom, test)))]
impl<B: Backend, P> Default for BlockingMutex<B, P> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B, P> Debug for BlockingMutex<B, P> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let state = match self.cell.value().load(Relaxed) {
            UNLOCKED => "unlocked",
            LOCKED => "locked",
            _ => "contended",
        };
        f.debug_struct("BlockingMutex").field("state", &state).finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::format;
    use std::sync::atomic::Ordering::Relaxed;
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::{BlockingMutex, CONTENDED, LOCKED, UNLOCKED};
    use crate::lock::RawLock;
    use crate::park::policy::{ImmediatePark, YieldThenPark};
    use crate::park::{Backend, Condvar, DefaultBackend, SpinWait};
    use crate::relax::Yield;
    use crate::test::tests;
    use crate::Mutex;

    mod spin_then_park {
        use crate::park::policy::YieldThenPark;
        use crate::test::tests::lock_suite;

        lock_suite!(super::BlockingMutex<super::DefaultBackend, YieldThenPark>);
    }

    mod immediate_condvar {
        use crate::park::policy::ImmediatePark;
        use crate::relax::Yield;
        use crate::test::tests::lock_suite;

        lock_suite!(super::BlockingMutex<super::Condvar, ImmediatePark<Yield>>);
    }

    mod immediate_spin_wait {
        use crate::park::policy::ImmediatePark;
        use crate::relax::Yield;
        use crate::test::tests::lock_suite;

        lock_suite!(super::BlockingMutex<super::SpinWait<Yield>, ImmediatePark<Yield>>);
    }

    type Immediate<B> = BlockingMutex<B, ImmediatePark<Yield>>;

    fn state<B, P>(lock: &BlockingMutex<B, P>) -> u32 {
        lock.cell.value().load(Relaxed)
    }

    #[test]
    fn uncontended_stays_locked() {
        let lock = BlockingMutex::<DefaultBackend, YieldThenPark>::new();
        lock.acquire(&mut ());
        assert_eq!(state(&lock), LOCKED);
        lock.release(&mut ());
        assert_eq!(state(&lock), UNLOCKED);
        assert!(lock.try_acquire(&mut ()));
        assert!(!lock.try_acquire(&mut ()));
        lock.release(&mut ());
    }

    #[test]
    fn sleeper_marks_contended() {
        let mutex = Arc::new(Mutex::with_lock(0, Immediate::<DefaultBackend>::new()));
        mutex.raw().acquire(&mut ());
        let c_mutex = Arc::clone(&mutex);
        let waiter = thread::spawn(move || c_mutex.lock_then(|data| *data += 1));
        while state(mutex.raw()) != CONTENDED {
            thread::yield_now();
        }
        mutex.raw().release(&mut ());
        waiter.join().unwrap();
        assert_eq!(mutex.lock_then(|data| *data), 1);
    }

    // Alternates two threads that park right away, so that most releases
    // race with a waiter that is about to sleep. A lost wake-up shows as a
    // timeout.
    fn no_missed_wakeup<B: Backend + Send + Sync + 'static>() {
        const TIMEOUT: Duration = Duration::from_secs(60);
        let (tx, rx) = channel();
        thread::spawn(move || {
            tests::scratch_byte_with(2, 2000, Immediate::<B>::new);
            tx.send(()).unwrap();
        });
        rx.recv_timeout(TIMEOUT).expect("a wake-up was lost");
    }

    #[test]
    fn no_missed_wakeup_default_backend() {
        no_missed_wakeup::<DefaultBackend>();
    }

    #[test]
    fn no_missed_wakeup_condvar() {
        no_missed_wakeup::<Condvar>();
    }

    #[test]
    fn no_missed_wakeup_spin_wait() {
        no_missed_wakeup::<SpinWait<Yield>>();
    }

    #[test]
    fn weakened_orderings_single_thread() {
        use crate::park::ParkOrdering::{Relaxed, RelaxedWait, RelaxedWake};

        for ordering in [RelaxedWait, RelaxedWake, Relaxed] {
            let lock = BlockingMutex::<DefaultBackend, YieldThenPark>::with_ordering(ordering);
            let mutex = Mutex::with_lock(0, lock);
            for _ in 0..10 {
                mutex.lock_then(|data| *data += 1);
            }
            assert!(mutex.try_lock_then(|data| data.is_some()));
            assert!(!mutex.is_locked());
            assert_eq!(mutex.into_inner(), 10);
        }
    }

    #[test]
    fn debug_shows_state() {
        let lock = Immediate::<DefaultBackend>::new();
        assert_eq!(format!("{lock:?}"), "BlockingMutex { state: \"unlocked\" }");
        lock.acquire(&mut ());
        assert_eq!(format!("{lock:?}"), "BlockingMutex { state: \"locked\" }");
        lock.release(&mut ());
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::blocking::BlockingMutex;
    use crate::loom::models;
    use crate::park::policy::ImmediatePark;
    use crate::park::{Condvar, SpinWait};
    use crate::relax::Yield;

    type Parks = BlockingMutex<Condvar, ImmediatePark<Yield>>;
    type Spins = BlockingMutex<SpinWait<Yield>, ImmediatePark<Yield>>;

    #[test]
    fn try_lock_join() {
        models::try_lock_join(Parks::new);
    }

    #[test]
    fn lock_join() {
        models::lock_join(Parks::new);
    }

    #[test]
    fn mixed_lock_join() {
        models::mixed_lock_join(Parks::new);
    }

    #[test]
    fn spin_wait_lock_join() {
        models::lock_join(Spins::new);
    }
}
