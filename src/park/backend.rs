use core::marker::PhantomData;
use core::sync::atomic::Ordering::Relaxed;

use crate::cfg::atomic::AtomicU32;
use crate::relax::{Relax, Spin};

/// The mechanism a [`ParkCell`] uses to put threads to sleep and wake them up.
///
/// Implementations sleep on a generation counter: [`block`] must not return
/// before the counter has moved away from the observed value, unless the
/// underlying mechanism wakes up spuriously. [`notify_one`] and [`notify_all`]
/// are called right after the counter is incremented and must never block for
/// an unbounded amount of time.
///
/// [`ParkCell`]: super::ParkCell
/// [`block`]: Backend::block
/// [`notify_one`]: Backend::notify_one
/// [`notify_all`]: Backend::notify_all
pub trait Backend {
    /// The initial backend state.
    ///
    /// It's expected for a implementing type to be compiler-time evaluable,
    /// since locks that embed it are.
    #[cfg(not(all(loom, test)))]
    const INIT: Self;

    /// Creates the initial backend state with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    fn init() -> Self;

    /// Blocks until `generation` no longer holds `observed`.
    fn block(&self, generation: &AtomicU32, observed: u32);

    /// Wakes at least one thread blocked on `generation`.
    fn notify_one(&self, generation: &AtomicU32);

    /// Wakes every thread blocked on `generation`.
    fn notify_all(&self, generation: &AtomicU32);
}

/// Busy-waits on the generation counter, running the `R` relax strategy
/// between reads.
///
/// Never involves the scheduler, so it is available everywhere and makes a
/// convenient reference point when measuring the other backends.
pub struct SpinWait<R = Spin> {
    relax: PhantomData<R>,
}

impl<R: Relax> Backend for SpinWait<R> {
    #[cfg(not(all(loom, test)))]
    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self { relax: PhantomData };

    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    fn init() -> Self {
        Self { relax: PhantomData }
    }

    fn block(&self, generation: &AtomicU32, observed: u32) {
        let mut relax = R::new();
        while generation.load(Relaxed) == observed {
            relax.relax();
        }
    }

    #[inline(always)]
    fn notify_one(&self, _generation: &AtomicU32) {}

    #[inline(always)]
    fn notify_all(&self, _generation: &AtomicU32) {}
}

#[cfg(any(feature = "std", test))]
pub use condvar::Condvar;

#[cfg(any(feature = "std", test))]
mod condvar {
    use core::sync::atomic::Ordering::Relaxed;
    use std::sync::PoisonError;

    use super::Backend;
    use crate::cfg::atomic::AtomicU32;
    use crate::cfg::sync;

    /// Sleeps on a condition variable.
    ///
    /// The generation counter is re-checked while holding the mutex, and
    /// wakers take the same mutex after incrementing it. A waker can not slip
    /// its notification between a waiter's check and its sleep.
    pub struct Condvar {
        lock: sync::Mutex<()>,
        cvar: sync::Condvar,
    }

    impl Backend for Condvar {
        #[cfg(not(all(loom, test)))]
        #[allow(clippy::declare_interior_mutable_const)]
        const INIT: Self = Self { lock: sync::Mutex::new(()), cvar: sync::Condvar::new() };

        #[cfg(all(loom, test))]
        #[cfg(not(tarpaulin_include))]
        fn init() -> Self {
            Self { lock: sync::Mutex::new(()), cvar: sync::Condvar::new() }
        }

        fn block(&self, generation: &AtomicU32, observed: u32) {
            // The mutex guards no data, a poisoned one is as good as any.
            let mut guard = self.lock.lock().unwrap_or_else(PoisonError::into_inner);
            while generation.load(Relaxed) == observed {
                guard = self.cvar.wait(guard).unwrap_or_else(PoisonError::into_inner);
            }
        }

        fn notify_one(&self, _generation: &AtomicU32) {
            drop(self.lock.lock().unwrap_or_else(PoisonError::into_inner));
            self.cvar.notify_one();
        }

        fn notify_all(&self, _generation: &AtomicU32) {
            drop(self.lock.lock().unwrap_or_else(PoisonError::into_inner));
            self.cvar.notify_all();
        }
    }
}

#[cfg(all(feature = "futex", not(all(loom, test))))]
pub use futex::Futex;

#[cfg(all(feature = "futex", not(all(loom, test))))]
mod futex {
    use core::sync::atomic::AtomicU32;

    use super::Backend;

    /// Sleeps on the generation counter itself with the platform's futex
    /// (or futex-like) API, through the `atomic-wait` crate.
    ///
    /// The kernel compares the counter with the observed value atomically
    /// with queuing the thread, so an increment that precedes the sleep makes
    /// it return immediately.
    pub struct Futex;

    impl Backend for Futex {
        const INIT: Self = Self;

        fn block(&self, generation: &AtomicU32, observed: u32) {
            atomic_wait::wait(generation, observed);
        }

        fn notify_one(&self, generation: &AtomicU32) {
            atomic_wait::wake_one(generation);
        }

        fn notify_all(&self, generation: &AtomicU32) {
            atomic_wait::wake_all(generation);
        }
    }
}
