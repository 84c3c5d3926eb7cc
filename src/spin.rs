//! Global spinning locks over a single atomic flag.
//!
//! Both locks in this module make every waiter spin on the same cache line.
//! They are cheap when uncontended and have no fairness guarantee at all: a
//! waiter may be overtaken by newcomers any number of times.

use core::fmt::{self, Debug, Formatter};
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::cfg::{self, atomic::AtomicBool};
use crate::error::NodeError;
use crate::lock::RawLock;
use crate::relax::{Relax, Spin};

/// A test-and-set spinlock.
///
/// Every waiting iteration issues an atomic swap, so waiters keep stealing the
/// cache line from each other and from the holder. Kept as a baseline for
/// [`Ttas`].
///
/// # Example
///
/// ```
/// use qlocks::lock::RawLock;
/// use qlocks::spin::Tas;
///
/// let lock = Tas::<qlocks::relax::Spin>::new();
/// let mut node = lock.node();
/// lock.acquire(&mut node);
/// assert!(lock.is_locked());
/// lock.release(&mut node);
/// ```
pub struct Tas<R = Spin> {
    locked: AtomicBool,
    relax: PhantomData<R>,
}

impl<R> Tas<R> {
    /// Creates a new, unlocked spinlock.
    #[cfg(not(all(loom, test)))]
    pub const fn new() -> Self {
        Self { locked: AtomicBool::new(false), relax: PhantomData }
    }

    /// Creates a new, unlocked spinlock with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn new() -> Self {
        Self { locked: AtomicBool::new(false), relax: PhantomData }
    }
}

// SAFETY: The lock is only acquired by the thread whose swap turned the flag
// from `false` to `true` with acquire ordering, and only released by storing
// `false` with release ordering.
unsafe impl<R: Relax> RawLock for Tas<R> {
    type Node<'a>
        = ()
    where
        Self: 'a;

    fn try_node(&self) -> Result<(), NodeError> {
        Ok(())
    }

    fn acquire(&self, (): &mut ()) {
        let mut relax = R::new();
        while self.locked.swap(true, Acquire) {
            relax.relax();
        }
    }

    fn try_acquire(&self, (): &mut ()) -> bool {
        !self.locked.swap(true, Acquire)
    }

    fn release(&self, (): &mut ()) {
        if !self.locked.swap(false, Release) {
            cfg::misuse(format_args!("released a test-and-set lock that was not held"));
        }
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Relaxed)
    }
}

/// A test-and-test-and-set spinlock.
///
/// Waiters spin on a relaxed read of the flag, which is served from their own
/// cache once the line is shared, and only attempt the compare-and-swap when
/// the flag reads as released. Starvation is possible under adversarial
/// scheduling.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
///
/// use qlocks::spin::Ttas;
/// use qlocks::relax::Spin;
///
/// type Mutex<T> = qlocks::Mutex<T, Ttas<Spin>>;
///
/// let mutex = Arc::new(Mutex::new(0));
/// let c_mutex = Arc::clone(&mutex);
///
/// thread::spawn(move || {
///     c_mutex.lock_then(|data| *data = 10);
/// })
/// .join().expect("thread::spawn failed");
///
/// assert_eq!(mutex.lock_then(|data| *data), 10);
/// ```
pub struct Ttas<R = Spin> {
    locked: AtomicBool,
    relax: PhantomData<R>,
}

impl<R> Ttas<R> {
    /// Creates a new, unlocked spinlock.
    #[cfg(not(all(loom, test)))]
    pub const fn new() -> Self {
        Self { locked: AtomicBool::new(false), relax: PhantomData }
    }

    /// Creates a new, unlocked spinlock with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn new() -> Self {
        Self { locked: AtomicBool::new(false), relax: PhantomData }
    }
}

// SAFETY: The lock is only acquired by the thread whose compare-and-swap
// turned the flag from `false` to `true` with acquire ordering, and only
// released by storing `false` with release ordering.
unsafe impl<R: Relax> RawLock for Ttas<R> {
    type Node<'a>
        = ()
    where
        Self: 'a;

    fn try_node(&self) -> Result<(), NodeError> {
        Ok(())
    }

    fn acquire(&self, (): &mut ()) {
        let mut relax = R::new();
        loop {
            while self.locked.load(Relaxed) {
                relax.relax();
            }
            let cas = self.locked.compare_exchange_weak(false, true, Acquire, Relaxed);
            if cas.is_ok() {
                return;
            }
        }
    }

    fn try_acquire(&self, (): &mut ()) -> bool {
        self.locked.compare_exchange(false, true, Acquire, Relaxed).is_ok()
    }

    fn release(&self, (): &mut ()) {
        if !self.locked.swap(false, Release) {
            cfg::misuse(format_args!("released a test-and-test-and-set lock that was not held"));
        }
    }

    fn is_locked(&self) -> bool {
        self.locked.load(Relaxed)
    }
}

macro_rules! impl_common {
    ($lock:ident) => {
        #[cfg(not(all(loom, test)))]
        impl<R> Default for $lock<R> {
            fn default() -> Self {
                Self::new()
            }
        }

        impl<R> Debug for $lock<R> {
            fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
                f.debug_struct(stringify!($lock))
                    .field("locked", &self.locked.load(Relaxed))
                    .finish()
            }
        }
    };
}

impl_common!(Tas);
impl_common!(Ttas);

#[cfg(all(not(loom), test))]
mod test {
    mod tas {
        use crate::relax::Yield;
        use crate::test::tests::lock_suite;

        lock_suite!(super::super::Tas<Yield>);
    }

    mod ttas {
        use crate::relax::Yield;
        use crate::test::tests::lock_suite;

        lock_suite!(super::super::Ttas<Yield>);
    }

    #[test]
    fn ttas_spin_backoff() {
        use crate::relax::SpinBackoff;
        crate::test::tests::lots_and_lots_lock::<super::Ttas<SpinBackoff>>();
    }

    #[test]
    fn debug_shows_flag() {
        use std::format;

        use crate::lock::RawLock;
        use crate::relax::Spin;

        let lock = super::Ttas::<Spin>::new();
        assert_eq!(format!("{lock:?}"), "Ttas { locked: false }");
        lock.acquire(&mut ());
        assert_eq!(format!("{lock:?}"), "Ttas { locked: true }");
        lock.release(&mut ());
    }
}

#[cfg(all(loom, test))]
mod model {
    use crate::loom::models;
    use crate::relax::Yield;
    use crate::spin::{Tas, Ttas};

    #[test]
    fn tas_lock_join() {
        models::lock_join(Tas::<Yield>::new);
    }

    #[test]
    fn ttas_try_lock_join() {
        models::try_lock_join(Ttas::<Yield>::new);
    }

    #[test]
    fn ttas_lock_join() {
        models::lock_join(Ttas::<Yield>::new);
    }

    #[test]
    fn ttas_mixed_lock_join() {
        models::mixed_lock_join(Ttas::<Yield>::new);
    }
}
