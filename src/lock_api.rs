//! Locking interfaces compatible with [lock_api].
//!
//! The locks of this crate that need no queue record implement
//! [`lock_api::RawMutex`]: [`Tas`], [`Ttas`], [`TicketLock`] and
//! [`BlockingMutex`]. [`TicketLock`] is FIFO and also implements
//! [`lock_api::RawMutexFair`]. Queue locks are left out, since `lock_api`
//! has no place to keep a per-acquirer record during the critical section.
//!
//! This module exports [`lock_api::Mutex`] and [`lock_api::MutexGuard`] type
//! aliases generic over the raw lock, and one module of aliases per
//! algorithm with its default relax strategy.
//!
//! [`Tas`]: crate::spin::Tas
//! [`Ttas`]: crate::spin::Ttas
//! [`TicketLock`]: crate::ticket::TicketLock
//! [`BlockingMutex`]: crate::blocking::BlockingMutex
//! [lock_api]: https://crates.io/crates/lock_api
//! [`lock_api::Mutex`]: https://docs.rs/lock_api/latest/lock_api/struct.Mutex.html
//! [`lock_api::MutexGuard`]: https://docs.rs/lock_api/latest/lock_api/struct.MutexGuard.html
//! [`lock_api::RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html
//! [`lock_api::RawMutexFair`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutexFair.html

use crate::blocking::BlockingMutex;
use crate::lock::RawLock;
use crate::park::policy::ParkPolicy;
use crate::park::Backend;
use crate::relax::Relax;
use crate::spin::{Tas, Ttas};
use crate::ticket::TicketLock;

/// A [`lock_api::Mutex`] alias over any raw lock of this module.
///
/// [`lock_api::Mutex`]: https://docs.rs/lock_api/latest/lock_api/struct.Mutex.html
pub type Mutex<T, L> = lock_api::Mutex<L, T>;

/// A [`lock_api::MutexGuard`] alias over any raw lock of this module.
///
/// [`lock_api::MutexGuard`]: https://docs.rs/lock_api/latest/lock_api/struct.MutexGuard.html
pub type MutexGuard<'a, T, L> = lock_api::MutexGuard<'a, L, T>;

macro_rules! impl_raw_mutex {
    ([$($params:tt)*] $lock:ty) => {
        unsafe impl<$($params)*> lock_api::RawMutex for $lock {
            type GuardMarker = lock_api::GuardSend;

            #[allow(clippy::declare_interior_mutable_const)]
            const INIT: Self = Self::new();

            #[inline]
            fn lock(&self) {
                self.acquire(&mut ());
            }

            #[inline]
            fn try_lock(&self) -> bool {
                self.try_acquire(&mut ())
            }

            #[inline]
            unsafe fn unlock(&self) {
                self.release(&mut ());
            }

            #[inline]
            fn is_locked(&self) -> bool {
                RawLock::is_locked(self)
            }
        }
    };
}

impl_raw_mutex!([R: Relax] Tas<R>);
impl_raw_mutex!([R: Relax] Ttas<R>);
impl_raw_mutex!([R: Relax] TicketLock<R>);
impl_raw_mutex!([B: Backend, P: ParkPolicy] BlockingMutex<B, P>);

// A ticket lock release always hands the lock over to the next ticket.
unsafe impl<R: Relax> lock_api::RawMutexFair for TicketLock<R> {
    #[inline]
    unsafe fn unlock_fair(&self) {
        self.release(&mut ());
    }
}

/// Aliases over a [`Ttas`](crate::spin::Ttas) spinlock.
pub mod ttas {
    use crate::relax::Spin;
    use crate::spin::Ttas;

    /// A [`lock_api::Mutex`] over a test-and-test-and-set spinlock.
    ///
    /// # Example
    ///
    /// ```
    /// use qlocks::lock_api::ttas::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// *mutex.lock() += 1;
    /// assert_eq!(*mutex.lock(), 1);
    /// ```
    /// [`lock_api::Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Ttas<Spin>>;

    /// A [`lock_api::MutexGuard`] over a test-and-test-and-set spinlock.
    ///
    /// [`lock_api::MutexGuard`]: super::MutexGuard
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Ttas<Spin>>;
}

/// Aliases over a [`TicketLock`](crate::ticket::TicketLock).
pub mod ticket {
    use crate::relax::Spin;
    use crate::ticket::TicketLock;

    /// A [`lock_api::Mutex`] over a FIFO ticket lock.
    ///
    /// # Example
    ///
    /// ```
    /// use qlocks::lock_api::ticket::{Mutex, MutexGuard};
    ///
    /// let mutex = Mutex::new(0);
    /// let mut guard = mutex.lock();
    /// *guard += 1;
    /// MutexGuard::unlock_fair(guard);
    /// assert_eq!(*mutex.lock(), 1);
    /// ```
    /// [`lock_api::Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, TicketLock<Spin>>;

    /// A [`lock_api::MutexGuard`] over a FIFO ticket lock.
    ///
    /// [`lock_api::MutexGuard`]: super::MutexGuard
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, TicketLock<Spin>>;
}

/// Aliases over a [`BlockingMutex`](crate::blocking::BlockingMutex) with the
/// default park backend and policy.
pub mod blocking {
    use crate::blocking::BlockingMutex;

    /// A [`lock_api::Mutex`] over a blocking mutex.
    ///
    /// # Example
    ///
    /// ```
    /// use qlocks::lock_api::blocking::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// assert!(!mutex.is_locked());
    /// let guard = mutex.lock();
    /// assert!(mutex.is_locked());
    /// drop(guard);
    /// ```
    /// [`lock_api::Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, BlockingMutex>;

    /// A [`lock_api::MutexGuard`] over a blocking mutex.
    ///
    /// [`lock_api::MutexGuard`]: super::MutexGuard
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, BlockingMutex>;
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;
    use std::vec::Vec;

    use crate::blocking::BlockingMutex;
    use crate::park::policy::YieldThenPark;
    use crate::park::DefaultBackend;
    use crate::relax::Yield;
    use crate::spin::{Tas, Ttas};
    use crate::ticket::TicketLock;

    fn counter<L: lock_api::RawMutex + Send + Sync + 'static>() {
        const THREADS: usize = 4;
        const ITERS: usize = 1000;
        let mutex = Arc::new(super::Mutex::<usize, L>::new(0));
        let handles = (0..THREADS)
            .map(|_| Arc::clone(&mutex))
            .map(|mutex| {
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        *mutex.lock() += 1;
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*mutex.lock(), THREADS * ITERS);
    }

    #[test]
    fn tas_counter() {
        counter::<Tas<Yield>>();
    }

    #[test]
    fn ttas_counter() {
        counter::<Ttas<Yield>>();
    }

    #[test]
    fn ticket_counter() {
        counter::<TicketLock<Yield>>();
    }

    #[test]
    fn blocking_counter() {
        counter::<BlockingMutex<DefaultBackend, YieldThenPark>>();
    }

    #[test]
    fn try_lock_fails_while_held() {
        let mutex = super::ticket::Mutex::new(());
        let guard = mutex.lock();
        assert!(mutex.is_locked());
        assert!(mutex.try_lock().is_none());
        drop(guard);
        assert!(mutex.try_lock().is_some());
    }
}
