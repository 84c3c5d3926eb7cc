use core::fmt::{self, Debug, Formatter};

use crate::cfg::cell::{UnsafeCell, UnsafeCellWith};
use crate::error::NodeError;
use crate::lock::RawLock;

/// A mutual exclusion primitive useful for protecting shared data.
///
/// This mutex pairs a value of type `T` with any raw lock of this crate, and
/// only grants access to the value from within a closure, while the lock is
/// held. The lock is released when the closure returns or unwinds.
///
/// Queue locks need a per-acquirer record (see [`RawLock::Node`]). The
/// `*_with_then` methods borrow one from the caller, so that it can be reused
/// across acquisitions. The other methods obtain a fresh one from the lock for
/// every call.
///
/// # Examples
///
/// ```
/// use std::sync::Arc;
/// use std::thread;
/// use std::sync::mpsc::channel;
///
/// use qlocks::clh::ClhLock;
/// use qlocks::relax::Spin;
///
/// type Mutex<T> = qlocks::Mutex<T, ClhLock<Spin>>;
///
/// const N: usize = 10;
///
/// let data = Arc::new(Mutex::new(0));
///
/// let (tx, rx) = channel();
/// for _ in 0..N {
///     let (data, tx) = (Arc::clone(&data), tx.clone());
///     thread::spawn(move || {
///         let mut node = data.node();
///         data.lock_with_then(&mut node, |data| {
///             *data += 1;
///             if *data == N {
///                 tx.send(()).unwrap();
///             }
///         });
///     });
/// }
///
/// rx.recv().unwrap();
/// ```
pub struct Mutex<T: ?Sized, L> {
    lock: L,
    data: UnsafeCell<T>,
}

// Same unsafe impls as `std::sync::Mutex`.
unsafe impl<T: ?Sized + Send, L: Send> Send for Mutex<T, L> {}
unsafe impl<T: ?Sized + Send, L: Sync> Sync for Mutex<T, L> {}

impl<T, L> Mutex<T, L> {
    /// Creates a new mutex protecting `value` with the given raw lock.
    ///
    /// Use this constructor for locks that take a configuration, such as
    /// [`ParkingTicketLock::with_capacity`].
    ///
    /// # Examples
    ///
    /// ```
    /// use qlocks::ticket::TicketLock;
    /// use qlocks::relax::Spin;
    ///
    /// static MUTEX: qlocks::Mutex<u32, TicketLock<Spin>> =
    ///     qlocks::Mutex::with_lock(0, TicketLock::new());
    /// ```
    ///
    /// [`ParkingTicketLock::with_capacity`]: crate::ticket::ParkingTicketLock::with_capacity
    #[cfg(not(all(loom, test)))]
    pub const fn with_lock(value: T, lock: L) -> Self {
        Self { lock, data: UnsafeCell::new(value) }
    }

    /// Creates a new mutex protecting `value` with the given raw lock, with
    /// Loom primitives (non-const).
    #[cfg(all(loom, test))]
    #[cfg(not(tarpaulin_include))]
    pub fn with_lock(value: T, lock: L) -> Self {
        Self { lock, data: UnsafeCell::new(value) }
    }

    /// Consumes this mutex, returning the underlying data.
    ///
    /// # Examples
    ///
    /// ```
    /// type Mutex<T> = qlocks::Mutex<T, qlocks::spin::Ttas>;
    ///
    /// let mutex = Mutex::new(0);
    /// assert_eq!(mutex.into_inner(), 0);
    /// ```
    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T, L: Default> Mutex<T, L> {
    /// Creates a new mutex protecting `value`, with a default configured lock.
    pub fn new(value: T) -> Self {
        Self::with_lock(value, L::default())
    }
}

impl<T: ?Sized, L: RawLock> Mutex<T, L> {
    /// Returns a new record to acquire this mutex with.
    ///
    /// Aborts if the lock has run out of records, see [`RawLock::node`].
    pub fn node(&self) -> L::Node<'_> {
        self.lock.node()
    }

    /// Returns a new record to acquire this mutex with, or an error if the
    /// lock has run out of them.
    pub fn try_node(&self) -> Result<L::Node<'_>, NodeError> {
        self.lock.try_node()
    }

    /// Acquires this mutex and then runs the closure against the protected
    /// data, borrowing `node` for the whole call.
    ///
    /// This function will block until the lock is available.
    ///
    /// # Examples
    ///
    /// ```
    /// type Mutex<T> = qlocks::Mutex<T, qlocks::cna::CnaLock>;
    ///
    /// let mutex = Mutex::new(0);
    /// let mut node = mutex.node();
    /// for _ in 0..3 {
    ///     mutex.lock_with_then(&mut node, |data| *data += 1);
    /// }
    /// assert_eq!(mutex.lock_with_then(&mut node, |data| *data), 3);
    /// ```
    pub fn lock_with_then<F, Ret>(&self, node: &mut L::Node<'_>, f: F) -> Ret
    where
        F: FnOnce(&mut T) -> Ret,
    {
        self.lock.acquire(node);
        let held = Held { lock: &self.lock, node };
        // SAFETY: The lock is held until `held` is dropped.
        let ret = unsafe { self.data.with_mut_unchecked(f) };
        drop(held);
        ret
    }

    /// Acquires this mutex and then runs the closure against the protected
    /// data.
    ///
    /// A new record is obtained from the lock for this call only.
    pub fn lock_then<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(&mut T) -> Ret,
    {
        self.lock_with_then(&mut self.lock.node(), f)
    }

    /// Attempts to acquire this mutex and then runs the closure against the
    /// protected data if successful, borrowing `node` for the whole call.
    ///
    /// The closure receives `None` if the lock could not be acquired at this
    /// time. This function does not block.
    ///
    /// # Examples
    ///
    /// ```
    /// type Mutex<T> = qlocks::Mutex<T, qlocks::ticket::TicketLock>;
    ///
    /// let mutex = Mutex::new(0);
    /// let mut node = mutex.node();
    /// let done = mutex.try_lock_with_then(&mut node, |data| {
    ///     data.map(|data| *data = 10).is_some()
    /// });
    /// assert!(done);
    /// ```
    pub fn try_lock_with_then<F, Ret>(&self, node: &mut L::Node<'_>, f: F) -> Ret
    where
        F: FnOnce(Option<&mut T>) -> Ret,
    {
        if !self.lock.try_acquire(node) {
            return f(None);
        }
        let held = Held { lock: &self.lock, node };
        // SAFETY: The lock is held until `held` is dropped.
        let ret = unsafe { self.data.with_mut_unchecked(|data| f(Some(data))) };
        drop(held);
        ret
    }

    /// Attempts to acquire this mutex and then runs the closure against the
    /// protected data if successful.
    ///
    /// A new record is obtained from the lock for this call only.
    pub fn try_lock_then<F, Ret>(&self, f: F) -> Ret
    where
        F: FnOnce(Option<&mut T>) -> Ret,
    {
        self.try_lock_with_then(&mut self.lock.node(), f)
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// This function does not guarantee strong ordering, only atomicity.
    pub fn is_locked(&self) -> bool {
        self.lock.is_locked()
    }
}

impl<T: ?Sized, L> Mutex<T, L> {
    /// Returns a mutable reference to the underlying data.
    ///
    /// Since this call borrows the `Mutex` mutably, no actual locking needs
    /// to take place.
    #[cfg(not(all(loom, test)))]
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    /// Returns a reference to the raw lock of this mutex.
    pub const fn raw(&self) -> &L {
        &self.lock
    }
}

impl<T: Default, L: Default> Default for Mutex<T, L> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T, L: Default> From<T> for Mutex<T, L> {
    fn from(data: T) -> Self {
        Self::new(data)
    }
}

impl<T: ?Sized + Debug, L: RawLock> Debug for Mutex<T, L> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let mut d = f.debug_struct("Mutex");
        // A lock out of records can only be reported as busy.
        let Ok(mut node) = self.lock.try_node() else {
            d.field("data", &format_args!("<locked>"));
            return d.finish();
        };
        self.try_lock_with_then(&mut node, |data| {
            match data {
                Some(data) => d.field("data", &data),
                None => d.field("data", &format_args!("<locked>")),
            };
        });
        d.finish()
    }
}

/// Releases the lock on drop, including when the critical section unwinds.
struct Held<'a, 'n, L: RawLock + 'n> {
    lock: &'a L,
    node: &'a mut L::Node<'n>,
}

impl<L: RawLock> Drop for Held<'_, '_, L> {
    fn drop(&mut self) {
        self.lock.release(self.node);
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use crate::relax::Yield;
    use crate::spin::Ttas;
    use crate::test::tests;

    #[test]
    fn nested_mutexes() {
        tests::lock_arc_nested::<Ttas<Yield>, Ttas<Yield>>();
    }

    #[test]
    fn unsized_data() {
        type Mutex<T> = crate::Mutex<T, Ttas<Yield>>;
        let mutex: &Mutex<[u32]> = &Mutex::new([1, 2, 3]);
        mutex.lock_then(|data| {
            data[0] = 4;
            data[2] = 5;
        });
        let comp: &[u32] = &[4, 2, 5];
        mutex.lock_then(|data| assert_eq!(comp, data));
    }
}
