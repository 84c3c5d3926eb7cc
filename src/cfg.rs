pub mod atomic {
    #[cfg(not(all(loom, test)))]
    pub use core::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicUsize};

    #[cfg(all(loom, test))]
    pub use loom::sync::atomic::{fence, AtomicBool, AtomicU32, AtomicUsize};
}

pub mod cell {
    pub use sealed::UnsafeCellWith;

    #[cfg(not(all(loom, test)))]
    pub use core::cell::UnsafeCell;

    #[cfg(all(loom, test))]
    pub use loom::cell::UnsafeCell;

    #[cfg(not(all(loom, test)))]
    impl<T: ?Sized> UnsafeCellWith<T> for UnsafeCell<T> {
        unsafe fn with_mut_unchecked<F, Ret>(&self, f: F) -> Ret
        where
            F: FnOnce(&mut T) -> Ret,
        {
            // SAFETY: Caller must guarantee there are no aliases at all.
            f(unsafe { &mut *self.get() })
        }
    }

    #[cfg(all(loom, test))]
    impl<T: ?Sized> UnsafeCellWith<T> for UnsafeCell<T> {
        unsafe fn with_mut_unchecked<F, Ret>(&self, f: F) -> Ret
        where
            F: FnOnce(&mut T) -> Ret,
        {
            // SAFETY: Caller must guarantee there are no aliases at all.
            self.with_mut(|ptr| f(unsafe { &mut *ptr }))
        }
    }

    mod sealed {
        /// A trait that extends [`UnsafeCell`] to allow running closures against
        /// its underlying data.
        ///
        /// [`UnsafeCell`]: super::UnsafeCell
        pub trait UnsafeCellWith<T: ?Sized> {
            /// Runs `f` against a mutable reference borrowed from the cell.
            ///
            /// # Safety
            ///
            /// Caller must guarantee there are no other references to the
            /// underlying data.
            unsafe fn with_mut_unchecked<F, Ret>(&self, f: F) -> Ret
            where
                F: FnOnce(&mut T) -> Ret;
        }
    }
}

pub mod hint {
    #[cfg(not(all(loom, test)))]
    pub use core::hint::spin_loop;

    #[cfg(all(loom, test))]
    pub use loom::hint::spin_loop;
}

#[cfg(any(feature = "std", test))]
pub mod thread {
    #[cfg(not(all(loom, test)))]
    pub use std::thread::yield_now;

    #[cfg(all(loom, test))]
    pub use loom::thread::yield_now;
}

#[cfg(any(feature = "std", test))]
pub mod sync {
    #[cfg(not(all(loom, test)))]
    pub use std::sync::{Condvar, Mutex};

    #[cfg(all(loom, test))]
    pub use loom::sync::{Condvar, Mutex};
}

/// Aborts the process if a closure unwinds.
///
/// Waiting loops call user provided policies in the middle of a lock protocol.
/// Unwinding out of one of those would leave the lock state half updated, so
/// we rather take the process down, at least on debug builds with `std`.
pub mod debug_abort {
    #[cfg(all(debug_assertions, feature = "std", panic = "unwind"))]
    pub fn on_unwind<F, Ret>(f: F) -> Ret
    where
        F: FnOnce() -> Ret,
    {
        let guard = AbortOnDrop;
        let ret = f();
        core::mem::forget(guard);
        ret
    }

    #[cfg(not(all(debug_assertions, feature = "std", panic = "unwind")))]
    #[inline(always)]
    pub fn on_unwind<F, Ret>(f: F) -> Ret
    where
        F: FnOnce() -> Ret,
    {
        f()
    }

    #[cfg(all(debug_assertions, feature = "std", panic = "unwind"))]
    struct AbortOnDrop;

    #[cfg(all(debug_assertions, feature = "std", panic = "unwind"))]
    impl Drop for AbortOnDrop {
        fn drop(&mut self) {
            std::process::abort();
        }
    }
}

/// Reports a locking protocol violation and takes the process down.
///
/// Double releases, releases of locks that are not held and nodes handed to
/// a lock they do not belong to are programmer errors. Carrying on after one
/// of them means carrying on with a broken mutual exclusion guarantee.
#[cold]
#[inline(never)]
pub fn misuse(args: core::fmt::Arguments<'_>) -> ! {
    tracing::error!(violation = %args, "lock protocol violation, aborting");
    abort(args)
}

#[cfg(feature = "std")]
fn abort(args: core::fmt::Arguments<'_>) -> ! {
    std::eprintln!("qlocks: {args}");
    std::process::abort()
}

#[cfg(not(feature = "std"))]
fn abort(args: core::fmt::Arguments<'_>) -> ! {
    panic!("qlocks: {args}")
}
