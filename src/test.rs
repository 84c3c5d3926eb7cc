#[cfg(all(not(loom), test))]
pub mod tests {
    // Modified test suite from the Rust's Mutex implementation with minor changes
    // since the API is not compatible with this crate implementation and some
    // new tests as well.
    //
    // Copyright 2014 The Rust Project Developers.
    //
    // Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
    // http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
    // <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
    // option. This file may not be copied, modified, or distributed
    // except according to those terms.

    use core::ops::RangeInclusive;
    use std::format;
    use std::rc::Rc;
    use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
    use std::sync::mpsc::channel;
    use std::sync::{Arc, Barrier};
    use std::thread;
    use std::vec::Vec;

    use crate::lock::RawLock;
    use crate::Mutex;

    /// An arbitrary unsigned integer type.
    pub type Int = u32;

    #[derive(Eq, PartialEq, Debug)]
    pub struct NonCopy(u32);

    pub struct Foo(Arc<AtomicUsize>);

    impl Drop for Foo {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    const ITERS: Int = 1000;
    const THREADS: Int = 4;
    const EXPECTED_VALUE: Int = ITERS * THREADS;
    const EXPECTED_RANGE: RangeInclusive<Int> = 1..=EXPECTED_VALUE;

    /// The thread counts the scratch byte harness is run with.
    pub const SCRATCH_THREADS: [usize; 6] = [1, 2, 3, 8, 32, 64];

    fn lock_inc_for<L: RawLock>(mutex: &Mutex<Int, L>) {
        let mut node = mutex.node();
        for _ in 0..ITERS {
            mutex.lock_with_then(&mut node, |data| *data += 1);
        }
    }

    fn try_lock_inc_for<L: RawLock>(mutex: &Mutex<Int, L>) {
        let mut node = mutex.node();
        for _ in 0..ITERS {
            mutex.try_lock_with_then(&mut node, |data| data.map(|data| *data += 1));
        }
    }

    fn mixed_lock_inc_for<L: RawLock>(mutex: &Mutex<Int, L>) {
        let mut node = mutex.node();
        for r in 0..ITERS {
            if r % 2 == 0 {
                mutex.lock_with_then(&mut node, |data| *data += 1);
            } else {
                mutex.try_lock_with_then(&mut node, |data| data.map(|data| *data += 1));
            }
        }
    }

    fn lots_and_lots<L>(f: fn(&Mutex<Int, L>)) -> Int
    where
        L: RawLock + Default + Send + Sync + 'static,
    {
        let mutex = Arc::new(Mutex::<Int, L>::new(0));
        let (tx, rx) = channel();
        for _ in 0..THREADS {
            let c_mutex = Arc::clone(&mutex);
            let c_tx = tx.clone();
            thread::spawn(move || {
                f(&c_mutex);
                c_tx.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..THREADS {
            rx.recv().unwrap();
        }
        mutex.lock_then(|data| *data)
    }

    pub fn lots_and_lots_lock<L>()
    where
        L: RawLock + Default + Send + Sync + 'static,
    {
        let value = lots_and_lots::<L>(lock_inc_for::<L>);
        assert_eq!(value, EXPECTED_VALUE);
    }

    pub fn lots_and_lots_try_lock<L>()
    where
        L: RawLock + Default + Send + Sync + 'static,
    {
        let value = lots_and_lots::<L>(try_lock_inc_for::<L>);
        assert!(EXPECTED_RANGE.contains(&value));
    }

    pub fn lots_and_lots_mixed_lock<L>()
    where
        L: RawLock + Default + Send + Sync + 'static,
    {
        let value = lots_and_lots::<L>(mixed_lock_inc_for::<L>);
        assert!(EXPECTED_RANGE.contains(&value));
    }

    pub fn smoke<L: RawLock + Default>() {
        let mutex = Mutex::<Int, L>::new(1);
        let mut node = mutex.node();
        mutex.lock_with_then(&mut node, |data| *data += 1);
        mutex.lock_with_then(&mut node, |data| *data += 1);
        assert_eq!(mutex.lock_with_then(&mut node, |data| *data), 3);
    }

    pub fn test_try_lock<L: RawLock + Default>() {
        let mutex = Rc::new(Mutex::<(), L>::new(()));
        let c_mutex = Rc::clone(&mutex);
        assert!(!mutex.is_locked());
        mutex.try_lock_then(|data| {
            assert!(c_mutex.is_locked());
            assert!(!c_mutex.try_lock_then(|data| data.is_some()));
            *data.unwrap() = ();
        });
        assert!(!mutex.is_locked());
    }

    pub fn test_mutex_debug<L: RawLock + Default>() {
        let value = 42;
        let mutex = Mutex::<Int, L>::new(value);
        let msg = format!("Mutex {{ data: {value:?} }}");
        assert_eq!(msg, format!("{mutex:?}"));
        mutex.lock_then(|_data| {
            assert_eq!("Mutex { data: <locked> }", format!("{mutex:?}"));
        });
    }

    pub fn test_mutex_default<L: RawLock + Default>() {
        let mutex: Mutex<Int, L> = Default::default();
        assert_eq!(Int::default(), mutex.into_inner());
    }

    pub fn test_mutex_from<L: RawLock + Default>() {
        let value = 42;
        let mutex = Mutex::<Int, L>::from(value);
        assert_eq!(value, mutex.into_inner());
    }

    pub fn test_into_inner<L: RawLock + Default>() {
        let mutex = Mutex::<NonCopy, L>::new(NonCopy(10));
        assert_eq!(mutex.into_inner(), NonCopy(10));
    }

    pub fn test_into_inner_drop<L: RawLock + Default>() {
        let num_drops = Arc::new(AtomicUsize::new(0));
        let mutex = Mutex::<Foo, L>::new(Foo(num_drops.clone()));
        assert_eq!(num_drops.load(Ordering::SeqCst), 0);
        {
            let _inner = mutex.into_inner();
            assert_eq!(num_drops.load(Ordering::SeqCst), 0);
        }
        assert_eq!(num_drops.load(Ordering::SeqCst), 1);
    }

    pub fn test_get_mut<L: RawLock + Default>() {
        let mut mutex = Mutex::<NonCopy, L>::new(NonCopy(10));
        *mutex.get_mut() = NonCopy(20);
        assert_eq!(mutex.into_inner(), NonCopy(20));
    }

    pub fn lock_arc_nested<L1, L2>()
    where
        L1: RawLock + Default + Send + Sync + 'static,
        L2: RawLock + Default + Send + Sync + 'static,
    {
        // Tests nested locks and access
        // to underlying data.
        let arc1 = Arc::new(Mutex::<Int, L1>::new(1));
        let arc2 = Arc::new(Mutex::<_, L2>::new(arc1));
        let handle = thread::spawn(move || {
            let val = arc2.lock_then(|arc1| arc1.lock_then(|data| *data));
            assert_eq!(val, 1);
        });
        handle.join().unwrap();
    }

    pub fn test_acquire_more_than_one_lock<L>()
    where
        L: RawLock + Default + Send + Sync + 'static,
    {
        let arc = Arc::new(Mutex::<Int, L>::new(1));
        let mut threads = Vec::new();
        for _ in 0..4 {
            let c_arc = Arc::clone(&arc);
            let t = thread::spawn(move || {
                c_arc.lock_then(|_d| {
                    let mutex = Mutex::<Int, L>::new(1);
                    mutex.lock_then(|_d| ());
                });
            });
            threads.push(t);
        }
        for thread in threads {
            thread.join().unwrap();
        }
    }

    pub fn test_lock_arc_access_in_unwind<L>()
    where
        L: RawLock + Default + Send + Sync + 'static,
    {
        struct Unwinder<L: RawLock> {
            i: Arc<Mutex<Int, L>>,
        }
        impl<L: RawLock> Drop for Unwinder<L> {
            fn drop(&mut self) {
                self.i.lock_then(|data| *data += 1);
            }
        }
        let arc = Arc::new(Mutex::<Int, L>::new(1));
        let arc2 = arc.clone();
        let _ = thread::spawn(move || {
            let _u = Unwinder { i: arc2 };
            panic!();
        })
        .join();
        assert_eq!(arc.lock_then(|data| *data), 2);
    }

    pub fn test_release_on_unwind<L>()
    where
        L: RawLock + Default + Send + Sync + 'static,
    {
        let arc = Arc::new(Mutex::<Int, L>::new(1));
        let arc2 = arc.clone();
        let result = thread::spawn(move || {
            arc2.lock_then(|data| {
                *data += 1;
                panic!();
            })
        })
        .join();
        assert!(result.is_err());
        assert!(!arc.is_locked());
        assert_eq!(arc.lock_then(|data| *data), 2);
    }

    /// Runs `n` workers that each write their index into a scratch byte from
    /// inside the critical section and read it back, counting overlaps with an
    /// occupancy counter and lost updates with a shared sum.
    pub fn scratch_byte_with<L, F>(n: usize, rounds: usize, new: F)
    where
        L: RawLock + Send + Sync + 'static,
        F: FnOnce() -> L,
    {
        let mutex = Arc::new(Mutex::with_lock(0usize, new()));
        let scratch = Arc::new(AtomicU8::new(0));
        let inside = Arc::new(AtomicUsize::new(0));
        let barrier = Arc::new(Barrier::new(n));
        let handles = (0..n)
            .map(|index| {
                let mutex = Arc::clone(&mutex);
                let scratch = Arc::clone(&scratch);
                let inside = Arc::clone(&inside);
                let barrier = Arc::clone(&barrier);
                thread::spawn(move || {
                    let byte = index as u8;
                    let mut node = mutex.node();
                    barrier.wait();
                    for _ in 0..rounds {
                        mutex.lock_with_then(&mut node, |sum| {
                            assert_eq!(inside.fetch_add(1, Ordering::Relaxed), 0);
                            scratch.store(byte, Ordering::Relaxed);
                            thread::yield_now();
                            assert_eq!(scratch.load(Ordering::Relaxed), byte);
                            *sum += 1;
                            inside.fetch_sub(1, Ordering::Relaxed);
                        });
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(mutex.lock_then(|sum| *sum), n * rounds);
    }

    pub fn scratch_byte<L>()
    where
        L: RawLock + Default + Send + Sync + 'static,
    {
        for n in SCRATCH_THREADS {
            scratch_byte_with(n, 20, L::default);
        }
    }

    /// Lets waiters enqueue one at a time while the main thread holds the
    /// lock, then releases it and checks they were served in arrival order.
    ///
    /// `progress` must return a different value once a new waiter has been
    /// queued, such as the next ticket or the queue tail.
    pub fn fifo_order<L>(lock: L, waiters: usize, progress: fn(&L) -> usize)
    where
        L: RawLock + Send + Sync + 'static,
    {
        let mutex = Arc::new(Mutex::with_lock(Vec::new(), lock));
        let mut node = mutex.node();
        mutex.raw().acquire(&mut node);
        let handles = (0..waiters)
            .map(|index| {
                let before = progress(mutex.raw());
                let c_mutex = Arc::clone(&mutex);
                let handle = thread::spawn(move || c_mutex.lock_then(|order| order.push(index)));
                while progress(mutex.raw()) == before {
                    thread::yield_now();
                }
                handle
            })
            .collect::<Vec<_>>();
        mutex.raw().release(&mut node);
        for handle in handles {
            handle.join().unwrap();
        }
        let order = mutex.lock_with_then(&mut node, |order| order.clone());
        assert_eq!(order, (0..waiters).collect::<Vec<_>>());
    }

    /// Expands into a test for every generic test of this module, for the
    /// given raw lock type.
    macro_rules! lock_suite {
        ($lock:ty) => {
            #[test]
            fn smoke() {
                $crate::test::tests::smoke::<$lock>();
            }

            #[test]
            fn lots_and_lots_lock() {
                $crate::test::tests::lots_and_lots_lock::<$lock>();
            }

            #[test]
            fn lots_and_lots_try_lock() {
                $crate::test::tests::lots_and_lots_try_lock::<$lock>();
            }

            #[test]
            fn lots_and_lots_mixed_lock() {
                $crate::test::tests::lots_and_lots_mixed_lock::<$lock>();
            }

            #[test]
            fn test_try_lock() {
                $crate::test::tests::test_try_lock::<$lock>();
            }

            #[test]
            fn test_mutex_debug() {
                $crate::test::tests::test_mutex_debug::<$lock>();
            }

            #[test]
            fn test_mutex_default() {
                $crate::test::tests::test_mutex_default::<$lock>();
            }

            #[test]
            fn test_mutex_from() {
                $crate::test::tests::test_mutex_from::<$lock>();
            }

            #[test]
            fn test_into_inner() {
                $crate::test::tests::test_into_inner::<$lock>();
            }

            #[test]
            fn test_into_inner_drop() {
                $crate::test::tests::test_into_inner_drop::<$lock>();
            }

            #[test]
            fn test_get_mut() {
                $crate::test::tests::test_get_mut::<$lock>();
            }

            #[test]
            fn test_acquire_more_than_one_lock() {
                $crate::test::tests::test_acquire_more_than_one_lock::<$lock>();
            }

            #[test]
            fn test_lock_arc_access_in_unwind() {
                $crate::test::tests::test_lock_arc_access_in_unwind::<$lock>();
            }

            #[test]
            fn test_release_on_unwind() {
                $crate::test::tests::test_release_on_unwind::<$lock>();
            }

            #[test]
            fn scratch_byte() {
                $crate::test::tests::scratch_byte::<$lock>();
            }
        };
    }

    pub(crate) use lock_suite;
}
