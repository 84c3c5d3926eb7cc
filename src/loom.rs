pub mod models {
    use core::array;

    use loom::sync::Arc;
    use loom::{model, thread};

    use crate::lock::RawLock;
    use crate::Mutex;

    type Int = usize;

    // TODO: Three or more threads make lock models run for too long. A model
    // with three threads would cover a queue with at least one waiter behind
    // the head, and a parking ticket waiter that actually parks.
    const LOCKS: usize = 2;
    const TRY_LOCKS: usize = 3;

    fn inc<L: RawLock>(mutex: &Mutex<Int, L>) {
        mutex.lock_then(|data| *data += 1);
    }

    fn try_inc<L: RawLock>(mutex: &Mutex<Int, L>) {
        mutex.try_lock_then(|data| data.map(|data| *data += 1));
    }

    fn get<L: RawLock>(mutex: &Mutex<Int, L>) -> Int {
        mutex.lock_then(|data| *data)
    }

    /// Evaluates that concurrent `try_acquire` calls will serialize all
    /// mutations against the shared data, therefore no data races.
    pub fn try_lock_join<L>(new: fn() -> L)
    where
        L: RawLock + Send + Sync + 'static,
    {
        model(move || {
            const RUNS: usize = TRY_LOCKS;
            let mutex = Arc::new(Mutex::with_lock(0, new()));
            let handles: [_; RUNS] = array::from_fn(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || try_inc(&mutex))
            });
            for handle in handles {
                handle.join().unwrap();
            }
            let value = get(&mutex);
            assert!((1..=RUNS).contains(&value));
        });
    }

    /// Evaluates that concurrent `acquire` calls will serialize all mutations
    /// against the shared data, therefore no data races and no lost updates.
    pub fn lock_join<L>(new: fn() -> L)
    where
        L: RawLock + Send + Sync + 'static,
    {
        model(move || {
            const RUNS: usize = LOCKS;
            let mutex = Arc::new(Mutex::with_lock(0, new()));
            let handles: [_; RUNS] = array::from_fn(|_| {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || inc(&mutex))
            });
            for handle in handles {
                handle.join().unwrap();
            }
            assert_eq!(get(&mutex), RUNS);
            assert!(!mutex.is_locked());
        });
    }

    /// Evaluates that concurrent `acquire` and `try_acquire` calls will
    /// serialize all mutations against the shared data.
    pub fn mixed_lock_join<L>(new: fn() -> L)
    where
        L: RawLock + Send + Sync + 'static,
    {
        model(move || {
            const RUNS: usize = LOCKS;
            let mutex = Arc::new(Mutex::with_lock(0, new()));
            let handles: [_; RUNS] = array::from_fn(|run| {
                let mutex = Arc::clone(&mutex);
                let f = if run % 2 == 0 { inc::<L> } else { try_inc::<L> };
                thread::spawn(move || f(&mutex))
            });
            for handle in handles {
                handle.join().unwrap();
            }
            let value = get(&mutex);
            assert!((1..=RUNS).contains(&value));
        });
    }

    /// Evaluates that a thread holding the lock while another one queues up
    /// hands it over, and that the waiter observes the holder's writes.
    pub fn handover<L>(new: fn() -> L)
    where
        L: RawLock + Send + Sync + 'static,
    {
        model(move || {
            let mutex = Arc::new(Mutex::with_lock(0, new()));
            let waiter = {
                let mutex = Arc::clone(&mutex);
                thread::spawn(move || mutex.lock_then(|data| *data * 10))
            };
            mutex.lock_then(|data| *data += 1);
            let seen = waiter.join().unwrap();
            assert!(seen == 0 || seen == 10);
            assert_eq!(get(&mutex), 1);
        });
    }
}
