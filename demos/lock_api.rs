use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;

// Requires the `lock_api` feature.
//
// You may export these types to your callers and change the raw lock (as long
// as it implements `lock_api::RawMutex`) without breaking their code. Try
// `qlocks::lock_api::ttas` or `qlocks::lock_api::ticket` instead.
pub type Mutex<T> = qlocks::lock_api::blocking::Mutex<T>;
pub type MutexGuard<'a, T> = qlocks::lock_api::blocking::MutexGuard<'a, T>;

fn main() {
    const N: usize = 10;

    // Spawn a few threads to increment a shared variable (non-atomically), and
    // let the main thread know once all increments are done.
    let data = Arc::new(Mutex::new(0));

    let (tx, rx) = channel();
    for _ in 0..N {
        let (data, tx) = (data.clone(), tx.clone());
        thread::spawn(move || {
            let mut data: MutexGuard<'_, usize> = data.lock();
            *data += 1;
            if *data == N {
                tx.send(()).unwrap();
            }
            // The lock is released here, when `data` goes out of scope.
        });
    }
    let _message = rx.recv();

    // Would return `None` if the lock was still held.
    let count = data.try_lock().unwrap();
    assert_eq!(*count, N);
}
