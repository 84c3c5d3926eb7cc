use std::sync::mpsc::channel;
use std::sync::Arc;
use std::thread;

use qlocks::clh::ClhLock;
use qlocks::relax::SpinBackoff;

// A queue lock needs a record per acquirer. A thread may keep its record
// across acquisitions, as long as the lock has room for every live record.
type Mutex<T> = qlocks::Mutex<T, ClhLock<SpinBackoff>>;

fn main() {
    const N: usize = 10;
    const ROUNDS: usize = 100;

    let data = Arc::new(Mutex::with_lock(0, ClhLock::with_capacity(N + 1)));

    let (tx, rx) = channel();
    for _ in 0..N {
        let (data, tx) = (data.clone(), tx.clone());
        thread::spawn(move || {
            let mut node = data.node();
            for _ in 0..ROUNDS {
                // The shared state can only be accessed once the lock is held,
                // and only from within the closure.
                data.lock_with_then(&mut node, |data| *data += 1);
            }
            tx.send(()).unwrap();
        });
    }
    drop(tx);
    assert_eq!(rx.iter().count(), N);

    let count = data.lock_then(|data| *data);
    assert_eq!(count, N * ROUNDS);
}
