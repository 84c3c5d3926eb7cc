// Locking protocol violations must take the process down.
//
// With the `std` feature a violation aborts the process, so each case re-runs
// this test binary filtered down to itself and expects the child to die with
// the violation on its standard error. Without `std` a violation panics, and
// `should_panic` catches it in process.

use std::mem::ManuallyDrop;
use std::sync::Arc;
use std::thread;

use qlocks::blocking::BlockingMutex;
use qlocks::clh::ClhLock;
use qlocks::cna::{CnaConfig, CnaLock};
use qlocks::numa::Uniform;
use qlocks::park::policy::ImmediatePark;
use qlocks::park::SpinWait;
use qlocks::relax::Spin;
use qlocks::spin::{Tas, Ttas};
use qlocks::ticket::{ParkingTicketConfig, ParkingTicketLock, TicketLock};
use qlocks::RawLock;

#[cfg(feature = "std")]
fn violates<F: FnOnce()>(name: &str, expected: &str, f: F) {
    use std::env;
    use std::process::Command;

    const CHILD: &str = "QLOCKS_VIOLATION_CHILD";

    if env::var_os(CHILD).is_some() {
        f();
        return;
    }
    let exe = env::current_exe().unwrap();
    let output = Command::new(exe)
        .args([name, "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD, name)
        .output()
        .unwrap();
    assert!(!output.status.success(), "{name} ran to completion");
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains(expected), "{name} failed without reporting it: {stderr}");
}

#[cfg(not(feature = "std"))]
fn violates<F: FnOnce()>(_name: &str, _expected: &str, f: F) {
    f();
}

macro_rules! violation {
    ($name:ident, $expected:literal, $body:expr) => {
        #[test]
        #[cfg_attr(not(feature = "std"), should_panic(expected = $expected))]
        fn $name() {
            violates(stringify!($name), $expected, $body);
        }
    };
}

fn double_release<L: RawLock>(lock: L) {
    let mut node = lock.node();
    lock.acquire(&mut node);
    lock.release(&mut node);
    lock.release(&mut node);
}

fn cna(capacity: usize) -> CnaLock<Spin, Uniform> {
    CnaLock::with_config(CnaConfig::new().capacity(capacity), Uniform)
}

violation!(tas_double_release, "released a test-and-set lock that was not held", || {
    double_release(Tas::<Spin>::new());
});

violation!(ttas_double_release, "released a test-and-test-and-set lock that was not held", || {
    double_release(Ttas::<Spin>::new());
});

violation!(ticket_double_release, "released a ticket lock that was not held", || {
    double_release(TicketLock::<Spin>::new());
});

violation!(
    parking_ticket_double_release,
    "released a parking ticket lock that was not held",
    || double_release(ParkingTicketLock::<SpinWait, Spin>::with_capacity(2))
);

violation!(clh_double_release, "released a CLH lock with a node that does not hold it", || {
    double_release(ClhLock::<Spin>::with_capacity(2));
});

violation!(cna_double_release, "released a CNA lock with a node that does not hold it", || {
    double_release(cna(2));
});

violation!(blocking_double_release, "released a blocking mutex that was not held", || {
    double_release(BlockingMutex::<SpinWait, ImmediatePark>::new());
});

violation!(unheld_ticket_release, "released a ticket lock that was not held", || {
    TicketLock::<Spin>::new().release(&mut ());
});

violation!(clh_node_of_another_lock, "acquired a CLH lock with a node of another lock", || {
    let (lock, other) = (ClhLock::<Spin>::with_capacity(2), ClhLock::<Spin>::with_capacity(2));
    let mut node = other.node();
    lock.acquire(&mut node);
});

violation!(cna_node_of_another_lock, "acquired a CNA lock with a node of another lock", || {
    let (lock, other) = (cna(2), cna(2));
    let mut node = other.node();
    lock.acquire(&mut node);
});

violation!(clh_reacquire_held_node, "acquired a CLH lock with a node that already holds it", || {
    let lock = ClhLock::<Spin>::with_capacity(2);
    // Dropping a held node is a violation of its own.
    let mut node = ManuallyDrop::new(lock.node());
    lock.acquire(&mut node);
    lock.acquire(&mut node);
});

violation!(cna_drop_held_node, "dropped a CNA node that holds the lock", || {
    let lock = cna(2);
    let mut node = lock.node();
    lock.acquire(&mut node);
    drop(node);
});

violation!(clh_nodes_exhausted, "queue nodes of this lock are in use", || {
    let lock = ClhLock::<Spin>::with_capacity(3);
    let mut nodes = Vec::new();
    while let Ok(node) = lock.try_node() {
        nodes.push(node);
    }
    assert_eq!(nodes.len(), lock.capacity());
    nodes.push(lock.node());
});

violation!(cna_nodes_exhausted, "queue nodes of this lock are in use", || {
    let lock = cna(3);
    let mut nodes = Vec::new();
    while let Ok(node) = lock.try_node() {
        nodes.push(node);
    }
    nodes.push(lock.node());
});

// One parked waiter fills the single waiter slot, the next acquirer has
// nowhere to park.
violation!(parking_ticket_over_capacity, "tickets ahead of a parking ticket lock waiter", || {
    let config = ParkingTicketConfig::new().max_waiters(1).spin_distance(0);
    let lock = Arc::new(ParkingTicketLock::<SpinWait, Spin>::with_config(config));
    assert_eq!(lock.capacity(), 1);
    lock.acquire(&mut ());
    let waiter = Arc::clone(&lock);
    thread::spawn(move || waiter.acquire(&mut ()));
    while lock.queue_len() != 2 {
        thread::yield_now();
    }
    lock.acquire(&mut ());
});
