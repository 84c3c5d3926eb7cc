// End to end runs of every lock the way a benchmark harness drives them: a
// few workers, one critical section each, a scratch byte that detects
// overlapping critical sections and a sum that detects lost updates.

#![cfg(feature = "std")]

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;

use qlocks::blocking::BlockingMutex;
use qlocks::clh::ClhLock;
use qlocks::cna::{CnaConfig, CnaLock};
use qlocks::numa::Interleaved;
use qlocks::park::policy::ImmediatePark;
use qlocks::park::SpinWait;
use qlocks::relax::Yield;
use qlocks::spin::{Tas, Ttas};
use qlocks::ticket::{ParkingTicketLock, TicketLock};
use qlocks::{Mutex, RawLock};

const WORKERS: usize = 3;

fn run<L>(lock: L, workers: usize)
where
    L: RawLock + Send + Sync + 'static,
{
    let sum = Arc::new(Mutex::with_lock(0, lock));
    let scratch = Arc::new(AtomicU8::new(u8::MAX));
    let barrier = Arc::new(Barrier::new(workers));
    let handles = (0..workers)
        .map(|index| {
            let sum = Arc::clone(&sum);
            let scratch = Arc::clone(&scratch);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let byte = index as u8;
                barrier.wait();
                sum.lock_then(|sum| {
                    scratch.store(byte, Ordering::Relaxed);
                    thread::yield_now();
                    assert_eq!(scratch.load(Ordering::Relaxed), byte);
                    *sum += 1;
                });
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!sum.is_locked());
    assert_eq!(sum.lock_then(|sum| *sum), workers);
}

#[test]
fn ttas() {
    run(Ttas::<Yield>::new(), WORKERS);
}

#[test]
fn tas() {
    run(Tas::<Yield>::new(), WORKERS);
}

#[test]
fn ticket() {
    run(TicketLock::<Yield>::new(), WORKERS);
}

#[test]
fn parking_ticket() {
    run(ParkingTicketLock::<SpinWait<Yield>, Yield>::with_capacity(WORKERS), WORKERS);
}

#[test]
fn parking_ticket_default_backend() {
    run(ParkingTicketLock::<qlocks::park::DefaultBackend, Yield>::new(), WORKERS);
}

#[test]
fn clh() {
    run(ClhLock::<Yield>::with_capacity(WORKERS + 1), WORKERS);
}

#[test]
fn cna() {
    let config = CnaConfig::new().capacity(WORKERS + 1).local_handoff_limit(1);
    run(CnaLock::<Yield, Interleaved>::with_config(config, Interleaved::new(2)), WORKERS);
}

#[test]
fn blocking() {
    run(BlockingMutex::<SpinWait<Yield>, ImmediatePark<Yield>>::new(), WORKERS);
}

#[test]
fn blocking_default() {
    run(BlockingMutex::<qlocks::park::DefaultBackend>::new(), WORKERS);
}

#[test]
fn many_workers() {
    run(ClhLock::<Yield>::new(), 32);
    run(CnaLock::<Yield>::new(), 32);
    run(ParkingTicketLock::<qlocks::park::DefaultBackend, Yield>::with_capacity(32), 32);
}
