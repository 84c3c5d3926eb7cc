//! Runs one lock algorithm the way the correctness benchmarks do.
//!
//! Usage: `cargo run --example harness -- [THREADS] [LOCK]`
//!
//! Every worker thread acquires the lock once, writes its index into a shared
//! scratch byte, yields, reads the byte back and bumps a shared sum before
//! releasing. `THREADS` defaults to 3, `LOCK` to every algorithm in turn.

use std::env;
use std::process::ExitCode;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Barrier};
use std::thread;
use std::time::Instant;

use qlocks::blocking::BlockingMutex;
use qlocks::clh::ClhLock;
use qlocks::cna::{CnaConfig, CnaLock};
use qlocks::numa::Interleaved;
use qlocks::spin::{Tas, Ttas};
use qlocks::ticket::{ParkingTicketLock, TicketLock};
use qlocks::{Mutex, RawLock};

const DEFAULT_THREADS: usize = 3;

const LOCKS: [&str; 7] = ["tas", "ttas", "ticket", "parking-ticket", "clh", "cna", "blocking"];

fn run<L>(name: &str, lock: L, threads: usize) -> bool
where
    L: RawLock + Send + Sync + 'static,
{
    let sum = Arc::new(Mutex::with_lock(0, lock));
    let scratch = Arc::new(AtomicU8::new(u8::MAX));
    let barrier = Arc::new(Barrier::new(threads));
    let start = Instant::now();
    let handles = (0..threads)
        .map(|index| {
            let (sum, scratch, barrier) = (sum.clone(), scratch.clone(), barrier.clone());
            thread::spawn(move || {
                let byte = index as u8;
                barrier.wait();
                sum.lock_then(|sum| {
                    scratch.store(byte, Ordering::Relaxed);
                    thread::yield_now();
                    let torn = scratch.load(Ordering::Relaxed) != byte;
                    *sum += 1;
                    torn
                })
            })
        })
        .collect::<Vec<_>>();
    let torn = handles.into_iter().map(|handle| handle.join()).filter(|joined| !matches!(joined, Ok(false))).count();
    let total = sum.lock_then(|sum| *sum);
    let ok = torn == 0 && total == threads;
    println!(
        "{name:>14}: threads = {threads}, sum = {total}, overlaps = {torn}, {:?}, {}",
        start.elapsed(),
        if ok { "ok" } else { "FAILED" }
    );
    ok
}

fn run_named(name: &str, threads: usize) -> Option<bool> {
    let ok = match name {
        "tas" => run(name, Tas::<qlocks::relax::Spin>::new(), threads),
        "ttas" => run(name, Ttas::<qlocks::relax::Spin>::new(), threads),
        "ticket" => run(name, TicketLock::<qlocks::relax::Spin>::new(), threads),
        "parking-ticket" => {
            let lock = ParkingTicketLock::<qlocks::park::DefaultBackend>::with_capacity(threads);
            run(name, lock, threads)
        }
        "clh" => run(name, ClhLock::<qlocks::relax::Spin>::with_capacity(threads + 1), threads),
        "cna" => {
            let config = CnaConfig::new().capacity(threads + 1);
            let topology = Interleaved::from_system();
            run(name, CnaLock::<qlocks::relax::Spin, _>::with_config(config, topology), threads)
        }
        "blocking" => run(name, BlockingMutex::<qlocks::park::DefaultBackend>::new(), threads),
        _ => return None,
    };
    Some(ok)
}

fn main() -> ExitCode {
    let mut args = env::args().skip(1);
    let threads = match args.next().map(|arg| arg.parse::<usize>()) {
        None => DEFAULT_THREADS,
        Some(Ok(threads)) if threads > 0 => threads,
        Some(_) => {
            eprintln!("THREADS must be a positive integer");
            return ExitCode::FAILURE;
        }
    };
    let names = match args.next() {
        Some(name) => vec![name],
        None => LOCKS.iter().map(|name| name.to_string()).collect(),
    };
    let mut failed = false;
    for name in &names {
        match run_named(name, threads) {
            Some(ok) => failed |= !ok,
            None => {
                eprintln!("unknown lock `{name}`, expected one of {LOCKS:?}");
                return ExitCode::FAILURE;
            }
        }
    }
    if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
