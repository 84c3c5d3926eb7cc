use std::sync::Arc;
use std::thread;

use criterion::{black_box, Bencher};
use qlocks::{Mutex, RawLock};

pub fn gen_create<L, F>(bencher: &mut Bencher, new: F)
where
    L: RawLock,
    F: Fn() -> L,
{
    bencher.iter(|| {
        let value = black_box(0);
        Mutex::with_lock(value, new())
    });
}

pub fn gen_lock_unlock<L, F>(bencher: &mut Bencher, new: F)
where
    L: RawLock,
    F: Fn() -> L,
{
    let mutex = Mutex::with_lock(0_u32, new());
    let mut node = mutex.node();

    bencher.iter(|| {
        mutex.lock_with_then(&mut node, |data| *data = data.wrapping_add(1));
    })
}

pub fn gen_lock_unlock_read_contention<L, F>(bencher: &mut Bencher, new: F)
where
    L: RawLock + Send + Sync + 'static,
    F: Fn() -> L,
{
    let data = Arc::new(Mutex::with_lock(0_u32, new()));

    let thread = thread::spawn({
        let data = Arc::clone(&data);

        move || {
            let mut node = data.node();
            while Arc::strong_count(&data) > 1 {
                for _ in 0..1000 {
                    black_box(data.lock_with_then(&mut node, |data| *data));
                }
            }
        }
    });

    let mut node = data.node();
    bencher.iter(|| {
        data.lock_with_then(&mut node, |data| *data = data.wrapping_add(1));
    });

    drop(node);
    drop(data);
    thread.join().unwrap();
}

pub fn gen_lock_unlock_write_contention<L, F>(bencher: &mut Bencher, new: F)
where
    L: RawLock + Send + Sync + 'static,
    F: Fn() -> L,
{
    let data = Arc::new(Mutex::with_lock(0_u32, new()));

    let thread = thread::spawn({
        let data = Arc::clone(&data);

        move || {
            let mut node = data.node();
            while Arc::strong_count(&data) > 1 {
                for _ in 0..1000 {
                    data.lock_with_then(&mut node, |data| *data = data.wrapping_add(1));
                }
            }
        }
    });

    let mut node = data.node();
    bencher.iter(|| {
        data.lock_with_then(&mut node, |data| *data = data.wrapping_add(1));
    });

    drop(node);
    drop(data);
    thread.join().unwrap();
}

/// Registers the benchmarks of one lock under `$name`, building every
/// instance with `$new`.
#[macro_export]
macro_rules! bench_lock {
    ($criterion:expr, $name:literal, $new:expr) => {{
        let mut group = $criterion.benchmark_group($name);
        group.bench_function("create", |bench| $crate::gen_create(bench, $new));
        group.bench_function("lock_unlock", |bench| $crate::gen_lock_unlock(bench, $new));
        group.bench_function("lock_unlock_read_contention", |bench| {
            $crate::gen_lock_unlock_read_contention(bench, $new)
        });
        group.bench_function("lock_unlock_write_contention", |bench| {
            $crate::gen_lock_unlock_write_contention(bench, $new)
        });
        group.finish();
    }};
}
