use criterion::{criterion_group, criterion_main, Criterion};

use qlocks::blocking::BlockingMutex;
use qlocks::clh::ClhLock;
use qlocks::cna::CnaLock;
use qlocks::numa::Interleaved;
use qlocks::park::DefaultBackend;
use qlocks::relax::Spin;
use qlocks::spin::{Tas, Ttas};
use qlocks::ticket::{ParkingTicketLock, TicketLock};
use qlocks_benches::bench_lock;

fn spinning(criterion: &mut Criterion) {
    bench_lock!(criterion, "tas", Tas::<Spin>::new);
    bench_lock!(criterion, "ttas", Ttas::<Spin>::new);
    bench_lock!(criterion, "ticket", TicketLock::<Spin>::new);
}

fn queued(criterion: &mut Criterion) {
    bench_lock!(criterion, "clh", ClhLock::<Spin>::new);
    bench_lock!(criterion, "cna", CnaLock::<Spin>::new);
    bench_lock!(criterion, "cna_interleaved", || {
        CnaLock::<Spin, Interleaved>::with_config(Default::default(), Interleaved::new(2))
    });
}

fn parking(criterion: &mut Criterion) {
    bench_lock!(criterion, "parking_ticket", ParkingTicketLock::<DefaultBackend>::new);
    bench_lock!(criterion, "blocking", BlockingMutex::<DefaultBackend>::new);
}

criterion_group!(locks, spinning, queued, parking);
criterion_main!(locks);
