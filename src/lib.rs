//! A collection of mutual exclusion algorithms that share one raw locking
//! contract.
//!
//! Every lock of this crate implements [`RawLock`]: obtain a per-acquirer
//! record with [`node`], then [`acquire`] and [`release`] the lock with it.
//! The algorithms differ in how waiters queue, spin, back off or sleep, and in
//! the fairness they guarantee:
//!
//! | Lock                        | Waiting              | Fairness                 |
//! |-----------------------------|----------------------|--------------------------|
//! | [`Tas`], [`Ttas`]           | global spin          | none                     |
//! | [`TicketLock`]              | global spin          | FIFO                     |
//! | [`ParkingTicketLock`]       | spin, then park      | FIFO                     |
//! | [`ClhLock`]                 | local spin           | FIFO                     |
//! | [`CnaLock`]                 | local spin           | FIFO per NUMA node, bounded overtaking |
//! | [`BlockingMutex`]           | spin, then park      | none                     |
//!
//! The data-protecting [`Mutex`] works with any of them, and gives access to
//! the protected value from within a closure.
//!
//! ## Use cases
//!
//! [Spinlocks are usually not what you want]. The majority of use cases are
//! well covered by OS-based mutexes like [`std::sync::Mutex`]. The spinning
//! locks of this crate are meant for the few places where busy waiting for a
//! short period is cheaper than a context switch, and for measuring how the
//! algorithms compare to each other.
//!
//! ## Misuse
//!
//! Acquisition and release never fail. Releasing a lock that is not held,
//! or passing a record that belongs to another lock, is a programmer error:
//! it is logged with [`tracing`] and then aborts the process (or panics
//! without the `std` feature). The only recoverable error is running out of
//! queue records, see [`NodeError`].
//!
//! ## Features
//!
//! - `std` (default): links to the standard library. Enables the
//!   [`Condvar`] park backend, the yielding relax strategies, the interleaved
//!   NUMA topology, and process abort on misuse.
//! - `futex`: enables the [`Futex`] park backend over a kernel futex and makes
//!   it the default one. Implies `std`.
//! - `lock_api`: implements [`lock_api::RawMutex`] for the locks without
//!   queue records, see the [`lock_api`](crate::lock_api) module.
//!
//! [`node`]: RawLock::node
//! [`acquire`]: RawLock::acquire
//! [`release`]: RawLock::release
//! [`Tas`]: spin::Tas
//! [`Ttas`]: spin::Ttas
//! [`TicketLock`]: ticket::TicketLock
//! [`ParkingTicketLock`]: ticket::ParkingTicketLock
//! [`ClhLock`]: clh::ClhLock
//! [`CnaLock`]: cna::CnaLock
//! [`BlockingMutex`]: blocking::BlockingMutex
//! [`Condvar`]: park::Condvar
//! [`Futex`]: https://docs.rs/qlocks/latest/qlocks/park/struct.Futex.html
//! [`std::sync::Mutex`]: https://doc.rust-lang.org/std/sync/struct.Mutex.html
//! [`lock_api::RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html
//! [Spinlocks are usually not what you want]: https://matklad.github.io/2020/01/02/spinlocks-considered-harmful.html

#![no_std]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

extern crate alloc;

#[cfg(any(feature = "std", test))]
extern crate std;

pub mod blocking;
pub mod clh;
pub mod cna;
pub mod error;
pub mod lock;
pub mod numa;
pub mod park;
pub mod relax;
pub mod spin;
pub mod ticket;

#[cfg(all(feature = "lock_api", not(loom)))]
#[cfg_attr(docsrs, doc(cfg(feature = "lock_api")))]
pub mod lock_api;

mod arena;
mod cfg;
mod mutex;

pub use error::NodeError;
pub use lock::RawLock;
pub use mutex::Mutex;

#[cfg(test)]
pub(crate) mod test;

#[cfg(all(loom, test))]
#[cfg(not(tarpaulin))]
pub(crate) mod loom;
