// Modified version of relax.rs from spin-rs to support Loom yielding and
// exponential backoff.
//
// Original file at its most recent change (at the time of writing):
// https://github.com/mvdnes/spin-rs/blob/5860ee114094cf200b97348ff332155fbd7159b4/src/relax.rs
//
// Copyright (c) 2014 Mathijs van de Nes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Strategies that determine what a waiting thread does between two reads of
//! the memory location it is spinning on.
//!
//! Every spinning lock in this crate is generic over one of these. The choice
//! does not affect correctness, only how much pressure the waiters put on the
//! cache line they watch and on the scheduler.

use crate::cfg::hint;

/// A trait implemented by spinning relax strategies.
pub trait Relax {
    /// Initialize the state for the relaxing operation, if any.
    fn new() -> Self;

    /// Perform the relaxing operation during a period of contention.
    fn relax(&mut self);
}

/// A strategy that rapidly spins while informing the CPU that it should power
/// down non-essential components via [`core::hint::spin_loop`].
///
/// Spinning is invisible to the scheduler, which may keep preempting the lock
/// holder in favour of its waiters. This is known as [priority inversion].
/// Prefer [`Yield`] or a parking lock when waiters outnumber cores.
///
/// [priority inversion]: https://matklad.github.io/2020/01/02/spinlocks-considered-harmful.html
pub struct Spin;

impl Relax for Spin {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {
        hint::spin_loop();
    }
}

/// A strategy that yields the current time slice to the scheduler in favour of
/// other threads or processes.
#[cfg(any(feature = "std", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub struct Yield;

#[cfg(any(feature = "std", test))]
impl Relax for Yield {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline]
    fn relax(&mut self) {
        crate::cfg::thread::yield_now();
    }
}

/// A strategy that rapidly spins, without telling the CPU to do any powering down.
///
/// Exists for completeness and as a workaround for targets that miscompile
/// spin hints. Use [`Spin`] instead.
pub struct Loop;

impl Relax for Loop {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {}
}

// Exponential backoff is based on the crossbeam-utils implementation.
// link to most recent change (as the time of writing):
// https://github.com/crossbeam-rs/crossbeam/blob/371de8c2d304db07662450995848f3dc9598ac99/crossbeam-utils/src/backoff.rs
//
// Copyright (c) 2019 The Crossbeam Project Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// A strategy that, as [`Spin`], will run a busy-wait spin-loop, except each
/// call doubles the number of spin hints issued, up to `2^SPIN_LIMIT`.
///
/// Useful for the global spinning locks ([`Tas`], [`Ttas`], [`TicketLock`]),
/// where every waiter reads the same cache line. Queue locks spin on private
/// lines and gain little from it.
///
/// [`Tas`]: crate::spin::Tas
/// [`Ttas`]: crate::spin::Ttas
/// [`TicketLock`]: crate::ticket::TicketLock
pub struct SpinBackoff {
    step: Step,
}

impl SpinBackoff {
    const SPIN_LIMIT: u32 = 6;
}

impl Relax for SpinBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { step: Step(0) }
    }

    #[inline(always)]
    fn relax(&mut self) {
        self.step.spin_to(Self::SPIN_LIMIT);
        self.step.step_to(Self::SPIN_LIMIT);
    }
}

/// A strategy that backs off exponentially like [`SpinBackoff`] and, once
/// past the spin limit, yields back to the OS scheduler.
#[cfg(any(feature = "std", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub struct YieldBackoff {
    step: Step,
}

#[cfg(any(feature = "std", test))]
impl YieldBackoff {
    const SPIN_LIMIT: u32 = SpinBackoff::SPIN_LIMIT;
    const YIELD_LIMIT: u32 = 10;
}

#[cfg(any(feature = "std", test))]
impl Relax for YieldBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { step: Step(0) }
    }

    #[inline(always)]
    fn relax(&mut self) {
        if self.step.0 <= Self::SPIN_LIMIT {
            self.step.spin_to(Self::SPIN_LIMIT);
        } else {
            crate::cfg::thread::yield_now();
        }
        self.step.step_to(Self::YIELD_LIMIT);
    }
}

/// Keeps count of the number of steps taken.
struct Step(u32);

impl Step {
    /// Number of spin hints issued at the current step, capped at `2^max`.
    const fn spins(&self, max: u32) -> u32 {
        let exp = if self.0 < max { self.0 } else { max };
        1 << exp
    }

    /// Bounded backoff spinning.
    fn spin_to(&self, max: u32) {
        for _ in 0..self.spins(max) {
            hint::spin_loop();
        }
    }

    /// Bounded step increment.
    fn step_to(&mut self, end: u32) {
        if self.0 <= end {
            self.0 += 1;
        }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Relax, SpinBackoff, Step};

    #[test]
    fn step_spins_double_until_limit() {
        let mut step = Step(0);
        let mut spins = [0; 10];
        for slot in &mut spins {
            *slot = step.spins(SpinBackoff::SPIN_LIMIT);
            step.step_to(SpinBackoff::SPIN_LIMIT);
        }
        assert_eq!(spins, [1, 2, 4, 8, 16, 32, 64, 64, 64, 64]);
    }

    #[test]
    fn step_counter_saturates() {
        let mut step = Step(0);
        for _ in 0..1000 {
            step.step_to(3);
        }
        assert_eq!(step.0, 4);
    }

    #[test]
    fn spin_backoff_is_bounded() {
        let mut backoff = SpinBackoff::new();
        for _ in 0..100 {
            backoff.relax();
        }
        assert_eq!(backoff.step.0, SpinBackoff::SPIN_LIMIT + 1);
        assert_eq!(backoff.step.spins(SpinBackoff::SPIN_LIMIT), 1 << SpinBackoff::SPIN_LIMIT);
    }

    #[test]
    fn yield_backoff_is_bounded() {
        use super::YieldBackoff;
        let mut backoff = YieldBackoff::new();
        for _ in 0..100 {
            backoff.relax();
        }
        assert_eq!(backoff.step.0, YieldBackoff::YIELD_LIMIT + 1);
    }
}
