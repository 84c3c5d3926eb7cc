//! Policies that decide when a contended acquirer stops spinning and goes to
//! sleep.
//!
//! Parking is expensive: it costs at least one system call on the waiting side
//! and one on the waking side. Spinning is wasteful when the holder is not
//! about to release. A [`ParkPolicy`] tells a blocking lock how long to spin,
//! and with which [`Relax`] strategy, before it hands the thread over to the
//! park primitive.

use core::marker::PhantomData;

use crate::cfg::debug_abort;
use crate::relax::{Loop, Relax, Spin, SpinBackoff};

#[cfg(any(feature = "std", test))]
use crate::relax::{Yield, YieldBackoff};

/// The spin-then-park policy applied by a blocking lock under contention.
///
/// # Example
///
/// ```
/// use qlocks::park::policy::ParkPolicy;
/// use qlocks::relax::Spin;
///
/// struct TenSpinsThenPark(u32);
///
/// impl ParkPolicy for TenSpinsThenPark {
///     type Relax = Spin;
///
///     fn new() -> Self {
///         Self(0)
///     }
///
///     fn should_park(&self) -> bool {
///         self.0 >= 10
///     }
///
///     fn on_failure(&mut self) {
///         self.0 += 1;
///     }
/// }
/// ```
pub trait ParkPolicy {
    /// The relax operation run between two failed acquisition attempts.
    type Relax: Relax;

    /// Returns the initial state of the policy, once per contended acquisition.
    fn new() -> Self;

    /// Returns `true` once the thread should stop spinning and park.
    fn should_park(&self) -> bool;

    /// Called once for every failed attempt made while `should_park` returned
    /// `false`.
    fn on_failure(&mut self);
}

mod sealed {
    /// The actual implementation of this crate's policies.
    pub trait PolicyImpl {
        type Relax: super::Relax;

        fn new() -> Self;

        fn should_park(&self) -> bool;

        fn on_failure(&mut self);
    }
}
use sealed::PolicyImpl;

#[doc(hidden)]
impl<P: PolicyImpl> ParkPolicy for P {
    type Relax = P::Relax;

    #[inline(always)]
    fn new() -> Self {
        debug_abort::on_unwind(|| P::new())
    }

    #[inline(always)]
    fn should_park(&self) -> bool {
        debug_abort::on_unwind(|| P::should_park(self))
    }

    #[inline(always)]
    fn on_failure(&mut self) {
        debug_abort::on_unwind(|| P::on_failure(self));
    }
}

/// The number of failed attempts the bounded policies make before parking.
pub const DEFAULT_ATTEMPTS: u32 = 100;

/// Runs the `R` relax strategy for up to `ATTEMPTS` failed attempts, then
/// parks.
///
/// The named policies of this module are aliases of this type.
pub struct RelaxThenPark<R, const ATTEMPTS: u32 = DEFAULT_ATTEMPTS> {
    attempts: u32,
    relax: PhantomData<R>,
}

impl<R, const ATTEMPTS: u32> RelaxThenPark<R, ATTEMPTS> {
    /// The number of failed attempts made before parking.
    pub const ATTEMPTS: u32 = ATTEMPTS;
}

impl<R: Relax, const ATTEMPTS: u32> PolicyImpl for RelaxThenPark<R, ATTEMPTS> {
    type Relax = R;

    #[inline(always)]
    fn new() -> Self {
        Self { attempts: 0, relax: PhantomData }
    }

    #[inline(always)]
    fn should_park(&self) -> bool {
        self.attempts >= ATTEMPTS
    }

    #[inline(always)]
    fn on_failure(&mut self) {
        self.attempts += 1;
    }
}

/// Spins with [`Spin`] for [`DEFAULT_ATTEMPTS`] attempts, then parks.
pub type SpinThenPark = RelaxThenPark<Spin>;

/// Spins with [`Loop`] for [`DEFAULT_ATTEMPTS`] attempts, then parks.
pub type LoopThenPark = RelaxThenPark<Loop>;

/// Backs off exponentially with [`SpinBackoff`] for [`DEFAULT_ATTEMPTS`]
/// attempts, then parks.
pub type SpinBackoffThenPark = RelaxThenPark<SpinBackoff>;

/// Yields with [`Yield`] for [`DEFAULT_ATTEMPTS`] attempts, then parks.
#[cfg(any(feature = "std", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub type YieldThenPark = RelaxThenPark<Yield>;

/// Backs off with [`YieldBackoff`] for [`DEFAULT_ATTEMPTS`] attempts, then
/// parks.
#[cfg(any(feature = "std", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "std")))]
pub type YieldBackoffThenPark = RelaxThenPark<YieldBackoff>;

/// Parks right after the first failed attempt.
pub type ImmediatePark<R = Spin> = RelaxThenPark<R, 0>;

#[cfg(all(not(loom), test))]
mod test {
    use super::ParkPolicy;

    fn attempts_before_parking<P: ParkPolicy>() -> u32 {
        let mut policy = P::new();
        let mut counter = 0;
        for _ in 0..1000 {
            while !policy.should_park() {
                policy.on_failure();
                counter += 1;
            }
        }
        assert!(policy.should_park());
        counter
    }

    #[test]
    fn spins() {
        use super::SpinThenPark;
        assert_eq!(attempts_before_parking::<SpinThenPark>(), SpinThenPark::ATTEMPTS);
    }

    #[test]
    fn loops() {
        use super::LoopThenPark;
        assert_eq!(attempts_before_parking::<LoopThenPark>(), LoopThenPark::ATTEMPTS);
    }

    #[test]
    fn spin_backoff() {
        use super::SpinBackoffThenPark;
        let expected = SpinBackoffThenPark::ATTEMPTS;
        assert_eq!(attempts_before_parking::<SpinBackoffThenPark>(), expected);
    }

    #[test]
    fn yields() {
        use super::{YieldBackoffThenPark, YieldThenPark};
        assert_eq!(attempts_before_parking::<YieldThenPark>(), YieldThenPark::ATTEMPTS);
        let expected = YieldBackoffThenPark::ATTEMPTS;
        assert_eq!(attempts_before_parking::<YieldBackoffThenPark>(), expected);
    }

    #[test]
    fn custom_bound() {
        use super::RelaxThenPark;
        use crate::relax::Spin;
        assert_eq!(attempts_before_parking::<RelaxThenPark<Spin, 7>>(), 7);
    }

    #[test]
    fn immediately() {
        assert_eq!(attempts_before_parking::<super::ImmediatePark>(), 0);
    }
}
