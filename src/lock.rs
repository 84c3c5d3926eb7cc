//! The raw locking contract shared by every algorithm of this crate.

use crate::cfg;
use crate::error::NodeError;

/// A raw mutual exclusion lock, with no data attached to it.
///
/// All algorithms offer the same three operations: obtain a per-acquirer
/// record, `acquire` and `release`. Node-less algorithms (eg. [`Ttas`],
/// [`TicketLock`]) use `()` as their record. Queue locks (eg. [`ClhLock`],
/// [`CnaLock`]) hand out records that are bound to the lock they came from.
///
/// A record may be reused for any number of sequential acquisitions, but it
/// must be passed to `release` by the same logical thread that last acquired
/// the lock with it, exactly once per successful acquisition.
///
/// # Safety
///
/// Implementors must guarantee that between a call to `acquire` (or a
/// `try_acquire` returning `true`) and the matching `release`, no other call
/// to `acquire` or `try_acquire` on the same lock returns. Release must
/// publish every write made while the lock was held to the next holder.
///
/// [`Ttas`]: crate::spin::Ttas
/// [`TicketLock`]: crate::ticket::TicketLock
/// [`ClhLock`]: crate::clh::ClhLock
/// [`CnaLock`]: crate::cna::CnaLock
pub unsafe trait RawLock {
    /// The record an acquirer must hold on to while it waits or holds the lock.
    type Node<'a>
    where
        Self: 'a;

    /// Returns a new record for this lock, or an error if the lock has a
    /// bounded number of records and all of them are in use.
    fn try_node(&self) -> Result<Self::Node<'_>, NodeError>;

    /// Returns a new record for this lock.
    ///
    /// Aborts the process if the lock runs out of records, since that means
    /// it was configured for fewer threads than are using it.
    fn node(&self) -> Self::Node<'_> {
        match self.try_node() {
            Ok(node) => node,
            Err(err) => cfg::misuse(format_args!("{err}")),
        }
    }

    /// Acquires this lock, blocking the current thread until it is able to
    /// do so.
    fn acquire(&self, node: &mut Self::Node<'_>);

    /// Attempts to acquire this lock without blocking.
    ///
    /// Returns `true` if the lock was acquired.
    fn try_acquire(&self, node: &mut Self::Node<'_>) -> bool;

    /// Releases this lock, handing it over to a waiter if there is one.
    ///
    /// Aborts the process on detectable misuse, such as releasing a lock that
    /// is not held or passing a record that does not hold it.
    fn release(&self, node: &mut Self::Node<'_>);

    /// Returns `true` if the lock is currently held.
    ///
    /// This function does not guarantee strong ordering, only atomicity.
    fn is_locked(&self) -> bool;
}
