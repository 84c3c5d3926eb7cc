//! Recoverable errors.
//!
//! Acquiring and releasing a lock never fails. The only condition a caller can
//! act upon is running out of queue nodes on a lock whose nodes are taken from
//! a bounded arena (see [`ClhLock`] and [`CnaLock`]).
//!
//! [`ClhLock`]: crate::clh::ClhLock
//! [`CnaLock`]: crate::cna::CnaLock

use core::fmt::{self, Display, Formatter};

/// The error returned by [`RawLock::try_node`].
///
/// [`RawLock::try_node`]: crate::lock::RawLock::try_node
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum NodeError {
    /// Every queue node of the lock is currently handed out.
    Exhausted {
        /// The number of nodes the lock was configured with.
        capacity: usize,
    },
}

impl Display for NodeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exhausted { capacity } => {
                write!(f, "all {capacity} queue nodes of this lock are in use")
            }
        }
    }
}

impl core::error::Error for NodeError {}

#[cfg(all(not(loom), test))]
mod test {
    use std::string::ToString;

    use super::NodeError;

    #[test]
    fn exhausted_display() {
        let err = NodeError::Exhausted { capacity: 4 };
        assert_eq!(err.to_string(), "all 4 queue nodes of this lock are in use");
    }
}
