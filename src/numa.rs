//! NUMA topologies, used by [`CnaLock`] to group waiters by node.
//!
//! The lock only needs to know which node the calling thread runs on. How
//! that is decided is up to the [`Topology`] it was built with: a single node,
//! a synthetic assignment of threads to nodes, or per-acquisition injection
//! through [`CnaLock::node_on`].
//!
//! [`CnaLock`]: crate::cna::CnaLock
//! [`CnaLock::node_on`]: crate::cna::CnaLock::node_on

/// A source of NUMA node identifiers for the calling thread.
pub trait Topology {
    /// Returns the number of NUMA nodes.
    fn nodes(&self) -> usize;

    /// Returns the node the calling thread runs on, in `0..self.nodes()`.
    fn current_node(&self) -> usize;
}

/// A topology with a single NUMA node, for uniform memory access machines.
///
/// A CNA lock built with it behaves like an MCS lock.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Uniform;

impl Topology for Uniform {
    fn nodes(&self) -> usize {
        1
    }

    fn current_node(&self) -> usize {
        0
    }
}

#[cfg(any(feature = "std", test))]
pub use interleaved::Interleaved;

#[cfg(any(feature = "std", test))]
mod interleaved {
    use core::sync::atomic::{AtomicUsize, Ordering::Relaxed};

    use super::Topology;

    /// The file listing the online NUMA nodes on Linux, eg. `0-1,4`.
    const ONLINE_NODES: &str = "/sys/devices/system/node/online";

    /// Spreads threads round-robin over a number of NUMA nodes.
    ///
    /// Each thread gets a sequence number the first time it asks for its
    /// node, and stays on node `sequence % nodes` for its lifetime. The
    /// assignment does not follow the scheduler, it is meant to exercise
    /// NUMA-aware hand-offs on any machine.
    #[cfg_attr(docsrs, doc(cfg(feature = "std")))]
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct Interleaved {
        nodes: usize,
    }

    impl Interleaved {
        /// Creates a topology of `nodes` nodes, at least one.
        pub const fn new(nodes: usize) -> Self {
            let nodes = if nodes == 0 { 1 } else { nodes };
            Self { nodes }
        }

        /// Creates a topology with as many nodes as the system has online.
        ///
        /// Falls back to a single node if the count can not be read.
        pub fn from_system() -> Self {
            match std::fs::read_to_string(ONLINE_NODES) {
                Ok(online) => {
                    let nodes = count_nodes(&online).unwrap_or(1);
                    tracing::debug!(nodes, "read online NUMA nodes");
                    Self::new(nodes)
                }
                Err(err) => {
                    tracing::debug!(%err, "NUMA nodes unavailable, assuming one");
                    Self::new(1)
                }
            }
        }
    }

    impl Default for Interleaved {
        fn default() -> Self {
            Self::from_system()
        }
    }

    impl Topology for Interleaved {
        fn nodes(&self) -> usize {
            self.nodes
        }

        fn current_node(&self) -> usize {
            sequence() % self.nodes
        }
    }

    fn sequence() -> usize {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        std::thread_local! {
            static SEQUENCE: usize = NEXT.fetch_add(1, Relaxed);
        }
        SEQUENCE.with(|sequence| *sequence)
    }

    /// Counts the nodes of a kernel cpu/node list such as `0-3,8`.
    pub(super) fn count_nodes(list: &str) -> Option<usize> {
        let mut count = 0;
        for range in list.trim().split(',').filter(|range| !range.is_empty()) {
            let count_range = match range.split_once('-') {
                Some((first, last)) => {
                    let (first, last) = (first.parse::<usize>().ok()?, last.parse::<usize>().ok()?);
                    last.checked_sub(first)? + 1
                }
                None => range.parse::<usize>().map(|_| 1).ok()?,
            };
            count += count_range;
        }
        (count > 0).then_some(count)
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::mpsc::channel;
    use std::thread;

    use super::interleaved::count_nodes;
    use super::{Interleaved, Topology, Uniform};

    #[test]
    fn uniform_has_one_node() {
        assert_eq!(Uniform.nodes(), 1);
        assert_eq!(Uniform.current_node(), 0);
    }

    #[test]
    fn parses_node_lists() {
        assert_eq!(count_nodes("0\n"), Some(1));
        assert_eq!(count_nodes("0-3"), Some(4));
        assert_eq!(count_nodes("0-1,4,6-7\n"), Some(5));
        assert_eq!(count_nodes(""), None);
        assert_eq!(count_nodes("1-0"), None);
        assert_eq!(count_nodes("x"), None);
    }

    #[test]
    fn zero_nodes_is_one() {
        assert_eq!(Interleaved::new(0).nodes(), 1);
        assert!(Interleaved::from_system().nodes() >= 1);
    }

    #[test]
    fn threads_keep_their_node() {
        let topology = Interleaved::new(2);
        let (tx, rx) = channel();
        for _ in 0..4 {
            let tx = tx.clone();
            thread::spawn(move || {
                let node = topology.current_node();
                assert!(node < 2);
                assert_eq!(topology.current_node(), node);
                tx.send(node).unwrap();
            });
        }
        drop(tx);
        assert_eq!(rx.iter().count(), 4);
    }
}
