//! Test partitioning for parallel execution
//!
//! Every worker traverses the entire test tree and asks its own [`Partitioner`]
//! which leaves belong to it. The partitioner counts leaves in traversal order
//! and accepts the ones whose position modulo the worker count equals the
//! worker id. As long as all workers traverse the same tree in the same order,
//! the accepted sets are disjoint and together cover every leaf, without any
//! coordination between workers.

use crate::suite::TestNode;

/// Position of one worker within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerIdentity {
    worker_id: usize,
    worker_count: usize,
}

impl WorkerIdentity {
    /// Create an identity for worker `worker_id` of `worker_count`.
    ///
    /// # Panics
    ///
    /// Panics when `worker_count` is zero or `worker_id` is out of range; both
    /// are programming errors in the caller.
    pub fn new(worker_id: usize, worker_count: usize) -> Self {
        assert!(worker_count >= 1, "worker count must be at least 1");
        assert!(
            worker_id < worker_count,
            "worker id {} out of range for {} workers",
            worker_id,
            worker_count
        );
        WorkerIdentity {
            worker_id,
            worker_count,
        }
    }

    pub fn worker_id(&self) -> usize {
        self.worker_id
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// The primary worker emits run-wide singleton events
    pub fn is_primary(&self) -> bool {
        self.worker_id == 0
    }
}

/// Decides which nodes of the tree a traversal descends into or executes
pub trait TestFilter {
    /// Called once per visited node, in traversal order
    fn accept(&mut self, node: &TestNode) -> bool;
}

/// Accepts every leaf whose traversal position maps to this worker
///
/// The counter lives in the instance; create a fresh partitioner for every
/// worker and never share one between traversals.
#[derive(Debug)]
pub struct Partitioner {
    identity: WorkerIdentity,
    counter: usize,
}

impl Partitioner {
    pub fn new(identity: WorkerIdentity) -> Self {
        Partitioner {
            identity,
            counter: 0,
        }
    }

    /// Number of leaves visited so far
    pub fn visited(&self) -> usize {
        self.counter
    }
}

impl TestFilter for Partitioner {
    fn accept(&mut self, node: &TestNode) -> bool {
        match node {
            TestNode::Suite(_) => true,
            TestNode::Case(_) => {
                let accepted =
                    self.counter % self.identity.worker_count == self.identity.worker_id;
                self.counter += 1;
                accepted
            }
        }
    }
}
