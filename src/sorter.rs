//! Execution order of the test tree
//!
//! Sorting happens in every worker before partitioning. It only depends on the
//! configuration and the result cache snapshot, both of which are identical
//! across workers, so every worker still traverses the same tree.

use crate::error::{Error, Result};
use crate::result_cache::ResultCache;
use crate::suite::{TestNode, TestSuite};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Order in which tests are executed
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionOrder {
    /// Declared order
    #[default]
    Default,
    /// Declared order, reversed at every level
    Reverse,
    /// Tests that failed last time first
    Defects,
    /// Fastest known tests first
    Duration,
}

impl FromStr for ExecutionOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "default" => Ok(ExecutionOrder::Default),
            "reverse" => Ok(ExecutionOrder::Reverse),
            "defects" => Ok(ExecutionOrder::Defects),
            "duration" => Ok(ExecutionOrder::Duration),
            other => Err(Error::Config(format!("Unknown execution order '{}'", other))),
        }
    }
}

impl fmt::Display for ExecutionOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionOrder::Default => write!(f, "default"),
            ExecutionOrder::Reverse => write!(f, "reverse"),
            ExecutionOrder::Defects => write!(f, "defects"),
            ExecutionOrder::Duration => write!(f, "duration"),
        }
    }
}

/// Reorder the children of every suite in place
pub fn sort(suite: &mut TestSuite, order: ExecutionOrder, cache: &ResultCache) {
    match order {
        ExecutionOrder::Default => {}
        ExecutionOrder::Reverse => reverse(suite),
        // Stable sorts keep declared order between equal keys
        ExecutionOrder::Defects => sort_by_key(suite, &|node| !has_defect(node, cache)),
        ExecutionOrder::Duration => sort_by_key(suite, &|node| cached_duration(node, cache)),
    }
}

fn reverse(suite: &mut TestSuite) {
    suite.children.reverse();
    for child in &mut suite.children {
        if let TestNode::Suite(inner) = child {
            reverse(inner);
        }
    }
}

fn sort_by_key<K: Ord>(suite: &mut TestSuite, key: &dyn Fn(&TestNode) -> K) {
    for child in &mut suite.children {
        if let TestNode::Suite(inner) = child {
            sort_by_key(inner, key);
        }
    }
    suite.children.sort_by_key(|node| key(node));
}

fn has_defect(node: &TestNode, cache: &ResultCache) -> bool {
    match node {
        TestNode::Case(case) => cache.is_defect(&case.id),
        TestNode::Suite(suite) => suite.children.iter().any(|c| has_defect(c, cache)),
    }
}

fn cached_duration(node: &TestNode, cache: &ResultCache) -> Duration {
    match node {
        TestNode::Case(case) => cache.duration(&case.id).unwrap_or_default(),
        TestNode::Suite(suite) => suite
            .children
            .iter()
            .map(|c| cached_duration(c, cache))
            .sum(),
    }
}
