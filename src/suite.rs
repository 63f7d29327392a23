//! Test tree data structures
//!
//! A run is described by a tree of [`TestSuite`] composites whose leaves are
//! [`TestCase`]s. Every worker builds the whole tree from the configuration
//! snapshot, so construction must be deterministic: the same configuration
//! always yields the same children in the same order.

use crate::config::{TestparConfig, SUITE_SEPARATOR};
use crate::error::Result;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Unique identifier for a test
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TestId(String);

impl TestId {
    /// Creates a new test identifier from a string.
    pub fn new(id: impl Into<String>) -> Self {
        TestId(id.into())
    }

    /// Returns the test identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for TestId {
    fn from(s: String) -> Self {
        TestId(s)
    }
}

impl From<&str> for TestId {
    fn from(s: &str) -> Self {
        TestId(s.to_string())
    }
}

/// An individually executable test
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestCase {
    pub id: TestId,
    pub command: String,
}

/// A named group of tests and nested suites
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestSuite {
    pub name: String,
    /// Shell command that must succeed for the suite to run
    pub requires: Option<String>,
    pub children: Vec<TestNode>,
}

/// A node of the test tree
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TestNode {
    Suite(TestSuite),
    Case(TestCase),
}

impl TestNode {
    /// Number of leaves at or below this node
    pub fn count(&self) -> usize {
        match self {
            TestNode::Suite(suite) => suite.count(),
            TestNode::Case(_) => 1,
        }
    }
}

impl TestSuite {
    /// Creates an empty suite.
    pub fn new(name: impl Into<String>) -> Self {
        TestSuite {
            name: name.into(),
            requires: None,
            children: Vec::new(),
        }
    }

    /// Number of leaves in this suite, recursively
    pub fn count(&self) -> usize {
        self.children.iter().map(TestNode::count).sum()
    }

    /// Whether the suite has no leaves at all
    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Leaves in depth-first declared order
    pub fn cases(&self) -> Vec<&TestCase> {
        let mut cases = Vec::new();
        self.collect_cases(&mut cases);
        cases
    }

    fn collect_cases<'a>(&'a self, out: &mut Vec<&'a TestCase>) {
        for child in &self.children {
            match child {
                TestNode::Suite(suite) => suite.collect_cases(out),
                TestNode::Case(case) => out.push(case),
            }
        }
    }

    fn child_suite_mut(&mut self, name: &str) -> &mut TestSuite {
        let position = self
            .children
            .iter()
            .position(|child| matches!(child, TestNode::Suite(s) if s.name == name));

        let index = match position {
            Some(index) => index,
            None => {
                self.children.push(TestNode::Suite(TestSuite::new(name)));
                self.children.len() - 1
            }
        };

        match &mut self.children[index] {
            TestNode::Suite(suite) => suite,
            TestNode::Case(_) => unreachable!("index points at a suite"),
        }
    }
}

/// Builds the test tree a run executes
pub trait SuiteBuilder: Send + Sync {
    /// Build the full, unpartitioned tree for the given configuration
    fn build(&self, config: &TestparConfig) -> Result<TestSuite>;
}

/// Builds the tree from the suite sections of the configuration
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigSuiteBuilder;

impl SuiteBuilder for ConfigSuiteBuilder {
    fn build(&self, config: &TestparConfig) -> Result<TestSuite> {
        let mut root = TestSuite::new(config.name.clone());

        // BTreeMap order puts "a" before "a::b", so parents exist before children
        for (full_name, section) in &config.suites {
            let mut suite = &mut root;
            for part in full_name.split(SUITE_SEPARATOR) {
                suite = suite.child_suite_mut(part.trim());
            }
            suite.requires = section.requires.clone();

            for (test_name, command) in &section.tests {
                suite.children.push(TestNode::Case(TestCase {
                    id: TestId::new(format!("{}{}{}", full_name, SUITE_SEPARATOR, test_name)),
                    command: command.clone(),
                }));
            }
        }

        normalize(&mut root);
        Ok(root)
    }
}

/// Tests first by id, then child suites by name
fn normalize(suite: &mut TestSuite) {
    suite.children.sort_by(|a, b| match (a, b) {
        (TestNode::Case(a), TestNode::Case(b)) => a.id.cmp(&b.id),
        (TestNode::Suite(a), TestNode::Suite(b)) => a.name.cmp(&b.name),
        (TestNode::Case(_), TestNode::Suite(_)) => std::cmp::Ordering::Less,
        (TestNode::Suite(_), TestNode::Case(_)) => std::cmp::Ordering::Greater,
    });
    for child in &mut suite.children {
        if let TestNode::Suite(child) = child {
            normalize(child);
        }
    }
}

/// Keep only tests whose id matches `pattern`, pruning suites left empty
pub fn filter_by_name(suite: &mut TestSuite, pattern: &str) -> Result<()> {
    let regex = Regex::new(pattern)?;
    retain_matching(suite, &regex);
    Ok(())
}

fn retain_matching(suite: &mut TestSuite, regex: &Regex) {
    suite.children.retain_mut(|child| match child {
        TestNode::Case(case) => regex.is_match(case.id.as_str()),
        TestNode::Suite(inner) => {
            retain_matching(inner, regex);
            !inner.is_empty()
        }
    });
}
