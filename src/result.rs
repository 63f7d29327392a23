//! Run result aggregation and exit status policy

use crate::config::TestparConfig;
use crate::error::Result;
use crate::event::{EventBatch, EventSink, Payload};
use crate::suite::TestId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Shell exit statuses
pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const FAILURE: i32 = 1;
    pub const EXCEPTION: i32 = 2;
    pub const CRASH: i32 = 255;
}

/// Status of a test execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestStatus {
    /// Test passed successfully.
    Success,
    /// Test failed with an assertion or expectation error.
    Failure,
    /// Test could not be executed properly.
    Error,
    /// Test was skipped.
    Skip,
}

impl TestStatus {
    /// Returns true if this status represents a failure condition.
    pub fn is_failure(&self) -> bool {
        matches!(self, TestStatus::Failure | TestStatus::Error)
    }
}

impl fmt::Display for TestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestStatus::Success => write!(f, "success"),
            TestStatus::Failure => write!(f, "failure"),
            TestStatus::Error => write!(f, "error"),
            TestStatus::Skip => write!(f, "skip"),
        }
    }
}

/// Aggregate outcome of a run, derived from the merged event stream
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunResult {
    pub tests_run: usize,
    pub passed: usize,
    pub failures: Vec<(TestId, String)>,
    pub errors: Vec<(TestId, String)>,
    pub skipped: usize,
    pub skipped_suites: Vec<String>,
}

impl RunResult {
    pub fn was_successful(&self) -> bool {
        self.failures.is_empty() && self.errors.is_empty()
    }
}

/// Builds a [`RunResult`] from forwarded events
#[derive(Debug, Default)]
pub struct ResultCollector {
    result: RunResult,
}

impl ResultCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn result(&self) -> &RunResult {
        &self.result
    }

    pub fn into_result(self) -> RunResult {
        self.result
    }
}

impl EventSink for ResultCollector {
    fn forward(&mut self, batch: &EventBatch) -> Result<()> {
        for event in batch {
            match &event.payload {
                Payload::TestPassed { .. } => self.result.passed += 1,
                Payload::TestFailed { test, message } => {
                    self.result.failures.push((test.clone(), message.clone()))
                }
                Payload::TestErrored { test, message } => {
                    self.result.errors.push((test.clone(), message.clone()))
                }
                Payload::TestSkipped { .. } => self.result.skipped += 1,
                Payload::TestFinished { .. } => self.result.tests_run += 1,
                Payload::SuiteSkipped { suite, .. } => {
                    self.result.skipped_suites.push(suite.clone())
                }
                _ => {}
            }
        }
        Ok(())
    }
}

/// Compute the process exit status for a finished run
pub fn shell_exit_code(config: &TestparConfig, result: &RunResult, worker_failures: usize) -> i32 {
    if worker_failures > 0 {
        return exit_code::EXCEPTION;
    }
    if !result.was_successful() {
        return exit_code::FAILURE;
    }
    if config.fail_on_empty_suite && result.tests_run == 0 {
        return exit_code::FAILURE;
    }
    if config.fail_on_skipped && result.skipped > 0 {
        return exit_code::FAILURE;
    }
    exit_code::SUCCESS
}
