//! Filtered traversal of the test tree inside one worker

use crate::coverage::CodeCoverage;
use crate::dispatch::ParallelDispatcher;
use crate::engine::{Outcome, TestEngine, TestEnvironment};
use crate::error::Result;
use crate::event::Payload;
use crate::partition::TestFilter;
use crate::suite::{TestCase, TestNode, TestSuite};
use std::time::{Duration, Instant};

/// Walks a suite depth-first in declared order, consulting the filter for
/// every child and executing accepted leaves through the engine
pub struct SuiteRunner<'a> {
    engine: &'a dyn TestEngine,
    filter: &'a mut dyn TestFilter,
    dispatcher: &'a mut ParallelDispatcher,
    env: &'a TestEnvironment,
    coverage: &'a mut CodeCoverage,
}

impl<'a> SuiteRunner<'a> {
    pub fn new(
        engine: &'a dyn TestEngine,
        filter: &'a mut dyn TestFilter,
        dispatcher: &'a mut ParallelDispatcher,
        env: &'a TestEnvironment,
        coverage: &'a mut CodeCoverage,
    ) -> Self {
        SuiteRunner {
            engine,
            filter,
            dispatcher,
            env,
            coverage,
        }
    }

    pub fn run(&mut self, suite: &TestSuite) -> Result<()> {
        if let Some(requires) = &suite.requires {
            if !self.engine.requirement_met(requires, self.env) {
                let message = format!("Requirement not met: {}", requires);
                self.dispatcher.emit(Payload::SuiteSkipped {
                    suite: suite.name.clone(),
                    message: message.clone(),
                })?;
                return self.skip_children(suite, &message);
            }
        }

        self.dispatcher.emit(Payload::SuiteStarted {
            suite: suite.name.clone(),
            test_count: suite.count(),
        })?;

        for child in &suite.children {
            if !self.filter.accept(child) {
                continue;
            }
            match child {
                TestNode::Suite(inner) => self.run(inner)?,
                TestNode::Case(case) => self.run_case(case)?,
            }
        }

        self.dispatcher.emit(Payload::SuiteFinished {
            suite: suite.name.clone(),
        })
    }

    // Skipped subtrees still go through the filter so the partition counter
    // advances exactly as it does in workers that run them.
    fn skip_children(&mut self, suite: &TestSuite, message: &str) -> Result<()> {
        for child in &suite.children {
            if !self.filter.accept(child) {
                continue;
            }
            match child {
                TestNode::Suite(inner) => self.skip_children(inner, message)?,
                TestNode::Case(case) => {
                    self.dispatcher.emit(Payload::TestSkipped {
                        test: case.id.clone(),
                        message: message.to_string(),
                    })?;
                    self.dispatcher.emit(Payload::TestFinished {
                        test: case.id.clone(),
                        duration: Duration::ZERO,
                    })?;
                }
            }
        }
        Ok(())
    }

    fn run_case(&mut self, case: &TestCase) -> Result<()> {
        let test = case.id.clone();
        self.dispatcher
            .emit(Payload::TestPrepared { test: test.clone() })?;

        let started = Instant::now();
        let outcome = self.engine.execute(case, self.env, self.coverage)?;
        let duration = started.elapsed();

        let payload = match outcome {
            Outcome::Passed => Payload::TestPassed { test: test.clone() },
            Outcome::Failed(message) => Payload::TestFailed {
                test: test.clone(),
                message,
            },
            Outcome::Errored(message) => Payload::TestErrored {
                test: test.clone(),
                message,
            },
            Outcome::Skipped(message) => Payload::TestSkipped {
                test: test.clone(),
                message,
            },
        };
        self.dispatcher.emit(payload)?;
        self.dispatcher
            .emit(Payload::TestFinished { test, duration })
    }
}
