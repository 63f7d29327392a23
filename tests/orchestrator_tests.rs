//! Orchestrator scenarios with in-memory engines
//!
//! These tests run real worker threads and channels, but replace the shell
//! engine and the configuration-driven tree with fakes so that the merged
//! stream can be checked precisely.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use testpar::config::TestparConfig;
use testpar::coverage::CodeCoverage;
use testpar::dispatch::Dispatch;
use testpar::engine::{Outcome, TestEngine, TestEnvironment, WORKER_ID_ENV};
use testpar::error::{Error, Result};
use testpar::event::{Event, EventKind, Payload, Recorder};
use testpar::orchestrator::Orchestrator;
use testpar::suite::{SuiteBuilder, TestCase, TestId, TestNode, TestSuite};

/// Engine whose behaviour depends on the worker it runs in
#[derive(Default)]
struct FakeEngine {
    /// Worker whose coverage records the command as a line of `lib.rs`
    covering_worker: Option<usize>,
    /// Worker whose bootstrap fails
    broken_bootstrap: Option<usize>,
    /// Worker that panics on its first test
    panicking_worker: Option<usize>,
}

fn worker_of(env: &TestEnvironment) -> usize {
    env.vars
        .iter()
        .find(|(key, _)| key == WORKER_ID_ENV)
        .and_then(|(_, value)| value.parse().ok())
        .expect("worker id in environment")
}

impl TestEngine for FakeEngine {
    fn bootstrap(&self, script: &Path, env: &TestEnvironment) -> Result<()> {
        if self.broken_bootstrap == Some(worker_of(env)) {
            return Err(Error::Bootstrap {
                path: script.to_path_buf(),
                reason: "Cannot open bootstrap script".to_string(),
            });
        }
        Ok(())
    }

    fn requirement_met(&self, _command: &str, _env: &TestEnvironment) -> bool {
        true
    }

    fn execute(
        &self,
        case: &TestCase,
        env: &TestEnvironment,
        coverage: &mut CodeCoverage,
    ) -> Result<Outcome> {
        let worker = worker_of(env);
        if self.panicking_worker == Some(worker) {
            panic!("engine exploded in worker {}", worker);
        }
        if self.covering_worker == Some(worker) && coverage.is_active() {
            let line = case.command.parse().expect("numeric command");
            coverage.record("lib.rs", line);
        }
        if case.command == "fail" {
            return Ok(Outcome::Failed("expected failure".to_string()));
        }
        Ok(Outcome::Passed)
    }
}

/// Returns the same tree for every configuration
struct FixedTree(TestSuite);

impl SuiteBuilder for FixedTree {
    fn build(&self, _config: &TestparConfig) -> Result<TestSuite> {
        Ok(self.0.clone())
    }
}

fn leaf(id: &str, command: &str) -> TestNode {
    TestNode::Case(TestCase {
        id: TestId::new(id),
        command: command.to_string(),
    })
}

/// One suite with `count` leaves whose commands are "1".."count"
fn flat_suite(count: usize) -> TestSuite {
    let mut suite = TestSuite::new("unit");
    suite.children = (1..=count)
        .map(|i| leaf(&format!("unit::t{}", i), &i.to_string()))
        .collect();
    suite
}

fn run(
    config: TestparConfig,
    engine: FakeEngine,
    tree: TestSuite,
    workers: usize,
) -> (Recorder, testpar::orchestrator::RunReport) {
    let orchestrator = Orchestrator::new(config, Arc::new(engine), Arc::new(FixedTree(tree)))
        .with_worker_count(workers);
    let mut recorder = Recorder::default();
    let report = orchestrator.run(&mut recorder).unwrap();
    (recorder, report)
}

fn count(events: &[Event], kind: EventKind) -> usize {
    events.iter().filter(|e| e.kind() == kind).count()
}

fn finished_tests(events: &[Event]) -> Vec<String> {
    let mut tests: Vec<String> = events
        .iter()
        .filter_map(|e| match &e.payload {
            Payload::TestFinished { test, .. } => Some(test.to_string()),
            _ => None,
        })
        .collect();
    tests.sort();
    tests
}

#[test]
fn test_suite_started_only_from_primary_worker() {
    let (recorder, report) = run(
        TestparConfig::default(),
        FakeEngine::default(),
        flat_suite(2),
        2,
    );
    assert!(report.failures.is_empty());

    let started: Vec<&Event> = recorder
        .events
        .iter()
        .filter(|e| e.kind() == EventKind::SuiteStarted)
        .collect();
    assert_eq!(started.len(), 1);
    assert_eq!(started[0].worker, 0);

    let passed_by: Vec<usize> = recorder
        .events
        .iter()
        .filter(|e| e.kind() == EventKind::TestPassed)
        .map(|e| e.worker)
        .collect();
    assert_eq!(passed_by.len(), 2);
    assert!(passed_by.contains(&0));
    assert!(passed_by.contains(&1));
}

#[test]
fn test_coverage_from_single_worker_and_one_terminal_event() {
    let mut config = TestparConfig::default();
    config.coverage = true;
    let engine = FakeEngine {
        covering_worker: Some(1),
        ..FakeEngine::default()
    };

    let (recorder, report) = run(config, engine, flat_suite(6), 3);
    assert!(report.failures.is_empty());

    // Worker 1 runs leaves 1 and 4, whose commands are "2" and "5"
    let mut expected = CodeCoverage::default();
    expected.record("lib.rs", 2);
    expected.record("lib.rs", 5);
    assert_eq!(report.coverage.line_count(), expected.line_count());
    assert!(report.coverage.is_covered("lib.rs", 2));
    assert!(report.coverage.is_covered("lib.rs", 5));

    assert_eq!(
        count(&recorder.events, EventKind::RunnerExecutionFinished),
        1
    );
    assert!(recorder.events.last().unwrap().is_terminal());
}

#[test]
fn test_every_test_reported_once_for_any_worker_count() {
    let mut inner = TestSuite::new("inner");
    inner.children = vec![leaf("inner::x", "1"), leaf("inner::y", "2")];
    let mut root = flat_suite(5);
    root.children.insert(2, TestNode::Suite(inner));

    let mut expected: Vec<String> = root.cases().iter().map(|c| c.id.to_string()).collect();
    expected.sort();

    for workers in 1..=8 {
        let (recorder, report) = run(
            TestparConfig::default(),
            FakeEngine::default(),
            root.clone(),
            workers,
        );
        assert!(report.failures.is_empty());
        assert_eq!(finished_tests(&recorder.events), expected, "{} workers", workers);
        assert_eq!(report.worker_count, workers);
    }
}

#[test]
fn test_dispatch_policy_holds_on_merged_stream() {
    let (recorder, _) = run(
        TestparConfig::default(),
        FakeEngine::default(),
        flat_suite(7),
        4,
    );

    for event in &recorder.events {
        match Dispatch::of(event.kind()) {
            Dispatch::Suppressed => panic!("suppressed event forwarded: {}", event.kind()),
            Dispatch::PrimaryOnly { .. } => assert_eq!(event.worker, 0, "{}", event.kind()),
            Dispatch::Flush | Dispatch::Normal => {}
        }
    }
    assert_eq!(count(&recorder.events, EventKind::RunnerFinished), 1);
    assert_eq!(count(&recorder.events, EventKind::RunnerExecutionStarted), 1);
}

#[test]
fn test_failures_are_forwarded_with_their_worker() {
    let mut suite = TestSuite::new("unit");
    suite.children = vec![leaf("unit::ok", "1"), leaf("unit::bad", "fail")];

    let (recorder, _) = run(TestparConfig::default(), FakeEngine::default(), suite, 2);
    let failed: Vec<&Event> = recorder
        .events
        .iter()
        .filter(|e| e.kind() == EventKind::TestFailed)
        .collect();
    assert_eq!(failed.len(), 1);
    // unit::bad is the second leaf
    assert_eq!(failed[0].worker, 1);
}

#[test]
fn test_bootstrap_failure_in_primary_keeps_other_workers() {
    let mut config = TestparConfig::default();
    config.bootstrap = Some(PathBuf::from("boot.sh"));
    let engine = FakeEngine {
        broken_bootstrap: Some(0),
        ..FakeEngine::default()
    };

    let (recorder, report) = run(config, engine, flat_suite(4), 2);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].worker, 0);
    assert!(matches!(report.failures[0].error, Error::Bootstrap { .. }));

    assert_eq!(finished_tests(&recorder.events), vec!["unit::t2", "unit::t4"]);
    assert_eq!(
        count(&recorder.events, EventKind::RunnerExecutionFinished),
        1
    );
    assert!(recorder.events.last().unwrap().is_terminal());
}

#[test]
fn test_panicking_worker_is_reported() {
    let engine = FakeEngine {
        panicking_worker: Some(2),
        ..FakeEngine::default()
    };

    let (recorder, report) = run(TestparConfig::default(), engine, flat_suite(6), 3);

    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].worker, 2);
    assert!(matches!(report.failures[0].error, Error::WorkerPanicked(2)));
    assert!(recorder.events.last().unwrap().is_terminal());

    let finished = finished_tests(&recorder.events);
    assert!(finished.contains(&"unit::t1".to_string()));
    assert!(finished.contains(&"unit::t2".to_string()));
    assert!(!finished.contains(&"unit::t3".to_string()));
}

#[test]
fn test_zero_workers_fail_preflight() {
    let orchestrator = Orchestrator::new(
        TestparConfig::default(),
        Arc::new(FakeEngine::default()),
        Arc::new(FixedTree(flat_suite(1))),
    )
    .with_worker_count(0);

    let mut recorder = Recorder::default();
    let err = orchestrator.run(&mut recorder).unwrap_err();
    assert!(matches!(err, Error::Preflight(_)));
    assert!(recorder.events.is_empty());
}

#[test]
fn test_sorting_is_applied_before_partitioning() {
    let mut config = TestparConfig::default();
    config.execution_order = "reverse".parse().unwrap();

    let (recorder, _) = run(config, FakeEngine::default(), flat_suite(3), 2);

    // Reversed: t3 t2 t1, so worker 0 runs t3 and t1
    let mut by_primary: Vec<String> = recorder
        .events
        .iter()
        .filter(|e| e.worker == 0)
        .filter_map(|e| match &e.payload {
            Payload::TestFinished { test, .. } => Some(test.to_string()),
            _ => None,
        })
        .collect();
    by_primary.sort();
    assert_eq!(by_primary, vec!["unit::t1", "unit::t3"]);
    assert_eq!(count(&recorder.events, EventKind::SuiteSorted), 1);
}
