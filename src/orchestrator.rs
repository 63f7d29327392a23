//! Orchestrator: spawns the workers and merges what they report
//!
//! A run moves through five phases:
//!
//! 1. **Spawning**: one worker thread plus one channel pair per worker, all
//!    started from the same serialized configuration snapshot.
//! 2. **Merging**: a single blocking wait over every event channel and every
//!    completion signal. Batches are forwarded to the sink as they arrive,
//!    except for the terminal "execution finished" event which is held back.
//!    Completions merge coverage and count down the pending workers.
//! 3. **Draining**: channels are closed and worker threads joined.
//! 4. **Finalizing**: the held-back terminal event is forwarded, so it is
//!    always the last event of the merged stream.
//! 5. **Done**: the report is returned to the caller.
//!
//! The coverage accumulator and the sink are only touched from the
//! orchestrator's own thread.

use crate::channel::{self, Completion, Multiplexer, Ready, WorkerChannel};
use crate::config::TestparConfig;
use crate::coverage::CodeCoverage;
use crate::engine::TestEngine;
use crate::error::{Error, Result};
use crate::event::{Event, EventBatch, EventSink, Payload};
use crate::partition::WorkerIdentity;
use crate::result_cache::ResultCache;
use crate::suite::SuiteBuilder;
use crate::worker::WorkerContext;
use std::fmt;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Phase of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Spawning,
    Merging,
    Draining,
    Finalizing,
    Done,
}

/// A worker that did not complete normally
#[derive(Debug)]
pub struct WorkerFailure {
    pub worker: usize,
    pub error: Error,
}

impl fmt::Display for WorkerFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "worker {}: {}", self.worker, self.error)
    }
}

/// What a finished run hands back besides the event stream
#[derive(Debug)]
pub struct RunReport {
    pub worker_count: usize,
    pub coverage: CodeCoverage,
    pub failures: Vec<WorkerFailure>,
    pub duration: Duration,
}

/// Owns the worker pool of one run
pub struct Orchestrator {
    config: TestparConfig,
    worker_count: usize,
    engine: Arc<dyn TestEngine>,
    builder: Arc<dyn SuiteBuilder>,
    result_cache: Arc<ResultCache>,
}

impl Orchestrator {
    pub fn new(
        config: TestparConfig,
        engine: Arc<dyn TestEngine>,
        builder: Arc<dyn SuiteBuilder>,
    ) -> Self {
        let worker_count = config.worker_count();
        Orchestrator {
            config,
            worker_count,
            engine,
            builder,
            result_cache: Arc::new(ResultCache::default()),
        }
    }

    /// Override the worker count taken from the configuration
    pub fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Hand workers a result cache snapshot
    pub fn with_result_cache(mut self, cache: Arc<ResultCache>) -> Self {
        self.result_cache = cache;
        self
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    fn preflight(&self) -> Result<()> {
        if self.worker_count == 0 {
            return Err(Error::Preflight(
                "worker count must be at least 1".to_string(),
            ));
        }
        self.engine.preflight()
    }

    /// Execute the run, forwarding the merged event stream to `sink`
    pub fn run(&self, sink: &mut dyn EventSink) -> Result<RunReport> {
        self.preflight()?;
        let started = Instant::now();

        let snapshot: Arc<str> = Arc::from(self.config.to_snapshot()?);
        let mut merger = Merger::new(sink, CodeCoverage::init(&self.config));

        enter(Phase::Spawning);
        info!(workers = self.worker_count, "starting workers");
        let mut channels = Vec::with_capacity(self.worker_count);
        let mut handles = Vec::with_capacity(self.worker_count);
        for worker_id in 0..self.worker_count {
            let (endpoint, channel) = channel::open(worker_id);
            let context = WorkerContext::new(
                WorkerIdentity::new(worker_id, self.worker_count),
                Arc::clone(&snapshot),
                Arc::clone(&self.engine),
                Arc::clone(&self.builder),
                Arc::clone(&self.result_cache),
            );
            handles.push(context.spawn(endpoint)?);
            channels.push(channel);
        }

        enter(Phase::Merging);
        merge(&channels, &mut merger)?;

        enter(Phase::Draining);
        drop(channels);
        join(handles);

        enter(Phase::Finalizing);
        let (coverage, failures) = merger.finalize()?;

        enter(Phase::Done);
        let duration = started.elapsed();
        info!(
            workers = self.worker_count,
            failures = failures.len(),
            elapsed_ms = duration.as_millis() as u64,
            "run finished"
        );

        Ok(RunReport {
            worker_count: self.worker_count,
            coverage,
            failures,
            duration,
        })
    }
}

fn enter(phase: Phase) {
    debug!(?phase, "orchestrator phase");
}

/// Multiplexed wait until every worker has completed
fn merge(channels: &[WorkerChannel], merger: &mut Merger<'_>) -> Result<()> {
    let mut pending = channels.len();
    let mut mux = Multiplexer::new(channels);

    while pending > 0 {
        match mux.next() {
            Some(Ready::Batch { batch, .. }) => merger.forward(batch)?,
            Some(Ready::Completed { worker, outcome }) => {
                pending -= 1;
                // A worker sends its last batch before completing
                for batch in channels[worker].drain() {
                    merger.forward(batch)?;
                }
                merger.complete(worker, outcome);
            }
            None => break,
        }
    }
    Ok(())
}

fn join(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        let name = handle.thread().name().unwrap_or("worker").to_string();
        if let Err(payload) = handle.join() {
            let message = payload
                .downcast_ref::<&str>()
                .map(|s| s.to_string())
                .or_else(|| payload.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "unknown panic".to_string());
            debug!(thread = %name, panic = %message, "worker thread panicked");
        }
    }
}

/// Orchestrator-side state of the merge loop
struct Merger<'s> {
    sink: &'s mut dyn EventSink,
    coverage: CodeCoverage,
    terminal: Option<Event>,
    failures: Vec<WorkerFailure>,
}

impl<'s> Merger<'s> {
    fn new(sink: &'s mut dyn EventSink, coverage: CodeCoverage) -> Self {
        Merger {
            sink,
            coverage,
            terminal: None,
            failures: Vec::new(),
        }
    }

    fn forward(&mut self, batch: EventBatch) -> Result<()> {
        let (rest, terminal) = batch.split_terminal();
        for event in terminal {
            if self.terminal.is_none() {
                self.terminal = Some(event);
            } else {
                warn!(worker = event.worker, "dropping duplicate terminal event");
            }
        }
        if rest.is_empty() {
            return Ok(());
        }
        self.sink.forward(&rest)
    }

    fn complete(&mut self, worker: usize, outcome: Completion) {
        let merged = outcome.and_then(|snapshot| match snapshot {
            Some(bytes) => {
                let coverage = CodeCoverage::from_snapshot(&bytes)?;
                self.coverage.merge(&coverage);
                Ok(())
            }
            None => Ok(()),
        });

        match merged {
            Ok(()) => debug!(worker, "worker completed"),
            Err(error) => {
                warn!(worker, error = %error, "worker failed");
                self.failures.push(WorkerFailure { worker, error });
            }
        }
    }

    /// Emit the terminal event last, synthesizing it when no worker sent one
    fn finalize(mut self) -> Result<(CodeCoverage, Vec<WorkerFailure>)> {
        let terminal = self
            .terminal
            .take()
            .unwrap_or_else(|| Event::new(0, Payload::RunnerExecutionFinished));
        self.sink.forward(&EventBatch::from(vec![terminal]))?;
        Ok((self.coverage, self.failures))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::{EventKind, Recorder};
    use crate::suite::TestId;

    fn passed(worker: usize, id: &str) -> Event {
        Event::new(worker, Payload::TestPassed { test: TestId::new(id) })
    }

    #[test]
    fn test_terminal_event_held_until_finalize() {
        let mut recorder = Recorder::default();
        {
            let mut merger = Merger::new(&mut recorder, CodeCoverage::default());
            merger
                .forward(EventBatch::from(vec![
                    Event::new(0, Payload::RunnerExecutionFinished),
                    Event::new(0, Payload::RunnerFinished),
                ]))
                .unwrap();
            merger
                .forward(EventBatch::from(vec![passed(1, "late")]))
                .unwrap();
            merger.finalize().unwrap();
        }

        let kinds: Vec<_> = recorder.events.iter().map(Event::kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::RunnerFinished,
                EventKind::TestPassed,
                EventKind::RunnerExecutionFinished,
            ]
        );
    }

    #[test]
    fn test_missing_terminal_event_is_synthesized() {
        let mut recorder = Recorder::default();
        Merger::new(&mut recorder, CodeCoverage::default())
            .finalize()
            .unwrap();
        assert_eq!(recorder.events.len(), 1);
        assert!(recorder.events[0].is_terminal());
    }

    #[test]
    fn test_failed_completion_is_recorded() {
        let mut recorder = Recorder::default();
        let mut merger = Merger::new(&mut recorder, CodeCoverage::default());
        merger.complete(2, Err(Error::WorkerPanicked(2)));
        merger.complete(1, Ok(Some(b"not json".to_vec())));
        let (_, failures) = merger.finalize().unwrap();
        assert_eq!(failures.len(), 2);
        assert_eq!(failures[0].worker, 2);
        assert!(matches!(failures[1].error, Error::Json(_)));
    }

    #[test]
    fn test_terminal_only_batch_forwards_nothing() {
        let mut recorder = Recorder::default();
        let mut merger = Merger::new(&mut recorder, CodeCoverage::default());
        merger
            .forward(EventBatch::from(vec![Event::new(
                0,
                Payload::RunnerExecutionFinished,
            )]))
            .unwrap();
        drop(merger);
        assert_eq!(recorder.batches, 0);
    }
}
