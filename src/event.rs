//! Events emitted during a run
//!
//! Workers emit [`Event`]s in local emission order and ship them to the
//! orchestrator in [`EventBatch`]es. The orchestrator forwards the merged
//! stream to an [`EventSink`].

use crate::error::Result;
use crate::sorter::ExecutionOrder;
use crate::suite::TestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Kind tag of an event, used to classify it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventKind {
    ApplicationStarted,
    ApplicationFinished,
    SuiteLoaded,
    SuiteFiltered,
    SuiteSorted,
    SuiteStarted,
    SuiteSkipped,
    SuiteFinished,
    RunnerConfigured,
    RunnerBootstrapFinished,
    RunnerExtensionLoaded,
    RunnerExtensionBootstrapped,
    RunnerEventsSealed,
    RunnerStarted,
    RunnerExecutionStarted,
    RunnerExecutionFinished,
    RunnerFinished,
    TestPrepared,
    TestPassed,
    TestFailed,
    TestErrored,
    TestSkipped,
    TestFinished,
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// What happened
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    ApplicationStarted,
    ApplicationFinished,
    SuiteLoaded { suite: String, test_count: usize },
    SuiteFiltered { suite: String, test_count: usize },
    SuiteSorted { order: ExecutionOrder },
    SuiteStarted { suite: String, test_count: usize },
    SuiteSkipped { suite: String, message: String },
    SuiteFinished { suite: String },
    RunnerConfigured,
    RunnerBootstrapFinished { path: PathBuf },
    RunnerExtensionLoaded { name: String },
    RunnerExtensionBootstrapped { name: String },
    /// No more sinks will be registered for this run
    RunnerEventsSealed,
    RunnerStarted,
    RunnerExecutionStarted { test_count: usize },
    RunnerExecutionFinished,
    RunnerFinished,
    TestPrepared { test: TestId },
    TestPassed { test: TestId },
    TestFailed { test: TestId, message: String },
    TestErrored { test: TestId, message: String },
    TestSkipped { test: TestId, message: String },
    TestFinished { test: TestId, duration: Duration },
}

impl Payload {
    pub fn kind(&self) -> EventKind {
        match self {
            Payload::ApplicationStarted => EventKind::ApplicationStarted,
            Payload::ApplicationFinished => EventKind::ApplicationFinished,
            Payload::SuiteLoaded { .. } => EventKind::SuiteLoaded,
            Payload::SuiteFiltered { .. } => EventKind::SuiteFiltered,
            Payload::SuiteSorted { .. } => EventKind::SuiteSorted,
            Payload::SuiteStarted { .. } => EventKind::SuiteStarted,
            Payload::SuiteSkipped { .. } => EventKind::SuiteSkipped,
            Payload::SuiteFinished { .. } => EventKind::SuiteFinished,
            Payload::RunnerConfigured => EventKind::RunnerConfigured,
            Payload::RunnerBootstrapFinished { .. } => EventKind::RunnerBootstrapFinished,
            Payload::RunnerExtensionLoaded { .. } => EventKind::RunnerExtensionLoaded,
            Payload::RunnerExtensionBootstrapped { .. } => EventKind::RunnerExtensionBootstrapped,
            Payload::RunnerEventsSealed => EventKind::RunnerEventsSealed,
            Payload::RunnerStarted => EventKind::RunnerStarted,
            Payload::RunnerExecutionStarted { .. } => EventKind::RunnerExecutionStarted,
            Payload::RunnerExecutionFinished => EventKind::RunnerExecutionFinished,
            Payload::RunnerFinished => EventKind::RunnerFinished,
            Payload::TestPrepared { .. } => EventKind::TestPrepared,
            Payload::TestPassed { .. } => EventKind::TestPassed,
            Payload::TestFailed { .. } => EventKind::TestFailed,
            Payload::TestErrored { .. } => EventKind::TestErrored,
            Payload::TestSkipped { .. } => EventKind::TestSkipped,
            Payload::TestFinished { .. } => EventKind::TestFinished,
        }
    }
}

/// A single event, stamped with the worker that emitted it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub worker: usize,
    pub time: DateTime<Utc>,
    pub payload: Payload,
}

impl Event {
    pub fn new(worker: usize, payload: Payload) -> Self {
        Event {
            worker,
            time: Utc::now(),
            payload,
        }
    }

    pub fn kind(&self) -> EventKind {
        self.payload.kind()
    }

    /// Whether this is the run's terminal "execution finished" event
    pub fn is_terminal(&self) -> bool {
        self.kind() == EventKind::RunnerExecutionFinished
    }
}

/// Events sent over a channel as one unit
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventBatch(Vec<Event>);

impl EventBatch {
    pub fn new() -> Self {
        EventBatch(Vec::new())
    }

    pub fn push(&mut self, event: Event) {
        self.0.push(event);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Event> {
        self.0.iter()
    }

    /// Move all events out, leaving the batch empty
    pub fn take(&mut self) -> EventBatch {
        EventBatch(std::mem::take(&mut self.0))
    }

    /// Split off terminal events, keeping everything else in order
    pub fn split_terminal(self) -> (EventBatch, Vec<Event>) {
        let (terminal, rest): (Vec<_>, Vec<_>) =
            self.0.into_iter().partition(Event::is_terminal);
        (EventBatch(rest), terminal)
    }
}

impl From<Vec<Event>> for EventBatch {
    fn from(events: Vec<Event>) -> Self {
        EventBatch(events)
    }
}

impl IntoIterator for EventBatch {
    type Item = Event;
    type IntoIter = std::vec::IntoIter<Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a EventBatch {
    type Item = &'a Event;
    type IntoIter = std::slice::Iter<'a, Event>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Consumer of the merged event stream (loggers, printers, result collectors)
pub trait EventSink {
    fn forward(&mut self, batch: &EventBatch) -> Result<()>;
}

impl<S: EventSink + ?Sized> EventSink for &mut S {
    fn forward(&mut self, batch: &EventBatch) -> Result<()> {
        (**self).forward(batch)
    }
}

/// Forwards every batch to each registered sink in registration order
#[derive(Default)]
pub struct Fanout<'a> {
    sinks: Vec<&'a mut dyn EventSink>,
}

impl<'a> Fanout<'a> {
    pub fn new() -> Self {
        Fanout { sinks: Vec::new() }
    }

    pub fn register(&mut self, sink: &'a mut dyn EventSink) {
        self.sinks.push(sink);
    }
}

impl EventSink for Fanout<'_> {
    fn forward(&mut self, batch: &EventBatch) -> Result<()> {
        for sink in self.sinks.iter_mut() {
            sink.forward(batch)?;
        }
        Ok(())
    }
}

/// Keeps every forwarded event, in order
#[derive(Debug, Default)]
pub struct Recorder {
    pub events: Vec<Event>,
    pub batches: usize,
}

impl EventSink for Recorder {
    fn forward(&mut self, batch: &EventBatch) -> Result<()> {
        self.batches += 1;
        self.events.extend(batch.iter().cloned());
        Ok(())
    }
}
