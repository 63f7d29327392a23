//! Per-worker event dispatch policy
//!
//! Each event kind maps to one [`Dispatch`] class. Some kinds only make sense
//! once for the whole run and are either dropped everywhere or forwarded by
//! the primary worker alone. Kinds that mark visible progress flush the
//! worker's pending batch to the orchestrator right away.

use crate::channel::EventSender;
use crate::error::Result;
use crate::event::{Event, EventBatch, EventKind, Payload};
use crate::partition::WorkerIdentity;
use tracing::trace;

/// How a worker treats an event of a given kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Never leaves the worker
    Suppressed,
    /// Forwarded by worker 0 only, optionally flushing
    PrimaryOnly { flush: bool },
    /// Forwarded by every worker and flushed immediately
    Flush,
    /// Forwarded by every worker with the next flush
    Normal,
}

impl Dispatch {
    pub fn of(kind: EventKind) -> Self {
        match kind {
            EventKind::ApplicationStarted
            | EventKind::ApplicationFinished
            | EventKind::SuiteLoaded
            | EventKind::RunnerConfigured
            | EventKind::RunnerBootstrapFinished
            | EventKind::RunnerExtensionLoaded
            | EventKind::RunnerExtensionBootstrapped
            | EventKind::RunnerEventsSealed => Dispatch::Suppressed,

            EventKind::SuiteFinished
            | EventKind::RunnerExecutionStarted
            | EventKind::RunnerFinished => Dispatch::PrimaryOnly { flush: true },

            EventKind::SuiteFiltered
            | EventKind::SuiteSorted
            | EventKind::SuiteStarted
            | EventKind::SuiteSkipped
            | EventKind::RunnerStarted
            | EventKind::RunnerExecutionFinished => Dispatch::PrimaryOnly { flush: false },

            EventKind::TestFinished => Dispatch::Flush,

            EventKind::TestPrepared
            | EventKind::TestPassed
            | EventKind::TestFailed
            | EventKind::TestErrored
            | EventKind::TestSkipped => Dispatch::Normal,
        }
    }

    /// Whether a worker with this identity forwards the event at all
    pub fn forwards(&self, identity: &WorkerIdentity) -> bool {
        match self {
            Dispatch::Suppressed => false,
            Dispatch::PrimaryOnly { .. } => identity.is_primary(),
            Dispatch::Flush | Dispatch::Normal => true,
        }
    }

    pub fn flushes(&self) -> bool {
        matches!(self, Dispatch::Flush | Dispatch::PrimaryOnly { flush: true })
    }
}

/// The sole event sink inside a worker
///
/// Collects forwarded events into a pending batch and sends it over the
/// worker's channel whenever a flush-triggering event arrives.
pub struct ParallelDispatcher {
    identity: WorkerIdentity,
    sender: EventSender,
    pending: EventBatch,
}

impl ParallelDispatcher {
    pub fn new(identity: WorkerIdentity, sender: EventSender) -> Self {
        ParallelDispatcher {
            identity,
            sender,
            pending: EventBatch::new(),
        }
    }

    pub fn identity(&self) -> WorkerIdentity {
        self.identity
    }

    /// Stamp and dispatch a payload
    pub fn emit(&mut self, payload: Payload) -> Result<()> {
        self.dispatch(Event::new(self.identity.worker_id(), payload))
    }

    pub fn dispatch(&mut self, event: Event) -> Result<()> {
        let class = Dispatch::of(event.kind());
        if !class.forwards(&self.identity) {
            return Ok(());
        }

        self.pending.push(event);

        if class.flushes() {
            self.flush()?;
        }
        Ok(())
    }

    /// Send the pending batch, if any
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            return Ok(());
        }
        let batch = self.pending.take();
        trace!(
            worker = self.identity.worker_id(),
            events = batch.len(),
            "flushing event batch"
        );
        self.sender.send(batch)
    }
}
