//! Transport between workers and the orchestrator
//!
//! Every worker owns a [`WorkerEndpoint`]: an event sender for its batches and
//! a one-shot completion signal carrying the worker's outcome (an optional
//! serialized coverage snapshot). The orchestrator keeps the matching
//! [`WorkerChannel`] and waits on all of them at once through a
//! [`Multiplexer`].
//!
//! Event channels are unbounded so that a worker never blocks on a slow
//! orchestrator; batches are only produced at flush points, which keeps the
//! queue short in practice. Batches of one channel arrive in send order.

use crate::error::{Error, Result};
use crate::event::EventBatch;
use crossbeam_channel::{bounded, unbounded, Receiver, Select, Sender};
use tracing::debug;

/// Serialized coverage accumulator returned by a worker
pub type CoverageSnapshot = Vec<u8>;

/// What a worker reports when it finishes
pub type Completion = Result<Option<CoverageSnapshot>>;

/// Worker side of the event channel
#[derive(Debug, Clone)]
pub struct EventSender {
    worker: usize,
    tx: Sender<EventBatch>,
}

impl EventSender {
    pub fn send(&self, batch: EventBatch) -> Result<()> {
        self.tx
            .send(batch)
            .map_err(|_| Error::ChannelClosed(self.worker))
    }
}

/// Worker side of the completion signal; consumed when fired
#[derive(Debug)]
pub struct CompletionSender {
    worker: usize,
    tx: Sender<Completion>,
}

impl CompletionSender {
    pub fn complete(self, outcome: Completion) {
        if self.tx.send(outcome).is_err() {
            debug!(worker = self.worker, "orchestrator gone before completion");
        }
    }
}

/// Everything a worker needs to talk to the orchestrator
#[derive(Debug)]
pub struct WorkerEndpoint {
    pub events: EventSender,
    pub completion: CompletionSender,
}

/// Orchestrator side of one worker's channels
#[derive(Debug)]
pub struct WorkerChannel {
    pub worker: usize,
    pub events: Receiver<EventBatch>,
    pub completion: Receiver<Completion>,
}

impl WorkerChannel {
    /// Batches already queued, without blocking
    pub fn drain(&self) -> impl Iterator<Item = EventBatch> + '_ {
        self.events.try_iter()
    }
}

/// Create the channel pair for one worker
pub fn open(worker: usize) -> (WorkerEndpoint, WorkerChannel) {
    let (event_tx, event_rx) = unbounded();
    let (completion_tx, completion_rx) = bounded(1);

    let endpoint = WorkerEndpoint {
        events: EventSender {
            worker,
            tx: event_tx,
        },
        completion: CompletionSender {
            worker,
            tx: completion_tx,
        },
    };
    let channel = WorkerChannel {
        worker,
        events: event_rx,
        completion: completion_rx,
    };
    (endpoint, channel)
}

/// One readiness notification from the multiplexed wait
#[derive(Debug)]
pub enum Ready {
    Batch { worker: usize, batch: EventBatch },
    Completed { worker: usize, outcome: Completion },
}

#[derive(Debug, Clone, Copy)]
enum Source {
    Events(usize),
    Completion(usize),
}

/// Blocking wait across every event channel and completion signal
pub struct Multiplexer<'a> {
    select: Select<'a>,
    channels: &'a [WorkerChannel],
    sources: Vec<Source>,
    live: usize,
}

impl<'a> Multiplexer<'a> {
    pub fn new(channels: &'a [WorkerChannel]) -> Self {
        let mut select = Select::new();
        let mut sources = Vec::with_capacity(channels.len() * 2);

        for (slot, channel) in channels.iter().enumerate() {
            select.recv(&channel.events);
            sources.push(Source::Events(slot));
            select.recv(&channel.completion);
            sources.push(Source::Completion(slot));
        }

        let live = sources.len();
        Multiplexer {
            select,
            channels,
            sources,
            live,
        }
    }

    /// Block until a batch or a completion is ready
    ///
    /// Event channels stay registered until their worker hangs up. A worker
    /// whose completion sender is dropped without firing (its thread
    /// panicked) is reported as completed with [`Error::WorkerPanicked`].
    /// Returns `None` once every source is exhausted.
    pub fn next(&mut self) -> Option<Ready> {
        while self.live > 0 {
            let oper = self.select.select();
            let index = oper.index();

            match self.sources[index] {
                Source::Events(slot) => {
                    let channel = &self.channels[slot];
                    match oper.recv(&channel.events) {
                        Ok(batch) => {
                            return Some(Ready::Batch {
                                worker: channel.worker,
                                batch,
                            })
                        }
                        Err(_) => {
                            self.select.remove(index);
                            self.live -= 1;
                        }
                    }
                }
                Source::Completion(slot) => {
                    let channel = &self.channels[slot];
                    let outcome = oper
                        .recv(&channel.completion)
                        .unwrap_or(Err(Error::WorkerPanicked(channel.worker)));
                    self.select.remove(index);
                    self.live -= 1;
                    return Some(Ready::Completed {
                        worker: channel.worker,
                        outcome,
                    });
                }
            }
        }
        None
    }
}
