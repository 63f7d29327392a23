//! Worker execution context
//!
//! A worker runs on its own thread. It rebuilds everything it needs from the
//! configuration snapshot: environment, bootstrap, test tree, ordering and
//! coverage. It then runs its partition of the tree with the
//! [`ParallelDispatcher`] as its only event sink. Nothing mutable is shared
//! with other workers.

use crate::channel::{Completion, CoverageSnapshot, WorkerEndpoint};
use crate::config::TestparConfig;
use crate::coverage::CodeCoverage;
use crate::dispatch::ParallelDispatcher;
use crate::engine::{TestEngine, TestEnvironment};
use crate::error::{Error, Result};
use crate::event::Payload;
use crate::partition::{Partitioner, WorkerIdentity};
use crate::result_cache::ResultCache;
use crate::runner::SuiteRunner;
use crate::sorter::{self, ExecutionOrder};
use crate::suite::{self, SuiteBuilder};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::debug;

/// Everything one worker needs, moved onto its thread at spawn
pub struct WorkerContext {
    identity: WorkerIdentity,
    snapshot: Arc<str>,
    engine: Arc<dyn TestEngine>,
    builder: Arc<dyn SuiteBuilder>,
    result_cache: Arc<ResultCache>,
}

impl WorkerContext {
    pub fn new(
        identity: WorkerIdentity,
        snapshot: Arc<str>,
        engine: Arc<dyn TestEngine>,
        builder: Arc<dyn SuiteBuilder>,
        result_cache: Arc<ResultCache>,
    ) -> Self {
        WorkerContext {
            identity,
            snapshot,
            engine,
            builder,
            result_cache,
        }
    }

    /// Start the worker on a dedicated thread
    ///
    /// The completion signal fires once the worker is done, after its last
    /// event batch has been sent.
    pub fn spawn(self, endpoint: WorkerEndpoint) -> Result<JoinHandle<()>> {
        let worker_id = self.identity.worker_id();
        thread::Builder::new()
            .name(format!("testpar-worker-{}", worker_id))
            .spawn(move || {
                let WorkerEndpoint { events, completion } = endpoint;
                let mut dispatcher = ParallelDispatcher::new(self.identity, events);
                let outcome = self.run(&mut dispatcher);
                drop(dispatcher);
                completion.complete(outcome);
            })
            .map_err(|e| {
                Error::Other(format!("Failed to spawn worker {}: {}", worker_id, e))
            })
    }

    /// Run the partition to completion, returning the coverage snapshot
    pub fn run(&self, dispatcher: &mut ParallelDispatcher) -> Completion {
        let worker_id = self.identity.worker_id();
        debug!(worker = worker_id, "worker starting");

        let outcome = self.execute(dispatcher);

        // Whatever was emitted before a failure is still delivered
        let flushed = dispatcher.flush();
        match (&outcome, flushed) {
            (Ok(_), Err(e)) => return Err(e),
            (Err(e), _) => debug!(worker = worker_id, error = %e, "worker stopped early"),
            _ => debug!(worker = worker_id, "worker finished"),
        }
        outcome
    }

    fn execute(&self, dispatcher: &mut ParallelDispatcher) -> Result<Option<CoverageSnapshot>> {
        dispatcher.emit(Payload::ApplicationStarted)?;

        let config = TestparConfig::from_snapshot(&self.snapshot)?;
        dispatcher.emit(Payload::RunnerConfigured)?;

        let env = TestEnvironment::for_worker(&config, self.identity);

        if let Some(script) = &config.bootstrap {
            let path = config.resolve(script);
            self.engine.bootstrap(&path, &env)?;
            dispatcher.emit(Payload::RunnerBootstrapFinished { path })?;
        }
        dispatcher.emit(Payload::RunnerEventsSealed)?;

        let mut tree = self.builder.build(&config)?;
        dispatcher.emit(Payload::SuiteLoaded {
            suite: tree.name.clone(),
            test_count: tree.count(),
        })?;

        if let Some(pattern) = &config.filter {
            suite::filter_by_name(&mut tree, pattern)?;
            dispatcher.emit(Payload::SuiteFiltered {
                suite: tree.name.clone(),
                test_count: tree.count(),
            })?;
        }

        if config.execution_order != ExecutionOrder::Default {
            sorter::sort(&mut tree, config.execution_order, &self.result_cache);
            dispatcher.emit(Payload::SuiteSorted {
                order: config.execution_order,
            })?;
        }

        let mut coverage = CodeCoverage::init(&config);
        let mut partitioner = Partitioner::new(self.identity);

        dispatcher.emit(Payload::RunnerStarted)?;
        dispatcher.emit(Payload::RunnerExecutionStarted {
            test_count: tree.count(),
        })?;

        SuiteRunner::new(
            &*self.engine,
            &mut partitioner,
            dispatcher,
            &env,
            &mut coverage,
        )
        .run(&tree)?;

        dispatcher.emit(Payload::RunnerExecutionFinished)?;
        dispatcher.emit(Payload::RunnerFinished)?;
        dispatcher.emit(Payload::ApplicationFinished)?;

        debug!(
            worker = self.identity.worker_id(),
            visited = partitioner.visited(),
            "partition complete"
        );

        if !coverage.is_active() || coverage.file_count() == 0 {
            return Ok(None);
        }
        Ok(Some(coverage.snapshot()?))
    }
}
