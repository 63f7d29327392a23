//! testpar - Run a test suite across parallel workers
//!
//! testpar splits one test tree between several workers and merges what they
//! report back into a single ordered event stream, so result printers and
//! collectors see one run instead of many.
//!
//! # Architecture
//!
//! - [`orchestrator`]: spawns the workers and merges their event batches,
//!   completion signals and coverage
//! - [`worker`]: per-worker execution context, rebuilt from a configuration
//!   snapshot
//! - [`partition`]: deterministic round-robin split of the test leaves
//! - [`dispatch`]: which events a worker forwards, and when it flushes
//! - [`channel`]: event channel and completion signal of each worker, plus the
//!   multiplexed wait over all of them
//! - [`event`]: events, batches and the [`event::EventSink`] consumer seam
//! - [`suite`], [`sorter`]: the test tree, name filtering and execution order
//! - [`engine`]: the [`engine::TestEngine`] trait and the shell implementation
//! - [`coverage`], [`result`], [`result_cache`], [`progress`]: consumers and
//!   aggregates of a run
//! - [`config`]: `.testpar.conf` parsing
//! - [`commands`], [`ui`]: the command-line surface
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use testpar::config::TestparConfig;
//! use testpar::engine::ShellEngine;
//! use testpar::orchestrator::Orchestrator;
//! use testpar::result::ResultCollector;
//! use testpar::suite::ConfigSuiteBuilder;
//! use std::path::Path;
//!
//! # fn main() -> testpar::error::Result<()> {
//! let config = TestparConfig::load_from_dir(Path::new("."))?;
//! let orchestrator = Orchestrator::new(
//!     config,
//!     Arc::new(ShellEngine::new()),
//!     Arc::new(ConfigSuiteBuilder),
//! )
//! .with_worker_count(4);
//!
//! let mut collector = ResultCollector::new();
//! let report = orchestrator.run(&mut collector)?;
//! println!(
//!     "{} tests, {} worker failures",
//!     collector.result().tests_run,
//!     report.failures.len()
//! );
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod commands;
pub mod config;
pub mod coverage;
pub mod dispatch;
pub mod engine;
pub mod error;
pub mod event;
pub mod logging;
pub mod orchestrator;
pub mod partition;
pub mod progress;
pub mod result;
pub mod result_cache;
pub mod runner;
pub mod sorter;
pub mod suite;
pub mod ui;
pub mod worker;

pub use error::{Error, Result};
