//! Run the test suite across parallel workers

use crate::commands::utils::load_config;
use crate::commands::Command;
use crate::engine::ShellEngine;
use crate::error::Result;
use crate::event::Fanout;
use crate::orchestrator::{Orchestrator, RunReport};
use crate::progress::ProgressSink;
use crate::result::{shell_exit_code, RunResult, ResultCollector};
use crate::result_cache::{ResultCache, ResultCacheHandler};
use crate::sorter::ExecutionOrder;
use crate::suite::ConfigSuiteBuilder;
use crate::ui::UI;
use console::style;
use regex::Regex;
use std::path::PathBuf;
use std::sync::Arc;

/// Command to execute the configured tests.
///
/// Options given here override the ones in .testpar.conf.
pub struct RunCommand {
    base_path: Option<String>,
    workers: Option<usize>,
    filter: Option<String>,
    order: Option<ExecutionOrder>,
    coverage_output: Option<PathBuf>,
    progress: bool,
}

impl RunCommand {
    pub fn new(base_path: Option<String>) -> Self {
        RunCommand {
            base_path,
            workers: None,
            filter: None,
            order: None,
            coverage_output: None,
            progress: false,
        }
    }

    pub fn with_workers(mut self, workers: Option<usize>) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_filter(mut self, filter: Option<String>) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_order(mut self, order: Option<ExecutionOrder>) -> Self {
        self.order = order;
        self
    }

    /// Collect coverage and write the merged report to `path`
    pub fn with_coverage_output(mut self, path: Option<PathBuf>) -> Self {
        self.coverage_output = path;
        self
    }

    pub fn with_progress(mut self, progress: bool) -> Self {
        self.progress = progress;
        self
    }

    fn summarize(&self, ui: &mut dyn UI, result: &RunResult, report: &RunReport) -> Result<()> {
        for (test, message) in &result.failures {
            ui.output(&format!("{} {}", style("FAIL:").red().bold(), test))?;
            for line in message.lines() {
                ui.output(&format!("  {}", line))?;
            }
        }
        for (test, message) in &result.errors {
            ui.output(&format!("{} {}", style("ERROR:").red().bold(), test))?;
            for line in message.lines() {
                ui.output(&format!("  {}", line))?;
            }
        }
        for suite in &result.skipped_suites {
            ui.output(&format!("{} suite {}", style("SKIP:").yellow(), suite))?;
        }

        ui.output(&format!(
            "\nRan {} tests with {} workers in {:.3}s",
            result.tests_run,
            report.worker_count,
            report.duration.as_secs_f64()
        ))?;
        ui.output(&format!("  Passed:  {}", result.passed))?;
        ui.output(&format!("  Failed:  {}", result.failures.len()))?;
        ui.output(&format!("  Errors:  {}", result.errors.len()))?;
        ui.output(&format!("  Skipped: {}", result.skipped))?;
        if report.coverage.is_active() {
            ui.output(&format!(
                "  Coverage: {} lines in {} files",
                report.coverage.line_count(),
                report.coverage.file_count()
            ))?;
        }

        for failure in &report.failures {
            ui.error(&failure.to_string())?;
        }

        let status = if result.was_successful() && report.failures.is_empty() {
            style("OK").green().bold()
        } else {
            style("FAILED").red().bold()
        };
        ui.output(&status.to_string())
    }
}

impl Command for RunCommand {
    fn execute(&self, ui: &mut dyn UI) -> Result<i32> {
        let mut config = load_config(self.base_path.as_deref())?;
        if let Some(filter) = &self.filter {
            config.filter = Some(filter.clone());
        }
        if let Some(order) = self.order {
            config.execution_order = order;
        }
        if self.coverage_output.is_some() {
            config.coverage = true;
        }
        // Workers compile the filter themselves; reject a bad one before they start
        if let Some(pattern) = &config.filter {
            Regex::new(pattern)?;
        }

        let cache_path = config.result_cache.as_deref().map(|p| config.resolve(p));
        let previous = match &cache_path {
            Some(path) => ResultCache::load(path)?,
            None => ResultCache::default(),
        };

        let mut orchestrator = Orchestrator::new(
            config.clone(),
            Arc::new(ShellEngine::new()),
            Arc::new(ConfigSuiteBuilder),
        )
        .with_result_cache(Arc::new(previous.clone()));
        if let Some(workers) = self.workers {
            orchestrator = orchestrator.with_worker_count(workers);
        }

        let mut collector = ResultCollector::new();
        let mut cache_handler = ResultCacheHandler::new(previous);
        let mut progress = if self.progress {
            ProgressSink::new()
        } else {
            ProgressSink::hidden()
        };

        let report = {
            let mut sinks = Fanout::new();
            sinks.register(&mut collector);
            sinks.register(&mut cache_handler);
            sinks.register(&mut progress);
            orchestrator.run(&mut sinks)?
        };
        drop(progress);

        let result = collector.into_result();
        self.summarize(ui, &result, &report)?;

        if let Some(path) = &cache_path {
            cache_handler.cache().save(path)?;
        }
        if let Some(path) = &self.coverage_output {
            report.coverage.write_json(path)?;
        }

        Ok(shell_exit_code(&config, &result, report.failures.len()))
    }

    fn name(&self) -> &str {
        "run"
    }

    fn help(&self) -> &str {
        "Run the configured tests across parallel workers"
    }
}
