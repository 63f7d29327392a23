//! Progress bar driven by the merged event stream

use crate::error::Result;
use crate::event::{EventBatch, EventSink, Payload};
use indicatif::{ProgressBar, ProgressStyle};

/// Shows one tick per finished test
pub struct ProgressSink {
    bar: ProgressBar,
}

impl ProgressSink {
    /// Progress bar drawn on stderr
    pub fn new() -> Self {
        let bar = ProgressBar::new(0);
        let style = ProgressStyle::default_bar()
            .template("[{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
            .map(|style| style.progress_chars("#>-"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        bar.set_style(style);
        ProgressSink { bar }
    }

    /// A sink that tracks progress without drawing anything
    pub fn hidden() -> Self {
        ProgressSink {
            bar: ProgressBar::hidden(),
        }
    }

    pub fn position(&self) -> u64 {
        self.bar.position()
    }

    pub fn length(&self) -> Option<u64> {
        self.bar.length()
    }

    pub fn is_finished(&self) -> bool {
        self.bar.is_finished()
    }

    /// Run `f` with the bar hidden so regular output does not tear it
    pub fn suspend<F: FnOnce() -> R, R>(&self, f: F) -> R {
        self.bar.suspend(f)
    }
}

impl Default for ProgressSink {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for ProgressSink {
    fn forward(&mut self, batch: &EventBatch) -> Result<()> {
        for event in batch {
            match &event.payload {
                Payload::RunnerExecutionStarted { test_count } => {
                    self.bar.set_length(*test_count as u64);
                }
                Payload::TestFinished { test, .. } => {
                    self.bar.set_message(test.to_string());
                    self.bar.inc(1);
                }
                Payload::RunnerExecutionFinished => {
                    self.bar.finish_and_clear();
                }
                _ => {}
            }
        }
        Ok(())
    }
}

impl Drop for ProgressSink {
    fn drop(&mut self) {
        if !self.bar.is_finished() {
            self.bar.abandon();
        }
    }
}
