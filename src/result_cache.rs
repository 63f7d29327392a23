//! Result cache of the previous run
//!
//! Workers receive the cache loaded at the start of the run as a shared,
//! read-only snapshot (it drives `defects` and `duration` ordering). The
//! orchestrator records the merged stream into a separate copy through
//! [`ResultCacheHandler`], which the run command saves at the end.

use crate::error::{Error, Result};
use crate::event::{EventBatch, EventSink, Payload};
use crate::result::TestStatus;
use crate::suite::TestId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

/// What is remembered about one test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedResult {
    pub status: Option<TestStatus>,
    pub duration_ms: Option<u64>,
}

/// Last known status and duration per test
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultCache {
    tests: BTreeMap<TestId, CachedResult>,
}

impl ResultCache {
    /// Load a cache file; a missing file is an empty cache
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = fs::read_to_string(path)?;
        serde_json::from_str(&contents).map_err(|e| {
            Error::Config(format!(
                "Invalid result cache {}: {}",
                path.display(),
                e
            ))
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        fs::write(path, json)?;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.tests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tests.is_empty()
    }

    pub fn status(&self, test: &TestId) -> Option<TestStatus> {
        self.tests.get(test).and_then(|cached| cached.status)
    }

    /// Whether the test failed or errored last time
    pub fn is_defect(&self, test: &TestId) -> bool {
        self.status(test).is_some_and(|status| status.is_failure())
    }

    pub fn duration(&self, test: &TestId) -> Option<Duration> {
        self.tests
            .get(test)
            .and_then(|cached| cached.duration_ms)
            .map(Duration::from_millis)
    }

    pub fn record_status(&mut self, test: TestId, status: TestStatus) {
        self.tests.entry(test).or_default().status = Some(status);
    }

    pub fn record_duration(&mut self, test: TestId, duration: Duration) {
        let millis = u64::try_from(duration.as_millis()).unwrap_or(u64::MAX);
        self.tests.entry(test).or_default().duration_ms = Some(millis);
    }
}

/// Records the merged event stream into a result cache
#[derive(Debug, Default)]
pub struct ResultCacheHandler {
    cache: ResultCache,
}

impl ResultCacheHandler {
    /// Start from a previous cache so tests that did not run keep their entries
    pub fn new(previous: ResultCache) -> Self {
        ResultCacheHandler { cache: previous }
    }

    pub fn cache(&self) -> &ResultCache {
        &self.cache
    }

    pub fn into_cache(self) -> ResultCache {
        self.cache
    }
}

impl EventSink for ResultCacheHandler {
    fn forward(&mut self, batch: &EventBatch) -> Result<()> {
        for event in batch {
            match &event.payload {
                Payload::TestPassed { test } => {
                    self.cache.record_status(test.clone(), TestStatus::Success)
                }
                Payload::TestFailed { test, .. } => {
                    self.cache.record_status(test.clone(), TestStatus::Failure)
                }
                Payload::TestErrored { test, .. } => {
                    self.cache.record_status(test.clone(), TestStatus::Error)
                }
                Payload::TestSkipped { test, .. } => {
                    self.cache.record_status(test.clone(), TestStatus::Skip)
                }
                Payload::TestFinished { test, duration } => {
                    self.cache.record_duration(test.clone(), *duration)
                }
                _ => {}
            }
        }
        Ok(())
    }
}
