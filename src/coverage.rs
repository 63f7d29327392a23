//! Code coverage accumulation
//!
//! Coverage is a set of covered lines per file. Merging is set union, so it
//! is associative, commutative and idempotent: workers can report in any
//! order and the aggregate comes out the same.

use crate::config::TestparConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::Path;

/// Covered lines, keyed by file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeCoverage {
    #[serde(skip)]
    active: bool,
    files: BTreeMap<String, BTreeSet<u32>>,
}

impl CodeCoverage {
    /// Create an accumulator, active when the configuration asks for coverage
    pub fn init(config: &TestparConfig) -> Self {
        CodeCoverage {
            active: config.coverage,
            files: BTreeMap::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn record(&mut self, file: impl Into<String>, line: u32) {
        self.files.entry(file.into()).or_default().insert(line);
    }

    /// Union `other` into this accumulator
    pub fn merge(&mut self, other: &CodeCoverage) {
        for (file, lines) in &other.files {
            self.files
                .entry(file.clone())
                .or_default()
                .extend(lines.iter().copied());
        }
    }

    pub fn file_count(&self) -> usize {
        self.files.len()
    }

    pub fn line_count(&self) -> usize {
        self.files.values().map(BTreeSet::len).sum()
    }

    pub fn is_covered(&self, file: &str, line: u32) -> bool {
        self.files.get(file).is_some_and(|lines| lines.contains(&line))
    }

    /// Record a report of `path:line[,line...]` lines
    ///
    /// Blank lines are ignored; anything else that does not parse is an error.
    pub fn record_report(&mut self, report: &str) -> Result<()> {
        for raw in report.lines() {
            let line = raw.trim();
            if line.is_empty() {
                continue;
            }
            let (file, numbers) = line
                .rsplit_once(':')
                .ok_or_else(|| Error::Coverage(format!("Malformed coverage line '{}'", line)))?;
            for number in numbers.split(',') {
                let number = number.trim().parse::<u32>().map_err(|e| {
                    Error::Coverage(format!("Malformed coverage line '{}': {}", line, e))
                })?;
                self.record(file, number);
            }
        }
        Ok(())
    }

    /// Serialize for transfer from a worker
    pub fn snapshot(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Rebuild an active accumulator from a worker snapshot
    pub fn from_snapshot(bytes: &[u8]) -> Result<Self> {
        let mut coverage: CodeCoverage = serde_json::from_slice(bytes)?;
        coverage.active = true;
        Ok(coverage)
    }

    /// Write the aggregate as JSON
    pub fn write_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(&self.files)?;
        fs::write(path, json)?;
        Ok(())
    }
}
