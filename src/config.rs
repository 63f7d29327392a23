//! Configuration file (.testpar.conf) parsing and handling
//!
//! The .testpar.conf file uses INI format. The `[DEFAULT]` section holds runner
//! options, `[env]` holds environment variables for every test process, and
//! every other section declares a suite whose keys are test names and whose
//! values are the shell commands that run them. A section named `a::b` nests
//! suite `b` inside suite `a`.
//!
//! The parsed [`TestparConfig`] is a plain value: the orchestrator serializes
//! it once and each worker rebuilds its own copy from that snapshot.

use crate::error::{Error, Result};
use crate::sorter::ExecutionOrder;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the configuration file looked up in the base directory
pub const CONFIG_FILE: &str = ".testpar.conf";

/// Key inside a suite section holding the suite's requirement command
pub const REQUIRES_KEY: &str = "@requires";

/// Separator between nested suite names
pub const SUITE_SEPARATOR: &str = "::";

const DEFAULT_SECTION: &str = "DEFAULT";
const ENV_SECTION: &str = "env";

/// One suite section of the configuration file
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuiteConfig {
    /// Shell command that must succeed for the suite to run
    pub requires: Option<String>,

    /// Test name to shell command
    pub tests: BTreeMap<String, String>,
}

/// Configuration loaded from .testpar.conf
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestparConfig {
    /// Name of the root suite
    pub name: String,

    /// Directory tests run in; relative paths are resolved against it
    pub base_dir: PathBuf,

    /// Explicit worker count; detected from the machine when unset
    pub workers: Option<usize>,

    /// Script every worker runs once before executing tests
    pub bootstrap: Option<PathBuf>,

    /// Whether coverage is collected
    pub coverage: bool,

    /// File the result cache is loaded from and saved to
    pub result_cache: Option<PathBuf>,

    /// Order tests are executed in
    pub execution_order: ExecutionOrder,

    /// Regular expression test ids must match to run
    pub filter: Option<String>,

    /// Treat a run without tests as a failure
    pub fail_on_empty_suite: bool,

    /// Treat skipped tests as a failure
    pub fail_on_skipped: bool,

    /// Environment variables applied to every test process
    pub env: BTreeMap<String, String>,

    /// Suites keyed by their full `::`-separated name
    pub suites: BTreeMap<String, SuiteConfig>,
}

impl Default for TestparConfig {
    fn default() -> Self {
        TestparConfig {
            name: "testpar".to_string(),
            base_dir: PathBuf::from("."),
            workers: None,
            bootstrap: None,
            coverage: false,
            result_cache: None,
            execution_order: ExecutionOrder::Default,
            filter: None,
            fail_on_empty_suite: false,
            fail_on_skipped: false,
            env: BTreeMap::new(),
            suites: BTreeMap::new(),
        }
    }
}

impl TestparConfig {
    /// Load configuration from .testpar.conf in the given directory
    pub fn load_from_dir(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Err(Error::Config(format!("No {} file found", CONFIG_FILE)));
        }

        let mut config = Self::load_from_file(&config_path)?;
        config.base_dir = dir.to_path_buf();
        Ok(config)
    }

    /// Load configuration from a file
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", CONFIG_FILE, e)))?;

        Self::parse(&contents)
    }

    /// Parse configuration from a string
    pub fn parse(contents: &str) -> Result<Self> {
        let ini: HashMap<String, HashMap<String, String>> = serde_ini::from_str(contents)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", CONFIG_FILE, e)))?;

        let mut config = TestparConfig::default();

        for (section, values) in ini {
            match section.as_str() {
                DEFAULT_SECTION => config.apply_defaults(values)?,
                ENV_SECTION => config.env.extend(values),
                _ => {
                    validate_suite_name(&section)?;
                    let mut suite = SuiteConfig::default();
                    for (key, value) in values {
                        if key == REQUIRES_KEY {
                            suite.requires = Some(value);
                        } else {
                            suite.tests.insert(key, value);
                        }
                    }
                    config.suites.insert(section, suite);
                }
            }
        }

        if config.suites.is_empty() {
            return Err(Error::Config(format!(
                "No test suites defined in {}",
                CONFIG_FILE
            )));
        }

        Ok(config)
    }

    fn apply_defaults(&mut self, values: HashMap<String, String>) -> Result<()> {
        for (key, value) in values {
            match key.as_str() {
                "name" => self.name = value,
                "workers" => {
                    let workers = value.trim().parse::<usize>().map_err(|e| {
                        Error::Config(format!("Invalid workers value '{}': {}", value, e))
                    })?;
                    if workers == 0 {
                        return Err(Error::Config(
                            "workers must be greater than 0".to_string(),
                        ));
                    }
                    self.workers = Some(workers);
                }
                "bootstrap" => self.bootstrap = Some(PathBuf::from(value)),
                "coverage" => self.coverage = parse_bool(&key, &value)?,
                "result_cache" => self.result_cache = Some(PathBuf::from(value)),
                "execution_order" => self.execution_order = value.parse()?,
                "filter" => self.filter = Some(value),
                "fail_on_empty_suite" => self.fail_on_empty_suite = parse_bool(&key, &value)?,
                "fail_on_skipped" => self.fail_on_skipped = parse_bool(&key, &value)?,
                _ => {
                    return Err(Error::Config(format!(
                        "Unknown option '{}' in [{}]",
                        key, DEFAULT_SECTION
                    )))
                }
            }
        }
        Ok(())
    }

    /// Number of workers to run, never less than one
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(detect_worker_count).max(1)
    }

    /// Resolve a configured path against the base directory
    pub fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.base_dir.join(path)
        }
    }

    /// Serialize into the snapshot handed to every worker
    pub fn to_snapshot(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Rebuild a configuration from a worker snapshot
    pub fn from_snapshot(snapshot: &str) -> Result<Self> {
        Ok(serde_json::from_str(snapshot)?)
    }
}

/// Number of logical CPUs, clamped to at least one
pub fn detect_worker_count() -> usize {
    num_cpus::get().max(1)
}

fn parse_bool(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(Error::Config(format!(
            "Invalid boolean '{}' for option '{}'",
            other, key
        ))),
    }
}

fn validate_suite_name(name: &str) -> Result<()> {
    if name.split(SUITE_SEPARATOR).any(|part| part.trim().is_empty()) {
        return Err(Error::Config(format!("Invalid suite name '{}'", name)));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic_config() {
        let config_str = r#"
[unit]
test_add=./check add
"#;

        let config = TestparConfig::parse(config_str).unwrap();
        assert_eq!(config.name, "testpar");
        assert_eq!(config.suites.len(), 1);
        assert_eq!(config.suites["unit"].tests["test_add"], "./check add");
        assert!(config.suites["unit"].requires.is_none());
        assert!(!config.coverage);
    }

    #[test]
    fn test_parse_full_config() {
        let config_str = r#"
[DEFAULT]
name=project
workers=3
bootstrap=tests/bootstrap.sh
coverage=true
result_cache=.testpar.cache
execution_order=defects
filter=math
fail_on_empty_suite=yes

[env]
APP_ENV=testing

[unit::math]
@requires=command -v bc
test_add=./check add
"#;

        let config = TestparConfig::parse(config_str).unwrap();
        assert_eq!(config.name, "project");
        assert_eq!(config.workers, Some(3));
        assert_eq!(config.worker_count(), 3);
        assert_eq!(config.bootstrap, Some(PathBuf::from("tests/bootstrap.sh")));
        assert!(config.coverage);
        assert_eq!(config.result_cache, Some(PathBuf::from(".testpar.cache")));
        assert_eq!(config.execution_order, ExecutionOrder::Defects);
        assert_eq!(config.filter.as_deref(), Some("math"));
        assert!(config.fail_on_empty_suite);
        assert!(!config.fail_on_skipped);
        assert_eq!(config.env["APP_ENV"], "testing");
        let suite = &config.suites["unit::math"];
        assert_eq!(suite.requires.as_deref(), Some("command -v bc"));
        assert_eq!(suite.tests.len(), 1);
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config_str = "[DEFAULT]\nworkers=0\n[unit]\nt=true\n";
        let err = TestparConfig::parse(config_str).unwrap_err();
        assert!(err.to_string().contains("greater than 0"));
    }

    #[test]
    fn test_unknown_option_rejected() {
        let config_str = "[DEFAULT]\nparallel=4\n[unit]\nt=true\n";
        let err = TestparConfig::parse(config_str).unwrap_err();
        assert!(err.to_string().contains("parallel"));
    }

    #[test]
    fn test_missing_suites() {
        let result = TestparConfig::parse("[DEFAULT]\nworkers=2\n");
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("No test suites"));
    }

    #[test]
    fn test_invalid_suite_name() {
        let result = TestparConfig::parse("[unit::]\nt=true\n");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_worker_count_detected_when_unset() {
        let config = TestparConfig::default();
        assert!(config.worker_count() >= 1);
    }

    #[test]
    fn test_snapshot_restores_identical_config() {
        let config = TestparConfig::parse("[DEFAULT]\nworkers=2\n[unit]\nb=false\na=true\n").unwrap();
        let snapshot = config.to_snapshot().unwrap();
        assert_eq!(TestparConfig::from_snapshot(&snapshot).unwrap(), config);
    }

    #[test]
    fn test_resolve_relative_path() {
        let config = TestparConfig {
            base_dir: PathBuf::from("/work"),
            ..Default::default()
        };
        assert_eq!(
            config.resolve(Path::new("boot.sh")),
            PathBuf::from("/work/boot.sh")
        );
        assert_eq!(
            config.resolve(Path::new("/abs/boot.sh")),
            PathBuf::from("/abs/boot.sh")
        );
    }
}
