//! Test execution engine
//!
//! A [`TestEngine`] executes single test cases inside one worker. Traversal,
//! partitioning and event emission are handled by the worker; the engine only
//! knows how to run a leaf and report its [`Outcome`].

use crate::config::TestparConfig;
use crate::coverage::CodeCoverage;
use crate::error::{Error, Result};
use crate::partition::WorkerIdentity;
use crate::suite::TestCase;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tempfile::NamedTempFile;

/// Exit status a test command uses to report itself as skipped
pub const SKIP_EXIT_CODE: i32 = 77;

/// Variable holding the worker id inside test processes
pub const WORKER_ID_ENV: &str = "TESTPAR_WORKER_ID";

/// Variable holding the worker count inside test processes
pub const WORKER_COUNT_ENV: &str = "TESTPAR_WORKER_COUNT";

/// Variable naming the file a test writes its coverage report to
pub const COVERAGE_FILE_ENV: &str = "TESTPAR_COVERAGE_FILE";

/// Process environment shared by everything a worker runs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TestEnvironment {
    pub base_dir: PathBuf,
    pub vars: Vec<(String, String)>,
}

impl TestEnvironment {
    /// Environment for one worker: configured variables plus its identity
    pub fn for_worker(config: &TestparConfig, identity: WorkerIdentity) -> Self {
        let mut vars: Vec<(String, String)> = config
            .env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        vars.push((WORKER_ID_ENV.to_string(), identity.worker_id().to_string()));
        vars.push((
            WORKER_COUNT_ENV.to_string(),
            identity.worker_count().to_string(),
        ));
        TestEnvironment {
            base_dir: config.base_dir.clone(),
            vars,
        }
    }
}

/// Result of executing one test case
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Passed,
    Failed(String),
    Errored(String),
    Skipped(String),
}

/// Executes test cases for a worker
///
/// Implementations are shared by all workers of a run and must not keep
/// per-run mutable state.
pub trait TestEngine: Send + Sync {
    /// Check that the engine can run at all, before any worker starts
    fn preflight(&self) -> Result<()> {
        Ok(())
    }

    /// Run the bootstrap script once in a worker
    fn bootstrap(&self, script: &Path, env: &TestEnvironment) -> Result<()>;

    /// Whether a suite's requirement command holds
    fn requirement_met(&self, command: &str, env: &TestEnvironment) -> bool;

    /// Execute one test case, recording coverage when the accumulator is active
    fn execute(
        &self,
        case: &TestCase,
        env: &TestEnvironment,
        coverage: &mut CodeCoverage,
    ) -> Result<Outcome>;
}

/// Runs every test case as a shell command
#[derive(Debug, Clone)]
pub struct ShellEngine {
    shell: PathBuf,
}

impl Default for ShellEngine {
    fn default() -> Self {
        ShellEngine {
            shell: PathBuf::from("sh"),
        }
    }
}

impl ShellEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different shell binary
    pub fn with_shell(shell: impl Into<PathBuf>) -> Self {
        ShellEngine {
            shell: shell.into(),
        }
    }

    fn command(&self, env: &TestEnvironment) -> Command {
        let mut command = Command::new(&self.shell);
        command
            .current_dir(&env.base_dir)
            .envs(env.vars.iter().map(|(k, v)| (k, v)));
        command
    }
}

impl TestEngine for ShellEngine {
    fn preflight(&self) -> Result<()> {
        let status = self
            .command(&TestEnvironment {
                base_dir: PathBuf::from("."),
                vars: Vec::new(),
            })
            .arg("-c")
            .arg("true")
            .status()
            .map_err(|e| {
                Error::Preflight(format!("Cannot run {}: {}", self.shell.display(), e))
            })?;

        if !status.success() {
            return Err(Error::Preflight(format!(
                "{} is not usable (status {})",
                self.shell.display(),
                status
            )));
        }
        Ok(())
    }

    fn bootstrap(&self, script: &Path, env: &TestEnvironment) -> Result<()> {
        if fs::File::open(script).is_err() {
            return Err(Error::Bootstrap {
                path: script.to_path_buf(),
                reason: "Cannot open bootstrap script".to_string(),
            });
        }

        let output = self
            .command(env)
            .arg(script)
            .output()
            .map_err(|e| Error::Bootstrap {
                path: script.to_path_buf(),
                reason: format!("Failed to execute: {}", e),
            })?;

        if !output.status.success() {
            return Err(Error::Bootstrap {
                path: script.to_path_buf(),
                reason: format!("exited with {}: {}", output.status, describe(&output)),
            });
        }
        Ok(())
    }

    fn requirement_met(&self, command: &str, env: &TestEnvironment) -> bool {
        self.command(env)
            .arg("-c")
            .arg(command)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    fn execute(
        &self,
        case: &TestCase,
        env: &TestEnvironment,
        coverage: &mut CodeCoverage,
    ) -> Result<Outcome> {
        let report = if coverage.is_active() {
            match NamedTempFile::new() {
                Ok(file) => Some(file),
                Err(e) => {
                    return Ok(Outcome::Errored(format!(
                        "Cannot create coverage report: {}",
                        e
                    )))
                }
            }
        } else {
            None
        };

        let mut command = self.command(env);
        command.arg("-c").arg(&case.command);
        if let Some(report) = &report {
            command.env(COVERAGE_FILE_ENV, report.path());
        }

        let output = match command.output() {
            Ok(output) => output,
            Err(e) => {
                return Ok(Outcome::Errored(format!(
                    "Failed to execute test command: {}",
                    e
                )))
            }
        };

        // A broken report only errors this test; the worker keeps going
        if let Some(report) = report {
            if let Err(e) = collect_coverage(report.path(), coverage) {
                return Ok(Outcome::Errored(e.to_string()));
            }
        }

        Ok(match output.status.code() {
            Some(0) => Outcome::Passed,
            Some(SKIP_EXIT_CODE) => Outcome::Skipped(describe(&output)),
            Some(code) => Outcome::Failed(format!("exit status {}: {}", code, describe(&output))),
            None => Outcome::Errored(format!("terminated by signal: {}", describe(&output))),
        })
    }
}

/// Merge a test's coverage report, all or nothing
fn collect_coverage(path: &Path, coverage: &mut CodeCoverage) -> Result<()> {
    let mut report = CodeCoverage::default();
    report.record_report(&fs::read_to_string(path)?)?;
    coverage.merge(&report);
    Ok(())
}

/// Trimmed stderr, falling back to stdout
fn describe(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr);
    let text = if stderr.trim().is_empty() {
        String::from_utf8_lossy(&output.stdout)
    } else {
        stderr
    };
    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::suite::TestId;
    use tempfile::TempDir;

    fn env(dir: &Path) -> TestEnvironment {
        TestEnvironment {
            base_dir: dir.to_path_buf(),
            vars: vec![("GREETING".to_string(), "hello".to_string())],
        }
    }

    fn case(command: &str) -> TestCase {
        TestCase {
            id: TestId::new("suite::case"),
            command: command.to_string(),
        }
    }

    #[test]
    fn test_environment_carries_identity() {
        let mut config = TestparConfig::default();
        config.env.insert("APP_ENV".to_string(), "testing".to_string());
        let env = TestEnvironment::for_worker(&config, WorkerIdentity::new(2, 3));
        assert!(env.vars.contains(&("APP_ENV".to_string(), "testing".to_string())));
        assert!(env.vars.contains(&(WORKER_ID_ENV.to_string(), "2".to_string())));
        assert!(env.vars.contains(&(WORKER_COUNT_ENV.to_string(), "3".to_string())));
    }

    #[test]
    fn test_execute_outcomes() {
        let temp = TempDir::new().unwrap();
        let engine = ShellEngine::new();
        let mut coverage = CodeCoverage::default();
        let env = env(temp.path());

        assert_eq!(
            engine.execute(&case("true"), &env, &mut coverage).unwrap(),
            Outcome::Passed
        );
        assert_eq!(
            engine
                .execute(&case("echo not here >&2; exit 77"), &env, &mut coverage)
                .unwrap(),
            Outcome::Skipped("not here".to_string())
        );
        assert_eq!(
            engine
                .execute(&case("echo $GREETING; exit 3"), &env, &mut coverage)
                .unwrap(),
            Outcome::Failed("exit status 3: hello".to_string())
        );
    }

    #[test]
    fn test_execute_collects_coverage() {
        let temp = TempDir::new().unwrap();
        let engine = ShellEngine::new();
        let mut config = TestparConfig::default();
        config.coverage = true;
        let mut coverage = CodeCoverage::init(&config);

        let outcome = engine
            .execute(
                &case("echo 'lib.sh:4,5' > \"$TESTPAR_COVERAGE_FILE\""),
                &env(temp.path()),
                &mut coverage,
            )
            .unwrap();
        assert_eq!(outcome, Outcome::Passed);
        assert!(coverage.is_covered("lib.sh", 4));
        assert!(coverage.is_covered("lib.sh", 5));
    }

    #[test]
    fn test_execute_malformed_coverage_errors_only_that_test() {
        let temp = TempDir::new().unwrap();
        let engine = ShellEngine::new();
        let mut config = TestparConfig::default();
        config.coverage = true;
        let mut coverage = CodeCoverage::init(&config);
        let env = env(temp.path());

        let outcome = engine
            .execute(
                &case("printf 'lib.sh:1\\nx.sh:notanumber\\n' > \"$TESTPAR_COVERAGE_FILE\""),
                &env,
                &mut coverage,
            )
            .unwrap();
        match outcome {
            Outcome::Errored(message) => assert!(message.contains("Malformed coverage line")),
            other => panic!("unexpected outcome: {:?}", other),
        }
        // Lines before the bad one are not recorded either
        assert_eq!(coverage.line_count(), 0);

        let outcome = engine
            .execute(
                &case("echo 'lib.sh:2' > \"$TESTPAR_COVERAGE_FILE\""),
                &env,
                &mut coverage,
            )
            .unwrap();
        assert_eq!(outcome, Outcome::Passed);
        assert!(coverage.is_covered("lib.sh", 2));
        assert!(!coverage.is_covered("lib.sh", 1));
    }

    #[test]
    fn test_bootstrap_missing_script() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("missing.sh");
        let err = ShellEngine::new()
            .bootstrap(&script, &env(temp.path()))
            .unwrap_err();
        assert!(err.to_string().contains("Cannot open bootstrap script"));
    }

    #[test]
    fn test_bootstrap_failure_reports_status() {
        let temp = TempDir::new().unwrap();
        let script = temp.path().join("boot.sh");
        fs::write(&script, "echo broken >&2\nexit 4\n").unwrap();
        let err = ShellEngine::new()
            .bootstrap(&script, &env(temp.path()))
            .unwrap_err();
        match err {
            Error::Bootstrap { path, reason } => {
                assert_eq!(path, script);
                assert!(reason.contains("broken"));
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[test]
    fn test_requirement_met() {
        let temp = TempDir::new().unwrap();
        let engine = ShellEngine::new();
        assert!(engine.requirement_met("true", &env(temp.path())));
        assert!(!engine.requirement_met("exit 1", &env(temp.path())));
    }

    #[test]
    fn test_preflight_missing_shell() {
        let engine = ShellEngine::with_shell("/nonexistent/shell");
        assert!(matches!(engine.preflight(), Err(Error::Preflight(_))));
        assert!(ShellEngine::new().preflight().is_ok());
    }
}
