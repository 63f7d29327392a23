//! testpar - Command-line tool for running a test suite in parallel

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::backtrace::{Backtrace, BacktraceStatus};
use std::env;
use std::io::{self, Write};
use std::panic::{self, Location};
use std::path::PathBuf;
use std::thread;
use testpar::commands::{Command, ListTestsCommand, RunCommand};
use testpar::logging::{self, LogLevel};
use testpar::result::exit_code;
use testpar::sorter::ExecutionOrder;
use testpar::ui::CliUI;

#[derive(Parser)]
#[command(name = "testpar")]
#[command(about = "Run a test suite across parallel workers", long_about = None)]
struct Cli {
    /// Directory holding .testpar.conf (defaults to current directory)
    #[arg(short = 'C', long, global = true)]
    directory: Option<String>,

    /// Diagnostic log level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the configured tests
    Run {
        /// Number of workers (defaults to the configuration, then the CPU count)
        #[arg(short = 'j', long, env = "TESTPAR_WORKERS")]
        workers: Option<usize>,

        /// Only run tests whose id matches this regular expression
        #[arg(long)]
        filter: Option<String>,

        /// Execution order: default, reverse, defects or duration
        #[arg(long)]
        order: Option<ExecutionOrder>,

        /// Collect coverage and write the merged report to this file
        #[arg(long)]
        coverage: Option<PathBuf>,

        /// Do not draw a progress bar
        #[arg(long)]
        no_progress: bool,
    },

    /// List the configured tests
    List {
        /// Show which worker each test is assigned to
        #[arg(short = 'j', long)]
        workers: Option<usize>,
    },
}

/// Makes anyhow record where an error was created
const LIB_BACKTRACE_ENV: &str = "RUST_LIB_BACKTRACE";

fn main() {
    if env::var_os(LIB_BACKTRACE_ENV).is_none() {
        env::set_var(LIB_BACKTRACE_ENV, "1");
    }
    install_panic_hook();

    let cli = Cli::parse();
    logging::init_logger(cli.log_level);

    let mut ui = CliUI::new();

    let command: Box<dyn Command> = match cli.command {
        Commands::Run {
            workers,
            filter,
            order,
            coverage,
            no_progress,
        } => Box::new(
            RunCommand::new(cli.directory)
                .with_workers(workers)
                .with_filter(filter)
                .with_order(order)
                .with_coverage_output(coverage)
                .with_progress(!no_progress && console::user_attended_stderr()),
        ),
        Commands::List { workers } => {
            Box::new(ListTestsCommand::new(cli.directory).with_workers(workers))
        }
    };

    let result = command
        .execute(&mut ui)
        .with_context(|| format!("{} command failed", command.name()));

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => std::process::exit(report(&e, &mut io::stderr())),
    }
}

/// Turn a panic on the main thread into a crash report
///
/// Worker threads keep the default hook; their panics are reported by the
/// orchestrator as worker failures.
fn install_panic_hook() {
    let default_hook = panic::take_hook();
    panic::set_hook(Box::new(move |info| {
        if thread::current().name() != Some("main") {
            default_hook(info);
            return;
        }
        let payload = info.payload();
        let message = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "unknown panic".to_string());
        let code = report_panic(&message, info.location(), &mut io::stderr());
        std::process::exit(code);
    }));
}

/// Print a failed command and pick the exit status
fn report(error: &anyhow::Error, out: &mut dyn Write) -> i32 {
    if let Some(inner) = error.downcast_ref::<testpar::Error>() {
        if inner.is_user_facing() {
            let _ = writeln!(out, "Error: {}", inner);
            return exit_code::EXCEPTION;
        }
    }

    let causes: Vec<String> = error.chain().skip(1).map(|c| c.to_string()).collect();
    let backtrace = error.backtrace();
    let location = if backtrace.status() == BacktraceStatus::Captured {
        backtrace.to_string()
    } else {
        Backtrace::force_capture().to_string()
    };
    write_crash(out, &error.to_string(), &causes, &location);
    exit_code::CRASH
}

fn report_panic(message: &str, location: Option<&Location<'_>>, out: &mut dyn Write) -> i32 {
    let location = match location {
        Some(location) => location.to_string(),
        None => Backtrace::force_capture().to_string(),
    };
    write_crash(out, message, &[], &location);
    exit_code::CRASH
}

fn write_crash(out: &mut dyn Write, message: &str, causes: &[String], location: &str) {
    let _ = writeln!(out, "An error occurred inside testpar.");
    let _ = writeln!(out);
    let _ = writeln!(out, "Message:  {}", message);
    for cause in causes {
        let _ = writeln!(out, "Caused by: {}", cause);
    }
    let _ = writeln!(out, "Location:");
    let _ = writeln!(out, "{}", location.trim_end());
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printed(out: Vec<u8>) -> String {
        String::from_utf8(out).unwrap()
    }

    #[test]
    fn test_report_internal_error() {
        let error = anyhow::Error::from(testpar::Error::from("boom")).context("run command failed");
        let mut out = Vec::new();
        let code = report(&error, &mut out);

        assert_eq!(code, exit_code::CRASH);
        let text = printed(out);
        assert!(text.contains("Message:  run command failed"), "{}", text);
        assert!(text.contains("Caused by: boom"), "{}", text);
        assert!(text.contains("Location:"), "{}", text);
    }

    #[test]
    fn test_report_user_facing_error() {
        let error = anyhow::Error::from(testpar::Error::Config("No test suites defined".into()))
            .context("run command failed");
        let mut out = Vec::new();
        let code = report(&error, &mut out);

        assert_eq!(code, exit_code::EXCEPTION);
        let text = printed(out);
        assert!(text.starts_with("Error: Configuration error: No test suites defined"));
        assert!(!text.contains("Location:"));
    }

    #[test]
    fn test_report_panic_names_its_location() {
        let here = Location::caller();
        let mut out = Vec::new();
        let code = report_panic("index out of bounds", Some(here), &mut out);

        assert_eq!(code, exit_code::CRASH);
        let text = printed(out);
        assert!(text.contains("Message:  index out of bounds"));
        assert!(text.contains(&format!("Location:\n{}", here)), "{}", text);
        assert!(text.contains("main.rs"));
    }
}
