//! Error types for testpar

use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for testpar operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for testpar
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration file error or invalid configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A capability required before any worker is spawned is missing.
    #[error("Pre-flight check failed: {0}")]
    Preflight(String),

    /// A worker could not load its bootstrap script.
    #[error("Error in bootstrap script {}: {reason}", path.display())]
    Bootstrap {
        /// Script that failed.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },

    /// A worker thread terminated without reporting completion.
    #[error("Worker {0} panicked before reporting completion")]
    WorkerPanicked(usize),

    /// The orchestrator side of a worker channel went away.
    #[error("Event channel of worker {0} is closed")]
    ChannelClosed(usize),

    /// Test command execution failed.
    #[error("Command execution failed: {0}")]
    CommandExecution(String),

    /// Coverage data could not be collected or merged.
    #[error("Coverage error: {0}")]
    Coverage(String),

    /// Snapshot (de)serialization failed.
    #[error("Serialization error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid test name filter.
    #[error("Invalid filter: {0}")]
    Regex(#[from] regex::Error),

    /// I/O operation failed.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Other error with custom message.
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors that are reported as a plain message rather than a crash.
    pub fn is_user_facing(&self) -> bool {
        matches!(
            self,
            Error::Config(_) | Error::Preflight(_) | Error::Bootstrap { .. } | Error::Regex(_)
        )
    }
}

impl From<String> for Error {
    fn from(s: String) -> Self {
        Error::Other(s)
    }
}

impl From<&str> for Error {
    fn from(s: &str) -> Self {
        Error::Other(s.to_string())
    }
}
