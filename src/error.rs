//! Typed errors surfaced by the manager, the supervision loop and the
//! log sinks.

use thiserror::Error;

/// Errors produced by `procguard` operations.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    /// A process with this name is already registered with the manager.
    #[error("process '{name}' already exists")]
    DuplicateName {
        /// The duplicate process name.
        name: String,
    },

    /// No process with this name is registered with the manager.
    #[error("process '{name}' not found")]
    NotFound {
        /// The missing process name.
        name: String,
    },

    /// The launch spec has no command to execute.
    #[error("process '{name}' has an empty command")]
    EmptyCommand { name: String },

    /// The configured `user[:group]` could not be resolved on this host.
    #[error("unknown user or group '{spec}'")]
    UnknownUser { spec: String },

    /// A signal was requested for a process that has no live child.
    #[error("process '{name}' is not running")]
    NotRunning { name: String },

    /// Signal delivery to the child (or its group) failed.
    #[error("failed to signal process '{name}': {source}")]
    Signal {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// Cloning the configuration for a graceful reload failed.
    #[error("failed to clone process '{name}': {reason}")]
    Clone { name: String, reason: String },

    /// Writing to the child's stdin failed.
    #[error("failed to write stdin of process '{name}': {source}")]
    Stdin {
        name: String,
        #[source]
        source: std::io::Error,
    },

    /// The sink has no file backing it (null sink, or never opened).
    #[error("no log file")]
    NoLogFile,

    /// Reading from a log sink failed.
    #[error("failed to read log: {0}")]
    LogRead(#[source] std::io::Error),
}

impl Error {
    /// Short stable label (snake_case) for logs and metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Error::DuplicateName { .. } => "duplicate_name",
            Error::NotFound { .. } => "not_found",
            Error::EmptyCommand { .. } => "empty_command",
            Error::UnknownUser { .. } => "unknown_user",
            Error::NotRunning { .. } => "not_running",
            Error::Signal { .. } => "signal_failed",
            Error::Clone { .. } => "clone_failed",
            Error::Stdin { .. } => "stdin_failed",
            Error::NoLogFile => "no_log_file",
            Error::LogRead(_) => "log_read_failed",
        }
    }
}
