//! Core error types.

use crate::config::ConfigError;
use crate::validation::ValidationResult;
use thiserror::Error;

/// Convenience result alias for the orchestration core.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Orchestration errors.
///
/// `Cancelled` is the distinguished cancellation value: executors return it
/// when they observe a cancellation request, and the core maps it onto the
/// `Cancelled` terminal state instead of `Failed`.
#[derive(Debug, Error)]
pub enum Error {
    /// No executor is registered for the requested type.
    #[error("unknown migration type: {0}")]
    UnknownMigrationType(String),

    /// Pre-flight validation rejected the configuration.
    #[error("validation failed: {}", .0.errors.join("; "))]
    ValidationFailed(ValidationResult),

    /// The migration was cancelled cooperatively.
    #[error("migration cancelled")]
    Cancelled,

    /// The executor failed while doing its work.
    #[error("execution failed: {0}")]
    Execution(String),

    /// A configuration bag lookup failed.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// An external command exited unsuccessfully.
    #[error("command `{program}` exited with {}: {stderr}", .code.map_or_else(|| "signal".to_string(), |c| format!("status {c}")))]
    CommandFailed {
        /// The program that was run.
        program: String,
        /// Exit code, `None` when terminated by a signal.
        code: Option<i32>,
        /// Captured standard error (trimmed).
        stderr: String,
    },

    /// An external command could not be started.
    #[error("failed to start `{program}`: {source}")]
    Spawn {
        /// The program that was run.
        program: String,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// No migration with this id is retained.
    #[error("migration not found: {0}")]
    NotFound(String),

    /// The migration has not reached a terminal state yet.
    #[error("migration {0} is still running")]
    StillRunning(String),

    /// A recipe definition could not be loaded.
    #[error("invalid recipe definition: {0}")]
    InvalidDefinition(String),
}

impl Error {
    /// Build an execution failure from any displayable message.
    pub fn execution(message: impl Into<String>) -> Self {
        Error::Execution(message.into())
    }

    /// Whether this is the distinguished cancellation error.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled)
    }
}
