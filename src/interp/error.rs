// Error types for the code interpreter subsystem

use thiserror::Error;

/// Main interpreter error type.
///
/// Environment-level failures (`RuntimeUnavailable`, `BuildFailed`) stop
/// batch processing; per-command failures (`CommandFailed`, `Timeout`) are
/// recovered locally into that command's `CommandResult.error`.
#[derive(Debug, Error)]
pub enum InterpreterError {
    #[error("container runtime is not installed")]
    RuntimeUnavailable,

    #[error("sandbox image is not built")]
    ImageNotReady,

    #[error("sandbox image build failed: {0}")]
    BuildFailed(String),

    #[error("interpreter session transport failed: {0}")]
    SessionTransport(String),

    #[error("command '{name}' failed: {reason}")]
    CommandFailed { name: String, reason: String },

    #[error("command '{0}' timed out")]
    Timeout(String),

    #[error("environment probe failed: {0}")]
    ProbeFault(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl InterpreterError {
    /// Whether the caller may retry the triggering operation.
    /// `RuntimeUnavailable` needs user action and is never auto-retried.
    pub fn is_recoverable(&self) -> bool {
        match self {
            InterpreterError::BuildFailed(_) => true,
            InterpreterError::SessionTransport(_) => true,
            InterpreterError::CommandFailed { .. } => true,
            InterpreterError::Timeout(_) => true,
            InterpreterError::ImageNotReady => true,
            InterpreterError::Io(_) => true,
            InterpreterError::RuntimeUnavailable => false,
            InterpreterError::ProbeFault(_) => false,
        }
    }

    /// Convert any fault into a per-command failure on the offending request,
    /// so nothing crosses the worker boundary uncaught.
    pub fn into_command_failure(self, name: &str) -> InterpreterError {
        match self {
            e @ InterpreterError::Timeout(_) => e,
            e @ InterpreterError::CommandFailed { .. } => e,
            e => InterpreterError::CommandFailed {
                name: name.to_string(),
                reason: e.to_string(),
            },
        }
    }
}

/// Result type alias for interpreter operations.
pub type Result<T> = std::result::Result<T, InterpreterError>;
