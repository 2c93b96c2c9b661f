//! Error types for command execution

use std::time::Duration;
use thiserror::Error;

/// Unified error type for local and remote command execution
#[derive(Error, Debug)]
pub enum Error {
    /// Failed to spawn a process
    #[error("failed to spawn process: {reason}")]
    SpawnFailed {
        /// The reason for the spawn failure
        reason: String,
    },

    /// A local process ran past its wait bound and was killed
    #[error("process timed out after {elapsed:?}: {command}")]
    ProcessTimeout {
        /// The command that timed out
        command: String,
        /// How long the command ran before the result was constructed
        elapsed: Duration,
    },

    /// A remote command ran past its wait bound and its channel was closed
    #[error("ssh command timed out after {elapsed:?}: {command}")]
    SessionTimeout {
        /// The command that timed out
        command: String,
        /// How long the command ran before the result was constructed
        elapsed: Duration,
    },

    /// A command completed with a non-zero exit code
    #[error("process failed with exit code {code}: {command}")]
    NonZeroExit {
        /// The exit code the command returned
        code: i32,
        /// The command that failed
        command: String,
    },

    /// Failed to establish an SSH session
    #[error("ssh connection to {host} failed: {reason}")]
    ConnectionFailed {
        /// The hostname or IP address that failed to connect
        host: String,
        /// The detailed reason for the connection failure
        reason: String,
    },

    /// A command line could not be tokenized or quoted
    #[error("invalid command line: {reason}")]
    InvalidCommand {
        /// The reason the command line was rejected
        reason: String,
    },

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

// For convenience, re-export specific error constructors
impl Error {
    /// Create a spawn failed error
    pub fn spawn_failed(reason: impl Into<String>) -> Self {
        Self::SpawnFailed {
            reason: reason.into(),
        }
    }

    /// Create an invalid command error
    pub fn invalid_command(reason: impl Into<String>) -> Self {
        Self::InvalidCommand {
            reason: reason.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
