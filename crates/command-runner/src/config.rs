//! Per-run settings shared by the local and remote executors

use std::time::Duration;

use tracing::Level;

/// Default wait bound for a command.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

/// Settings for one command execution.
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Level at which each stdout line is logged while it is captured
    pub stdout_level: Level,
    /// Level at which each stderr line is logged while it is captured
    pub stderr_level: Level,
    /// Wait bound; the process/channel is forcibly terminated past it
    pub timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            stdout_level: Level::DEBUG,
            stderr_level: Level::DEBUG,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

impl RunConfig {
    /// Default logging with a caller-chosen wait bound.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            timeout,
            ..Self::default()
        }
    }

    /// Demote output logging to TRACE, for chatty bookkeeping commands.
    pub fn quiet() -> Self {
        Self {
            stdout_level: Level::TRACE,
            stderr_level: Level::TRACE,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}
