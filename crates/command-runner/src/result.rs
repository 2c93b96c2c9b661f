//! The uniform record produced by a finished command

use std::time::Duration;

use crate::error::{Error, Result};

/// Which transport produced a result; selects the timeout error flavor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Transport {
    Local,
    Ssh,
}

/// Captured outcome of one command execution.
///
/// Constructed exactly once per execution attempt, after both output streams
/// have been fully drained, so `stdout`/`stderr` contain everything the
/// command wrote up to its termination. Immutable; repeated `wait` calls on
/// the owning process hand back clones of the same value.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// Everything the command wrote to stdout
    pub stdout: String,
    /// Everything the command wrote to stderr
    pub stderr: String,
    /// The exit code of the reaped process, or `-signal` when killed by one
    pub exit_code: i32,
    /// The command that was executed, in display form
    pub command: String,
    /// Wall-clock time from spawn until the result was constructed
    pub elapsed: Duration,
    /// Whether the wait bound elapsed before the command finished
    pub timed_out: bool,
    pub(crate) transport: Transport,
}

impl ExecutionResult {
    /// Fail if the command timed out or exited non-zero.
    ///
    /// `wait` never raises for these conditions itself; callers decide when
    /// a failure matters by checking the result.
    pub fn check_exit_code(&self) -> Result<()> {
        if self.timed_out {
            Err(match self.transport {
                Transport::Local => Error::ProcessTimeout {
                    command: self.command.clone(),
                    elapsed: self.elapsed,
                },
                Transport::Ssh => Error::SessionTimeout {
                    command: self.command.clone(),
                    elapsed: self.elapsed,
                },
            })
        } else if self.exit_code != 0 {
            Err(Error::NonZeroExit {
                code: self.exit_code,
                command: self.command.clone(),
            })
        } else {
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(exit_code: i32, timed_out: bool, transport: Transport) -> ExecutionResult {
        ExecutionResult {
            stdout: String::new(),
            stderr: String::new(),
            exit_code,
            command: "true".to_string(),
            elapsed: Duration::from_millis(1),
            timed_out,
            transport,
        }
    }

    #[test]
    fn zero_exit_passes_check() {
        result(0, false, Transport::Local).check_exit_code().unwrap();
        result(0, false, Transport::Ssh).check_exit_code().unwrap();
    }

    #[test]
    fn non_zero_exit_carries_the_code() {
        let err = result(42, false, Transport::Local)
            .check_exit_code()
            .unwrap_err();
        assert!(matches!(err, Error::NonZeroExit { code: 42, .. }));
    }

    #[test]
    fn timeout_takes_precedence_over_exit_code() {
        let err = result(1, true, Transport::Local)
            .check_exit_code()
            .unwrap_err();
        assert!(matches!(err, Error::ProcessTimeout { .. }));

        let err = result(1, true, Transport::Ssh).check_exit_code().unwrap_err();
        assert!(matches!(err, Error::SessionTimeout { .. }));
    }
}
