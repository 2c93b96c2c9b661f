//! Local process execution

use std::process::ExitStatus;
use std::time::{Duration, Instant};

use async_process::{Child, Stdio};
use futures_lite::future;
use tracing::debug;

use crate::command::Command;
use crate::config::RunConfig;
use crate::drainer::StreamDrainer;
use crate::error::{Error, Result};
use crate::result::{ExecutionResult, Transport};

/// A spawned child process with both output streams being drained.
///
/// The process handle and its two drainers are exclusively owned; nothing
/// else reads from or writes to them. `wait` and `close` are idempotent.
pub struct LocalProcess {
    command: String,
    child: Child,
    stdout: StreamDrainer,
    stderr: StreamDrainer,
    started: Instant,
    result: Option<ExecutionResult>,
}

impl LocalProcess {
    /// Spawn `command` with piped stdout/stderr and start draining both.
    pub fn spawn(command: &Command, config: &RunConfig) -> Result<LocalProcess> {
        let cmd_line = command.display();
        let mut cmd = command.prepare();
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|err| Error::spawn_failed(format!("{cmd_line}: {err}")))?;
        let pid = child.id();
        debug!("[{}][cmd]: {}", pid, cmd_line);

        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| Error::spawn_failed("child stdout was not piped"))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| Error::spawn_failed("child stderr was not piped"))?;
        let stdout = StreamDrainer::spawn(stdout_pipe, config.stdout_level, format!("[{pid}][stdout]"));
        let stderr = StreamDrainer::spawn(stderr_pipe, config.stderr_level, format!("[{pid}][stderr]"));

        Ok(LocalProcess {
            command: cmd_line,
            child,
            stdout,
            stderr,
            started: Instant::now(),
            result: None,
        })
    }

    /// The process ID of the child.
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    /// Wait up to `timeout` for the process to exit and return its result.
    ///
    /// Past the bound the process is killed and then reaped without a bound
    /// (killing alone does not guarantee an immediate reap). Either way both
    /// drainers are joined before the result is constructed, so the captured
    /// output includes everything flushed up to termination. Repeated calls
    /// return the cached result.
    pub async fn wait(&mut self, timeout: Duration) -> Result<ExecutionResult> {
        if let Some(result) = &self.result {
            return Ok(result.clone());
        }

        let status = {
            let child = &mut self.child;
            future::or(async { Some(child.status().await) }, async {
                smol::Timer::after(timeout).await;
                None
            })
            .await
        };
        let (status, timed_out) = match status {
            Some(status) => (status?, false),
            None => {
                // Killing closes the pipes, which unblocks the drainers.
                let _ = self.child.kill();
                (self.child.status().await?, true)
            }
        };

        let stdout = self.stdout.wait_for_output().await;
        let stderr = self.stderr.wait_for_output().await;
        let elapsed = self.started.elapsed();
        let exit_code = exit_code(&status);
        debug!(
            "[{}][cmd]: execution time: {:?}, exit code: {}",
            self.child.id(),
            elapsed,
            exit_code
        );

        let result = ExecutionResult {
            stdout,
            stderr,
            exit_code,
            command: self.command.clone(),
            elapsed,
            timed_out,
            transport: Transport::Local,
        };
        self.result = Some(result.clone());
        Ok(result)
    }

    /// Kill the process if it is still running and join both drainers.
    pub async fn close(&mut self) {
        let _ = self.child.kill();
        self.stdout.wait_for_output().await;
        self.stderr.wait_for_output().await;
    }
}

impl Drop for LocalProcess {
    fn drop(&mut self) {
        if self.result.is_none() {
            let _ = self.child.kill();
        }
    }
}

/// Spawn a command, wait with the default bound, and close it.
pub async fn run(command: Command) -> Result<ExecutionResult> {
    run_with(command, &RunConfig::default()).await
}

/// Spawn a command, wait with the configured bound, and close it.
pub async fn run_with(command: Command, config: &RunConfig) -> Result<ExecutionResult> {
    let mut process = LocalProcess::spawn(&command, config)?;
    let result = process.wait(config.timeout).await;
    process.close().await;
    result
}

#[cfg(unix)]
pub(crate) fn exit_code(status: &ExitStatus) -> i32 {
    use std::os::unix::process::ExitStatusExt;
    status
        .code()
        .or_else(|| status.signal().map(|signal| -signal))
        .unwrap_or(-1)
}

#[cfg(not(unix))]
pub(crate) fn exit_code(status: &ExitStatus) -> i32 {
    status.code().unwrap_or(-1)
}
