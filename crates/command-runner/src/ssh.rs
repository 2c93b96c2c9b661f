//! Remote execution over an established SSH session
//!
//! A session is an OpenSSH connection multiplexing master: it authenticates
//! once, holds the TCP connection, and every spawned command opens a new
//! channel (a mux client) over it. Channel exit status is the remote
//! command's exit status; force-closing the channel kills the mux client
//! while leaving the session itself intact.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use async_process::{Child, Stdio};
use futures_lite::future;
use tempfile::TempDir;
use tracing::{debug, Level};

use crate::command::Command;
use crate::config::RunConfig;
use crate::drainer::StreamDrainer;
use crate::error::{Error, Result};
use crate::local;
use crate::result::{ExecutionResult, Transport};

/// SSH connection configuration
#[derive(Debug, Clone)]
pub struct SshConfig {
    /// Target host (hostname or IP)
    host: String,
    /// SSH user (optional, uses system default if not specified)
    user: Option<String>,
    /// SSH port (optional, defaults to 22)
    port: Option<u16>,
    /// Path to identity file (private key)
    identity_file: Option<PathBuf>,
    /// Known-hosts file; unknown keys are accepted and recorded into it
    known_hosts_file: Option<PathBuf>,
    /// Additional SSH arguments
    extra_args: Vec<String>,
    /// How long to wait for the session to authenticate
    connect_timeout: Duration,
}

impl SshConfig {
    /// Create a new SSH configuration for the given host
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            user: None,
            port: None,
            identity_file: None,
            known_hosts_file: None,
            extra_args: Vec::new(),
            connect_timeout: Duration::from_secs(30),
        }
    }

    /// Set the SSH user
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    /// Set the SSH port
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = Some(port);
        self
    }

    /// Set the identity file (private key)
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    /// Set the known-hosts file
    pub fn with_known_hosts_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.known_hosts_file = Some(path.into());
        self
    }

    /// Add an extra SSH argument
    pub fn with_extra_arg(mut self, arg: impl Into<String>) -> Self {
        self.extra_args.push(arg.into());
        self
    }

    /// Set the session establishment timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Get the destination string (user@host if user is specified)
    fn destination(&self) -> String {
        if let Some(user) = &self.user {
            format!("{}@{}", user, self.host)
        } else {
            self.host.clone()
        }
    }

    /// Common arguments for the master and every channel it carries.
    fn control_args(&self, control_path: &Path) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            format!("ControlPath={}", control_path.display()),
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if let Some(path) = &self.known_hosts_file {
            args.push("-o".to_string());
            args.push(format!("UserKnownHostsFile={}", path.display()));
        }
        if let Some(port) = self.port {
            args.push("-p".to_string());
            args.push(port.to_string());
        }
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.extend(self.extra_args.iter().cloned());
        args
    }
}

/// An authenticated SSH session commands can be spawned over.
pub struct SshSession {
    config: SshConfig,
    master: Child,
    master_stdout: StreamDrainer,
    master_stderr: StreamDrainer,
    control_path: PathBuf,
    // Holds the directory containing the control socket for the session's
    // lifetime.
    _control_dir: TempDir,
    open: bool,
}

impl SshSession {
    /// Establish a session: start the connection master and wait until it
    /// authenticates and accepts channels.
    pub async fn connect(config: SshConfig) -> Result<SshSession> {
        let control_dir = tempfile::Builder::new().prefix("ssh-mux-").tempdir()?;
        let control_path = control_dir.path().join("mux.sock");

        let mut cmd = async_process::Command::new("ssh");
        cmd.arg("-M").arg("-N");
        cmd.args(config.control_args(&control_path));
        cmd.arg(config.destination());
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut master = cmd.spawn().map_err(|err| Error::ConnectionFailed {
            host: config.host.clone(),
            reason: format!("failed to start ssh: {err}"),
        })?;
        let pid = master.id();
        debug!("[ssh-master][{}]: connecting to {}", pid, config.destination());

        let stdout_pipe = master
            .stdout
            .take()
            .ok_or_else(|| Error::spawn_failed("ssh master stdout was not piped"))?;
        let stderr_pipe = master
            .stderr
            .take()
            .ok_or_else(|| Error::spawn_failed("ssh master stderr was not piped"))?;
        let master_stdout =
            StreamDrainer::spawn(stdout_pipe, Level::TRACE, format!("[ssh-master][{pid}][stdout]"));
        let master_stderr =
            StreamDrainer::spawn(stderr_pipe, Level::DEBUG, format!("[ssh-master][{pid}][stderr]"));

        let mut session = SshSession {
            config,
            master,
            master_stdout,
            master_stderr,
            control_path,
            _control_dir: control_dir,
            open: true,
        };
        session.await_ready().await?;
        Ok(session)
    }

    /// The host this session is connected to.
    pub fn host(&self) -> &str {
        &self.config.host
    }

    async fn await_ready(&mut self) -> Result<()> {
        let deadline = Instant::now() + self.config.connect_timeout;
        loop {
            // A master that died during authentication reports the failure.
            if let Some(status) = self.master.try_status()? {
                let stderr = self.master_stderr.wait_for_output().await;
                self.open = false;
                let reason = if stderr.trim().is_empty() {
                    format!("ssh exited with code {}", local::exit_code(&status))
                } else {
                    stderr.trim().to_string()
                };
                return Err(Error::ConnectionFailed {
                    host: self.config.host.clone(),
                    reason,
                });
            }

            let check = local::run_with(
                Command::new("ssh")
                    .args(["-O", "check", "-o"])
                    .arg(format!("ControlPath={}", self.control_path.display()))
                    .arg(self.config.destination()),
                &RunConfig {
                    timeout: Duration::from_secs(10),
                    ..RunConfig::quiet()
                },
            )
            .await?;
            if check.exit_code == 0 {
                debug!("[ssh-master][{}]: session ready", self.master.id());
                return Ok(());
            }

            if Instant::now() >= deadline {
                let _ = self.master.kill();
                self.open = false;
                return Err(Error::ConnectionFailed {
                    host: self.config.host.clone(),
                    reason: "timed out waiting for the session to authenticate".to_string(),
                });
            }
            smol::Timer::after(Duration::from_millis(200)).await;
        }
    }

    /// Open a command channel over the session and start draining it.
    pub fn spawn(&self, command: &Command, config: &RunConfig) -> Result<SshProcess> {
        let remote = command.to_remote_string()?;

        let mut cmd = async_process::Command::new("ssh");
        cmd.args(self.config.control_args(&self.control_path));
        cmd.arg(self.config.destination());
        cmd.arg("--");
        cmd.arg(&remote);
        cmd.stdin(Stdio::null());
        cmd.stdout(Stdio::piped());
        cmd.stderr(Stdio::piped());

        let mut child = cmd
            .spawn()
            .map_err(|err| Error::spawn_failed(format!("failed to open ssh channel: {err}")))?;
        let pid = child.id();
        debug!("[ssh][{}][cmd]: {}", pid, remote);

        let stdout_pipe = child
            .stdout
            .take()
            .ok_or_else(|| Error::spawn_failed("ssh channel stdout was not piped"))?;
        let stderr_pipe = child
            .stderr
            .take()
            .ok_or_else(|| Error::spawn_failed("ssh channel stderr was not piped"))?;
        let stdout =
            StreamDrainer::spawn(stdout_pipe, config.stdout_level, format!("[ssh][{pid}][stdout]"));
        let stderr =
            StreamDrainer::spawn(stderr_pipe, config.stderr_level, format!("[ssh][{pid}][stderr]"));

        Ok(SshProcess {
            command: remote,
            child,
            stdout,
            stderr,
            started: Instant::now(),
            result: None,
        })
    }

    /// Run a command over the session, waiting with the default bound.
    pub async fn run(&self, command: Command) -> Result<ExecutionResult> {
        self.run_with(command, &RunConfig::default()).await
    }

    /// Run a command over the session, waiting with the configured bound.
    pub async fn run_with(&self, command: Command, config: &RunConfig) -> Result<ExecutionResult> {
        let mut process = self.spawn(&command, config)?;
        let result = process.wait(config.timeout).await;
        process.close().await;
        result
    }

    /// Copy a local file to the remote host over the session.
    pub async fn put_file(&self, local_path: &Path, remote_path: &Path) -> Result<()> {
        self.scp(
            &local_path.display().to_string(),
            &format!("{}:{}", self.config.destination(), remote_path.display()),
        )
        .await
    }

    /// Copy a remote file to the local host over the session.
    pub async fn get_file(&self, remote_path: &Path, local_path: &Path) -> Result<()> {
        self.scp(
            &format!("{}:{}", self.config.destination(), remote_path.display()),
            &local_path.display().to_string(),
        )
        .await
    }

    async fn scp(&self, source: &str, target: &str) -> Result<()> {
        let command = Command::new("scp")
            .args(["-q", "-o"])
            .arg(format!("ControlPath={}", self.control_path.display()))
            .args(["-o", "BatchMode=yes"])
            .arg(source)
            .arg(target);
        local::run(command).await?.check_exit_code()
    }

    /// Close the session: ask the master to exit, then make sure it is gone.
    /// Idempotent.
    pub async fn close(&mut self) {
        if !self.open {
            return;
        }
        self.open = false;

        let _ = local::run_with(
            Command::new("ssh")
                .args(["-O", "exit", "-o"])
                .arg(format!("ControlPath={}", self.control_path.display()))
                .arg(self.config.destination()),
            &RunConfig {
                timeout: Duration::from_secs(10),
                ..RunConfig::quiet()
            },
        )
        .await;

        let _ = self.master.kill();
        let _ = self.master.status().await;
        self.master_stdout.wait_for_output().await;
        self.master_stderr.wait_for_output().await;
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        if self.open {
            let _ = self.master.kill();
        }
    }
}

/// One command channel on a session, with both streams being drained.
pub struct SshProcess {
    command: String,
    child: Child,
    stdout: StreamDrainer,
    stderr: StreamDrainer,
    started: Instant,
    result: Option<ExecutionResult>,
}

impl SshProcess {
    /// Wait up to `timeout` for channel completion and return the result.
    ///
    /// On completion the exit code is the remote command's status as the
    /// channel reports it. Past the bound the channel is force-closed and,
    /// with no real status obtainable, the exit code defaults to 1. Both
    /// drainers are joined before the result is constructed. Repeated calls
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
        let (exit_code, timed_out) = match status {
            Some(status) => (local::exit_code(&status?), false),
            None => {
                let _ = self.child.kill();
                let _ = self.child.status().await;
                (1, true)
            }
        };

        let stdout = self.stdout.wait_for_output().await;
        let stderr = self.stderr.wait_for_output().await;
        let elapsed = self.started.elapsed();
        debug!(
            "[ssh][{}][cmd]: execution time: {:?}, exit code: {}",
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
            transport: Transport::Ssh,
        };
        self.result = Some(result.clone());
        Ok(result)
    }

    /// Close the channel and join both drainers; idempotent.
    pub async fn close(&mut self) {
        let _ = self.child.kill();
        self.stdout.wait_for_output().await;
        self.stderr.wait_for_output().await;
    }
}

impl Drop for SshProcess {
    fn drop(&mut self) {
        if self.result.is_none() {
            let _ = self.child.kill();
        }
    }
}
