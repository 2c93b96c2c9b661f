//! Command type for building executable commands

use std::collections::BTreeMap;
use std::path::PathBuf;

use async_process::Command as AsyncCommand;

use crate::error::{Error, Result};

/// How the command line itself is expressed.
#[derive(Debug, Clone)]
enum CommandLine {
    /// Discrete program + arguments, executed without a shell locally and
    /// rejoined with shell-safe quoting for remote transmission.
    Argv(Vec<String>),
    /// A script handed to a shell verbatim (`sh -c` locally, the remote
    /// login shell over SSH).
    Shell(String),
}

/// A command to be executed locally or remotely
///
/// Unlike `async_process::Command`, this type is `Clone` and transport
/// independent: the same value can be prepared for a local child process or
/// rendered as a single quoted string for a remote shell.
#[derive(Debug, Clone)]
pub struct Command {
    line: CommandLine,
    env: BTreeMap<String, String>,
    current_dir: Option<PathBuf>,
}

impl Command {
    /// Create a command from a program name; arguments are appended with
    /// [`arg`](Self::arg) and never pass through a shell.
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            line: CommandLine::Argv(vec![program.into()]),
            env: BTreeMap::new(),
            current_dir: None,
        }
    }

    /// Create a command that runs a script under a shell, metacharacters and
    /// all.
    pub fn shell(script: impl Into<String>) -> Self {
        Self {
            line: CommandLine::Shell(script.into()),
            env: BTreeMap::new(),
            current_dir: None,
        }
    }

    /// Create a command from free text without granting it shell semantics.
    ///
    /// The text is tokenized by POSIX shell rules, so when the command is
    /// later re-quoted for a remote shell, metacharacters in the text carry
    /// no significance there.
    pub fn parse(text: &str) -> Result<Self> {
        let argv =
            shlex::split(text).ok_or_else(|| Error::invalid_command("unbalanced quoting"))?;
        if argv.is_empty() {
            return Err(Error::invalid_command("empty command line"));
        }
        Ok(Self {
            line: CommandLine::Argv(argv),
            env: BTreeMap::new(),
            current_dir: None,
        })
    }

    /// Add an argument. For shell commands the argument is appended to the
    /// script with quoting, so it reaches the program as a single word.
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        let arg = arg.into();
        match &mut self.line {
            CommandLine::Argv(argv) => argv.push(arg),
            CommandLine::Shell(script) => {
                script.push(' ');
                script.push_str(&quote(&arg).unwrap_or(arg));
            }
        }
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for arg in args {
            self = self.arg(arg);
        }
        self
    }

    /// Set an environment variable
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    /// Set multiple environment variables
    pub fn envs<I, K, V>(mut self, vars: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        for (key, value) in vars {
            self = self.env(key, value);
        }
        self
    }

    /// Set the working directory for the command
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.current_dir = Some(dir.into());
        self
    }

    /// Human-readable form of the command line, used in logs and results.
    pub fn display(&self) -> String {
        match &self.line {
            CommandLine::Argv(argv) => argv.join(" "),
            CommandLine::Shell(script) => script.clone(),
        }
    }

    /// Prepare this command for local execution.
    pub(crate) fn prepare(&self) -> AsyncCommand {
        let mut cmd = match &self.line {
            CommandLine::Argv(argv) => {
                let mut cmd = AsyncCommand::new(&argv[0]);
                cmd.args(&argv[1..]);
                cmd
            }
            CommandLine::Shell(script) => {
                let mut cmd = AsyncCommand::new("sh");
                cmd.arg("-c").arg(script);
                cmd
            }
        };
        for (key, value) in &self.env {
            cmd.env(key, value);
        }
        if let Some(dir) = &self.current_dir {
            cmd.current_dir(dir);
        }
        cmd
    }

    /// Render this command as a single string for a remote shell.
    ///
    /// The remote side always executes inside a shell, so argv commands are
    /// joined with shell-safe quoting. Environment variables and a working
    /// directory become `export`/`cd` prefix clauses using the same quoting
    /// discipline.
    pub fn to_remote_string(&self) -> Result<String> {
        let mut clauses = Vec::new();
        for (key, value) in &self.env {
            clauses.push(format!("export {}={}", key, quote(value)?));
        }
        if let Some(dir) = &self.current_dir {
            let dir = dir
                .to_str()
                .ok_or_else(|| Error::invalid_command("working directory is not valid UTF-8"))?;
            clauses.push(format!("cd {}", quote(dir)?));
        }
        clauses.push(match &self.line {
            CommandLine::Argv(argv) => shlex::try_join(argv.iter().map(String::as_str))
                .map_err(|_| Error::invalid_command("command contains a NUL byte"))?,
            CommandLine::Shell(script) => script.clone(),
        });
        Ok(clauses.join("; "))
    }
}

fn quote(value: &str) -> Result<String> {
    shlex::try_quote(value)
        .map(|quoted| quoted.into_owned())
        .map_err(|_| Error::invalid_command("value contains a NUL byte"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn argv_joins_with_quoting() {
        let cmd = Command::new("echo").arg("hello world");
        assert_eq!(cmd.to_remote_string().unwrap(), "echo \"hello world\"");
    }

    #[test]
    fn shell_script_is_transmitted_verbatim() {
        let cmd = Command::shell("echo $HOME && ls");
        assert_eq!(cmd.to_remote_string().unwrap(), "echo $HOME && ls");
    }

    #[test]
    fn parsed_text_loses_shell_significance() {
        let cmd = Command::parse("echo $HOME; rm x").unwrap();
        assert_eq!(cmd.to_remote_string().unwrap(), "echo \"\\$HOME;\" rm x");
    }

    #[test]
    fn parse_rejects_unbalanced_quoting() {
        assert!(matches!(
            Command::parse("echo 'unterminated"),
            Err(Error::InvalidCommand { .. })
        ));
        assert!(matches!(
            Command::parse("   "),
            Err(Error::InvalidCommand { .. })
        ));
    }

    #[test]
    fn cwd_and_env_become_prefix_clauses() {
        let cmd = Command::new("make")
            .env("CC", "clang")
            .current_dir("/src/my proj");
        assert_eq!(
            cmd.to_remote_string().unwrap(),
            "export CC=clang; cd \"/src/my proj\"; make"
        );
    }

    #[test]
    fn env_rendering_is_deterministic() {
        let cmd = Command::new("true").env("B", "2").env("A", "1");
        assert_eq!(
            cmd.to_remote_string().unwrap(),
            "export A=1; export B=2; true"
        );
    }

    #[test]
    fn display_reads_like_a_command_line() {
        assert_eq!(Command::new("ls").arg("-la").display(), "ls -la");
        assert_eq!(Command::shell("exit 3").display(), "exit 3");
    }
}
