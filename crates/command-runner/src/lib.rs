//! Unified local and remote command execution
//!
//! This crate runs commands as local child processes or over an established
//! SSH session, streaming and capturing stdout/stderr concurrently while the
//! caller waits with a bound. Both transports report the same
//! [`ExecutionResult`], so test code can treat a command the same way
//! regardless of where it ran.

#![warn(missing_docs)]

pub mod command;
pub mod config;
pub mod drainer;
pub mod error;
pub mod local;
pub mod result;
pub mod ssh;

pub use command::Command;
pub use config::RunConfig;
pub use drainer::StreamDrainer;
pub use error::{Error, Result};
pub use local::LocalProcess;
pub use result::ExecutionResult;
pub use ssh::{SshConfig, SshProcess, SshSession};
