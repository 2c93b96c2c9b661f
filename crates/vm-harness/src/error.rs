//! Error types for the VM harness

use std::time::Duration;
use thiserror::Error;

/// Error type for VM lifecycle and harness operations
#[derive(Error, Debug)]
pub enum Error {
    /// No DHCP lease appeared for an instance before its deadline
    #[error("no IP address found for '{name}' after {timeout:?}; the guest OS may have failed to boot")]
    AddressUnavailable {
        /// The instance that never obtained a lease
        name: String,
        /// The deadline that was exceeded
        timeout: Duration,
    },

    /// More disks were requested than the device naming scheme supports
    #[error("unsupported disk index {index} for bus prefix '{prefix}'")]
    DiskIndexExhausted {
        /// The bus prefix whose namespace ran out
        prefix: String,
        /// The first index that could not be named
        index: usize,
    },

    /// A required environment variable is not set
    #[error("environment variable {name} is required")]
    MissingEnv {
        /// The missing variable
        name: String,
    },

    /// A configuration document has an unusable shape
    #[error("invalid config: {reason}")]
    Config {
        /// Why the configuration was rejected
        reason: String,
    },

    /// Command execution error
    #[error(transparent)]
    Exec(#[from] command_runner::Error),

    /// YAML error
    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    /// XML emission error
    #[error(transparent)]
    Xml(#[from] quick_xml::Error),

    /// I/O error
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a config error
    pub fn config(reason: impl Into<String>) -> Self {
        Self::Config {
            reason: reason.into(),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
