//! Ordered, failure-tolerant teardown of acquired test resources

use std::fmt;

use async_trait::async_trait;
use command_runner::SshSession;
use tracing::{debug, warn};

/// A resource that can be released at the end of a test.
#[async_trait]
pub trait Closeable: Send {
    /// Short description used to attribute teardown failures.
    fn label(&self) -> String;

    /// Release the resource. Must be harmless to call more than once.
    async fn close(&mut self) -> anyhow::Result<()>;
}

/// Ordered registry of resources a test has acquired.
///
/// Resources are appended as they are acquired and closed in reverse order
/// at teardown, so anything depending on an earlier resource is released
/// before its dependency.
#[derive(Default)]
pub struct CleanupStack {
    resources: Vec<Box<dyn Closeable>>,
}

impl CleanupStack {
    /// Create an empty stack
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a resource for teardown.
    pub fn register(&mut self, resource: impl Closeable + 'static) {
        self.resources.push(Box::new(resource));
    }

    /// Number of registered resources
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    /// Whether the stack holds no resources
    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    /// Close every registered resource in reverse registration order.
    ///
    /// With `preserve` set nothing is closed, leaving the environment intact
    /// for diagnosis. Otherwise every resource gets a close attempt
    /// regardless of earlier failures; the failures are collected and
    /// returned together. Draining empties the stack, so a second call is a
    /// no-op.
    pub async fn teardown(&mut self, preserve: bool) -> std::result::Result<(), TeardownError> {
        if preserve {
            debug!("preserving {} registered resource(s)", self.resources.len());
            return Ok(());
        }

        let mut failures = Vec::new();
        while let Some(mut resource) = self.resources.pop() {
            let label = resource.label();
            debug!("closing {}", label);
            if let Err(error) = resource.close().await {
                warn!("failed to close {}: {:#}", label, error);
                failures.push(TeardownFailure {
                    resource: label,
                    error,
                });
            }
        }

        if failures.is_empty() {
            Ok(())
        } else {
            Err(TeardownError { failures })
        }
    }
}

/// One resource that failed to close during teardown
#[derive(Debug)]
pub struct TeardownFailure {
    /// Label of the resource that failed
    pub resource: String,
    /// The failure itself
    pub error: anyhow::Error,
}

/// Aggregate error carrying every close failure from one teardown pass
#[derive(Debug)]
pub struct TeardownError {
    /// All collected failures, in close order
    pub failures: Vec<TeardownFailure>,
}

impl fmt::Display for TeardownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "failed to close {} resource(s)", self.failures.len())?;
        for failure in &self.failures {
            write!(f, "; {}: {:#}", failure.resource, failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for TeardownError {}

#[async_trait]
impl Closeable for SshSession {
    fn label(&self) -> String {
        format!("ssh session to {}", self.host())
    }

    async fn close(&mut self) -> anyhow::Result<()> {
        SshSession::close(self).await;
        Ok(())
    }
}
