//! The hypervisor seam and its virsh implementation

use std::io::Write;

use async_trait::async_trait;
use command_runner::{local, Command, ExecutionResult};
use tempfile::NamedTempFile;

use crate::error::Result;

/// Operations the harness needs from a hypervisor.
///
/// Kept behind a trait so VM lifecycle logic can be exercised against an
/// in-memory fake.
#[async_trait]
pub trait Hypervisor: Send + Sync {
    /// Register a domain from its XML descriptor without starting it.
    async fn define_domain(&self, xml: &str) -> Result<()>;

    /// Create the domain in a suspended state.
    async fn start_paused(&self, name: &str) -> Result<()>;

    /// Resume a suspended domain.
    async fn resume(&self, name: &str) -> Result<()>;

    /// Forcibly stop a running domain.
    async fn destroy(&self, name: &str) -> Result<()>;

    /// Remove the domain definition and its transient artifacts
    /// (managed-save state, snapshot metadata, NVRAM, checkpoint metadata).
    async fn undefine(&self, name: &str) -> Result<()>;

    /// Addresses currently leased to the domain by the DHCP server.
    async fn lease_addresses(&self, name: &str) -> Result<Vec<String>>;
}

/// A libvirt connection driven through the `virsh` CLI.
pub struct VirshConnection {
    uri: String,
}

impl VirshConnection {
    /// Connect to the given libvirt URI (e.g. `qemu:///system`).
    pub fn new(uri: impl Into<String>) -> Self {
        Self { uri: uri.into() }
    }

    /// Connection to the system QEMU/KVM instance.
    pub fn system() -> Self {
        Self::new("qemu:///system")
    }

    /// The libvirt URI this connection targets.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    async fn virsh<I, S>(&self, args: I) -> Result<ExecutionResult>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let command = Command::new("virsh")
            .arg("-c")
            .arg(self.uri.as_str())
            .args(args);
        let result = local::run(command).await?;
        result.check_exit_code()?;
        Ok(result)
    }
}

#[async_trait]
impl Hypervisor for VirshConnection {
    async fn define_domain(&self, xml: &str) -> Result<()> {
        let mut file = NamedTempFile::new()?;
        file.write_all(xml.as_bytes())?;
        file.flush()?;
        let path = file.path().display().to_string();
        self.virsh(["define", path.as_str()]).await?;
        Ok(())
    }

    async fn start_paused(&self, name: &str) -> Result<()> {
        self.virsh(["start", name, "--paused"]).await?;
        Ok(())
    }

    async fn resume(&self, name: &str) -> Result<()> {
        self.virsh(["resume", name]).await?;
        Ok(())
    }

    async fn destroy(&self, name: &str) -> Result<()> {
        self.virsh(["destroy", name]).await?;
        Ok(())
    }

    async fn undefine(&self, name: &str) -> Result<()> {
        self.virsh([
            "undefine",
            name,
            "--managed-save",
            "--snapshots-metadata",
            "--nvram",
            "--checkpoints-metadata",
        ])
        .await?;
        Ok(())
    }

    async fn lease_addresses(&self, name: &str) -> Result<Vec<String>> {
        let result = self
            .virsh(["-q", "domifaddr", name, "--source", "lease"])
            .await?;
        Ok(parse_lease_table(&result.stdout))
    }
}

/// Extract the addresses from `virsh domifaddr` output, with or without the
/// table header, dropping the CIDR suffix.
fn parse_lease_table(output: &str) -> Vec<String> {
    let mut addresses = Vec::new();
    for line in output.lines() {
        let columns: Vec<&str> = line.split_whitespace().collect();
        if columns.len() < 4 || columns[0] == "Name" || columns[0].starts_with('-') {
            continue;
        }
        let address = columns[3].split('/').next().unwrap_or(columns[3]);
        addresses.push(address.to_string());
    }
    addresses
}
