//! VM lifecycle: define, start, discover, destroy

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::cleanup::Closeable;
use crate::domain::{domain_xml, VmSpec};
use crate::error::{Error, Result};
use crate::hypervisor::Hypervisor;

const LEASE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// One virtual machine instance, from definition to teardown.
///
/// Cloning shares the underlying domain, so a test can keep a handle while a
/// clone sits in the cleanup registry.
#[derive(Clone)]
pub struct TestVm {
    name: String,
    hypervisor: Arc<dyn Hypervisor>,
}

impl TestVm {
    /// Define the domain described by `spec` against the hypervisor.
    pub async fn define(spec: &VmSpec, hypervisor: Arc<dyn Hypervisor>) -> Result<TestVm> {
        let xml = domain_xml(spec)?;
        hypervisor.define_domain(&xml).await?;
        Ok(TestVm {
            name: spec.name.clone(),
            hypervisor,
        })
    }

    /// The domain name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Start the instance.
    ///
    /// It is created suspended first, giving a console observer the chance
    /// to attach before the first instruction runs, then resumed.
    pub async fn start(&self) -> Result<()> {
        self.hypervisor.start_paused(&self.name).await?;
        self.hypervisor.resume(&self.name).await
    }

    /// Wait for the instance to obtain a DHCP lease and return its address.
    ///
    /// Polls the hypervisor's lease table; the first leased address is
    /// returned as soon as one appears. Past the deadline with no lease the
    /// guest most likely failed to boot or bring up its network, and
    /// [`Error::AddressUnavailable`] names the instance.
    pub async fn ip_address(&self, timeout: Duration) -> Result<String> {
        let started = Instant::now();
        loop {
            let mut addresses = self.hypervisor.lease_addresses(&self.name).await?;
            if !addresses.is_empty() {
                return Ok(addresses.remove(0));
            }
            if started.elapsed() > timeout {
                return Err(Error::AddressUnavailable {
                    name: self.name.clone(),
                    timeout,
                });
            }
            smol::Timer::after(LEASE_POLL_INTERVAL).await;
        }
    }
}

#[async_trait]
impl Closeable for TestVm {
    fn label(&self) -> String {
        format!("vm '{}'", self.name)
    }

    /// Best-effort stop and undefine; failures are logged, never returned.
    async fn close(&mut self) -> anyhow::Result<()> {
        debug!("stopping vm: {}", self.name);
        if let Err(err) = self.hypervisor.destroy(&self.name).await {
            warn!("vm stop failed for '{}': {}", self.name, err);
        }

        debug!("deleting vm: {}", self.name);
        if let Err(err) = self.hypervisor.undefine(&self.name).await {
            warn!("vm delete failed for '{}': {}", self.name, err);
        }

        Ok(())
    }
}
