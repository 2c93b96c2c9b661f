//! # VM test harness
//!
//! Building blocks for end-to-end tests that customize an OS image, boot it
//! in a libvirt virtual machine, and drive it over SSH: VM descriptor
//! construction, VM lifecycle management, image-customizer invocation, and a
//! cleanup registry that guarantees ordered, failure-tolerant teardown of
//! everything a test acquired.

#![warn(missing_docs)]

pub mod cleanup;
pub mod customizer;
pub mod domain;
pub mod error;
pub mod fixture;
pub mod hypervisor;
pub mod vm;

pub use cleanup::{CleanupStack, Closeable, TeardownError, TeardownFailure};
pub use customizer::{CustomizeRequest, DockerCli, ImageCustomizer};
pub use domain::{domain_xml, VmSpec};
pub use error::{Error, Result};
pub use fixture::{instance_name, HarnessConfig, ScratchDir, SshKeyPair};
pub use hypervisor::{Hypervisor, VirshConnection};
pub use vm::TestVm;
