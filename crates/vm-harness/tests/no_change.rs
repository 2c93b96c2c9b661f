//! End-to-end scenario: customize an image without changes, boot it in a
//! VM, and check it over SSH.
//!
//! Gated behind the `vm-tests` feature: it needs docker, libvirt and the
//! `VMTEST_*` environment variables described on
//! `vm_harness::HarnessConfig`.
#![cfg(feature = "vm-tests")]

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use command_runner::{local, Command, SshConfig, SshSession};
use vm_harness::{
    instance_name, CleanupStack, CustomizeRequest, DockerCli, HarnessConfig, ImageCustomizer,
    ScratchDir, SshKeyPair, TestVm, VirshConnection, VmSpec,
};

#[smol_potat::test]
async fn no_change_image_boots_and_accepts_ssh() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();

    let config = HarnessConfig::from_env().expect("VMTEST_* environment variables are required");
    let session_dir = ScratchDir::session(&config).unwrap();
    let name = instance_name("no-change");
    let test_dir = session_dir.child(&name).unwrap();

    // Everything acquired below lands in the stack so a failing scenario
    // still tears its resources down (unless the environment is kept).
    let mut cleanup = CleanupStack::new();
    let outcome = scenario(&config, &test_dir, &name, &mut cleanup).await;
    let teardown = cleanup.teardown(config.keep_environment).await;

    outcome.unwrap();
    teardown.unwrap();
}

async fn scenario(
    config: &HarnessConfig,
    test_dir: &ScratchDir,
    name: &str,
    cleanup: &mut CleanupStack,
) -> anyhow::Result<()> {
    let keys = SshKeyPair::load(&config.ssh_private_key)?;
    let username = std::env::var("USER").unwrap_or_else(|_| "root".to_string());

    let config_file = Path::new(env!("CARGO_MANIFEST_DIR")).join("testdata/nochange-config.yaml");
    let output_image = test_dir.file("image.qcow2");
    let diff_image = test_dir.file("image-diff.qcow2");

    ImageCustomizer::new(config.customizer_image.as_str())
        .customize(
            &DockerCli::new(),
            &CustomizeRequest {
                base_image: config.base_image.clone(),
                config_file,
                ssh_username: username.clone(),
                ssh_public_key: keys.public_key.clone(),
                output_format: "qcow2".to_string(),
                output_image: output_image.clone(),
            },
        )
        .await?;

    // A differencing disk keeps first-boot writes out of the image itself,
    // which makes manual debugging of the produced image easier.
    local::run(
        Command::new("qemu-img")
            .args(["create", "-F", "qcow2", "-f", "qcow2", "-b"])
            .arg(output_image.display().to_string())
            .arg(diff_image.display().to_string()),
    )
    .await?
    .check_exit_code()?;

    // The VM user must be able to write to the disk file.
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&diff_image, std::fs::Permissions::from_mode(0o666))?;
    }

    let hypervisor = Arc::new(VirshConnection::new(config.libvirt_uri.as_str()));
    let vm = TestVm::define(&VmSpec::new(name, 4096, 4, &diff_image), hypervisor).await?;
    cleanup.register(vm.clone());

    vm.start().await?;
    let address = vm.ip_address(Duration::from_secs(15)).await?;

    let known_hosts = test_dir.file("known_hosts");
    std::fs::write(&known_hosts, "")?;

    let mut ssh = SshSession::connect(
        SshConfig::new(address.as_str())
            .with_user(username.as_str())
            .with_identity_file(keys.private_key.as_path())
            .with_known_hosts_file(&known_hosts),
    )
    .await?;
    let result = ssh.run(Command::new("cat").arg("/etc/os-release")).await;
    ssh.close().await;
    result?.check_exit_code()?;

    Ok(())
}
