//! Image-customizer invocation through the container runtime

use std::path::{Path, PathBuf};
use std::time::Duration;

use command_runner::{local, Command, RunConfig};
use serde_yaml::{Mapping, Value};
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

/// Customization can pull packages and rewrite whole images.
const CUSTOMIZE_TIMEOUT: Duration = Duration::from_secs(3600);

/// The container runtime CLI, passed explicitly to whatever needs it.
#[derive(Debug, Clone)]
pub struct DockerCli {
    binary: String,
}

impl Default for DockerCli {
    fn default() -> Self {
        Self {
            binary: "docker".to_string(),
        }
    }
}

impl DockerCli {
    /// The `docker` binary from PATH.
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different CLI binary (e.g. `podman`).
    pub fn with_binary(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    /// Run a container to completion, streaming its output into the log,
    /// and fail if it exits non-zero. The container is removed afterwards.
    pub async fn run_container(
        &self,
        image: &str,
        args: &[String],
        volumes: &[String],
        privileged: bool,
        timeout: Duration,
    ) -> Result<()> {
        let mut command = Command::new(self.binary.as_str()).args(["run", "--rm"]);
        if privileged {
            command = command.arg("--privileged");
        }
        for volume in volumes {
            command = command.arg("-v").arg(volume.as_str());
        }
        command = command.arg(image);
        for arg in args {
            command = command.arg(arg.as_str());
        }

        let result = local::run_with(command, &RunConfig::with_timeout(timeout)).await?;
        result.check_exit_code()?;
        Ok(())
    }
}

/// The image-customizer tool, addressed by its container image URL.
#[derive(Debug, Clone)]
pub struct ImageCustomizer {
    container_image: String,
}

/// One customization run.
#[derive(Debug, Clone)]
pub struct CustomizeRequest {
    /// The image to customize
    pub base_image: PathBuf,
    /// The customizer YAML config to apply
    pub config_file: PathBuf,
    /// User granted SSH access in the produced image
    pub ssh_username: String,
    /// Public key installed for that user
    pub ssh_public_key: String,
    /// Output image format (e.g. `qcow2`)
    pub output_format: String,
    /// Where to write the customized image
    pub output_image: PathBuf,
}

impl ImageCustomizer {
    /// Address the customizer by its container image URL.
    pub fn new(container_image: impl Into<String>) -> Self {
        Self {
            container_image: container_image.into(),
        }
    }

    /// Customize `base_image` per the request, producing `output_image`.
    ///
    /// The caller's config is first rewritten to grant SSH access (server,
    /// user, key, sudoers), then the customizer container runs privileged
    /// with the image, config and output directories mounted under `/mic`.
    pub async fn customize(&self, docker: &DockerCli, request: &CustomizeRequest) -> Result<()> {
        let base_image_dir = host_dir(&request.base_image)?;
        let output_image_dir = host_dir(&request.output_image)?;

        let modified_config = enable_ssh_access(
            &request.config_file,
            &request.ssh_username,
            &request.ssh_public_key,
        )?;
        let config_dir = host_dir(modified_config.path())?;

        let container_base_image = Path::new("/mic/base_image").join(file_name(&request.base_image)?);
        let container_config = Path::new("/mic/config").join(file_name(modified_config.path())?);
        let container_output_image =
            Path::new("/mic/output_image").join(file_name(&request.output_image)?);

        let args = vec![
            "imagecustomizer".to_string(),
            "--image-file".to_string(),
            container_base_image.display().to_string(),
            "--config-file".to_string(),
            container_config.display().to_string(),
            "--build-dir".to_string(),
            "/mic/build".to_string(),
            "--output-image-format".to_string(),
            request.output_format.clone(),
            "--output-image-file".to_string(),
            container_output_image.display().to_string(),
            "--log-level".to_string(),
            "debug".to_string(),
        ];

        let volumes = vec![
            format!("{}:/mic/base_image:z", base_image_dir.display()),
            format!("{}:/mic/config:z", config_dir.display()),
            format!("{}:/mic/output_image:z", output_image_dir.display()),
            "/dev:/dev".to_string(),
        ];

        docker
            .run_container(&self.container_image, &args, &volumes, true, CUSTOMIZE_TIMEOUT)
            .await
        // The rewritten config is removed when `modified_config` drops.
    }
}

/// Rewrite a customizer config so the produced image accepts SSH logins:
/// install `openssh-server`, enable `sshd`, add `username` with the public
/// key, and drop a passwordless sudoers entry.
///
/// The result is written next to the original config and removed when the
/// returned handle drops.
pub fn enable_ssh_access(
    config_path: &Path,
    username: &str,
    ssh_public_key: &str,
) -> Result<NamedTempFile> {
    let config_text = std::fs::read_to_string(config_path)?;
    let mut config: Value = serde_yaml::from_str(&config_text)?;
    if config.is_null() {
        config = Value::Mapping(Mapping::new());
    }
    let root = config
        .as_mapping_mut()
        .ok_or_else(|| Error::config("customizer config must be a mapping"))?;

    let os = mapping_entry(root, "os")?;

    let packages = mapping_entry(os, "packages")?;
    sequence_entry(packages, "install")?.push("openssh-server".into());

    let services = mapping_entry(os, "services")?;
    sequence_entry(services, "enable")?.push("sshd".into());

    let mut user = Mapping::new();
    user.insert("name".into(), username.into());
    user.insert(
        "sshPublicKeys".into(),
        Value::Sequence(vec![ssh_public_key.into()]),
    );
    sequence_entry(os, "users")?.push(Value::Mapping(user));

    let mut sudoers = Mapping::new();
    sudoers.insert(
        "content".into(),
        format!("{username} ALL=(ALL) NOPASSWD:ALL").into(),
    );
    sudoers.insert(
        "destination".into(),
        format!("/etc/sudoers.d/{username}").into(),
    );
    sequence_entry(os, "additionalFiles")?.push(Value::Mapping(sudoers));

    let parent = config_path
        .parent()
        .ok_or_else(|| Error::config("config path has no parent directory"))?;
    let stem = file_name(config_path)?;
    let file = tempfile::Builder::new()
        .prefix(stem)
        .suffix(".yaml")
        .tempfile_in(parent)?;
    serde_yaml::to_writer(file.as_file(), &config)?;
    Ok(file)
}

/// Get-or-insert a mapping under `key`, replacing an explicit null.
fn mapping_entry<'a>(map: &'a mut Mapping, key: &str) -> Result<&'a mut Mapping> {
    let entry = map
        .entry(key.into())
        .or_insert_with(|| Value::Mapping(Mapping::new()));
    if entry.is_null() {
        *entry = Value::Mapping(Mapping::new());
    }
    entry
        .as_mapping_mut()
        .ok_or_else(|| Error::config(format!("'{key}' must be a mapping")))
}

/// Get-or-insert a sequence under `key`, replacing an explicit null.
fn sequence_entry<'a>(map: &'a mut Mapping, key: &str) -> Result<&'a mut Vec<Value>> {
    let entry = map
        .entry(key.into())
        .or_insert_with(|| Value::Sequence(Vec::new()));
    if entry.is_null() {
        *entry = Value::Sequence(Vec::new());
    }
    entry
        .as_sequence_mut()
        .ok_or_else(|| Error::config(format!("'{key}' must be a sequence")))
}

fn host_dir(path: &Path) -> Result<PathBuf> {
    let absolute = std::path::absolute(path)?;
    Ok(absolute
        .parent()
        .ok_or_else(|| Error::config(format!("'{}' has no parent directory", path.display())))?
        .to_path_buf())
}

fn file_name(path: &Path) -> Result<&std::ffi::OsStr> {
    path.file_name()
        .ok_or_else(|| Error::config(format!("'{}' has no file name", path.display())))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rewrite(config_text: &str) -> Value {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, config_text).unwrap();

        let rewritten = enable_ssh_access(&config_path, "tester", "ssh-ed25519 AAAA key").unwrap();
        let text = std::fs::read_to_string(rewritten.path()).unwrap();
        serde_yaml::from_str(&text).unwrap()
    }

    fn sequence<'a>(value: &'a Value, path: &[&str]) -> &'a Vec<Value> {
        let mut current = value;
        for key in path {
            current = current.get(*key).unwrap();
        }
        current.as_sequence().unwrap()
    }

    #[test]
    fn empty_config_gains_ssh_access() {
        let config = rewrite("");

        let install = sequence(&config, &["os", "packages", "install"]);
        assert_eq!(install, &vec![Value::from("openssh-server")]);

        let enable = sequence(&config, &["os", "services", "enable"]);
        assert_eq!(enable, &vec![Value::from("sshd")]);

        let users = sequence(&config, &["os", "users"]);
        assert_eq!(users.len(), 1);
        assert_eq!(users[0].get("name").unwrap(), &Value::from("tester"));
        assert_eq!(
            sequence(&users[0], &["sshPublicKeys"]),
            &vec![Value::from("ssh-ed25519 AAAA key")]
        );

        let files = sequence(&config, &["os", "additionalFiles"]);
        assert_eq!(
            files[0].get("destination").unwrap(),
            &Value::from("/etc/sudoers.d/tester")
        );
        assert_eq!(
            files[0].get("content").unwrap(),
            &Value::from("tester ALL=(ALL) NOPASSWD:ALL")
        );
    }

    #[test]
    fn existing_entries_are_kept() {
        let config = rewrite(
            "os:\n  packages:\n    install:\n      - vim\n  services:\n    enable:\n      - chronyd\n",
        );

        let install = sequence(&config, &["os", "packages", "install"]);
        assert_eq!(
            install,
            &vec![Value::from("vim"), Value::from("openssh-server")]
        );

        let enable = sequence(&config, &["os", "services", "enable"]);
        assert_eq!(enable, &vec![Value::from("chronyd"), Value::from("sshd")]);
    }

    #[test]
    fn null_sections_are_treated_as_empty() {
        let config = rewrite("os:\n  packages:\n");

        let install = sequence(&config, &["os", "packages", "install"]);
        assert_eq!(install, &vec![Value::from("openssh-server")]);
    }

    #[test]
    fn non_mapping_config_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "- just\n- a\n- list\n").unwrap();

        let err = enable_ssh_access(&config_path, "tester", "key").unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    #[test]
    fn rewritten_config_lives_beside_the_original() {
        let dir = tempfile::tempdir().unwrap();
        let config_path = dir.path().join("config.yaml");
        std::fs::write(&config_path, "os: {}\n").unwrap();

        let rewritten = enable_ssh_access(&config_path, "tester", "key").unwrap();
        assert_eq!(rewritten.path().parent(), config_path.parent());

        let path = rewritten.path().to_path_buf();
        drop(rewritten);
        assert!(!path.exists());
    }
}
