//! Test environment wiring: configuration, scratch space, keys

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Harness configuration, read from `VMTEST_*` environment variables.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Path to the base qcow2 image under test (`VMTEST_BASE_IMAGE`)
    pub base_image: PathBuf,
    /// Image-customizer container URL (`VMTEST_CUSTOMIZER_IMAGE`)
    pub customizer_image: String,
    /// SSH private key used to reach the VMs (`VMTEST_SSH_KEY`)
    pub ssh_private_key: PathBuf,
    /// Keep every created resource for diagnosis (`VMTEST_KEEP_ENVIRONMENT`)
    pub keep_environment: bool,
    /// Where scratch directories are created (`VMTEST_BUILD_DIR`)
    pub build_dir: PathBuf,
    /// Libvirt connection URI (`VMTEST_LIBVIRT_URI`)
    pub libvirt_uri: String,
}

impl HarnessConfig {
    /// Read the configuration from the environment.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            base_image: PathBuf::from(required_env("VMTEST_BASE_IMAGE")?),
            customizer_image: required_env("VMTEST_CUSTOMIZER_IMAGE")?,
            ssh_private_key: PathBuf::from(required_env("VMTEST_SSH_KEY")?),
            keep_environment: env::var("VMTEST_KEEP_ENVIRONMENT")
                .map(|value| !value.is_empty() && value != "0")
                .unwrap_or(false),
            build_dir: env::var("VMTEST_BUILD_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("build")),
            libvirt_uri: env::var("VMTEST_LIBVIRT_URI")
                .unwrap_or_else(|_| "qemu:///system".to_string()),
        })
    }
}

fn required_env(name: &str) -> Result<String> {
    env::var(name).map_err(|_| Error::MissingEnv {
        name: name.to_string(),
    })
}

/// A directory for test artifacts, removed on drop unless kept.
///
/// Not the system temp dir: image files are large and the VM user must be
/// able to reach them, so scratch space lives under the build dir with group
/// access.
pub struct ScratchDir {
    path: PathBuf,
    keep: bool,
}

impl ScratchDir {
    /// Create the session scratch dir under the configured build dir.
    pub fn session(config: &HarnessConfig) -> Result<ScratchDir> {
        fs::create_dir_all(&config.build_dir)?;
        let dir = tempfile::Builder::new()
            .prefix("vmtests-")
            .tempdir_in(&config.build_dir)?;
        // Removal is this type's job; named children must survive the
        // TempDir handle.
        let path = dir.keep();
        set_shared_permissions(&path)?;
        Ok(ScratchDir {
            path,
            keep: config.keep_environment,
        })
    }

    /// Create a named child directory, typically per test instance.
    pub fn child(&self, name: &str) -> Result<ScratchDir> {
        let path = self.path.join(name);
        fs::create_dir(&path)?;
        set_shared_permissions(&path)?;
        Ok(ScratchDir {
            path,
            keep: self.keep,
        })
    }

    /// The directory path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// A path for a file inside the directory.
    pub fn file(&self, name: &str) -> PathBuf {
        self.path.join(name)
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if !self.keep {
            let _ = fs::remove_dir_all(&self.path);
        }
    }
}

#[cfg(unix)]
fn set_shared_permissions(path: &Path) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o775))?;
    Ok(())
}

#[cfg(not(unix))]
fn set_shared_permissions(_path: &Path) -> Result<()> {
    Ok(())
}

/// A unique instance name: the test name plus a random 5-letter suffix.
pub fn instance_name(test_name: &str) -> String {
    let suffix: String = (0..5)
        .map(|_| (b'A' + fastrand::u8(0..26)) as char)
        .collect();
    format!("{test_name}-{suffix}")
}

/// An SSH key pair located by its private-key file.
#[derive(Debug, Clone)]
pub struct SshKeyPair {
    /// Path to the private key
    pub private_key: PathBuf,
    /// Contents of the sibling `.pub` file, trimmed
    pub public_key: String,
}

impl SshKeyPair {
    /// Load the pair from a private-key path; the public key is read from
    /// the `.pub` file next to it.
    pub fn load(private_key: impl Into<PathBuf>) -> Result<SshKeyPair> {
        let private_key = private_key.into();
        let mut public_key_path = private_key.clone().into_os_string();
        public_key_path.push(".pub");
        let public_key = fs::read_to_string(&public_key_path)?.trim().to_string();
        Ok(SshKeyPair {
            private_key,
            public_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_harness_config(build_dir: &Path, keep: bool) -> HarnessConfig {
        HarnessConfig {
            base_image: PathBuf::from("/images/base.qcow2"),
            customizer_image: "example.com/customizer:latest".to_string(),
            ssh_private_key: PathBuf::from("/keys/id_ed25519"),
            keep_environment: keep,
            build_dir: build_dir.to_path_buf(),
            libvirt_uri: "qemu:///system".to_string(),
        }
    }

    #[test]
    fn instance_names_get_unique_uppercase_suffixes() {
        let name = instance_name("no-change");
        let suffix = name.strip_prefix("no-change-").unwrap();
        assert_eq!(suffix.len(), 5);
        assert!(suffix.chars().all(|c| c.is_ascii_uppercase()));
    }

    #[test]
    fn scratch_dirs_are_removed_on_drop() {
        let build = tempfile::tempdir().unwrap();
        let config = test_harness_config(build.path(), false);

        let session = ScratchDir::session(&config).unwrap();
        let session_path = session.path().to_path_buf();
        let child = session.child("case-ABCDE").unwrap();
        let child_path = child.path().to_path_buf();
        assert!(child_path.starts_with(&session_path));

        drop(child);
        assert!(!child_path.exists());
        drop(session);
        assert!(!session_path.exists());
    }

    #[test]
    fn kept_scratch_dirs_survive_drop() {
        let build = tempfile::tempdir().unwrap();
        let config = test_harness_config(build.path(), true);

        let session = ScratchDir::session(&config).unwrap();
        let session_path = session.path().to_path_buf();
        drop(session);

        assert!(session_path.exists());
    }

    #[test]
    fn key_pair_reads_the_sibling_public_key() {
        let dir = tempfile::tempdir().unwrap();
        let private = dir.path().join("id_ed25519");
        std::fs::write(&private, "PRIVATE").unwrap();
        std::fs::write(dir.path().join("id_ed25519.pub"), "ssh-ed25519 AAAA key\n").unwrap();

        let pair = SshKeyPair::load(&private).unwrap();
        assert_eq!(pair.private_key, private);
        assert_eq!(pair.public_key, "ssh-ed25519 AAAA key");
    }
}
