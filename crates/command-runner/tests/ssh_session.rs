//! SSH session tests against a real host
//!
//! Gated behind the `ssh-tests` feature: they need a reachable SSH server,
//! configured through `VMTEST_SSH_HOST`, `VMTEST_SSH_USER` and
//! `VMTEST_SSH_KEY`.
#![cfg(feature = "ssh-tests")]

use std::time::Duration;

use command_runner::{Command, Error, RunConfig, SshConfig, SshSession};

fn test_config() -> SshConfig {
    let host = std::env::var("VMTEST_SSH_HOST").expect("VMTEST_SSH_HOST is required");
    let mut config = SshConfig::new(host);
    if let Ok(user) = std::env::var("VMTEST_SSH_USER") {
        config = config.with_user(user);
    }
    if let Ok(key) = std::env::var("VMTEST_SSH_KEY") {
        config = config.with_identity_file(key);
    }
    config
}

#[smol_potat::test]
async fn echo_over_the_session() {
    let mut session = SshSession::connect(test_config()).await.unwrap();

    let result = session.run(Command::new("echo").arg("hi")).await.unwrap();
    assert_eq!(result.stdout, "hi\n");
    assert_eq!(result.exit_code, 0);
    assert!(!result.timed_out);

    session.close().await;
}

#[smol_potat::test]
async fn remote_exit_status_is_propagated() {
    let mut session = SshSession::connect(test_config()).await.unwrap();

    let result = session.run(Command::shell("exit 42")).await.unwrap();
    assert_eq!(result.exit_code, 42);
    assert!(matches!(
        result.check_exit_code().unwrap_err(),
        Error::NonZeroExit { code: 42, .. }
    ));

    session.close().await;
}

#[smol_potat::test]
async fn remote_timeout_closes_the_channel() {
    let mut session = SshSession::connect(test_config()).await.unwrap();

    let result = session
        .run_with(
            Command::new("sleep").arg("30"),
            &RunConfig::with_timeout(Duration::from_millis(200)),
        )
        .await
        .unwrap();
    assert!(result.timed_out);
    assert_eq!(result.exit_code, 1);
    assert!(matches!(
        result.check_exit_code().unwrap_err(),
        Error::SessionTimeout { .. }
    ));

    // The session survives a closed channel.
    let result = session.run(Command::new("true")).await.unwrap();
    assert_eq!(result.exit_code, 0);

    session.close().await;
}

#[smol_potat::test]
async fn file_transfer_round_trips() {
    let mut session = SshSession::connect(test_config()).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    let source = dir.path().join("source.txt");
    let returned = dir.path().join("returned.txt");
    std::fs::write(&source, "payload\n").unwrap();

    let remote = std::path::Path::new("/tmp/command-runner-ssh-test.txt");
    session.put_file(&source, remote).await.unwrap();
    session.get_file(remote, &returned).await.unwrap();

    assert_eq!(std::fs::read_to_string(&returned).unwrap(), "payload\n");

    session.close().await;
}
