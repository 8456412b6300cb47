//! Config resolution and session manager behaviour that needs no SSH server

use std::time::Duration;

use ssh_jump::ssh::RetryPolicy;
use ssh_jump::{ConfigResolver, ErrorKind, JumpError, SessionManager, SessionState};

fn write_config(content: &str) -> (tempfile::TempDir, ConfigResolver) {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("setting.cfg");
    std::fs::write(&path, content).unwrap();
    (dir, ConfigResolver::new(path))
}

#[test]
fn resolves_all_four_fields() {
    let (_dir, resolver) = write_config(
        "Host bastion\n  HostName 198.51.100.4\n  User netops\n  Port 2222\n  IdentityFile /keys/a\n  IdentityFile /keys/b\n",
    );

    let config = resolver.resolve("bastion").unwrap();
    assert_eq!(config.hostname, "198.51.100.4");
    assert_eq!(config.user, "netops");
    assert_eq!(config.port, 2222);
    assert_eq!(config.identity_files.len(), 2);
}

#[test]
fn unknown_host_is_config_missing() {
    let (_dir, resolver) = write_config("Host bastion\n  HostName 198.51.100.4\n");

    let err = resolver.resolve("other").unwrap_err();
    assert!(matches!(err, JumpError::ConfigMissing { key: "hostname", .. }));
    assert_eq!(err.kind(), ErrorKind::ConfigMissing);
}

#[tokio::test]
async fn remote_before_jump_is_connection_error() {
    let mut manager = SessionManager::new();

    let err = manager.open_remote("10.0.0.9", "root").await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert!(manager.remote().is_none());
}

#[tokio::test]
async fn close_on_never_opened_manager_is_noop() {
    let mut manager = SessionManager::new();
    manager.disconnect().await;
    manager.disconnect().await;
    assert_eq!(manager.state(), SessionState::Disconnected);
}

#[tokio::test]
async fn refused_jump_connection_surfaces_error() {
    let (_dir, resolver) = write_config(
        "Host bastion\n  HostName 127.0.0.1\n  User ops\n  Port 1\n  IdentityFile /keys/none\n",
    );
    let config = resolver.resolve("bastion").unwrap();

    let mut manager = SessionManager::new()
        .with_retry_policy(RetryPolicy::none())
        .with_connect_timeout(Duration::from_secs(5));

    let err = manager.open_jump("bastion", &config).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ConnectionError);
    assert_eq!(manager.state(), SessionState::Disconnected);

    // Still no remote hop possible
    assert!(manager.open_remote("10.0.0.9", "root").await.is_err());
}
