//! One complete jump-host lifecycle
//!
//! Resolve the jump host's config, open the jump session, open the remote
//! session through it, run the batch, and disconnect on every exit path.

use std::time::Duration;

use tracing::info;

use crate::config::{Config, CONNECTION_TIMEOUT_SECS, DEFAULT_SSH_PORT};
use crate::error::Result;
use crate::executor::CommandExecutor;
use crate::outcome::ResultList;
use crate::ssh::command::Command;
use crate::ssh::config::{ConfigResolver, HostConfig};
use crate::ssh::connection::{RetryPolicy, SessionManager};

/// Runs command batches through a jump host
#[derive(Debug, Clone)]
pub struct JumpWorkflow {
    resolver: ConfigResolver,
    executor: CommandExecutor,
    remote_user: String,
    remote_port: u16,
    retry: RetryPolicy,
    connect_timeout: Duration,
}

impl JumpWorkflow {
    pub fn new(resolver: ConfigResolver, executor: CommandExecutor) -> Self {
        Self {
            resolver,
            executor,
            remote_user: "root".to_string(),
            remote_port: DEFAULT_SSH_PORT,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
        }
    }

    /// Build a workflow from validated CLI configuration
    pub fn from_config(config: &Config, executor: CommandExecutor) -> Self {
        Self::new(ConfigResolver::new(&config.config_path), executor)
            .with_remote_user(&config.remote_user)
            .with_remote_port(config.remote_port)
            .with_connect_timeout(config.connect_timeout)
    }

    pub fn with_remote_user(mut self, user: impl Into<String>) -> Self {
        self.remote_user = user.into();
        self
    }

    pub fn with_remote_port(mut self, port: u16) -> Self {
        self.remote_port = port;
        self
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn executor(&self) -> &CommandExecutor {
        &self.executor
    }

    /// Run `commands` on `remote_host` through `jump_host`, or on the jump
    /// host itself when no remote host is given.
    ///
    /// Config and connection failures are returned as errors; command
    /// failures are entries of the returned list. Sessions are closed
    /// before this returns, whatever the outcome.
    pub async fn run(
        &self,
        jump_host: &str,
        remote_host: Option<&str>,
        commands: &[Command],
    ) -> Result<ResultList> {
        let host_config = self.resolver.resolve(jump_host)?;

        let mut sessions = SessionManager::new()
            .with_retry_policy(self.retry)
            .with_connect_timeout(self.connect_timeout);

        let result = self
            .run_in(&mut sessions, jump_host, &host_config, remote_host, commands)
            .await;

        sessions.disconnect().await;
        result
    }

    async fn run_in(
        &self,
        sessions: &mut SessionManager,
        jump_host: &str,
        host_config: &HostConfig,
        remote_host: Option<&str>,
        commands: &[Command],
    ) -> Result<ResultList> {
        let jump = sessions.open_jump(jump_host, host_config).await?;

        let Some(remote_host) = remote_host else {
            info!("Running {} command(s) on jump host {}", commands.len(), jump_host);
            return Ok(self.executor.run(jump, commands).await);
        };

        let remote = sessions
            .open_remote_at(remote_host, self.remote_port, &self.remote_user)
            .await?;

        info!("Running {} command(s) on {}", commands.len(), remote_host);
        Ok(self.executor.run(remote, commands).await)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{ErrorKind, JumpError};

    #[tokio::test]
    async fn test_missing_config_fails_before_connecting() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = JumpWorkflow::new(
            ConfigResolver::new(dir.path().join("setting.cfg")),
            CommandExecutor::new(),
        );
        let commands = vec![Command::new("uptime").unwrap()];

        let err = workflow
            .run("bastion", Some("10.0.0.5"), &commands)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConfigMissing);
    }

    #[tokio::test]
    async fn test_incomplete_host_entry_names_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setting.cfg");
        std::fs::write(&path, "Host bastion\n  HostName 127.0.0.1\n  User ops\n  Port 22\n")
            .unwrap();
        let workflow = JumpWorkflow::new(ConfigResolver::new(path), CommandExecutor::new());

        let err = workflow
            .run("bastion", None, &[Command::new("uptime").unwrap()])
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            JumpError::ConfigMissing {
                key: "identityfile",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_unreachable_jump_is_connection_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("setting.cfg");
        std::fs::write(
            &path,
            "Host bastion\n  HostName 127.0.0.1\n  User ops\n  Port 1\n  IdentityFile /nonexistent/key\n",
        )
        .unwrap();
        let workflow = JumpWorkflow::new(ConfigResolver::new(path), CommandExecutor::new())
            .with_retry_policy(RetryPolicy::none())
            .with_connect_timeout(Duration::from_secs(5));

        let err = workflow
            .run("bastion", Some("10.0.0.5"), &[Command::new("uptime").unwrap()])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ConnectionError);
    }
}
