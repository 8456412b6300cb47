//! SSH Session Manager
//!
//! Owns the two-hop session lifecycle: a jump session opened directly, and
//! a remote session tunnelled through it. The manager is the only component
//! that closes sessions; executors only borrow them.

use std::future::Future;
use std::time::Duration;

use tracing::{debug, error, info, warn};

use super::config::HostConfig;
use super::session::{connect_jump, connect_remote, JumpSession, RemoteSession};
use crate::config::{CONNECTION_TIMEOUT_SECS, CONNECT_RETRIES, DEFAULT_SSH_PORT, RETRY_INTERVAL_SECS};
use crate::error::{JumpError, Result};

/// Lifecycle state of a [`SessionManager`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Disconnected,
    JumpConnecting,
    JumpConnected,
    RemoteConnecting,
    RemoteConnected,
    Disconnecting,
}

/// Fixed retry budget for opening the jump session
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempts after the first one
    pub retries: u32,

    /// Pause between attempts
    pub interval: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            retries: CONNECT_RETRIES,
            interval: Duration::from_secs(RETRY_INTERVAL_SECS),
        }
    }
}

impl RetryPolicy {
    /// No retries at all
    pub fn none() -> Self {
        Self {
            retries: 0,
            interval: Duration::ZERO,
        }
    }

    /// Run `op` until it succeeds or the budget is spent, returning the last
    /// error
    pub async fn run<F, Fut, T>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let mut attempt = 0;
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "{} failed: {}. Retrying in {}s ({}/{})",
                        what,
                        e,
                        self.interval.as_secs(),
                        attempt,
                        self.retries
                    );
                    tokio::time::sleep(self.interval).await;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Owns the jump and remote sessions of one lifecycle
///
/// Not meant to be shared between concurrent callers; each lifecycle gets
/// its own manager.
pub struct SessionManager {
    state: SessionState,
    jump: Option<JumpSession>,
    remote: Option<RemoteSession>,
    retry: RetryPolicy,
    connect_timeout: Duration,
}

impl SessionManager {
    /// Create a disconnected manager with the default retry budget
    pub fn new() -> Self {
        Self {
            state: SessionState::Disconnected,
            jump: None,
            remote: None,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(CONNECTION_TIMEOUT_SECS),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_connect_timeout(mut self, connect_timeout: Duration) -> Self {
        self.connect_timeout = connect_timeout;
        self
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn jump(&self) -> Option<&JumpSession> {
        self.jump.as_ref()
    }

    pub fn remote(&self) -> Option<&RemoteSession> {
        self.remote.as_ref()
    }

    /// Open the jump session, retrying within the fixed budget
    pub async fn open_jump(&mut self, host: &str, config: &HostConfig) -> Result<&JumpSession> {
        if self.jump.is_some() {
            return Err(JumpError::connection(
                host,
                "a jump session is already open; disconnect first",
            ));
        }

        self.state = SessionState::JumpConnecting;
        info!(
            "Connecting SSH session to {}@{} ({}:{})",
            config.user, host, config.hostname, config.port
        );

        let connect_timeout = self.connect_timeout;
        let result = self
            .retry
            .run("Jump host connection", || {
                connect_jump(host, config, connect_timeout)
            })
            .await;

        match result {
            Ok(session) => {
                self.state = SessionState::JumpConnected;
                info!("Successfully connected to jump host {}", host);
                Ok(self.jump.insert(session))
            }
            Err(e) => {
                self.state = SessionState::Disconnected;
                error!("Failed to connect to jump host {}: {}", host, e);
                Err(e)
            }
        }
    }

    /// Open the remote session on port 22 through the live jump session
    pub async fn open_remote(&mut self, host: &str, username: &str) -> Result<&RemoteSession> {
        self.open_remote_at(host, DEFAULT_SSH_PORT, username).await
    }

    /// Open the remote session through the live jump session. Never retried.
    pub async fn open_remote_at(
        &mut self,
        host: &str,
        port: u16,
        username: &str,
    ) -> Result<&RemoteSession> {
        let jump = match self.jump.as_ref() {
            Some(jump) if jump.is_live() => jump,
            _ => {
                error!("Cannot open remote session to {}: no live jump session", host);
                return Err(JumpError::connection(host, "jump session is not open"));
            }
        };

        if self.remote.is_some() {
            return Err(JumpError::connection(
                host,
                "a remote session is already open; close it first",
            ));
        }

        self.state = SessionState::RemoteConnecting;
        info!("Connecting SSH session to remote host {}@{}", username, host);

        match connect_remote(jump, host, port, username, self.connect_timeout).await {
            Ok(session) => {
                self.state = SessionState::RemoteConnected;
                info!("Successfully connected to remote host {}", host);
                Ok(self.remote.insert(session))
            }
            Err(e) => {
                // The jump session stays usable after a failed second hop
                self.state = SessionState::JumpConnected;
                error!("Failed to connect to remote host {}: {}", host, e);
                Err(e)
            }
        }
    }

    /// Close the remote session if one is open
    pub async fn close_remote(&mut self) {
        let Some(remote) = self.remote.take() else {
            debug!("No remote session to close");
            return;
        };

        self.state = SessionState::Disconnecting;
        remote.close().await;
        self.state = if self.jump.is_some() {
            SessionState::JumpConnected
        } else {
            SessionState::Disconnected
        };
    }

    /// Close the jump session, closing the remote session first
    pub async fn close_jump(&mut self) {
        self.close_remote().await;

        let Some(jump) = self.jump.take() else {
            debug!("No jump session to close");
            self.state = SessionState::Disconnected;
            return;
        };

        self.state = SessionState::Disconnecting;
        jump.close().await;
        self.state = SessionState::Disconnected;
    }

    /// Close both hops. Safe to call any number of times.
    pub async fn disconnect(&mut self) {
        self.close_jump().await;
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for SessionManager {
    /// Covers lifecycles that never reached `disconnect` (cancelled future,
    /// panic): both hops are closed in order on a background task. Without a
    /// runtime the russh handles are simply dropped, which tears the
    /// transports down without a disconnect message.
    fn drop(&mut self) {
        let remote = self.remote.take();
        let jump = self.jump.take();
        if remote.is_none() && jump.is_none() {
            return;
        }

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                warn!("SessionManager dropped with open sessions; disconnecting in background");
                runtime.spawn(async move {
                    if let Some(remote) = remote {
                        remote.close().await;
                    }
                    if let Some(jump) = jump {
                        jump.close().await;
                    }
                });
            }
            Err(_) => {
                warn!("SessionManager dropped with open sessions outside a runtime; releasing transports");
            }
        }
    }
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("state", &self.state)
            .field("jump", &self.jump)
            .field("remote", &self.remote)
            .field("retry", &self.retry)
            .finish()
    }
}
