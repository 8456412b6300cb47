//! Open SSH sessions for the two hops of a jump chain
//!
//! A [`JumpSession`] owns its russh handle. A [`RemoteSession`] is tunnelled
//! through a jump session's transport and only keeps a weak reference to it;
//! every operation on the remote session first checks that the jump session
//! is still live.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle};
use russh::keys::PrivateKeyWithHashAlg;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::command::{abort_on_handle, exec_on_handle, Command, CommandOutput, OutputSink, RunError};
use super::config::HostConfig;
use super::handler::SshHandler;
use crate::error::{ErrorKind, JumpError, Result};
use crate::executor::CommandRunner;

/// State shared between a jump session and the remote sessions derived from it
struct JumpLink {
    host: String,
    user: String,
    identity_files: Vec<PathBuf>,
    handle: Handle<SshHandler>,
    closed: AtomicBool,
}

/// Something a derived session depends on staying open
trait Hop {
    fn is_live(&self) -> bool;
}

impl Hop for JumpLink {
    fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.handle.is_closed()
    }
}

/// Check that a derived session may still be used: it is not closed itself
/// and its parent hop is alive
fn ensure_usable<P: Hop>(
    host: &str,
    closed: &AtomicBool,
    parent: &Weak<P>,
) -> std::result::Result<(), RunError> {
    if closed.load(Ordering::SeqCst) {
        return Err(RunError::new(
            ErrorKind::TransportClosed,
            format!("Remote session to {} is closed", host),
        ));
    }
    if !parent.upgrade().is_some_and(|link| link.is_live()) {
        return Err(RunError::new(
            ErrorKind::TransportClosed,
            format!("Jump session carrying {} is closed", host),
        ));
    }
    Ok(())
}

/// Authenticated session to the jump host
pub struct JumpSession {
    link: Arc<JumpLink>,
}

impl JumpSession {
    /// Host identifier this session was opened for
    pub fn host(&self) -> &str {
        &self.link.host
    }

    /// Username used on the jump host
    pub fn user(&self) -> &str {
        &self.link.user
    }

    /// Identity files that authenticated this session, reused for the
    /// second hop
    pub fn identity_files(&self) -> &[PathBuf] {
        &self.link.identity_files
    }

    /// Whether the session is open and its transport is up
    pub fn is_live(&self) -> bool {
        self.link.is_live()
    }

    pub(crate) fn handle(&self) -> &Handle<SshHandler> {
        &self.link.handle
    }

    /// Disconnect; calling this on a closed session does nothing
    pub async fn close(&self) {
        if self.link.closed.swap(true, Ordering::SeqCst) {
            debug!("Jump session to {} already closed", self.link.host);
            return;
        }
        info!("Disconnecting jump session {}", self.link.host);
        if let Err(e) = self
            .link
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
        {
            debug!("Disconnect from {} reported: {}", self.link.host, e);
        }
    }
}

impl std::fmt::Debug for JumpSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JumpSession")
            .field("host", &self.link.host)
            .field("user", &self.link.user)
            .field("live", &self.is_live())
            .finish()
    }
}

/// Authenticated session to the remote host, reached through a jump session
pub struct RemoteSession {
    host: String,
    handle: Handle<SshHandler>,
    parent: Weak<JumpLink>,
    closed: AtomicBool,
}

impl RemoteSession {
    /// Host this session was opened for
    pub fn host(&self) -> &str {
        &self.host
    }

    /// Whether the jump session carrying this one is still live
    pub fn parent_is_live(&self) -> bool {
        self.parent.upgrade().is_some_and(|link| link.is_live())
    }

    /// Whether the session is open, its transport is up, and its jump
    /// session is live
    pub fn is_live(&self) -> bool {
        !self.closed.load(Ordering::SeqCst) && !self.handle.is_closed() && self.parent_is_live()
    }

    /// Disconnect; calling this on a closed session does nothing
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            debug!("Remote session to {} already closed", self.host);
            return;
        }
        info!("Disconnecting remote session {}", self.host);
        if !self.parent_is_live() {
            // Transport already gone with the jump session
            return;
        }
        if let Err(e) = self
            .handle
            .disconnect(russh::Disconnect::ByApplication, "", "")
            .await
        {
            debug!("Disconnect from {} reported: {}", self.host, e);
        }
    }

    fn ensure_usable(&self) -> std::result::Result<(), RunError> {
        ensure_usable(&self.host, &self.closed, &self.parent)
    }
}

impl std::fmt::Debug for RemoteSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RemoteSession")
            .field("host", &self.host)
            .field("live", &self.is_live())
            .finish()
    }
}

#[async_trait]
impl CommandRunner for RemoteSession {
    async fn run_command(
        &self,
        command: &Command,
        sink: Option<&dyn OutputSink>,
    ) -> std::result::Result<CommandOutput, RunError> {
        self.ensure_usable()?;
        exec_on_handle(&self.handle, &self.host, command, sink).await
    }

    async fn abort_command(&self, command: &Command) {
        if self.ensure_usable().is_ok() {
            abort_on_handle(&self.handle, command).await;
        }
    }
}

#[async_trait]
impl CommandRunner for JumpSession {
    async fn run_command(
        &self,
        command: &Command,
        sink: Option<&dyn OutputSink>,
    ) -> std::result::Result<CommandOutput, RunError> {
        if self.link.closed.load(Ordering::SeqCst) {
            return Err(RunError::new(
                ErrorKind::TransportClosed,
                format!("Jump session to {} is closed", self.link.host),
            ));
        }
        exec_on_handle(&self.link.handle, &self.link.host, command, sink).await
    }

    async fn abort_command(&self, command: &Command) {
        if self.is_live() {
            abort_on_handle(&self.link.handle, command).await;
        }
    }
}

/// Connect and authenticate directly to the jump host
pub(crate) async fn connect_jump(
    host: &str,
    config: &HostConfig,
    connect_timeout: Duration,
) -> Result<JumpSession> {
    let ssh_config = Arc::new(client::Config::default());
    let addr = (config.hostname.as_str(), config.port);

    let connect_result = timeout(
        connect_timeout,
        client::connect(ssh_config, addr, SshHandler::new(host)),
    )
    .await;

    let mut handle = match connect_result {
        Ok(Ok(handle)) => handle,
        Ok(Err(e)) => return Err(JumpError::connection(host, e.to_string())),
        Err(_) => {
            return Err(JumpError::connection(
                host,
                format!("Connection timeout after {}s", connect_timeout.as_secs()),
            ))
        }
    };

    authenticate(&mut handle, host, &config.user, &config.identity_files).await?;

    Ok(JumpSession {
        link: Arc::new(JumpLink {
            host: host.to_string(),
            user: config.user.clone(),
            identity_files: config.identity_files.clone(),
            handle,
            closed: AtomicBool::new(false),
        }),
    })
}

/// Open a second hop to `host:port` through `jump`
pub(crate) async fn connect_remote(
    jump: &JumpSession,
    host: &str,
    port: u16,
    username: &str,
    connect_timeout: Duration,
) -> Result<RemoteSession> {
    if !jump.is_live() {
        return Err(JumpError::connection(
            host,
            format!("jump session to {} is not open", jump.host()),
        ));
    }

    let channel = timeout(
        connect_timeout,
        jump.handle()
            .channel_open_direct_tcpip(host, port as u32, "127.0.0.1", 0),
    )
    .await
    .map_err(|_| {
        JumpError::connection(
            host,
            format!(
                "Timeout opening tunnel through {} after {}s",
                jump.host(),
                connect_timeout.as_secs()
            ),
        )
    })?
    .map_err(|e| {
        JumpError::connection(
            host,
            format!("Failed to open tunnel through {}: {}", jump.host(), e),
        )
    })?;

    let ssh_config = Arc::new(client::Config::default());
    let mut handle = timeout(
        connect_timeout,
        client::connect_stream(ssh_config, channel.into_stream(), SshHandler::new(host)),
    )
    .await
    .map_err(|_| {
        JumpError::connection(
            host,
            format!(
                "Timeout establishing SSH over tunnel after {}s",
                connect_timeout.as_secs()
            ),
        )
    })?
    .map_err(|e| JumpError::connection(host, e.to_string()))?;

    authenticate(&mut handle, host, username, jump.identity_files()).await?;

    Ok(RemoteSession {
        host: host.to_string(),
        handle,
        parent: Arc::downgrade(&jump.link),
        closed: AtomicBool::new(false),
    })
}

/// Try each identity file in order; the first accepted key wins
async fn authenticate(
    handle: &mut Handle<SshHandler>,
    host: &str,
    user: &str,
    identity_files: &[PathBuf],
) -> Result<()> {
    let mut last_error = None;

    for path in identity_files {
        debug!(
            "Attempting key authentication for '{}' on {} with {}",
            user,
            host,
            path.display()
        );

        let key = match russh::keys::load_secret_key(path, None) {
            Ok(key) => key,
            Err(e) => {
                warn!("Skipping unusable identity file {}: {}", path.display(), e);
                last_error = Some(JumpError::SshKey(format!(
                    "Failed to load {}: {}",
                    path.display(),
                    e
                )));
                continue;
            }
        };

        let hash_alg = handle
            .best_supported_rsa_hash()
            .await
            .map_err(|e| JumpError::connection(host, e.to_string()))?
            .flatten();

        let auth_result = handle
            .authenticate_publickey(user, PrivateKeyWithHashAlg::new(Arc::new(key), hash_alg))
            .await
            .map_err(|e| JumpError::auth(e.to_string()))?;

        if auth_result.success() {
            info!("Key authentication successful for {}@{}", user, host);
            return Ok(());
        }

        debug!("Key {} rejected by {}", path.display(), host);
        last_error = Some(JumpError::auth(format!(
            "Key {} rejected for {}@{}",
            path.display(),
            user,
            host
        )));
    }

    Err(last_error.unwrap_or_else(|| {
        JumpError::auth(format!("No identity files configured for {}", host))
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeHop {
        closed: AtomicBool,
    }

    impl Hop for FakeHop {
        fn is_live(&self) -> bool {
            !self.closed.load(Ordering::SeqCst)
        }
    }

    fn live_hop() -> Arc<FakeHop> {
        Arc::new(FakeHop {
            closed: AtomicBool::new(false),
        })
    }

    #[test]
    fn test_usable_while_parent_is_live() {
        let parent = live_hop();
        let closed = AtomicBool::new(false);
        assert!(ensure_usable("10.0.0.5", &closed, &Arc::downgrade(&parent)).is_ok());
    }

    #[test]
    fn test_unusable_after_parent_closed() {
        let parent = live_hop();
        let weak = Arc::downgrade(&parent);
        parent.closed.store(true, Ordering::SeqCst);

        let err = ensure_usable("10.0.0.5", &AtomicBool::new(false), &weak).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportClosed);
        assert!(err.message.contains("Jump session carrying 10.0.0.5"));
    }

    #[test]
    fn test_unusable_after_parent_dropped() {
        let parent = live_hop();
        let weak = Arc::downgrade(&parent);
        drop(parent);

        let err = ensure_usable("10.0.0.5", &AtomicBool::new(false), &weak).unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportClosed);
    }

    #[test]
    fn test_unusable_after_own_close() {
        let parent = live_hop();
        let err = ensure_usable("10.0.0.5", &AtomicBool::new(true), &Arc::downgrade(&parent))
            .unwrap_err();
        assert_eq!(err.kind, ErrorKind::TransportClosed);
        assert!(err.message.contains("Remote session to 10.0.0.5 is closed"));
    }
}
