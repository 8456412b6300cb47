//! russh client handler
//!
//! Implements the `russh::client::Handler` trait for both hops of a jump
//! chain.

use tracing::debug;

/// SSH client handler for russh
///
/// Host keys are accepted as presented. Pinning is expected to be handled
/// outside this tool (e.g. by a trusted network path to the jump host).
#[derive(Debug, Clone)]
pub struct SshHandler {
    /// Host this handler was created for, used in log events
    host: String,
}

impl SshHandler {
    /// Create a new SSH handler for `host`
    pub fn new(host: impl Into<String>) -> Self {
        Self { host: host.into() }
    }
}

impl russh::client::Handler for SshHandler {
    type Error = anyhow::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &russh::keys::PublicKey,
    ) -> Result<bool, Self::Error> {
        debug!(
            "Accepting {} host key for {}",
            server_public_key.algorithm(),
            self.host
        );
        Ok(true)
    }
}
