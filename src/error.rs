//! Error types for ssh-jump
//!
//! Two layers live here. [`JumpError`] is returned for failures that happen
//! before any command runs (config resolution, session open). [`ErrorKind`]
//! is the classification tag carried as data by failed command outcomes.

use serde::Serialize;
use thiserror::Error;

/// Main error type for config resolution and session management
#[derive(Debug, Error)]
pub enum JumpError {
    /// A required key is absent from the host's config entry
    #[error("SSH config for host '{host}' does not contain a '{key}' value")]
    ConfigMissing { host: String, key: &'static str },

    /// The config source could not be read at all
    #[error("SSH config unavailable at {path}: {reason}")]
    ConfigUnavailable { path: String, reason: String },

    /// Configuration error (bad CLI arguments, malformed values)
    #[error("Configuration error: {0}")]
    Config(String),

    /// SSH connection to a jump or remote host failed
    #[error("SSH connection to {host} failed: {message}")]
    Connection { host: String, message: String },

    /// Every identity file was rejected or unusable
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// SSH key loading error
    #[error("SSH key error: {0}")]
    SshKey(String),

    /// Invalid parameters provided
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias using JumpError
pub type Result<T> = std::result::Result<T, JumpError>;

impl JumpError {
    /// Create a missing-key error for a host
    pub fn config_missing(host: impl Into<String>, key: &'static str) -> Self {
        JumpError::ConfigMissing {
            host: host.into(),
            key,
        }
    }

    /// Create a config-unavailable error from the source path and cause
    pub fn config_unavailable(path: impl AsRef<std::path::Path>, reason: impl ToString) -> Self {
        JumpError::ConfigUnavailable {
            path: path.as_ref().display().to_string(),
            reason: reason.to_string(),
        }
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        JumpError::Config(msg.into())
    }

    /// Create a connection error for a host
    pub fn connection(host: impl Into<String>, msg: impl Into<String>) -> Self {
        JumpError::Connection {
            host: host.into(),
            message: msg.into(),
        }
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        JumpError::Authentication(msg.into())
    }

    /// Create an invalid params error from a string
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        JumpError::InvalidParams(msg.into())
    }

    /// Classify this error into the shared [`ErrorKind`] taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            JumpError::ConfigMissing { .. }
            | JumpError::ConfigUnavailable { .. }
            | JumpError::Config(_) => ErrorKind::ConfigMissing,
            JumpError::Connection { .. } | JumpError::Authentication(_) | JumpError::SshKey(_) => {
                ErrorKind::ConnectionError
            }
            JumpError::InvalidParams(_) | JumpError::Io(_) => ErrorKind::Unknown,
        }
    }
}

/// Why a command or a connection attempt did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Required config field absent or config unreadable
    ConfigMissing,
    /// Jump or remote session failed to authenticate/open
    ConnectionError,
    /// Command exceeded its execution time budget
    Timeout,
    /// Session was already closed when the command was attempted
    TransportClosed,
    /// Session dropped while the command was running
    ConnectionLost,
    /// Remote side closed the output stream before reporting an exit status
    EndOfStream,
    /// Command completed with a non-zero status
    NonZeroExit,
    /// External cancellation or remote SIGINT
    Interrupted,
    /// Anything the transport reported that fits nowhere else
    Unknown,
}

impl ErrorKind {
    /// Whether a command failure of this kind ends the batch.
    ///
    /// `NonZeroExit` never stops on its own; the per-command
    /// `stop_on_non_zero_exit` option decides that in the executor.
    pub fn stops_batch(self) -> bool {
        !matches!(self, ErrorKind::EndOfStream | ErrorKind::NonZeroExit)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ErrorKind::ConfigMissing => "config missing",
            ErrorKind::ConnectionError => "connection error",
            ErrorKind::Timeout => "timeout",
            ErrorKind::TransportClosed => "transport closed",
            ErrorKind::ConnectionLost => "connection lost",
            ErrorKind::EndOfStream => "end of stream",
            ErrorKind::NonZeroExit => "non-zero exit",
            ErrorKind::Interrupted => "interrupted",
            ErrorKind::Unknown => "unknown",
        };
        f.write_str(name)
    }
}
