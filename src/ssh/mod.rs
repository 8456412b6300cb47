//! SSH session and command handling
//!
//! This module resolves host configs, opens the jump and remote sessions,
//! and runs commands over session channels.

pub mod command;
pub mod config;
pub mod connection;
pub mod handler;
pub(crate) mod pattern;
pub mod sanitize;
pub mod session;

// Re-exports
pub use command::{Command, CommandOptions, CommandOutput, OutputSink, RunError, TerminalSink};
pub use config::{ConfigResolver, HostConfig};
pub use connection::{RetryPolicy, SessionManager, SessionState};
pub use handler::SshHandler;
pub use sanitize::{escape_command_for_shell, sanitize_command, Redaction};
pub use session::{JumpSession, RemoteSession};
