//! ssh-jump - run shell commands on a remote host through an SSH jump host
//!
//! The remote host is reached by opening an SSH session to the jump host and
//! tunnelling a second SSH session through it. Commands run sequentially on
//! that session, and each one produces a structured outcome.
//!
//! # Features
//!
//! - Host parameters (user, identity files, port, hostname) resolved from an
//!   OpenSSH-format config file, with wildcard `Host` patterns
//! - Key authentication trying identity files in order
//! - One fixed retry when opening the jump session
//! - Per-command timeouts, output streaming and log redaction
//! - Failures returned as data: a bad command never aborts the rest of a
//!   diagnostic batch unless its failure kind requires it
//!
//! # Example Usage (CLI)
//!
//! ```bash
//! ssh-jump --config setting.cfg --jump bastion --remote 10.20.0.7 \
//!   "ipsec statusall" "ip xfrm state"
//! ```

pub mod config;
pub mod error;
pub mod executor;
pub mod logging;
pub mod outcome;
pub mod ssh;
pub mod workflow;

// Re-exports for convenience
pub use config::{Args, Config};
pub use error::{ErrorKind, JumpError, Result};
pub use executor::{CommandExecutor, CommandRunner, Interrupt};
pub use outcome::{CommandFailure, CommandOutcome, CommandSuccess, ResultList};
pub use ssh::{
    Command, CommandOptions, CommandOutput, ConfigResolver, HostConfig, JumpSession, OutputSink,
    Redaction, RemoteSession, RunError, SessionManager, SessionState,
};
pub use workflow::JumpWorkflow;
