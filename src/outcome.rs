//! Per-command outcomes and the ordered result list of a batch
//!
//! Outcomes are plain values. A failed command is a [`CommandFailure`]
//! entry in the [`ResultList`], never an `Err` of the batch call.

use std::fmt;

use serde::Serialize;

use crate::error::ErrorKind;
use crate::ssh::command::{Command, CommandOutput, RunError};

/// A command that exited with status 0
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandSuccess {
    pub command: String,
    pub exit_code: u32,
    pub stdout: String,
    pub stderr: String,
}

/// A command that did not succeed
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandFailure {
    pub command: String,
    pub kind: ErrorKind,
    pub exit_code: Option<u32>,
    pub message: String,
    pub stdout: String,
    pub stderr: String,
}

/// Result of one attempted command
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CommandOutcome {
    Success(CommandSuccess),
    Failure(CommandFailure),
}

impl CommandOutcome {
    /// Build the outcome of a command from what its runner returned
    pub fn from_run(command: &Command, result: Result<CommandOutput, RunError>) -> Self {
        match result {
            Ok(output) if output.success() => CommandOutcome::Success(CommandSuccess {
                command: command.text.clone(),
                exit_code: output.exit_code.unwrap_or(0),
                stdout: output.stdout,
                stderr: output.stderr,
            }),
            Ok(output) => {
                let code = output.exit_code.unwrap_or_default();
                CommandOutcome::Failure(CommandFailure {
                    command: command.text.clone(),
                    kind: ErrorKind::NonZeroExit,
                    exit_code: output.exit_code,
                    message: format!("Command returned exit status ({}), expected 0", code),
                    stdout: output.stdout,
                    stderr: output.stderr,
                })
            }
            Err(err) => CommandOutcome::Failure(CommandFailure {
                command: command.text.clone(),
                kind: err.kind,
                exit_code: err.output.exit_code,
                message: err.message,
                stdout: err.output.stdout,
                stderr: err.output.stderr,
            }),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, CommandOutcome::Success(_))
    }

    /// The command text this outcome belongs to
    pub fn command(&self) -> &str {
        match self {
            CommandOutcome::Success(s) => &s.command,
            CommandOutcome::Failure(f) => &f.command,
        }
    }

    pub fn stdout(&self) -> &str {
        match self {
            CommandOutcome::Success(s) => &s.stdout,
            CommandOutcome::Failure(f) => &f.stdout,
        }
    }

    /// Failure classification, None for a success
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            CommandOutcome::Success(_) => None,
            CommandOutcome::Failure(f) => Some(f.kind),
        }
    }

    pub fn exit_code(&self) -> Option<u32> {
        match self {
            CommandOutcome::Success(s) => Some(s.exit_code),
            CommandOutcome::Failure(f) => f.exit_code,
        }
    }
}

impl fmt::Display for CommandOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandOutcome::Success(s) => write!(f, "[ok] {} (exit 0)", s.command),
            CommandOutcome::Failure(fail) => match fail.exit_code {
                Some(code) => write!(
                    f,
                    "[failed: {}] {} (exit {}): {}",
                    fail.kind, fail.command, code, fail.message
                ),
                None => write!(
                    f,
                    "[failed: {}] {}: {}",
                    fail.kind, fail.command, fail.message
                ),
            },
        }
    }
}

/// Outcomes of a batch, one per attempted command, in input order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResultList {
    outcomes: Vec<CommandOutcome>,
}

impl ResultList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an outcome; order is never changed afterwards
    pub fn push(&mut self, outcome: CommandOutcome) {
        self.outcomes.push(outcome);
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&CommandOutcome> {
        self.outcomes.get(index)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, CommandOutcome> {
        self.outcomes.iter()
    }

    /// Whether no entry is a failure
    pub fn all_succeeded(&self) -> bool {
        self.outcomes.iter().all(CommandOutcome::is_success)
    }

    /// Failure entries, in order
    pub fn failures(&self) -> impl Iterator<Item = &CommandFailure> {
        self.outcomes.iter().filter_map(|o| match o {
            CommandOutcome::Failure(f) => Some(f),
            CommandOutcome::Success(_) => None,
        })
    }

    pub fn into_vec(self) -> Vec<CommandOutcome> {
        self.outcomes
    }
}

impl IntoIterator for ResultList {
    type Item = CommandOutcome;
    type IntoIter = std::vec::IntoIter<CommandOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.into_iter()
    }
}

impl<'a> IntoIterator for &'a ResultList {
    type Item = &'a CommandOutcome;
    type IntoIter = std::slice::Iter<'a, CommandOutcome>;

    fn into_iter(self) -> Self::IntoIter {
        self.outcomes.iter()
    }
}
