//! Command sanitization, escaping and log redaction
//!
//! Commands are validated before a batch is built, escaped when embedded in
//! helper commands (like the timeout abort), and redacted before any of their
//! text reaches a log event.

use std::borrow::Cow;

use regex::Regex;

use crate::error::{JumpError, Result};

/// Replacement text for redacted command fragments
pub const REDACTED: &str = "XXXXXXX";

/// Placeholder logged in place of a silent command
pub const HIDDEN_COMMAND: &str = "<command hidden>";

/// Sanitize a command before execution
///
/// Trims surrounding whitespace and rejects empty commands.
///
/// # Examples
/// ```
/// use ssh_jump::ssh::sanitize::sanitize_command;
///
/// let cmd = sanitize_command("  uptime  ").unwrap();
/// assert_eq!(cmd, "uptime");
///
/// assert!(sanitize_command("   ").is_err());
/// ```
pub fn sanitize_command(command: &str) -> Result<String> {
    let trimmed = command.trim();

    if trimmed.is_empty() {
        return Err(JumpError::invalid_params("Command cannot be empty"));
    }

    Ok(trimmed.to_string())
}

/// Escape a command for use inside a single-quoted shell string
///
/// # Example
/// ```
/// use ssh_jump::ssh::sanitize::escape_command_for_shell;
///
/// let escaped = escape_command_for_shell("echo 'hello'");
/// assert_eq!(escaped, "echo '\"'\"'hello'\"'\"'");
/// ```
pub fn escape_command_for_shell(command: &str) -> String {
    // 'word' becomes '"'"'word'"'"'
    command.replace('\'', "'\"'\"'")
}

/// How a command's text is treated in log events
#[derive(Debug, Clone, Default)]
pub enum Redaction {
    /// Log the command verbatim
    #[default]
    None,

    /// Never log the command text
    Silent,

    /// Replace every match of any pattern with [`REDACTED`]
    Patterns(Vec<Regex>),
}

impl Redaction {
    /// Build a pattern redaction, rejecting invalid regular expressions
    pub fn patterns<I, S>(patterns: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let compiled = patterns
            .into_iter()
            .map(|p| {
                Regex::new(p.as_ref()).map_err(|e| {
                    JumpError::invalid_params(format!(
                        "Invalid redaction pattern '{}': {}",
                        p.as_ref(),
                        e
                    ))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Redaction::Patterns(compiled))
    }

    /// Whether the command may appear in logs at all
    pub fn allows_logging(&self) -> bool {
        !matches!(self, Redaction::Silent)
    }

    /// Text safe to put in a log event
    pub fn apply<'a>(&self, command: &'a str) -> Cow<'a, str> {
        match self {
            Redaction::None => Cow::Borrowed(command),
            Redaction::Silent => Cow::Borrowed(HIDDEN_COMMAND),
            Redaction::Patterns(patterns) => {
                let mut text = Cow::Borrowed(command);
                for pattern in patterns {
                    if pattern.is_match(&text) {
                        text = Cow::Owned(pattern.replace_all(&text, REDACTED).into_owned());
                    }
                }
                text
            }
        }
    }
}
