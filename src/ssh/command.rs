//! Command execution over SSH
//!
//! Provides the [`Command`] request type, the raw [`CommandOutput`] of a
//! finished command, and the channel-level execution used by both hops of a
//! jump chain.

use std::borrow::Cow;
use std::io::Write;
use std::time::Duration;

use russh::client::Handle;
use russh::{ChannelMsg, Sig};
use tokio::time::timeout;
use tracing::{debug, error, warn};

use super::handler::SshHandler;
use super::sanitize::{escape_command_for_shell, sanitize_command, Redaction};
use crate::config::ABORT_TIMEOUT_SECS;
use crate::error::{ErrorKind, Result};

/// Options controlling how one command is run and reported
#[derive(Debug, Clone)]
pub struct CommandOptions {
    /// Log a non-zero exit at error level (debug level otherwise)
    pub raise_on_non_zero_exit: bool,

    /// Stop the batch after this command exits non-zero
    pub stop_on_non_zero_exit: bool,

    /// Forward output to the executor's sink as it arrives
    pub stream_output: bool,

    /// Redaction applied to the command text in log events
    pub redaction: Redaction,

    /// Per-command timeout (executor default when None)
    pub timeout: Option<Duration>,
}

impl Default for CommandOptions {
    fn default() -> Self {
        Self {
            raise_on_non_zero_exit: true,
            stop_on_non_zero_exit: false,
            stream_output: false,
            redaction: Redaction::None,
            timeout: None,
        }
    }
}

/// A shell command plus its execution options
#[derive(Debug, Clone)]
pub struct Command {
    /// Sanitized command text
    pub text: String,

    /// Execution options
    pub options: CommandOptions,
}

impl Command {
    /// Create a command with default options, rejecting empty text
    pub fn new(text: &str) -> Result<Self> {
        Ok(Self {
            text: sanitize_command(text)?,
            options: CommandOptions::default(),
        })
    }

    /// Replace all options at once
    pub fn with_options(mut self, options: CommandOptions) -> Self {
        self.options = options;
        self
    }

    /// Set whether a non-zero exit is logged as an error
    pub fn raise_on_non_zero_exit(mut self, raise: bool) -> Self {
        self.options.raise_on_non_zero_exit = raise;
        self
    }

    /// Set whether a non-zero exit stops the batch
    pub fn stop_on_non_zero_exit(mut self, stop: bool) -> Self {
        self.options.stop_on_non_zero_exit = stop;
        self
    }

    /// Set whether output is streamed while the command runs
    pub fn stream_output(mut self, stream: bool) -> Self {
        self.options.stream_output = stream;
        self
    }

    /// Set the log redaction
    pub fn with_redaction(mut self, redaction: Redaction) -> Self {
        self.options.redaction = redaction;
        self
    }

    /// Set a timeout for this command only
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.options.timeout = Some(timeout);
        self
    }

    /// Command text with redaction applied, for log events
    pub fn log_text(&self) -> Cow<'_, str> {
        self.options.redaction.apply(&self.text)
    }
}

/// Output from a command execution
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    /// Standard output from the command
    pub stdout: String,

    /// Standard error from the command
    pub stderr: String,

    /// Exit code of the command (if available)
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    /// Create a new empty CommandOutput
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a finished output with an exit code
    pub fn with_exit_code(stdout: impl Into<String>, exit_code: u32) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
            exit_code: Some(exit_code),
        }
    }

    /// Check if the command succeeded (exit code 0 or no exit code available)
    pub fn success(&self) -> bool {
        self.exit_code.is_none_or(|code| code == 0)
    }
}

/// A command that could not run to a reported exit status
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunError {
    /// Classification of the failure
    pub kind: ErrorKind,

    /// Transport or channel message
    pub message: String,

    /// Whatever output was collected before the failure
    pub output: CommandOutput,
}

impl RunError {
    /// Create a failure without partial output
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            output: CommandOutput::new(),
        }
    }

    /// Attach the output collected so far
    pub fn with_output(mut self, output: CommandOutput) -> Self {
        self.output = output;
        self
    }
}

impl std::fmt::Display for RunError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RunError {}

/// Receives command output as it arrives
pub trait OutputSink: Send + Sync {
    /// A chunk of standard output
    fn stdout(&self, chunk: &str);

    /// A chunk of standard error
    fn stderr(&self, chunk: &str);
}

/// Sink writing streamed output to the local terminal
#[derive(Debug, Clone, Copy, Default)]
pub struct TerminalSink;

impl OutputSink for TerminalSink {
    fn stdout(&self, chunk: &str) {
        let mut out = std::io::stdout().lock();
        let _ = out.write_all(chunk.as_bytes());
        let _ = out.flush();
    }

    fn stderr(&self, chunk: &str) {
        let mut err = std::io::stderr().lock();
        let _ = err.write_all(chunk.as_bytes());
        let _ = err.flush();
    }
}

/// Map a russh error to a command failure kind
///
/// `transport_closed` is the session handle's state after the error.
pub(crate) fn classify_transport_error(err: &russh::Error, transport_closed: bool) -> ErrorKind {
    if transport_closed {
        return ErrorKind::ConnectionLost;
    }
    match err {
        russh::Error::Disconnect
        | russh::Error::HUP
        | russh::Error::SendError
        | russh::Error::IO(_)
        | russh::Error::KeepaliveTimeout
        | russh::Error::InactivityTimeout => ErrorKind::ConnectionLost,
        _ => ErrorKind::Unknown,
    }
}

/// Execute a command on a new exec channel of `handle`
///
/// No timeout is applied here; the executor bounds the whole call.
pub(crate) async fn exec_on_handle(
    handle: &Handle<SshHandler>,
    host: &str,
    command: &Command,
    sink: Option<&dyn OutputSink>,
) -> std::result::Result<CommandOutput, RunError> {
    if handle.is_closed() {
        return Err(RunError::new(
            ErrorKind::TransportClosed,
            format!("SSH session to {} is already closed", host),
        ));
    }

    let channel = handle.channel_open_session().await.map_err(|e| {
        RunError::new(
            classify_transport_error(&e, handle.is_closed()),
            format!("Failed to open channel on {}: {}", host, e),
        )
    })?;

    channel.exec(true, command.text.as_str()).await.map_err(|e| {
        RunError::new(
            classify_transport_error(&e, handle.is_closed()),
            format!("Failed to exec command on {}: {}", host, e),
        )
    })?;

    collect_channel_output(channel, sink).await
}

/// Collect output from a channel until it closes
async fn collect_channel_output(
    mut channel: russh::Channel<russh::client::Msg>,
    sink: Option<&dyn OutputSink>,
) -> std::result::Result<CommandOutput, RunError> {
    let mut collector = OutputCollector::new(sink);

    while let Some(msg) = channel.wait().await {
        if !collector.accept(msg)? {
            break;
        }
    }

    collector.finish()
}

/// Accumulates the messages of one exec channel and classifies how it ended
struct OutputCollector<'a> {
    sink: Option<&'a dyn OutputSink>,
    output: CommandOutput,
    signal: Option<(Sig, String)>,
}

impl<'a> OutputCollector<'a> {
    fn new(sink: Option<&'a dyn OutputSink>) -> Self {
        Self {
            sink,
            output: CommandOutput::new(),
            signal: None,
        }
    }

    /// Take one channel message. Returns `Ok(false)` once the channel closed.
    fn accept(&mut self, msg: ChannelMsg) -> std::result::Result<bool, RunError> {
        match msg {
            ChannelMsg::Data { data } => {
                let text = String::from_utf8_lossy(&data);
                if let Some(sink) = self.sink {
                    sink.stdout(&text);
                }
                self.output.stdout.push_str(&text);
            }
            ChannelMsg::ExtendedData { data, ext } => {
                let text = String::from_utf8_lossy(&data);
                // ext == 1 is stderr
                if ext == 1 {
                    if let Some(sink) = self.sink {
                        sink.stderr(&text);
                    }
                    self.output.stderr.push_str(&text);
                } else {
                    self.output.stdout.push_str(&text);
                }
            }
            ChannelMsg::ExitStatus { exit_status } => {
                self.output.exit_code = Some(exit_status);
            }
            ChannelMsg::ExitSignal {
                signal_name,
                error_message,
                ..
            } => {
                self.signal = Some((signal_name, error_message));
            }
            ChannelMsg::Failure => {
                return Err(RunError::new(
                    ErrorKind::Unknown,
                    "Server refused the exec request",
                )
                .with_output(std::mem::take(&mut self.output)));
            }
            ChannelMsg::Close => return Ok(false),
            _ => {}
        }
        Ok(true)
    }

    /// Classify the collected output once the channel is done
    fn finish(self) -> std::result::Result<CommandOutput, RunError> {
        let output = self.output;
        debug!(
            "Channel finished: exit_code={:?}, stdout_len={}, stderr_len={}",
            output.exit_code,
            output.stdout.len(),
            output.stderr.len()
        );

        if output.exit_code.is_some() {
            return Ok(output);
        }

        match self.signal {
            Some((Sig::INT, _)) => Err(RunError::new(
                ErrorKind::Interrupted,
                "Remote command interrupted by SIGINT",
            )
            .with_output(output)),
            Some((sig, message)) => Err(RunError::new(
                ErrorKind::NonZeroExit,
                format!("Remote command killed by signal {:?} {}", sig, message)
                    .trim_end()
                    .to_string(),
            )
            .with_output(output)),
            None => Err(RunError::new(
                ErrorKind::EndOfStream,
                "Remote side closed the stream before reporting an exit status",
            )
            .with_output(output)),
        }
    }
}

/// Shell line that kills the remote process running exactly `command`
///
/// The command text is matched as an anchored, escaped pattern against full
/// process command lines, so neither other processes that merely contain
/// the text nor the kill line itself are hit.
pub(crate) fn abort_command_line(command: &str) -> String {
    let pattern = format!("^{}$", regex::escape(command));
    format!(
        "timeout 3s pkill -f '{}' 2>/dev/null || true",
        escape_command_for_shell(&pattern)
    )
}

/// Attempt to abort a running command by killing its remote process
///
/// The whole exchange is bounded by [`ABORT_TIMEOUT_SECS`].
pub(crate) async fn abort_on_handle(handle: &Handle<SshHandler>, command: &Command) {
    if handle.is_closed() {
        return;
    }

    let abort_timeout = Duration::from_secs(ABORT_TIMEOUT_SECS);
    let finished = timeout(abort_timeout, async {
        let channel = match handle.channel_open_session().await {
            Ok(ch) => ch,
            Err(e) => {
                error!("Failed to open channel for abort: {}", e);
                return;
            }
        };

        debug!("Sending abort for command: {}", command.log_text());

        let abort_cmd = abort_command_line(&command.text);
        if let Err(e) = channel.exec(true, abort_cmd.as_str()).await {
            error!("Failed to exec abort command: {}", e);
            return;
        }

        let mut channel = channel;
        while let Some(msg) = channel.wait().await {
            if matches!(msg, ChannelMsg::Close) {
                break;
            }
        }
    })
    .await;

    if finished.is_err() {
        warn!("Abort command did not finish within {}s", abort_timeout.as_secs());
    }
}
