//! Sequential batch execution
//!
//! [`CommandExecutor`] runs commands one at a time against a borrowed
//! [`CommandRunner`], turns each result into a [`CommandOutcome`], and
//! decides after every command whether the batch goes on.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::config::{ABORT_TIMEOUT_SECS, DEFAULT_TIMEOUT_MS};
use crate::error::ErrorKind;
use crate::outcome::{CommandOutcome, ResultList};
use crate::ssh::command::{Command, CommandOutput, OutputSink, RunError};

/// Something a command can be run against (an open SSH session)
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run one command to completion and return its raw output
    async fn run_command(
        &self,
        command: &Command,
        sink: Option<&dyn OutputSink>,
    ) -> Result<CommandOutput, RunError>;

    /// Best-effort cleanup after `command` exceeded its timeout. The executor
    /// gives up waiting on it after [`ABORT_TIMEOUT_SECS`].
    async fn abort_command(&self, _command: &Command) {}
}

/// Cooperative cancellation flag shared between a signal handler and the
/// executor. Checked between commands only.
#[derive(Debug, Clone, Default)]
pub struct Interrupt {
    flag: Arc<AtomicBool>,
}

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request that the running batch stop
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Clear a previous request so the next batch can run
    pub fn reset(&self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}

/// Runs ordered command batches
#[derive(Clone)]
pub struct CommandExecutor {
    /// Timeout for commands that do not set their own
    default_timeout: Duration,

    /// Log each command's (redacted) text before running it
    log_commands: bool,

    interrupt: Interrupt,

    /// Receives output of commands with `stream_output` set
    sink: Option<Arc<dyn OutputSink>>,
}

impl CommandExecutor {
    /// Create an executor with the default timeout and command logging off
    pub fn new() -> Self {
        Self {
            default_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            log_commands: false,
            interrupt: Interrupt::new(),
            sink: None,
        }
    }

    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn with_command_logging(mut self, enabled: bool) -> Self {
        self.log_commands = enabled;
        self
    }

    /// Share an interrupt flag with the caller
    pub fn with_interrupt(mut self, interrupt: Interrupt) -> Self {
        self.interrupt = interrupt;
        self
    }

    pub fn with_output_sink(mut self, sink: Arc<dyn OutputSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn interrupt(&self) -> &Interrupt {
        &self.interrupt
    }

    pub fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    /// Run `commands` in order against `runner`.
    ///
    /// Returns one outcome per attempted command. Commands after a
    /// batch-stopping failure or an interrupt are not attempted and do not
    /// appear in the list. The runner is never closed here.
    pub async fn run<R>(&self, runner: &R, commands: &[Command]) -> ResultList
    where
        R: CommandRunner + ?Sized,
    {
        let mut results = ResultList::new();

        for command in commands {
            if self.interrupt.is_triggered() {
                warn!(
                    "Interrupted, skipping {} remaining command(s)",
                    commands.len() - results.len()
                );
                break;
            }

            let outcome = self.run_one(runner, command).await;
            let stop = should_stop(command, &outcome);
            results.push(outcome);

            if stop {
                let skipped = commands.len() - results.len();
                if skipped > 0 {
                    warn!("Stopping batch, {} command(s) not attempted", skipped);
                }
                break;
            }
        }

        results
    }

    async fn run_one<R>(&self, runner: &R, command: &Command) -> CommandOutcome
    where
        R: CommandRunner + ?Sized,
    {
        if self.log_commands && command.options.redaction.allows_logging() {
            info!("Executing command: {}", command.log_text());
        }

        let limit = command.options.timeout.unwrap_or(self.default_timeout);
        let sink = if command.options.stream_output {
            self.sink.as_deref()
        } else {
            None
        };

        let result = match timeout(limit, runner.run_command(command, sink)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    "Command '{}' timed out after {}ms, attempting abort",
                    command.log_text(),
                    limit.as_millis()
                );
                let abort_limit = Duration::from_secs(ABORT_TIMEOUT_SECS);
                if timeout(abort_limit, runner.abort_command(command))
                    .await
                    .is_err()
                {
                    warn!(
                        "Abort of '{}' did not finish within {}s, moving on",
                        command.log_text(),
                        abort_limit.as_secs()
                    );
                }
                Err(RunError::new(
                    ErrorKind::Timeout,
                    format!("Command timed out after {}ms", limit.as_millis()),
                ))
            }
        };

        let outcome = CommandOutcome::from_run(command, result);
        log_outcome(command, &outcome);
        outcome
    }
}

impl Default for CommandExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandExecutor")
            .field("default_timeout", &self.default_timeout)
            .field("log_commands", &self.log_commands)
            .field("interrupt", &self.interrupt.is_triggered())
            .field("sink", &self.sink.is_some())
            .finish()
    }
}

/// Stop/continue policy for the command just recorded
fn should_stop(command: &Command, outcome: &CommandOutcome) -> bool {
    match outcome.kind() {
        None => false,
        Some(ErrorKind::NonZeroExit) => command.options.stop_on_non_zero_exit,
        Some(kind) => kind.stops_batch(),
    }
}

fn log_outcome(command: &Command, outcome: &CommandOutcome) {
    let CommandOutcome::Failure(failure) = outcome else {
        debug!("Command '{}' succeeded", command.log_text());
        return;
    };

    match failure.kind {
        ErrorKind::NonZeroExit if !command.options.raise_on_non_zero_exit => {
            debug!(
                "Command '{}' exited non-zero: {}",
                command.log_text(),
                failure.message
            );
        }
        ErrorKind::NonZeroExit => {
            error!(
                "Command '{}' returned exit status ({}), expected 0: {}",
                command.log_text(),
                failure
                    .exit_code
                    .map_or("none".to_string(), |c| c.to_string()),
                failure.stderr.trim_end()
            );
        }
        kind => {
            error!(
                "Command '{}' failed ({}): {}",
                command.log_text(),
                kind,
                failure.message
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// What the scripted runner does for a command
    #[derive(Clone)]
    enum Step {
        Exit(&'static str, u32),
        Fail(ErrorKind),
        Hang,
        Interrupt(Interrupt),
    }

    #[derive(Default)]
    struct ScriptedRunner {
        steps: HashMap<String, Step>,
        seen: Mutex<Vec<String>>,
        aborted: Mutex<Vec<String>>,
        abort_hangs: bool,
    }

    impl ScriptedRunner {
        fn with(mut self, command: &str, step: Step) -> Self {
            self.steps.insert(command.to_string(), step);
            self
        }

        fn with_stuck_abort(mut self) -> Self {
            self.abort_hangs = true;
            self
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl CommandRunner for ScriptedRunner {
        async fn run_command(
            &self,
            command: &Command,
            sink: Option<&dyn OutputSink>,
        ) -> Result<CommandOutput, RunError> {
            self.seen.lock().unwrap().push(command.text.clone());
            let step = self
                .steps
                .get(&command.text)
                .cloned()
                .unwrap_or(Step::Exit("", 0));

            match step {
                Step::Exit(stdout, code) => {
                    if let Some(sink) = sink {
                        sink.stdout(stdout);
                    }
                    Ok(CommandOutput::with_exit_code(stdout, code))
                }
                Step::Fail(kind) => Err(RunError::new(kind, "scripted failure")),
                Step::Hang => {
                    tokio::time::sleep(Duration::from_secs(100)).await;
                    Ok(CommandOutput::with_exit_code("", 0))
                }
                Step::Interrupt(interrupt) => {
                    interrupt.trigger();
                    Ok(CommandOutput::with_exit_code("", 0))
                }
            }
        }

        async fn abort_command(&self, command: &Command) {
            self.aborted.lock().unwrap().push(command.text.clone());
            if self.abort_hangs {
                std::future::pending::<()>().await;
            }
        }
    }

    #[derive(Default)]
    struct RecordingSink {
        chunks: Mutex<Vec<String>>,
    }

    impl OutputSink for RecordingSink {
        fn stdout(&self, chunk: &str) {
            self.chunks.lock().unwrap().push(chunk.to_string());
        }

        fn stderr(&self, _chunk: &str) {}
    }

    fn commands(texts: &[&str]) -> Vec<Command> {
        texts
            .iter()
            .map(|t| Command::new(t).unwrap().raise_on_non_zero_exit(false))
            .collect()
    }

    #[tokio::test]
    async fn test_all_success_in_order() {
        let runner = ScriptedRunner::default()
            .with("uname", Step::Exit("Linux\n", 0))
            .with("uptime", Step::Exit("up 3 days\n", 0));
        let results = CommandExecutor::new()
            .run(&runner, &commands(&["uname", "uptime", "true"]))
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.all_succeeded());
        assert_eq!(results.get(0).unwrap().stdout(), "Linux\n");
        assert_eq!(results.get(1).unwrap().stdout(), "up 3 days\n");
    }

    #[tokio::test]
    async fn test_non_zero_exit_continues() {
        let runner = ScriptedRunner::default()
            .with("echo hi", Step::Exit("hi\n", 0))
            .with("false", Step::Exit("", 1))
            .with("echo bye", Step::Exit("bye\n", 0));
        let results = CommandExecutor::new()
            .run(&runner, &commands(&["echo hi", "false", "echo bye"]))
            .await;

        assert_eq!(results.len(), 3);
        assert!(results.get(0).unwrap().is_success());
        assert_eq!(results.get(1).unwrap().kind(), Some(ErrorKind::NonZeroExit));
        assert_eq!(results.get(1).unwrap().exit_code(), Some(1));
        assert_eq!(results.get(2).unwrap().stdout(), "bye\n");
    }

    #[tokio::test]
    async fn test_raise_flag_does_not_stop_batch() {
        let runner = ScriptedRunner::default().with("false", Step::Exit("", 1));
        let batch = vec![
            Command::new("false").unwrap().raise_on_non_zero_exit(true),
            Command::new("true").unwrap(),
        ];
        let results = CommandExecutor::new().run(&runner, &batch).await;

        assert_eq!(results.len(), 2);
        assert_eq!(runner.seen(), vec!["false", "true"]);
    }

    #[tokio::test]
    async fn test_stop_on_non_zero_exit_opt_in() {
        let runner = ScriptedRunner::default().with("false", Step::Exit("", 1));
        let batch = vec![
            Command::new("false").unwrap().stop_on_non_zero_exit(true),
            Command::new("true").unwrap(),
        ];
        let results = CommandExecutor::new().run(&runner, &batch).await;

        assert_eq!(results.len(), 1);
        assert_eq!(runner.seen(), vec!["false"]);
    }

    #[tokio::test]
    async fn test_end_of_stream_continues() {
        let runner = ScriptedRunner::default().with("cat big", Step::Fail(ErrorKind::EndOfStream));
        let results = CommandExecutor::new()
            .run(&runner, &commands(&["cat big", "echo next"]))
            .await;

        assert_eq!(results.len(), 2);
        assert_eq!(results.get(0).unwrap().kind(), Some(ErrorKind::EndOfStream));
        assert!(results.get(1).unwrap().is_success());
    }

    #[tokio::test]
    async fn test_stopping_kinds_end_batch() {
        for kind in [
            ErrorKind::TransportClosed,
            ErrorKind::ConnectionLost,
            ErrorKind::Interrupted,
            ErrorKind::Unknown,
        ] {
            let runner = ScriptedRunner::default().with("two", Step::Fail(kind));
            let results = CommandExecutor::new()
                .run(&runner, &commands(&["one", "two", "three"]))
                .await;

            assert_eq!(results.len(), 2, "kind {kind}");
            assert_eq!(results.get(1).unwrap().kind(), Some(kind));
            assert_eq!(runner.seen(), vec!["one", "two"]);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_stops_batch_and_aborts() {
        let runner = ScriptedRunner::default().with("sleep 100", Step::Hang);
        let results = CommandExecutor::new()
            .with_default_timeout(Duration::from_secs(2))
            .run(&runner, &commands(&["echo a", "sleep 100", "echo b"]))
            .await;

        assert_eq!(results.len(), 2);
        let failure = results.failures().next().unwrap();
        assert_eq!(failure.kind, ErrorKind::Timeout);
        assert!(failure.message.contains("2000ms"));
        assert_eq!(*runner.aborted.lock().unwrap(), vec!["sleep 100"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stuck_abort_does_not_block_batch() {
        let runner = ScriptedRunner::default()
            .with("sleep 100", Step::Hang)
            .with_stuck_abort();
        let start = tokio::time::Instant::now();

        let results = tokio::time::timeout(
            Duration::from_secs(3600),
            CommandExecutor::new()
                .with_default_timeout(Duration::from_secs(2))
                .run(&runner, &commands(&["sleep 100", "echo b"])),
        )
        .await
        .expect("batch must finish even when the abort never does");

        assert_eq!(results.len(), 1);
        assert_eq!(results.get(0).unwrap().kind(), Some(ErrorKind::Timeout));
        assert_eq!(*runner.aborted.lock().unwrap(), vec!["sleep 100"]);
        assert!(start.elapsed() <= Duration::from_secs(2 + ABORT_TIMEOUT_SECS));
    }

    #[tokio::test(start_paused = true)]
    async fn test_per_command_timeout_overrides_default() {
        let runner = ScriptedRunner::default().with("sleep 100", Step::Hang);
        let batch = vec![Command::new("sleep 100")
            .unwrap()
            .with_timeout(Duration::from_millis(500))];
        let results = CommandExecutor::new().run(&runner, &batch).await;

        assert_eq!(results.len(), 1);
        assert!(results.get(0).unwrap().to_string().contains("500ms"));
    }

    #[tokio::test]
    async fn test_interrupt_before_batch_runs_nothing() {
        let executor = CommandExecutor::new();
        executor.interrupt().trigger();
        let runner = ScriptedRunner::default();
        let results = executor.run(&runner, &commands(&["a", "b"])).await;

        assert!(results.is_empty());
        assert!(runner.seen().is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_mid_command_records_then_stops() {
        let interrupt = Interrupt::new();
        let runner = ScriptedRunner::default().with("b", Step::Interrupt(interrupt.clone()));
        let results = CommandExecutor::new()
            .with_interrupt(interrupt.clone())
            .run(&runner, &commands(&["a", "b", "c"]))
            .await;

        assert_eq!(results.len(), 2);
        assert!(results.all_succeeded());
        assert_eq!(runner.seen(), vec!["a", "b"]);

        interrupt.reset();
        assert!(!interrupt.is_triggered());
    }

    #[tokio::test]
    async fn test_sink_only_receives_streamed_commands() {
        let sink = Arc::new(RecordingSink::default());
        let runner = ScriptedRunner::default()
            .with("quiet", Step::Exit("q\n", 0))
            .with("loud", Step::Exit("l\n", 0));
        let batch = vec![
            Command::new("quiet").unwrap(),
            Command::new("loud").unwrap().stream_output(true),
        ];
        CommandExecutor::new()
            .with_output_sink(sink.clone())
            .run(&runner, &batch)
            .await;

        assert_eq!(*sink.chunks.lock().unwrap(), vec!["l\n"]);
    }
}
