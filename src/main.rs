//! ssh-jump - Entry point
//!
//! Parses CLI arguments, installs logging, runs the command batch through
//! the jump host, and prints the results. Ctrl+C or SIGTERM stops the batch
//! after the command in flight; a second signal abandons the run at once.

use std::future::Future;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tracing::{error, info, warn};

use ssh_jump::config::{Args, Config};
use ssh_jump::executor::{CommandExecutor, Interrupt};
use ssh_jump::logging::init_logging;
use ssh_jump::outcome::{CommandOutcome, ResultList};
use ssh_jump::ssh::TerminalSink;
use ssh_jump::workflow::JumpWorkflow;

/// Exit status when a command in the batch failed
const EXIT_COMMAND_FAILED: u8 = 1;

/// Exit status when no command could run (config, connection, logging)
const EXIT_SETUP_FAILED: u8 = 2;

/// Exit status after a second Ctrl+C or SIGTERM
const EXIT_ABANDONED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match Config::from_args(args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", e);
            return ExitCode::from(EXIT_SETUP_FAILED);
        }
    };

    if let Err(e) = init_logging(config.verbosity, config.error_log.as_deref()) {
        eprintln!("{}", e);
        return ExitCode::from(EXIT_SETUP_FAILED);
    }

    info!("ssh-jump v{} starting...", env!("CARGO_PKG_VERSION"));

    let interrupt = Interrupt::new();
    let signals = watch_signals(interrupt.clone(), next_signal);

    let mut executor = CommandExecutor::new()
        .with_default_timeout(config.timeout)
        .with_command_logging(config.log_commands)
        .with_interrupt(interrupt);
    if config.stream {
        executor = executor.with_output_sink(Arc::new(TerminalSink));
    }

    let workflow = JumpWorkflow::from_config(&config, executor);
    let run = workflow.run(
        &config.jump_host,
        config.remote_host.as_deref(),
        &config.commands,
    );

    // Dropping `run` hands open sessions to SessionManager's background close
    let result = tokio::select! {
        result = run => result,
        _ = signals => {
            warn!("Second signal received, abandoning the run");
            return ExitCode::from(EXIT_ABANDONED);
        }
    };

    match result {
        Ok(results) => {
            print_results(&results, config.json, config.stream);
            if results.all_succeeded() && results.len() == config.commands.len() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(EXIT_COMMAND_FAILED)
            }
        }
        Err(e) => {
            error!("{}", e);
            ExitCode::from(EXIT_SETUP_FAILED)
        }
    }
}

/// Trigger `interrupt` on the first signal; return on the second
async fn watch_signals<S, F>(interrupt: Interrupt, mut next: S)
where
    S: FnMut() -> F,
    F: Future<Output = &'static str>,
{
    let name = next().await;
    info!("Received {}, stopping after the current command...", name);
    interrupt.trigger();

    let name = next().await;
    info!("Received {} again", name);
}

/// Wait for Ctrl+C or SIGTERM and name the one that arrived
async fn next_signal() -> &'static str {
    tokio::select! {
        _ = tokio::signal::ctrl_c() => "SIGINT (Ctrl+C)",
        _ = async {
            #[cfg(unix)]
            {
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                    Ok(mut sigterm) => {
                        sigterm.recv().await;
                    }
                    Err(e) => {
                        warn!("Failed to register SIGTERM handler: {}", e);
                        std::future::pending::<()>().await;
                    }
                }
            }
            #[cfg(not(unix))]
            {
                std::future::pending::<()>().await;
            }
        } => "SIGTERM",
    }
}

fn print_results(results: &ResultList, json: bool, streamed: bool) {
    if json {
        match serde_json::to_string_pretty(results) {
            Ok(text) => println!("{}", text),
            Err(e) => error!("Failed to serialize results: {}", e),
        }
        return;
    }

    for outcome in results {
        println!("{}", outcome);
        // Streamed output has already been printed
        if streamed {
            continue;
        }
        let (stdout, stderr) = match outcome {
            CommandOutcome::Success(s) => (&s.stdout, &s.stderr),
            CommandOutcome::Failure(f) => (&f.stdout, &f.stderr),
        };
        for line in stdout.lines() {
            println!("  {}", line);
        }
        for line in stderr.lines() {
            println!("  ! {}", line);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Notify;

    #[tokio::test]
    async fn test_first_signal_interrupts_second_ends_watch() {
        let interrupt = Interrupt::new();
        let notify = Arc::new(Notify::new());
        let source = notify.clone();
        let watch = tokio::spawn(watch_signals(interrupt.clone(), move || {
            let source = source.clone();
            async move {
                source.notified().await;
                "SIGINT"
            }
        }));

        notify.notify_one();
        while !interrupt.is_triggered() {
            tokio::task::yield_now().await;
        }
        assert!(!watch.is_finished());

        notify.notify_one();
        watch.await.unwrap();
        assert!(interrupt.is_triggered());
    }
}
