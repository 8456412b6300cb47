//! Configuration and CLI argument parsing for ssh-jump

use std::path::PathBuf;
use std::time::Duration;

use clap::{ArgAction, Parser};

use crate::error::{JumpError, Result};
use crate::ssh::command::{Command, CommandOptions};
use crate::ssh::sanitize::Redaction;

/// Default timeout for command execution in milliseconds
pub const DEFAULT_TIMEOUT_MS: u64 = 60_000; // 60 seconds

/// Connection timeout in seconds
pub const CONNECTION_TIMEOUT_SECS: u64 = 30;

/// Extra attempts when opening the jump session
pub const CONNECT_RETRIES: u32 = 1;

/// Pause between jump session attempts in seconds
pub const RETRY_INTERVAL_SECS: u64 = 10;

/// Upper bound on the best-effort cleanup after a command timeout
pub const ABORT_TIMEOUT_SECS: u64 = 5;

/// Size at which the error log file is rotated
pub const ERROR_LOG_MAX_BYTES: u64 = 200 * 1024;

/// Port used for the remote hop unless told otherwise
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Host config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "setting.cfg";

/// ssh-jump CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(name = "ssh-jump")]
#[command(version)]
#[command(about = "Run shell commands on a remote host through an SSH jump host")]
pub struct Args {
    /// SSH client config file holding the jump host entry
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, env = "SSH_JUMP_CONFIG")]
    pub config: PathBuf,

    /// Jump host (Host entry in the config file)
    #[arg(long, env = "SSH_JUMP_HOST")]
    pub jump: String,

    /// Remote host reached through the jump host; commands run on the jump
    /// host itself when omitted
    #[arg(long, env = "SSH_JUMP_REMOTE")]
    pub remote: Option<String>,

    /// Username on the remote host
    #[arg(long, default_value = "root", env = "SSH_JUMP_REMOTE_USER")]
    pub remote_user: String,

    /// SSH port on the remote host
    #[arg(long, default_value_t = DEFAULT_SSH_PORT, env = "SSH_JUMP_REMOTE_PORT")]
    pub remote_port: u16,

    /// Command execution timeout in milliseconds
    #[arg(long, default_value_t = DEFAULT_TIMEOUT_MS, env = "SSH_JUMP_TIMEOUT")]
    pub timeout: u64,

    /// Connection timeout in seconds, per hop
    #[arg(long, default_value_t = CONNECTION_TIMEOUT_SECS, env = "SSH_JUMP_CONNECT_TIMEOUT")]
    pub connect_timeout: u64,

    /// Do not log command text before execution
    #[arg(long)]
    pub no_log_commands: bool,

    /// Never log command text (for commands carrying secrets)
    #[arg(long)]
    pub silent: bool,

    /// Regular expression whose matches are masked in logged command text
    #[arg(long = "redact", value_name = "REGEX")]
    pub redact: Vec<String>,

    /// Print command output while it runs
    #[arg(long)]
    pub stream: bool,

    /// Log non-zero exits at debug level instead of error level
    #[arg(long)]
    pub no_raise: bool,

    /// Stop the batch at the first non-zero exit
    #[arg(long)]
    pub stop_on_error: bool,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Increase log verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = ArgAction::Count)]
    pub verbose: u8,

    /// Also append error-level log events to this file
    #[arg(long, env = "SSH_JUMP_ERROR_LOG")]
    pub error_log: Option<PathBuf>,

    /// Commands to run, in order
    #[arg(required = true, num_args = 1.., trailing_var_arg = true, value_name = "COMMAND")]
    pub commands: Vec<String>,
}

/// Parsed and validated configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Host config file
    pub config_path: PathBuf,

    /// Jump host identifier
    pub jump_host: String,

    /// Remote host, None to run on the jump host
    pub remote_host: Option<String>,

    /// Remote username
    pub remote_user: String,

    /// Remote SSH port
    pub remote_port: u16,

    /// Default command timeout
    pub timeout: Duration,

    /// Per-hop connection timeout
    pub connect_timeout: Duration,

    /// Whether command text is logged
    pub log_commands: bool,

    /// Whether output is streamed to the terminal
    pub stream: bool,

    /// Whether results are printed as JSON
    pub json: bool,

    /// Log verbosity
    pub verbosity: u8,

    /// Optional error log file
    pub error_log: Option<PathBuf>,

    /// Validated command batch
    pub commands: Vec<Command>,
}

impl Config {
    /// Create Config from CLI Args
    pub fn from_args(args: Args) -> Result<Self> {
        validate_args(&args)?;

        let redaction = if args.silent {
            Redaction::Silent
        } else if args.redact.is_empty() {
            Redaction::None
        } else {
            Redaction::patterns(&args.redact)?
        };

        let options = CommandOptions {
            raise_on_non_zero_exit: !args.no_raise,
            stop_on_non_zero_exit: args.stop_on_error,
            stream_output: args.stream,
            redaction,
            timeout: None,
        };

        let commands = args
            .commands
            .iter()
            .map(|text| Command::new(text).map(|cmd| cmd.with_options(options.clone())))
            .collect::<Result<Vec<_>>>()?;

        Ok(Config {
            config_path: args.config,
            jump_host: args.jump,
            remote_host: args.remote.filter(|r| !r.trim().is_empty()),
            remote_user: args.remote_user,
            remote_port: args.remote_port,
            timeout: Duration::from_millis(args.timeout),
            connect_timeout: Duration::from_secs(args.connect_timeout),
            log_commands: !args.no_log_commands,
            stream: args.stream,
            json: args.json,
            verbosity: args.verbose,
            error_log: args.error_log,
            commands,
        })
    }
}

/// Validate CLI arguments
fn validate_args(args: &Args) -> Result<()> {
    let mut errors = Vec::new();

    if args.jump.trim().is_empty() {
        errors.push("Missing required --jump".to_string());
    }

    if args.remote_user.trim().is_empty() {
        errors.push("--remote-user cannot be empty".to_string());
    }

    if args.timeout == 0 {
        errors.push("--timeout must be greater than 0".to_string());
    }

    if args.connect_timeout == 0 {
        errors.push("--connect-timeout must be greater than 0".to_string());
    }

    if args.commands.iter().all(|c| c.trim().is_empty()) {
        errors.push("At least one non-empty command is required".to_string());
    }

    if args.stream && args.json {
        errors.push("--stream cannot be combined with --json".to_string());
    }

    if !errors.is_empty() {
        return Err(JumpError::Config(errors.join("\n")));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(extra: &[&str]) -> Args {
        let mut argv = vec!["ssh-jump", "--jump", "bastion"];
        argv.extend_from_slice(extra);
        Args::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_args(parse(&["--remote", "10.0.0.5", "uptime"])).unwrap();

        assert_eq!(config.config_path, PathBuf::from(DEFAULT_CONFIG_FILE));
        assert_eq!(config.remote_host.as_deref(), Some("10.0.0.5"));
        assert_eq!(config.remote_user, "root");
        assert_eq!(config.remote_port, 22);
        assert_eq!(config.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert!(config.log_commands);
        assert_eq!(config.commands.len(), 1);
        assert!(config.commands[0].options.raise_on_non_zero_exit);
        assert!(!config.commands[0].options.stop_on_non_zero_exit);
    }

    #[test]
    fn test_trailing_commands_keep_their_flags() {
        let config = Config::from_args(parse(&["echo hi", "ls", "-la"])).unwrap();
        let texts: Vec<&str> = config.commands.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["echo hi", "ls", "-la"]);
        assert!(config.remote_host.is_none());
    }

    #[test]
    fn test_command_options_from_flags() {
        let config = Config::from_args(parse(&[
            "--no-raise",
            "--stop-on-error",
            "--redact",
            "psk=\\S+",
            "set psk=abc",
        ]))
        .unwrap();

        let cmd = &config.commands[0];
        assert!(!cmd.options.raise_on_non_zero_exit);
        assert!(cmd.options.stop_on_non_zero_exit);
        assert_eq!(cmd.log_text(), "set XXXXXXX");
    }

    #[test]
    fn test_silent_wins_over_patterns() {
        let config =
            Config::from_args(parse(&["--silent", "--redact", "x", "echo secret"])).unwrap();
        assert!(!config.commands[0].options.redaction.allows_logging());
    }

    #[test]
    fn test_validation_collects_errors() {
        let err = Config::from_args(parse(&["--timeout", "0", "--stream", "--json", "  "]))
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("--timeout must be greater than 0"));
        assert!(message.contains("--stream cannot be combined with --json"));
        assert!(message.contains("At least one non-empty command"));
    }

    #[test]
    fn test_invalid_redaction_pattern() {
        let err = Config::from_args(parse(&["--redact", "(", "ls"])).unwrap_err();
        assert!(matches!(err, JumpError::InvalidParams(_)));
    }
}
