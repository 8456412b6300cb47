//! Log subscriber setup for the ssh-jump binary
//!
//! The library only emits `tracing` events. The binary installs exactly one
//! subscriber at startup: a stderr layer filtered by verbosity (or
//! `RUST_LOG`) and, optionally, an error-only layer appending to a file that
//! is rotated once it grows past [`ERROR_LOG_MAX_BYTES`].

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::ERROR_LOG_MAX_BYTES;
use crate::error::{JumpError, Result};

/// Create an environment filter based on verbosity level
pub fn create_env_filter(verbosity: u8) -> EnvFilter {
    if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        match verbosity {
            0 => EnvFilter::new("ssh_jump=info,warn"),
            1 => EnvFilter::new("ssh_jump=debug,warn"),
            // -vv: include russh protocol logs
            2 => EnvFilter::new("ssh_jump=debug,russh=debug,warn"),
            _ => EnvFilter::new("ssh_jump=trace,russh=trace,debug"),
        }
    }
}

/// Install the process-wide subscriber.
///
/// Fails if the error log cannot be opened or a subscriber is already set.
pub fn init_logging(verbosity: u8, error_log: Option<&Path>) -> Result<()> {
    let console = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_filter(create_env_filter(verbosity));

    let error_file = match error_log {
        Some(path) => {
            let file = RotatingFile::open(path, ERROR_LOG_MAX_BYTES)?;
            Some(
                fmt::layer()
                    .with_ansi(false)
                    .with_target(false)
                    .with_writer(Mutex::new(file))
                    .with_filter(LevelFilter::ERROR),
            )
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(console)
        .with(error_file)
        .try_init()
        .map_err(|e| JumpError::config(format!("Failed to install logger: {}", e)))
}

/// Append-only log file that moves itself to `<name>.1` once it would grow
/// past `max_bytes`, keeping a single previous generation
#[derive(Debug)]
pub struct RotatingFile {
    path: PathBuf,
    max_bytes: u64,
    file: File,
    written: u64,
}

impl RotatingFile {
    /// Open (or create) `path` for appending, creating parent directories
    pub fn open(path: impl Into<PathBuf>, max_bytes: u64) -> io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let written = file.metadata()?.len();
        Ok(Self {
            path,
            max_bytes,
            file,
            written,
        })
    }

    /// Path of the previous generation
    pub fn rotated_path(&self) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(".1");
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;
        std::fs::rename(&self.path, self.rotated_path())?;
        self.file = OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(&self.path)?;
        self.written = 0;
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written > 0 && self.written + buf.len() as u64 > self.max_bytes {
            self.rotate()?;
        }
        let n = self.file.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotating_file_keeps_one_previous_generation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("errors.log");
        let mut file = RotatingFile::open(&path, 16).unwrap();

        file.write_all(b"first line 1234\n").unwrap();
        file.write_all(b"second line\n").unwrap();
        file.write_all(b"third line\n").unwrap();
        file.flush().unwrap();

        let rotated = file.rotated_path();
        assert_eq!(rotated, dir.path().join("logs").join("errors.log.1"));
        assert_eq!(std::fs::read_to_string(&rotated).unwrap(), "second line\n");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "third line\n");
    }

    #[test]
    fn test_rotating_file_counts_existing_content() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("errors.log");
        std::fs::write(&path, "0123456789").unwrap();

        let mut file = RotatingFile::open(&path, 12).unwrap();
        file.write_all(b"abcdef").unwrap();
        file.flush().unwrap();

        assert_eq!(std::fs::read_to_string(file.rotated_path()).unwrap(), "0123456789");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "abcdef");
    }

    #[test]
    fn test_env_filter_by_verbosity() {
        if std::env::var("RUST_LOG").is_ok() {
            return;
        }
        assert!(create_env_filter(0).to_string().contains("ssh_jump=info"));
        assert!(create_env_filter(2).to_string().contains("russh=debug"));
        assert!(create_env_filter(5).to_string().contains("ssh_jump=trace"));
    }
}
