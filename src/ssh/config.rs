//! Per-host SSH connection parameters
//!
//! Resolves [`HostConfig`] records from a file in OpenSSH client config
//! format. The file is re-read on every lookup so edits made between runs
//! of an operator workflow are picked up.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::{debug, error};

use super::pattern::matches_host_patterns;
use crate::error::{JumpError, Result};

/// Keys every resolved host must carry
pub const REQUIRED_KEYS: [&str; 4] = ["hostname", "user", "identityfile", "port"];

/// Resolved connection parameters for one host
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostConfig {
    /// Username for authentication
    pub user: String,

    /// Private key files, tried in order
    pub identity_files: Vec<PathBuf>,

    /// SSH port
    pub port: u16,

    /// Address to connect to
    pub hostname: String,
}

/// One `Host` section of the config file
#[derive(Debug, Clone, PartialEq, Eq)]
struct HostBlock {
    patterns: Vec<String>,
    /// Lower-cased keyword and raw value, in file order
    options: Vec<(String, String)>,
}

/// Looks up [`HostConfig`] records from a config file
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    path: PathBuf,
}

impl ConfigResolver {
    /// Create a resolver reading from `path`
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the config source
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Resolve the connection parameters for `host`.
    ///
    /// Fails with `ConfigUnavailable` if the file cannot be read and with
    /// `ConfigMissing` naming the first required key the host lacks.
    pub fn resolve(&self, host: &str) -> Result<HostConfig> {
        let content = std::fs::read_to_string(&self.path).map_err(|e| {
            error!("Cannot read SSH config {}: {}", self.path.display(), e);
            JumpError::config_unavailable(&self.path, e)
        })?;

        resolve_from_str(&content, host).inspect_err(|e| {
            error!("{}. Check the setup instructions.", e);
        })
    }
}

/// Resolve `host` against config text
pub fn resolve_from_str(content: &str, host: &str) -> Result<HostConfig> {
    let blocks = parse_blocks(content);
    let values = lookup(&blocks, host);

    for key in REQUIRED_KEYS {
        if !values.contains_key(key) {
            return Err(JumpError::config_missing(host, key));
        }
    }

    // Required keys are present, so these indexes cannot fail
    let hostname = values["hostname"][0].replace("%h", host);
    let user = values["user"][0].clone();
    let port_value = &values["port"][0];
    let port = port_value.parse::<u16>().map_err(|_| {
        JumpError::config(format!(
            "Invalid port '{}' for host '{}'",
            port_value, host
        ))
    })?;

    let identity_files = values["identityfile"]
        .iter()
        .map(|path| expand_path(path, &hostname, &user))
        .collect();

    debug!(
        "Resolved SSH config for {}: {}@{}:{}",
        host, user, hostname, port
    );

    Ok(HostConfig {
        user,
        identity_files,
        port,
        hostname,
    })
}

/// Split config text into `Host` sections.
///
/// Options before the first `Host` line apply to every host. `Match`
/// sections are skipped entirely.
fn parse_blocks(content: &str) -> Vec<HostBlock> {
    let mut blocks = vec![HostBlock {
        patterns: vec!["*".to_string()],
        options: Vec::new(),
    }];
    let mut in_match = false;

    for raw in content.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((keyword, value)) = split_option(line) else {
            debug!("Ignoring config line without a value: {}", line);
            continue;
        };

        match keyword.as_str() {
            "host" => {
                in_match = false;
                blocks.push(HostBlock {
                    patterns: value.split_whitespace().map(str::to_string).collect(),
                    options: Vec::new(),
                });
            }
            "match" => {
                debug!("Skipping unsupported Match block: {}", value);
                in_match = true;
            }
            _ if in_match => {}
            _ => {
                if let Some(block) = blocks.last_mut() {
                    block.options.push((keyword, value));
                }
            }
        }
    }

    blocks
}

/// Split `Keyword value` or `Keyword=value` into a lower-cased keyword and
/// an unquoted value
fn split_option(line: &str) -> Option<(String, String)> {
    let split_at = line.find(|c: char| c.is_whitespace() || c == '=')?;
    let (keyword, rest) = line.split_at(split_at);
    let value = rest
        .trim_start()
        .strip_prefix('=')
        .unwrap_or(rest)
        .trim();
    let value = value
        .strip_prefix('"')
        .and_then(|v| v.strip_suffix('"'))
        .unwrap_or(value);

    if value.is_empty() {
        return None;
    }
    Some((keyword.to_ascii_lowercase(), value.to_string()))
}

/// Collect option values for `host` across all matching blocks.
///
/// The first value obtained wins, except `identityfile` which accumulates.
fn lookup(blocks: &[HostBlock], host: &str) -> HashMap<String, Vec<String>> {
    let mut values: HashMap<String, Vec<String>> = HashMap::new();

    for block in blocks
        .iter()
        .filter(|b| matches_host_patterns(host, &b.patterns))
    {
        for (keyword, value) in &block.options {
            let entry = values.entry(keyword.clone()).or_default();
            if keyword == "identityfile" || entry.is_empty() {
                entry.push(value.clone());
            }
        }
    }

    values
}

/// Expand `~` and the `%h`/`%r` tokens in an identity file path
fn expand_path(path: &str, hostname: &str, user: &str) -> PathBuf {
    let path = path.replace("%h", hostname).replace("%r", user);
    match path.strip_prefix("~/") {
        Some(rest) => match dirs::home_dir() {
            Some(home) => home.join(rest),
            None => PathBuf::from(path),
        },
        None => PathBuf::from(path),
    }
}
