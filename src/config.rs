// src/config.rs

use crate::core::error::AuditError;
use lazy_static::lazy_static;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

lazy_static! {
    pub static ref ENV_PREFIX: String = "NETAUDIT_".to_string();
}

/// Tunables of the audit engine.
///
/// Every field has a default, so an empty JSON object is a valid configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    /// Upper bound on devices audited at the same time.
    pub max_workers: usize,
    /// Round trips a single check may make before its drive loop is stopped.
    pub max_round_trips: usize,
    pub connect_timeout_secs: u64,
    pub command_timeout_secs: u64,
    /// CLI port on devices and jumphosts.
    pub port: u16,
    /// Command typed on the jumphost to reach a device. `{hostname}` and `{username}` are substituted.
    pub jump_command: String,
    pub checks_dir: Option<PathBuf>,
    pub facts_dir: Option<PathBuf>,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            max_workers: 8,
            max_round_trips: 64,
            connect_timeout_secs: 15,
            command_timeout_secs: 60,
            port: 23,
            jump_command: "ssh -l {username} {hostname}".to_string(),
            checks_dir: None,
            facts_dir: None,
        }
    }
}

impl AuditConfig {
    /// Reads a JSON configuration file.
    pub fn from_file(path: &Path) -> Result<Self, AuditError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AuditError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Self = serde_json::from_str(&text)
            .map_err(|e| AuditError::Config(format!("{}: {}", path.display(), e)))?;
        config.validate()
    }

    /// Defaults overlaid with any `NETAUDIT_*` environment variables.
    pub fn from_env() -> Result<Self, AuditError> {
        Self::default().overlay(|key| std::env::var(format!("{}{}", *ENV_PREFIX, key)).ok())
    }

    /// Overlays values looked up by their unprefixed upper-case key.
    pub fn overlay<F>(mut self, lookup: F) -> Result<Self, AuditError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("MAX_WORKERS") {
            self.max_workers = parse_value("MAX_WORKERS", &v)?;
        }
        if let Some(v) = lookup("MAX_ROUND_TRIPS") {
            self.max_round_trips = parse_value("MAX_ROUND_TRIPS", &v)?;
        }
        if let Some(v) = lookup("CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = parse_value("CONNECT_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("COMMAND_TIMEOUT_SECS") {
            self.command_timeout_secs = parse_value("COMMAND_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("PORT") {
            self.port = parse_value("PORT", &v)?;
        }
        if let Some(v) = lookup("JUMP_COMMAND") {
            self.jump_command = v;
        }
        if let Some(v) = lookup("CHECKS_DIR") {
            self.checks_dir = Some(PathBuf::from(v));
        }
        if let Some(v) = lookup("FACTS_DIR") {
            self.facts_dir = Some(PathBuf::from(v));
        }
        self.validate()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    fn validate(self) -> Result<Self, AuditError> {
        if self.max_workers == 0 {
            return Err(AuditError::Config("max_workers must be at least 1".into()));
        }
        if self.max_round_trips == 0 {
            return Err(AuditError::Config("max_round_trips must be at least 1".into()));
        }
        if !self.jump_command.contains("{hostname}") {
            return Err(AuditError::Config("jump_command must contain {hostname}".into()));
        }
        Ok(self)
    }
}

fn parse_value<T: FromStr>(key: &str, raw: &str) -> Result<T, AuditError> {
    raw.trim()
        .parse()
        .map_err(|_| AuditError::Config(format!("{}{} has invalid value '{}'", *ENV_PREFIX, key, raw)))
}
