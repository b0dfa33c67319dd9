// src/core/check/mod.rs

//! Checks: small state machines that ask for command output and turn it into a verdict.
//!
//! A check instance owns a pending request (`None` once it is done) and a
//! result. The drive loop in [`drive`] feeds it command output through named
//! handlers until the request is cleared, repeats itself, or a round-trip cap
//! is hit.

pub mod catalog;
pub mod declarative;
pub mod drive;
pub mod harness;

use crate::core::error::CheckError;
use crate::core::models::{CheckRequest, CheckResult, Status};
use serde::{Deserialize, Serialize};

pub use catalog::CheckCatalog;

/// Descriptive fields every check exposes. All of them have defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckMetadata {
    pub name: String,
    pub version: String,
    pub author: String,
    pub tags: Vec<String>,
    pub description: String,
    /// 1 (single command) to 5 (many handlers or command cycles).
    pub complexity: u8,
}

impl Default for CheckMetadata {
    fn default() -> Self {
        Self {
            name: String::new(),
            version: "1.0.0".to_string(),
            author: String::new(),
            tags: Vec::new(),
            description: String::new(),
            complexity: 1,
        }
    }
}

impl CheckMetadata {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Mutable state owned by one check instance.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CheckState {
    pub pending_request: Option<CheckRequest>,
    pub result: CheckResult,
}

impl CheckState {
    /// State whose first request is `first`.
    pub fn starting_with(first: CheckRequest) -> Self {
        Self {
            pending_request: Some(first),
            result: CheckResult::default(),
        }
    }

    pub fn request(&mut self, device: &str, command: &str, handler: &str) {
        self.pending_request = Some(CheckRequest::new(device, command, handler));
    }

    /// Records the verdict and clears the pending request.
    pub fn finish(&mut self, status: Status, observation: impl Into<String>) {
        self.result.status = status;
        self.result.observation = observation.into();
        self.pending_request = None;
    }

    pub fn comment(&mut self, text: impl Into<String>) {
        self.result.comments.push(text.into());
    }
}

/// The contract between the audit engine and a check implementation.
///
/// Instances are built fresh for every (device, check) pair, so nothing
/// leaks between devices or between checks.
pub trait Check: Send {
    fn metadata(&self) -> &CheckMetadata;

    fn state(&self) -> &CheckState;

    /// Runs the handler named by the consumed request. A handler that
    /// completes the check clears `pending_request`.
    fn handle(&mut self, handler: &str, device: &str, command: &str, output: &str) -> Result<(), CheckError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finishing_clears_the_request() {
        let mut state = CheckState::starting_with(CheckRequest::new("r1", "show clock", "parse"));
        state.comment("clock drift 2s");
        state.finish(Status::Warn, "Clock drifting");

        assert!(state.pending_request.is_none());
        assert_eq!(state.result.status, Status::Warn);
        assert_eq!(state.result.comments, vec!["clock drift 2s".to_string()]);
    }

    #[test]
    fn metadata_defaults_apply_to_missing_fields() {
        let meta: CheckMetadata = serde_json::from_str(r#"{"name": "NTP"}"#).unwrap();
        assert_eq!(meta.version, "1.0.0");
        assert_eq!(meta.complexity, 1);
        assert!(meta.tags.is_empty());
    }
}
