// src/core/models.rs

use chrono::{DateTime, Utc};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use strum::{Display, EnumIter, FromRepr};

// --- Status Codes ---

/// Outcome of a single check, or the overall verdict of a device audit.
///
/// The integer values are part of the persisted result format and must not change.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumIter, FromRepr,
)]
#[serde(into = "u8", try_from = "u8")]
#[repr(u8)]
pub enum Status {
    #[default]
    #[strum(to_string = "NOT RUN")]
    NotRun = 0,
    #[strum(to_string = "PASS")]
    Pass = 1,
    #[strum(to_string = "FAIL")]
    Fail = 2,
    #[strum(to_string = "WARN")]
    Warn = 3,
    #[strum(to_string = "INFO")]
    Info = 4,
    #[strum(to_string = "ERROR")]
    Error = 5,
    #[strum(to_string = "INCONCLUSIVE")]
    Inconclusive = 6,
}

impl Status {
    pub fn description(&self) -> &'static str {
        match self {
            Status::NotRun => "Check has not executed yet",
            Status::Pass => "Check conditions fully satisfied",
            Status::Fail => "Check conditions violated",
            Status::Warn => "Partial compliance, risk detected, or best-practice deviation",
            Status::Info => "Informational check (no pass/fail semantics)",
            Status::Error => "Execution/parsing error, command failed, unexpected output",
            Status::Inconclusive => "Output insufficient or ambiguous",
        }
    }

    /// Whether this status makes the whole device audit fail.
    pub fn is_failure(&self) -> bool {
        matches!(self, Status::Fail | Status::Error)
    }
}

impl From<Status> for u8 {
    fn from(status: Status) -> Self {
        status as u8
    }
}

impl TryFrom<u8> for Status {
    type Error = String;

    fn try_from(code: u8) -> Result<Self, String> {
        Status::from_repr(code).ok_or_else(|| format!("unknown status code {code}"))
    }
}

// --- Roster ---

/// Credentials for one audit run, handed over already decrypted.
///
/// The jumphost is only used when host, username and password are all present.
#[derive(Clone, Default, Deserialize)]
pub struct SessionCredentials {
    pub network_username: String,
    pub network_password: String,
    #[serde(default)]
    pub jumphost_ip: Option<String>,
    #[serde(default)]
    pub jumphost_username: Option<String>,
    #[serde(default)]
    pub jumphost_password: Option<String>,
}

// Passwords never reach the logs.
impl fmt::Debug for SessionCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionCredentials")
            .field("network_username", &self.network_username)
            .field("network_password", &"***")
            .field("jumphost_ip", &self.jumphost_ip)
            .field("jumphost_username", &self.jumphost_username)
            .field("jumphost_password", &self.jumphost_password.as_ref().map(|_| "***"))
            .finish()
    }
}

/// One device to audit together with the ordered list of checks to run on it.
#[derive(Debug, Clone, Deserialize)]
pub struct RosterEntry {
    pub device: String,
    #[serde(alias = "checks")]
    pub check_list: Vec<String>,
    pub session: SessionCredentials,
}

/// Opaque value handed to every check constructor.
pub type AuditContext = serde_json::Map<String, Value>;

// --- Check Runtime State ---

/// A command a check wants executed, and the handler that will receive its output.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckRequest {
    pub device: String,
    pub command: String,
    pub handler: String,
}

impl CheckRequest {
    pub fn new(device: impl Into<String>, command: impl Into<String>, handler: impl Into<String>) -> Self {
        Self {
            device: device.into(),
            command: command.into(),
            handler: handler.into(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckResult {
    pub status: Status,
    pub observation: String,
    pub comments: Vec<String>,
}

// --- Raw Command Cache ---

/// Captured command output for one device audit, keyed by (device, command).
///
/// Serialized as a flat map: commands run on the audited device use the bare
/// command as key, commands run on any other device use `device:command`.
#[derive(Debug, Clone, Default)]
pub struct RawCache {
    owner: String,
    entries: BTreeMap<(String, String), String>,
}

impl RawCache {
    pub fn new(owner: impl Into<String>) -> Self {
        Self {
            owner: owner.into(),
            entries: BTreeMap::new(),
        }
    }

    pub fn get(&self, device: &str, command: &str) -> Option<&str> {
        self.entries
            .get(&(device.to_string(), command.to_string()))
            .map(String::as_str)
    }

    pub fn insert(&mut self, device: &str, command: &str, output: String) {
        self.entries.insert((device.to_string(), command.to_string()), output);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn render_key(&self, device: &str, command: &str) -> String {
        if device == self.owner {
            command.to_string()
        } else {
            format!("{device}:{command}")
        }
    }
}

impl Serialize for RawCache {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for ((device, command), output) in &self.entries {
            map.serialize_entry(&self.render_key(device, command), output)?;
        }
        map.end()
    }
}

// --- Device Audit Result ---

/// Flat key/value data produced by fact gatherers.
pub type Facts = BTreeMap<String, Value>;

/// Everything recorded about one device during one audit run.
#[derive(Debug, Clone, Serialize)]
pub struct DeviceAuditResult {
    pub last_audit: DateTime<Utc>,
    /// `None` until a connection attempt has been made.
    pub login: Option<bool>,
    pub hostname: String,
    pub raw: RawCache,
    pub facts: Facts,
    pub checks: BTreeMap<String, CheckResult>,
    pub status: Status,
}

impl DeviceAuditResult {
    /// Result shell with every requested check pre-populated as NOT RUN.
    pub fn new(device: &str, check_list: &[String]) -> Self {
        Self {
            last_audit: Utc::now(),
            login: None,
            hostname: device.to_string(),
            raw: RawCache::new(device),
            facts: Facts::new(),
            checks: check_list
                .iter()
                .map(|id| (id.clone(), CheckResult::default()))
                .collect(),
            status: Status::NotRun,
        }
    }

    /// Overall verdict: FAIL if any check failed or errored, PASS otherwise.
    pub fn finalize_status(&mut self) -> Status {
        self.status = if self.checks.values().any(|c| c.status.is_failure()) {
            Status::Fail
        } else {
            Status::Pass
        };
        self.status
    }
}

/// Aggregate map returned by the orchestrator, keyed by device id.
pub type AuditResults = BTreeMap<String, DeviceAuditResult>;
