//! Scripted in-memory devices shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use netaudit_core::core::connection::hostname::ReverseDns;
use netaudit_core::core::models::{CheckRequest, RosterEntry, SessionCredentials, Status};
use netaudit_core::{Check, CheckError, CheckMetadata, CheckState, ConnectError, Connection, Connector};
use std::collections::{HashMap, HashSet};
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Counters shared by a [`ScriptedConnector`] and the sessions it hands out.
#[derive(Default)]
pub struct Telemetry {
    pub connects: Mutex<HashMap<String, usize>>,
    pub sends: Mutex<HashMap<(String, String), usize>>,
    pub closes: AtomicUsize,
    pub open_now: AtomicUsize,
    pub open_peak: AtomicUsize,
}

impl Telemetry {
    pub fn connects_to(&self, device: &str) -> usize {
        self.connects.lock().unwrap().get(device).copied().unwrap_or(0)
    }

    pub fn sends_of(&self, device: &str, command: &str) -> usize {
        self.sends
            .lock()
            .unwrap()
            .get(&(device.to_string(), command.to_string()))
            .copied()
            .unwrap_or(0)
    }
}

/// Devices answering canned output per command; unknown commands yield "".
#[derive(Default)]
pub struct ScriptedConnector {
    outputs: HashMap<String, HashMap<String, String>>,
    prompts: HashMap<String, String>,
    unreachable: HashSet<String>,
    failing_commands: HashSet<String>,
    connect_delay: Option<Duration>,
    pub telemetry: Arc<Telemetry>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn device(mut self, device: &str, outputs: &[(&str, &str)]) -> Self {
        self.outputs.insert(
            device.to_string(),
            outputs.iter().map(|(c, o)| (c.to_string(), o.to_string())).collect(),
        );
        self
    }

    pub fn prompt(mut self, device: &str, prompt: &str) -> Self {
        self.prompts.insert(device.to_string(), prompt.to_string());
        self
    }

    pub fn unreachable(mut self, device: &str) -> Self {
        self.unreachable.insert(device.to_string());
        self
    }

    pub fn failing_command(mut self, command: &str) -> Self {
        self.failing_commands.insert(command.to_string());
        self
    }

    pub fn connect_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = Some(delay);
        self
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        device: &str,
        _credentials: &SessionCredentials,
    ) -> Result<Box<dyn Connection>, ConnectError> {
        *self
            .telemetry
            .connects
            .lock()
            .unwrap()
            .entry(device.to_string())
            .or_default() += 1;

        if let Some(delay) = self.connect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.unreachable.contains(device) {
            return Err(ConnectError::Timeout(format!("TCP connect to {device}")));
        }

        let now = self.telemetry.open_now.fetch_add(1, Ordering::SeqCst) + 1;
        self.telemetry.open_peak.fetch_max(now, Ordering::SeqCst);

        Ok(Box::new(ScriptedConnection {
            device: device.to_string(),
            prompt: self.prompts.get(device).cloned().unwrap_or_else(|| device.to_string()),
            outputs: self.outputs.get(device).cloned().unwrap_or_default(),
            failing: self.failing_commands.clone(),
            telemetry: Arc::clone(&self.telemetry),
            open: true,
        }))
    }
}

pub struct ScriptedConnection {
    device: String,
    prompt: String,
    outputs: HashMap<String, String>,
    failing: HashSet<String>,
    telemetry: Arc<Telemetry>,
    open: bool,
}

#[async_trait]
impl Connection for ScriptedConnection {
    fn device(&self) -> &str {
        &self.device
    }

    fn base_prompt(&self) -> &str {
        &self.prompt
    }

    async fn send(&mut self, command: &str) -> Result<String, ConnectError> {
        *self
            .telemetry
            .sends
            .lock()
            .unwrap()
            .entry((self.device.clone(), command.to_string()))
            .or_default() += 1;
        if self.failing.contains(command) {
            return Err(ConnectError::Closed);
        }
        Ok(self.outputs.get(command).cloned().unwrap_or_default())
    }

    async fn close(&mut self) {
        if self.open {
            self.open = false;
            self.telemetry.closes.fetch_add(1, Ordering::SeqCst);
            self.telemetry.open_now.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

/// Reverse DNS that never answers, so tests stay off the network.
pub struct NoDns;

#[async_trait]
impl ReverseDns for NoDns {
    async fn reverse(&self, _ip: Ipv4Addr) -> Option<String> {
        None
    }
}

pub fn session() -> SessionCredentials {
    SessionCredentials {
        network_username: "ops".into(),
        network_password: "pw".into(),
        ..Default::default()
    }
}

pub fn entry(device: &str, checks: &[&str]) -> RosterEntry {
    RosterEntry {
        device: device.to_string(),
        check_list: checks.iter().map(|c| c.to_string()).collect(),
        session: session(),
    }
}

/// One-shot check: runs `command` on its own device and passes when `needle` is in the output.
pub struct ContainsCheck {
    meta: CheckMetadata,
    state: CheckState,
    needle: String,
}

impl ContainsCheck {
    pub fn boxed(device: &str, command: &str, needle: &str) -> Box<dyn Check> {
        Box::new(Self {
            meta: CheckMetadata::named(format!("contains {needle}")),
            state: CheckState::starting_with(CheckRequest::new(device, command, "inspect")),
            needle: needle.to_string(),
        })
    }
}

impl Check for ContainsCheck {
    fn metadata(&self) -> &CheckMetadata {
        &self.meta
    }

    fn state(&self) -> &CheckState {
        &self.state
    }

    fn handle(&mut self, handler: &str, _device: &str, _command: &str, output: &str) -> Result<(), CheckError> {
        if handler != "inspect" {
            return Err(CheckError::UnknownHandler {
                check: self.meta.name.clone(),
                handler: handler.to_string(),
            });
        }
        if output.contains(&self.needle) {
            self.state.finish(Status::Pass, format!("found '{}'", self.needle));
        } else {
            self.state.finish(Status::Fail, format!("'{}' missing", self.needle));
        }
        Ok(())
    }
}
