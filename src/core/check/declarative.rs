// src/core/check/declarative.rs

//! Checks described as data.
//!
//! A definition names a start step; each step runs one command and walks an
//! ordered list of regex rules. The first matching rule decides the outcome
//! and may hand over to another step:
//!
//! ```json
//! {
//!   "name": "NTP synchronised",
//!   "tags": ["ntp"],
//!   "start": "status",
//!   "steps": {
//!     "status": {
//!       "command": "show ntp status",
//!       "rules": [
//!         { "pattern": "Clock is synchronized, stratum (\\d+)", "status": 1,
//!           "observation": "Synchronised at stratum $1" }
//!       ],
//!       "default": { "status": 2, "observation": "Clock is not synchronised" }
//!     }
//!   }
//! }
//! ```
//!
//! `device` on a step targets another device; `{device}` and
//! `{context.<key>}` placeholders are expanded when the check is loaded.

use super::{Check, CheckMetadata, CheckState};
use crate::core::error::CheckError;
use crate::core::models::{AuditContext, CheckRequest, Status};
use regex::{Captures, Regex};
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Deserialize)]
struct Definition {
    #[serde(flatten)]
    metadata: CheckMetadata,
    start: String,
    steps: BTreeMap<String, StepDef>,
}

#[derive(Debug, Deserialize)]
struct StepDef {
    command: String,
    #[serde(default)]
    device: Option<String>,
    #[serde(default)]
    rules: Vec<RuleDef>,
    #[serde(default)]
    default: Option<Outcome>,
}

#[derive(Debug, Deserialize)]
struct RuleDef {
    pattern: String,
    #[serde(flatten)]
    outcome: Outcome,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct Outcome {
    #[serde(default)]
    status: Option<Status>,
    #[serde(default)]
    observation: Option<String>,
    #[serde(default)]
    comments: Vec<String>,
    #[serde(default)]
    next: Option<String>,
}

#[derive(Debug)]
struct Step {
    command: String,
    device: String,
    rules: Vec<(Regex, Outcome)>,
    default: Option<Outcome>,
}

/// A check instance compiled from a JSON definition.
#[derive(Debug)]
pub struct DeclarativeCheck {
    metadata: CheckMetadata,
    steps: BTreeMap<String, Step>,
    state: CheckState,
}

impl DeclarativeCheck {
    /// Compiles `source` for one device. Every regex and step reference is validated up front.
    pub fn from_json(id: &str, source: &str, device: &str, context: &AuditContext) -> Result<Self, CheckError> {
        let invalid = |reason: String| CheckError::InvalidDefinition {
            id: id.to_string(),
            reason,
        };

        let definition: Definition = serde_json::from_str(source).map_err(|e| invalid(e.to_string()))?;

        let mut steps = BTreeMap::new();
        for (name, def) in &definition.steps {
            let mut rules = Vec::with_capacity(def.rules.len());
            for rule in &def.rules {
                let regex = Regex::new(&rule.pattern)
                    .map_err(|e| invalid(format!("step '{name}': {e}")))?;
                rules.push((regex, rule.outcome.clone()));
            }
            let target = match &def.device {
                Some(template) => expand_placeholders(template, device, context),
                None => device.to_string(),
            };
            steps.insert(
                name.clone(),
                Step {
                    command: expand_placeholders(&def.command, device, context),
                    device: target,
                    rules,
                    default: def.default.clone(),
                },
            );
        }

        for (name, step) in &steps {
            let targets = step
                .rules
                .iter()
                .map(|(_, o)| o)
                .chain(step.default.iter())
                .filter_map(|o| o.next.as_deref());
            for next in targets {
                if !steps.contains_key(next) {
                    return Err(invalid(format!("step '{name}' hands over to unknown step '{next}'")));
                }
            }
        }

        let first = steps
            .get(&definition.start)
            .ok_or_else(|| invalid(format!("start step '{}' is not defined", definition.start)))?;
        let state = CheckState::starting_with(CheckRequest::new(
            first.device.clone(),
            first.command.clone(),
            definition.start.clone(),
        ));

        let mut metadata = definition.metadata;
        if metadata.name.is_empty() {
            metadata.name = id.to_string();
        }

        Ok(Self { metadata, steps, state })
    }

    fn apply(&mut self, outcome: &Outcome, caps: Option<&Captures<'_>>) {
        let expand = |template: &str| match caps {
            Some(caps) => {
                let mut out = String::new();
                caps.expand(template, &mut out);
                out
            }
            None => template.to_string(),
        };

        if let Some(status) = outcome.status {
            self.state.result.status = status;
        }
        if let Some(observation) = &outcome.observation {
            self.state.result.observation = expand(observation);
        }
        for comment in &outcome.comments {
            let text = expand(comment);
            self.state.comment(text);
        }

        self.state.pending_request = outcome.next.as_ref().and_then(|next| {
            self.steps
                .get(next)
                .map(|step| CheckRequest::new(step.device.clone(), step.command.clone(), next.clone()))
        });
    }
}

impl Check for DeclarativeCheck {
    fn metadata(&self) -> &CheckMetadata {
        &self.metadata
    }

    fn state(&self) -> &CheckState {
        &self.state
    }

    fn handle(&mut self, handler: &str, _device: &str, _command: &str, output: &str) -> Result<(), CheckError> {
        let step = self.steps.get(handler).ok_or_else(|| CheckError::UnknownHandler {
            check: self.metadata.name.clone(),
            handler: handler.to_string(),
        })?;

        let matched = step
            .rules
            .iter()
            .find_map(|(regex, outcome)| regex.captures(output).map(|caps| (outcome.clone(), caps)));

        match matched {
            Some((outcome, caps)) => self.apply(&outcome, Some(&caps)),
            None => match step.default.clone() {
                Some(outcome) => self.apply(&outcome, None),
                None => self.state.finish(
                    Status::Inconclusive,
                    format!("Output of '{}' matched no rule", step.command),
                ),
            },
        }
        Ok(())
    }
}

/// Expands `{device}` and `{context.<key>}` (string, number or bool values only).
fn expand_placeholders(template: &str, device: &str, context: &AuditContext) -> String {
    let mut out = template.replace("{device}", device);
    for (key, value) in context {
        let rendered = match value {
            Value::String(s) => s.clone(),
            Value::Number(n) => n.to_string(),
            Value::Bool(b) => b.to_string(),
            _ => continue,
        };
        out = out.replace(&format!("{{context.{key}}}"), &rendered);
    }
    out
}
