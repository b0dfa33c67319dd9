// src/core/facts.rs

//! Fact gatherers: stateless functions that describe a device (model,
//! software version, serial...) independently of any check.
//!
//! Only functions named `gather_<fragment>` are registered; their id is
//! `<module>.<fragment>`. Modules are either registered natively or read from
//! JSON files in the facts directory, where each top-level key is a function:
//!
//! ```json
//! {
//!   "gather_version": {
//!     "description": "Software version and uptime",
//!     "command": "show version",
//!     "patterns": ["Version (?P<os_version>[^,\\s]+)", "uptime is (?P<uptime>.+)"]
//!   }
//! }
//! ```

use crate::core::connection::Connection;
use crate::core::error::FactError;
use crate::core::models::Facts;
use async_trait::async_trait;
use futures::FutureExt;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, error, info};

static RE_GATHER_FN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^gather_([a-zA-Z0-9_]+)$").unwrap());

const NO_DESCRIPTION: &str = "No description.";

#[async_trait]
pub trait FactGatherer: Send + Sync {
    async fn gather(&self, conn: &mut dyn Connection) -> Result<Facts, FactError>;
}

/// A registered gatherer and where it came from.
#[derive(Clone)]
pub struct GathererEntry {
    pub id: String,
    pub name: String,
    pub source: String,
    pub description: String,
    gatherer: Arc<dyn FactGatherer>,
}

impl std::fmt::Debug for GathererEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GathererEntry")
            .field("id", &self.id)
            .field("source", &self.source)
            .finish_non_exhaustive()
    }
}

/// Read-only after loading; shared between device tasks behind an `Arc`.
#[derive(Debug, Clone, Default)]
pub struct FactRegistry {
    gatherers: BTreeMap<String, GathererEntry>,
}

impl FactRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads every `*.json` module in `dir` (files starting with `__` are skipped).
    ///
    /// A module that cannot be parsed is logged and skipped; only an unreadable
    /// directory is an error.
    pub fn load_all(dir: &Path) -> Result<Self, FactError> {
        let mut registry = Self::new();
        let mut paths: Vec<_> = std::fs::read_dir(dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter(|p| {
                p.file_name()
                    .and_then(|n| n.to_str())
                    .is_some_and(|n| !n.starts_with("__"))
            })
            .collect();
        paths.sort();

        for path in paths {
            if let Err(e) = registry.load_module(&path) {
                error!(path = %path.display(), error = %e, "Skipping fact module.");
            }
        }
        info!(count = registry.len(), dir = %dir.display(), "Loaded fact gatherers.");
        Ok(registry)
    }

    fn load_module(&mut self, path: &Path) -> Result<(), FactError> {
        let invalid = |reason: String| FactError::InvalidSource {
            path: path.display().to_string(),
            reason,
        };
        let module = path
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| invalid("file name is not valid UTF-8".into()))?
            .to_string();
        let text = std::fs::read_to_string(path)?;
        let functions: BTreeMap<String, CommandGathererDef> =
            serde_json::from_str(&text).map_err(|e| invalid(e.to_string()))?;

        // Compile everything before registering anything: a module loads whole or not at all.
        let mut compiled = Vec::with_capacity(functions.len());
        for (function, def) in functions {
            let description = def.description.clone();
            let gatherer = CommandGatherer::compile(def).map_err(|e| invalid(format!("{function}: {e}")))?;
            compiled.push((function, description, gatherer));
        }

        let source = path.display().to_string();
        for (function, description, gatherer) in compiled {
            self.insert(&module, &function, &source, description, Arc::new(gatherer));
        }
        Ok(())
    }

    /// Registers a native gatherer. Returns false (and registers nothing) if
    /// `function` does not follow the `gather_<name>` convention.
    pub fn register(
        &mut self,
        module: &str,
        function: &str,
        description: Option<String>,
        gatherer: Arc<dyn FactGatherer>,
    ) -> bool {
        self.insert(module, function, "builtin", description, gatherer)
    }

    fn insert(
        &mut self,
        module: &str,
        function: &str,
        source: &str,
        description: Option<String>,
        gatherer: Arc<dyn FactGatherer>,
    ) -> bool {
        let Some(caps) = RE_GATHER_FN.captures(function) else {
            debug!(module, function, "Ignoring function outside the gather_ convention.");
            return false;
        };
        let name = caps[1].to_string();
        let id = format!("{module}.{name}");
        self.gatherers.insert(
            id.clone(),
            GathererEntry {
                id,
                name,
                source: source.to_string(),
                description: description.unwrap_or_else(|| NO_DESCRIPTION.to_string()),
                gatherer,
            },
        );
        true
    }

    pub fn get(&self, id: &str) -> Option<&GathererEntry> {
        self.gatherers.get(id)
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.gatherers.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.gatherers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gatherers.is_empty()
    }

    /// Runs every gatherer and merges their output; later ids overwrite earlier keys.
    /// A failing or panicking gatherer is logged and contributes nothing.
    pub async fn run_all(&self, conn: &mut dyn Connection) -> Facts {
        let mut facts = Facts::new();
        for (id, entry) in &self.gatherers {
            let outcome = AssertUnwindSafe(entry.gatherer.gather(&mut *conn))
                .catch_unwind()
                .await
                .unwrap_or_else(|_| {
                    Err(FactError::Gather {
                        id: id.clone(),
                        reason: "gatherer panicked".to_string(),
                    })
                });
            match outcome {
                Ok(found) => {
                    debug!(gatherer = %id, keys = found.len(), "Gatherer finished.");
                    facts.extend(found);
                }
                Err(e) => error!(gatherer = %id, device = conn.device(), error = %e, "Error running gatherer."),
            }
        }
        facts
    }
}

#[derive(Debug, Deserialize)]
struct CommandGathererDef {
    command: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    patterns: Vec<String>,
}

/// Runs one command and turns named capture groups into facts.
#[derive(Debug)]
pub struct CommandGatherer {
    command: String,
    patterns: Vec<Regex>,
}

impl CommandGatherer {
    fn compile(def: CommandGathererDef) -> Result<Self, regex::Error> {
        let patterns = def
            .patterns
            .iter()
            .map(|p| Regex::new(p))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            command: def.command,
            patterns,
        })
    }
}

#[async_trait]
impl FactGatherer for CommandGatherer {
    async fn gather(&self, conn: &mut dyn Connection) -> Result<Facts, FactError> {
        let output = conn.send(&self.command).await?;
        let mut facts = Facts::new();
        for pattern in &self.patterns {
            let Some(caps) = pattern.captures(&output) else { continue };
            for name in pattern.capture_names().flatten() {
                if let Some(m) = caps.name(name) {
                    facts.insert(name.to_string(), Value::String(m.as_str().trim().to_string()));
                }
            }
        }
        Ok(facts)
    }
}
