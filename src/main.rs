// src/main.rs

use color_eyre::eyre::{Result, WrapErr, eyre};
use netaudit_core::core::models::{AuditContext, RosterEntry};
use netaudit_core::{AuditConfig, Auditor, Orchestrator, logging};
use std::path::{Path, PathBuf};
use tracing::info;

/// Usage: `netaudit <roster.json> [context.json]`
///
/// Configuration comes from `NETAUDIT_*` environment variables; the aggregate
/// result map is printed to stdout as JSON.
#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let log_path = logging::initialize_logging()?;

    let mut args = std::env::args().skip(1);
    let roster_path: PathBuf = args
        .next()
        .map(PathBuf::from)
        .ok_or_else(|| eyre!("usage: netaudit <roster.json> [context.json]"))?;
    let context_path = args.next().map(PathBuf::from);

    let config = AuditConfig::from_env()?;
    let roster: Vec<RosterEntry> = read_json(&roster_path)?;
    let context: AuditContext = match &context_path {
        Some(path) => read_json(path)?,
        None => AuditContext::new(),
    };

    info!(devices = roster.len(), log = %log_path.display(), "Audit requested.");
    let auditor = Auditor::from_config(&config, context)?;
    let results = Orchestrator::new(auditor, config.max_workers).run(roster).await;

    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let text = std::fs::read_to_string(path).wrap_err_with(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&text).wrap_err_with(|| format!("parsing {}", path.display()))
}
