// src/core/audit.rs

use crate::config::AuditConfig;
use crate::core::check::CheckCatalog;
use crate::core::check::drive::{DeviceSession, drive};
use crate::core::connection::cli::CliConnector;
use crate::core::connection::hostname::{HickoryReverseDns, ReverseDns, resolve_hostname};
use crate::core::connection::{self, Connector};
use crate::core::error::AuditError;
use crate::core::facts::FactRegistry;
use crate::core::models::{AuditContext, CheckResult, DeviceAuditResult, RosterEntry, Status};
use std::sync::Arc;
use tracing::{debug, error, info};

/// Everything a device audit needs besides the roster entry itself.
///
/// Cheap to share: one instance serves every device task of a run.
pub struct Auditor {
    connector: Arc<dyn Connector>,
    dns: Arc<dyn ReverseDns>,
    catalog: Arc<CheckCatalog>,
    facts: Arc<FactRegistry>,
    context: Arc<AuditContext>,
    max_round_trips: usize,
}

impl Auditor {
    pub fn new(
        connector: Arc<dyn Connector>,
        dns: Arc<dyn ReverseDns>,
        catalog: CheckCatalog,
        facts: FactRegistry,
        context: AuditContext,
    ) -> Self {
        Self {
            connector,
            dns,
            catalog: Arc::new(catalog),
            facts: Arc::new(facts),
            context: Arc::new(context),
            max_round_trips: AuditConfig::default().max_round_trips,
        }
    }

    /// Stock wiring: CLI transport, system reverse DNS, checks and facts from the configured directories.
    pub fn from_config(config: &AuditConfig, context: AuditContext) -> Result<Self, AuditError> {
        let facts = match &config.facts_dir {
            Some(dir) => FactRegistry::load_all(dir)?,
            None => FactRegistry::new(),
        };
        let auditor = Self::new(
            Arc::new(CliConnector::new(config)),
            Arc::new(HickoryReverseDns::new()),
            CheckCatalog::new(config.checks_dir.clone()),
            facts,
            context,
        );
        Ok(auditor.with_max_round_trips(config.max_round_trips))
    }

    pub fn with_max_round_trips(mut self, max_round_trips: usize) -> Self {
        self.max_round_trips = max_round_trips.max(1);
        self
    }

    pub fn catalog(&self) -> &CheckCatalog {
        &self.catalog
    }

    /// Audits one device: connect, gather facts, run every check in order, close.
    ///
    /// Never fails: an unreachable device or a broken check only degrades the result.
    pub async fn audit_device(&self, entry: &RosterEntry) -> DeviceAuditResult {
        let device = entry.device.as_str();
        let mut result = DeviceAuditResult::new(device, &entry.check_list);

        let conn = connection::open(self.connector.as_ref(), device, &entry.session)
            .await
            .ok();
        result.login = Some(conn.is_some());

        let mut session = DeviceSession::new(device, &entry.session, self.connector.as_ref(), conn);
        result.hostname = resolve_hostname(device, session.connection_mut(), self.dns.as_ref()).await;

        if !session.is_connected() {
            error!(device, "Skipping device due to connection failure.");
            result.status = Status::Fail;
            return result;
        }

        if !self.facts.is_empty() {
            if let Some(conn) = session.connection_mut() {
                result.facts = self.facts.run_all(conn).await;
            }
        }

        for check_id in &entry.check_list {
            if let Some(check_result) = self.run_check(check_id, device, &mut session).await {
                result.checks.insert(check_id.clone(), check_result);
            }
        }

        result.raw = session.finish().await;
        let status = result.finalize_status();
        info!(device, hostname = %result.hostname, status = %status, "Audit task completed.");
        result
    }

    /// Loads and drives one check. `None` means it never loaded and stays NOT RUN.
    async fn run_check(&self, check_id: &str, device: &str, session: &mut DeviceSession<'_>) -> Option<CheckResult> {
        let mut check = match self.catalog.load(check_id, device, &self.context) {
            Ok(check) => check,
            Err(e) => {
                error!(device, check = check_id, error = %e, "Could not load check.");
                return None;
            }
        };

        match drive(&mut *check, session, self.max_round_trips).await {
            Ok(outcome) => debug!(
                device,
                check = check_id,
                round_trips = outcome.round_trips(),
                ?outcome,
                "Check completed."
            ),
            Err(e) => error!(device, check = check_id, error = %e, "Error executing check, keeping its last result."),
        }
        Some(check.state().result.clone())
    }
}
