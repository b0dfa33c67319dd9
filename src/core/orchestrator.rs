// src/core/orchestrator.rs

use crate::core::audit::Auditor;
use crate::core::models::{AuditResults, DeviceAuditResult, RosterEntry, Status};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{Instrument, error, info, info_span, warn};

/// Runs device audits on a pool bounded to `max_workers` concurrent devices.
pub struct Orchestrator {
    auditor: Arc<Auditor>,
    max_workers: usize,
}

/// In-flight audit run returned by [`Orchestrator::submit`].
pub struct AuditHandle {
    tasks: JoinSet<(String, DeviceAuditResult)>,
}

impl Orchestrator {
    pub fn new(auditor: Auditor, max_workers: usize) -> Self {
        Self {
            auditor: Arc::new(auditor),
            max_workers: max_workers.max(1),
        }
    }

    /// Spawns one task per roster entry. Must be called inside a tokio runtime.
    ///
    /// A device id listed twice is audited once, using its first entry.
    pub fn submit(&self, roster: Vec<RosterEntry>) -> AuditHandle {
        info!(devices = roster.len(), max_workers = self.max_workers, "Starting audit pool.");
        let limiter = Arc::new(Semaphore::new(self.max_workers));
        let mut seen = HashSet::new();
        let mut tasks = JoinSet::new();

        for entry in roster {
            if !seen.insert(entry.device.clone()) {
                warn!(device = %entry.device, "Device listed twice in roster, ignoring the duplicate.");
                continue;
            }
            let auditor = Arc::clone(&self.auditor);
            let limiter = Arc::clone(&limiter);

            tasks.spawn(async move {
                let device = entry.device.clone();
                let check_list = entry.check_list.clone();
                let _permit = limiter.acquire_owned().await.ok();

                // Inner task so a panic inside the audit is caught here and still yields a result.
                let span = info_span!("device_audit", device = %device);
                let work = tokio::spawn(async move { auditor.audit_device(&entry).await }.instrument(span));
                let result = match work.await {
                    Ok(result) => result,
                    Err(e) => {
                        error!(device = %device, error = %e, "Device audit task failed.");
                        let mut result = DeviceAuditResult::new(&device, &check_list);
                        result.status = Status::Fail;
                        result
                    }
                };
                (device, result)
            });
        }

        AuditHandle { tasks }
    }

    /// Convenience for `submit` followed by `await_all`.
    pub async fn run(&self, roster: Vec<RosterEntry>) -> AuditResults {
        self.submit(roster).await_all().await
    }
}

impl AuditHandle {
    /// Devices still being audited.
    pub fn pending(&self) -> usize {
        self.tasks.len()
    }

    /// Waits for every device and returns the aggregate map.
    pub async fn await_all(mut self) -> AuditResults {
        let mut results = AuditResults::new();
        while let Some(joined) = self.tasks.join_next().await {
            match joined {
                Ok((device, result)) => {
                    results.entry(device).or_insert(result);
                }
                Err(e) => error!(error = %e, "Audit worker failed outside a device task."),
            }
        }
        info!(devices = results.len(), "All device audits completed.");
        results
    }
}
