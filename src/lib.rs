// src/lib.rs

//! Audit execution engine for network devices.
//!
//! Given a roster of devices, [`Orchestrator`] audits each one on a bounded
//! pool: it opens a command session, gathers facts, drives every requested
//! check through its request/handler loop and aggregates a
//! [`DeviceAuditResult`] per device. Faults stay local to the gatherer, check
//! or device that raised them.

pub mod config;
pub mod core;
pub mod logging;

pub use crate::config::AuditConfig;
pub use crate::core::audit::Auditor;
pub use crate::core::check::{Check, CheckCatalog, CheckMetadata, CheckState};
pub use crate::core::connection::{Connection, Connector};
pub use crate::core::error::{AuditError, CheckError, ConnectError, FactError};
pub use crate::core::facts::{FactGatherer, FactRegistry};
pub use crate::core::models::{
    AuditContext, AuditResults, CheckRequest, CheckResult, DeviceAuditResult, RosterEntry, SessionCredentials, Status,
};
pub use crate::core::orchestrator::{AuditHandle, Orchestrator};
