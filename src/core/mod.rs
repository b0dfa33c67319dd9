// src/core/mod.rs

/// Data model shared by every component: status codes, roster entries,
/// check results, the raw command cache and the per-device audit result.
pub mod models;

/// Typed errors for connections, checks, fact gatherers and configuration.
pub mod error;

/// Command sessions to devices, the optional jumphost hop and hostname resolution.
pub mod connection;

/// The check contract, the catalog that loads checks and the drive loop that runs them.
pub mod check;

/// Stateless fact gatherers, loaded once and run against every reachable device.
pub mod facts;

/// The per-device audit task.
pub mod audit;

/// Bounded concurrent execution of device audits and result aggregation.
pub mod orchestrator;
