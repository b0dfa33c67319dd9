// src/core/error.rs

use thiserror::Error;

/// Failure to open or use a command session on a device.
#[derive(Error, Debug)]
pub enum ConnectError {
    #[error("TCP connection to {host} failed: {source}")]
    Tcp {
        host: String,
        #[source]
        source: std::io::Error,
    },
    #[error("Timed out waiting for {0}")]
    Timeout(String),
    #[error("Authentication rejected by {0}")]
    AuthenticationFailed(String),
    #[error("Session closed by remote end")]
    Closed,
    #[error("Unexpected session state: {0}")]
    Protocol(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while loading a check or while running one of its handlers.
#[derive(Error, Debug)]
pub enum CheckError {
    #[error("No check registered or defined under '{0}'")]
    NotFound(String),
    #[error("Check definition '{id}' is invalid: {reason}")]
    InvalidDefinition { id: String, reason: String },
    #[error("Check '{check}' has no handler named '{handler}'")]
    UnknownHandler { check: String, handler: String },
    #[error("Handler '{handler}' failed: {reason}")]
    Handler { handler: String, reason: String },
    #[error("Check has no pending request")]
    Finished,
    #[error("Command session to '{device}' failed: {source}")]
    Session {
        device: String,
        #[source]
        source: ConnectError,
    },
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failure while loading or running a fact gatherer.
#[derive(Error, Debug)]
pub enum FactError {
    #[error("Gatherer source '{path}' is invalid: {reason}")]
    InvalidSource { path: String, reason: String },
    #[error("Gatherer '{id}' failed: {reason}")]
    Gather { id: String, reason: String },
    #[error(transparent)]
    Connect(#[from] ConnectError),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors surfaced to the embedding application.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("Invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Facts(#[from] FactError),
}
