// src/core/connection/mod.rs

//! Command sessions to network devices.
//!
//! The audit engine only talks to devices through the [`Connector`] and
//! [`Connection`] traits. [`cli::CliConnector`] is the stock implementation
//! (line-oriented CLI over TCP, optionally hopping through a jumphost);
//! embedders may plug in any other transport.

pub mod cli;
pub mod hostname;

use crate::core::error::ConnectError;
use crate::core::models::SessionCredentials;
use async_trait::async_trait;
use tracing::{debug, error, info};

/// An open, authenticated command session on one device.
#[async_trait]
pub trait Connection: Send {
    /// Device id this session was opened for.
    fn device(&self) -> &str;

    /// Prompt reported by the device after login, without the trailing `>` or `#`.
    fn base_prompt(&self) -> &str;

    /// Runs one command and returns its output with echo and prompt stripped.
    async fn send(&mut self, command: &str) -> Result<String, ConnectError>;

    /// Best-effort teardown. Never fails.
    async fn close(&mut self);
}

/// Opens sessions. Shared by every device task, so it must be `Sync`.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        device: &str,
        credentials: &SessionCredentials,
    ) -> Result<Box<dyn Connection>, ConnectError>;
}

/// Intermediate host the device session is tunnelled through.
#[derive(Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub hostname: String,
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for ProxyConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyConfig")
            .field("hostname", &self.hostname)
            .field("username", &self.username)
            .finish_non_exhaustive()
    }
}

impl ProxyConfig {
    /// Builds a proxy only when host, username and password are all present and non-empty.
    pub fn from_credentials(credentials: &SessionCredentials) -> Option<Self> {
        let present = |v: &Option<String>| v.as_deref().filter(|s| !s.trim().is_empty()).map(String::from);
        Some(Self {
            hostname: present(&credentials.jumphost_ip)?,
            username: present(&credentials.jumphost_username)?,
            password: present(&credentials.jumphost_password)?,
        })
    }
}

/// Opens a session and logs the outcome. A failure here means "device unreachable".
pub async fn open(
    connector: &dyn Connector,
    device: &str,
    credentials: &SessionCredentials,
) -> Result<Box<dyn Connection>, ConnectError> {
    debug!(device, "Opening command session.");
    match connector.connect(device, credentials).await {
        Ok(conn) => {
            info!(device, prompt = conn.base_prompt(), "Connected to device.");
            Ok(conn)
        }
        Err(e) => {
            error!(device, error = %e, "Connection failed.");
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn creds(ip: Option<&str>, user: Option<&str>, pass: Option<&str>) -> SessionCredentials {
        SessionCredentials {
            network_username: "ops".into(),
            network_password: "pw".into(),
            jumphost_ip: ip.map(String::from),
            jumphost_username: user.map(String::from),
            jumphost_password: pass.map(String::from),
        }
    }

    #[test]
    fn proxy_requires_all_three_jumphost_fields() {
        assert!(ProxyConfig::from_credentials(&creds(Some("10.9.9.9"), Some("jump"), None)).is_none());
        assert!(ProxyConfig::from_credentials(&creds(None, Some("jump"), Some("pw"))).is_none());
        assert!(ProxyConfig::from_credentials(&creds(Some(""), Some("jump"), Some("pw"))).is_none());

        let proxy = ProxyConfig::from_credentials(&creds(Some("10.9.9.9"), Some("jump"), Some("pw"))).unwrap();
        assert_eq!(proxy.hostname, "10.9.9.9");
        assert!(!format!("{proxy:?}").contains("pw"));
    }
}
