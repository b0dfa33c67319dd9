// src/core/check/drive.rs

use super::Check;
use crate::core::connection::{self, Connection, Connector};
use crate::core::error::CheckError;
use crate::core::models::{CheckRequest, RawCache, SessionCredentials};
use std::collections::HashSet;
use std::panic::{AssertUnwindSafe, catch_unwind};
use tracing::{debug, warn};

/// The command session of one device audit together with its raw command cache.
///
/// The session may be re-pointed at another device by a cross-device request;
/// it is re-pointed back when a request targets the audited device again.
pub struct DeviceSession<'a> {
    home: String,
    credentials: &'a SessionCredentials,
    connector: &'a dyn Connector,
    conn: Option<Box<dyn Connection>>,
    raw: RawCache,
}

impl<'a> DeviceSession<'a> {
    pub fn new(
        home: &str,
        credentials: &'a SessionCredentials,
        connector: &'a dyn Connector,
        conn: Option<Box<dyn Connection>>,
    ) -> Self {
        Self {
            home: home.to_string(),
            credentials,
            connector,
            conn,
            raw: RawCache::new(home),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Device the live session points at, if any.
    pub fn connected_to(&self) -> Option<&str> {
        self.conn.as_deref().map(|c| c.device())
    }

    pub fn connection_mut(&mut self) -> Option<&mut (dyn Connection + 'static)> {
        self.conn.as_deref_mut()
    }

    pub fn raw(&self) -> &RawCache {
        &self.raw
    }

    /// Output of `command` on `device`, from the cache when possible.
    pub async fn fetch(&mut self, device: &str, command: &str) -> Result<String, CheckError> {
        if let Some(output) = self.raw.get(device, command) {
            debug!(device, command, "Reusing cached output.");
            return Ok(output.to_string());
        }

        let conn = self.ensure_connected(device).await?;
        match conn.send(command).await {
            Ok(output) => {
                self.raw.insert(device, command, output.clone());
                Ok(output)
            }
            Err(source) => {
                // The reply may still arrive later; never reuse a session that lost track of it.
                if let Some(mut broken) = self.conn.take() {
                    warn!(device, command, error = %source, "Dropping command session after a failed send.");
                    broken.close().await;
                }
                Err(CheckError::Session {
                    device: device.to_string(),
                    source,
                })
            }
        }
    }

    async fn ensure_connected(&mut self, device: &str) -> Result<&mut Box<dyn Connection>, CheckError> {
        let switch = !matches!(&self.conn, Some(c) if c.device() == device);
        if switch {
            if let Some(mut old) = self.conn.take() {
                debug!(home = %self.home, from = old.device(), to = device, "Switching command session.");
                old.close().await;
            }
            let conn = connection::open(self.connector, device, self.credentials)
                .await
                .map_err(|source| CheckError::Session {
                    device: device.to_string(),
                    source,
                })?;
            self.conn = Some(conn);
        }
        self.conn.as_mut().ok_or_else(|| CheckError::Session {
            device: device.to_string(),
            source: crate::core::error::ConnectError::Closed,
        })
    }

    /// Closes whatever session is open and hands back the cache.
    pub async fn finish(mut self) -> RawCache {
        if let Some(mut conn) = self.conn.take() {
            conn.close().await;
        }
        self.raw
    }
}

/// How a drive loop ended without an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveOutcome {
    /// The check cleared its pending request.
    Completed { round_trips: usize },
    /// The check asked for a request it had already been served.
    Repeated { round_trips: usize },
    /// The check kept asking for new requests until the cap.
    CapReached { round_trips: usize },
}

impl DriveOutcome {
    pub fn round_trips(&self) -> usize {
        match *self {
            DriveOutcome::Completed { round_trips }
            | DriveOutcome::Repeated { round_trips }
            | DriveOutcome::CapReached { round_trips } => round_trips,
        }
    }
}

/// Serves a check's requests until it completes, repeats itself, or hits `max_round_trips`.
///
/// The repeat guard is stricter than comparing each request with the one just
/// consumed: any request identical in (device, command, handler) to one served
/// earlier in this loop stops it. A check with N distinct requests therefore
/// makes at most N round trips, and cycles of any length end on their first
/// revisit instead of running until the cap.
///
/// A failing or panicking handler aborts the loop with an error; whatever
/// result the check had set by then stays on the instance.
pub async fn drive(
    check: &mut dyn Check,
    session: &mut DeviceSession<'_>,
    max_round_trips: usize,
) -> Result<DriveOutcome, CheckError> {
    let mut served: HashSet<CheckRequest> = HashSet::new();
    let mut round_trips = 0;

    loop {
        let Some(request) = check.state().pending_request.clone() else {
            return Ok(DriveOutcome::Completed { round_trips });
        };
        if served.contains(&request) {
            debug!(command = %request.command, handler = %request.handler, "Check repeated a served request, stopping.");
            return Ok(DriveOutcome::Repeated { round_trips });
        }
        if round_trips >= max_round_trips {
            warn!(round_trips, "Check exceeded its round-trip budget, stopping.");
            return Ok(DriveOutcome::CapReached { round_trips });
        }

        let output = session.fetch(&request.device, &request.command).await?;
        catch_unwind(AssertUnwindSafe(|| {
            check.handle(&request.handler, &request.device, &request.command, &output)
        }))
        .unwrap_or_else(|_| {
            Err(CheckError::Handler {
                handler: request.handler.clone(),
                reason: "handler panicked".to_string(),
            })
        })?;

        round_trips += 1;
        served.insert(request);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ConnectError;
    use async_trait::async_trait;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Every device answers `echo <device>`; `show slow` always fails.
    #[derive(Default)]
    struct Echo {
        connects: AtomicUsize,
    }

    struct EchoSession(String);

    #[async_trait]
    impl Connection for EchoSession {
        fn device(&self) -> &str {
            &self.0
        }

        fn base_prompt(&self) -> &str {
            &self.0
        }

        async fn send(&mut self, command: &str) -> Result<String, ConnectError> {
            match command {
                "show slow" => Err(ConnectError::Timeout(format!("command output from {}", self.0))),
                _ => Ok(format!("{} {}", command, self.0)),
            }
        }

        async fn close(&mut self) {}
    }

    #[async_trait]
    impl Connector for Echo {
        async fn connect(
            &self,
            device: &str,
            _credentials: &SessionCredentials,
        ) -> Result<Box<dyn Connection>, ConnectError> {
            self.connects.fetch_add(1, Ordering::SeqCst);
            Ok(Box::new(EchoSession(device.to_string())))
        }
    }

    #[tokio::test]
    async fn fetch_follows_the_target_device_and_caches() {
        let connector = Arc::new(Echo::default());
        let creds = SessionCredentials::default();
        let mut session = DeviceSession::new("r1", &creds, connector.as_ref(), None);
        assert!(!session.is_connected());

        assert_eq!(session.fetch("r1", "echo").await.unwrap(), "echo r1");
        assert_eq!(session.connected_to(), Some("r1"));
        assert_eq!(session.fetch("peer", "echo").await.unwrap(), "echo peer");
        assert_eq!(session.connected_to(), Some("peer"));
        assert_eq!(session.fetch("r1", "echo").await.unwrap(), "echo r1");
        assert_eq!(session.connected_to(), Some("peer"));

        assert_eq!(session.raw().len(), 2);
        assert_eq!(session.raw().get("peer", "echo"), Some("echo peer"));
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn failed_send_drops_the_session_and_caches_nothing() {
        let connector = Arc::new(Echo::default());
        let creds = SessionCredentials::default();
        let mut session = DeviceSession::new("r1", &creds, connector.as_ref(), None);

        let err = session.fetch("r1", "show slow").await.unwrap_err();
        assert!(matches!(err, CheckError::Session { ref device, source: ConnectError::Timeout(_) } if device == "r1"));
        assert!(!session.is_connected());
        assert!(session.raw().get("r1", "show slow").is_none());

        assert_eq!(session.fetch("r1", "show clock").await.unwrap(), "show clock r1");
        assert_eq!(connector.connects.load(Ordering::SeqCst), 2);
        assert_eq!(session.finish().await.len(), 1);
    }
}
