// src/core/check/harness.rs

use super::catalog::PLACEHOLDER_DEVICE;
use super::{Check, CheckCatalog, CheckMetadata, CheckState};
use crate::core::error::CheckError;
use crate::core::models::{AuditContext, CheckRequest, CheckResult};

/// Steps a check by hand, feeding it sample output instead of talking to a device.
///
/// Meant for check authors: prepare a session, look at the pending request,
/// paste what the device would print, repeat.
pub struct CheckSession {
    check: Box<dyn Check>,
}

impl CheckSession {
    pub fn prepare(catalog: &CheckCatalog, id: &str, context: &AuditContext) -> Result<Self, CheckError> {
        let check = catalog.load(id, PLACEHOLDER_DEVICE, context)?;
        Ok(Self { check })
    }

    pub fn metadata(&self) -> &CheckMetadata {
        self.check.metadata()
    }

    pub fn pending_request(&self) -> Option<&CheckRequest> {
        self.check.state().pending_request.as_ref()
    }

    pub fn result(&self) -> &CheckResult {
        &self.check.state().result
    }

    /// Hands `sample_output` to the handler of the pending request.
    pub fn run_handler(&mut self, sample_output: &str) -> Result<&CheckState, CheckError> {
        let request = self.pending_request().cloned().ok_or(CheckError::Finished)?;
        self.check
            .handle(&request.handler, &request.device, &request.command, sample_output)?;
        Ok(self.check.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::models::Status;

    #[test]
    fn steps_a_definition_to_completion() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join("ssh.json"),
            r#"{
                "name": "SSH version 2",
                "start": "ssh",
                "steps": {
                    "ssh": {
                        "command": "show ip ssh",
                        "rules": [
                            { "pattern": "version 2\\.0", "status": 1, "observation": "SSHv2 only" },
                            { "pattern": "version 1\\.99", "status": 3, "observation": "SSHv1 fallback enabled" }
                        ]
                    }
                }
            }"#,
        )
        .unwrap();
        let catalog = CheckCatalog::new(Some(dir.path().to_path_buf()));

        let mut session = CheckSession::prepare(&catalog, "ssh.json", &AuditContext::new()).unwrap();
        assert_eq!(session.metadata().name, "SSH version 2");
        assert_eq!(session.pending_request().unwrap().device, PLACEHOLDER_DEVICE);

        let state = session.run_handler("SSH Enabled - version 1.99").unwrap();
        assert_eq!(state.result.status, Status::Warn);
        assert!(state.pending_request.is_none());

        assert!(matches!(session.run_handler("again"), Err(CheckError::Finished)));
    }
}
