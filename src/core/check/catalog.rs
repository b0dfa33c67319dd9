// src/core/check/catalog.rs

use super::declarative::DeclarativeCheck;
use super::{Check, CheckMetadata};
use crate::core::error::CheckError;
use crate::core::models::AuditContext;
use std::collections::HashMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Builds a fresh check instance for one device.
pub type CheckFactory = Arc<dyn Fn(&str, &AuditContext) -> Result<Box<dyn Check>, CheckError> + Send + Sync>;

/// Device id used when a check is loaded only to be inspected or stepped by hand.
pub const PLACEHOLDER_DEVICE: &str = "TestDevice";

/// Where check ids are resolved: registered factories first, then JSON
/// definitions under the check directory (ids are paths relative to it).
#[derive(Clone, Default)]
pub struct CheckCatalog {
    root: Option<PathBuf>,
    factories: HashMap<String, CheckFactory>,
}

impl CheckCatalog {
    pub fn new(root: Option<PathBuf>) -> Self {
        Self {
            root,
            factories: HashMap::new(),
        }
    }

    pub fn register<F>(&mut self, id: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&str, &AuditContext) -> Result<Box<dyn Check>, CheckError> + Send + Sync + 'static,
    {
        self.factories.insert(id.into(), Arc::new(factory));
        self
    }

    pub fn root(&self) -> Option<&Path> {
        self.root.as_deref()
    }

    /// Loads a new instance of `id` bound to `device`.
    ///
    /// A missing id, an unreadable or malformed definition, or a panicking
    /// factory is reported as an error instead of unwinding into the caller.
    pub fn load(&self, id: &str, device: &str, context: &AuditContext) -> Result<Box<dyn Check>, CheckError> {
        if let Some(factory) = self.factories.get(id) {
            debug!(check = id, device, "Building registered check.");
            return catch_unwind(AssertUnwindSafe(|| factory(device, context))).unwrap_or_else(|_| {
                Err(CheckError::InvalidDefinition {
                    id: id.to_string(),
                    reason: "constructor panicked".to_string(),
                })
            });
        }

        let path = self.definition_path(id)?;
        let source = std::fs::read_to_string(&path).map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => CheckError::NotFound(id.to_string()),
            _ => CheckError::Io(e),
        })?;
        debug!(check = id, device, path = %path.display(), "Loaded check definition.");
        let check = DeclarativeCheck::from_json(id, &source, device, context)?;
        Ok(Box::new(check))
    }

    /// Metadata of `id`, read from an instance bound to the placeholder device.
    pub fn metadata(&self, id: &str, context: &AuditContext) -> Result<CheckMetadata, CheckError> {
        self.load(id, PLACEHOLDER_DEVICE, context)
            .map(|check| check.metadata().clone())
    }

    /// Resolves `id` under the root, refusing anything that would escape it.
    fn definition_path(&self, id: &str) -> Result<PathBuf, CheckError> {
        let root = self.root().ok_or_else(|| CheckError::NotFound(id.to_string()))?;
        let relative = Path::new(id);
        let confined = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if id.is_empty() || !confined {
            return Err(CheckError::NotFound(id.to_string()));
        }
        Ok(root.join(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::check::CheckState;
    use crate::core::models::{CheckRequest, Status};

    struct Always {
        meta: CheckMetadata,
        state: CheckState,
    }

    impl Check for Always {
        fn metadata(&self) -> &CheckMetadata {
            &self.meta
        }

        fn state(&self) -> &CheckState {
            &self.state
        }

        fn handle(&mut self, _h: &str, _d: &str, _c: &str, _o: &str) -> Result<(), CheckError> {
            self.state.finish(Status::Pass, "ok");
            Ok(())
        }
    }

    fn catalog_with_dir() -> (tempfile::TempDir, CheckCatalog) {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("routing")).unwrap();
        std::fs::write(
            dir.path().join("routing/bgp.json"),
            r#"{"name": "BGP", "start": "a", "steps": {"a": {"command": "show bgp summary"}}}"#,
        )
        .unwrap();
        std::fs::write(dir.path().join("broken.json"), "{").unwrap();
        let catalog = CheckCatalog::new(Some(dir.path().to_path_buf()));
        (dir, catalog)
    }

    #[test]
    fn registered_factories_take_precedence() {
        let (_dir, mut catalog) = catalog_with_dir();
        catalog.register("routing/bgp.json", |device, _ctx| {
            Ok(Box::new(Always {
                meta: CheckMetadata::named("native"),
                state: CheckState::starting_with(CheckRequest::new(device, "show ip bgp", "h")),
            }) as Box<dyn Check>)
        });

        let check = catalog.load("routing/bgp.json", "r1", &AuditContext::new()).unwrap();
        assert_eq!(check.metadata().name, "native");
        assert_eq!(check.state().pending_request.as_ref().unwrap().device, "r1");
    }

    #[test]
    fn definitions_load_by_relative_path() {
        let (dir, catalog) = catalog_with_dir();
        assert_eq!(catalog.root(), Some(dir.path()));
        assert!(CheckCatalog::default().root().is_none());
        let meta = catalog.metadata("routing/bgp.json", &AuditContext::new()).unwrap();
        assert_eq!(meta.name, "BGP");

        let check = catalog.load("routing/bgp.json", "r2", &AuditContext::new()).unwrap();
        assert_eq!(check.state().pending_request.as_ref().unwrap().device, "r2");
    }

    #[test]
    fn missing_escaping_and_broken_ids_are_errors() {
        let (_dir, catalog) = catalog_with_dir();
        let ctx = AuditContext::new();
        assert!(matches!(catalog.load("nope.json", "r1", &ctx), Err(CheckError::NotFound(_))));
        assert!(matches!(catalog.load("../etc/passwd", "r1", &ctx), Err(CheckError::NotFound(_))));
        assert!(matches!(
            catalog.load("broken.json", "r1", &ctx),
            Err(CheckError::InvalidDefinition { .. })
        ));
        assert!(matches!(
            CheckCatalog::default().load("ntp.py", "r1", &ctx),
            Err(CheckError::NotFound(_))
        ));
    }

    #[test]
    fn panicking_constructor_is_contained() {
        let mut catalog = CheckCatalog::default();
        catalog.register("boom", |_device, _ctx| -> Result<Box<dyn Check>, CheckError> {
            panic!("constructor exploded")
        });
        let err = catalog.load("boom", "r1", &AuditContext::new()).err().unwrap();
        assert!(matches!(err, CheckError::InvalidDefinition { .. }));
    }
}
