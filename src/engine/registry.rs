//! Module kind implementations and their registry.
//!
//! Each module `kind` string maps to exactly one [`ModuleKind`]
//! implementation, registered into a [`KindRegistry`] built once at process
//! start and handed to the engine — there is no ambient global registration.
//! Optional behaviour is modeled as capability traits ([`Runnable`],
//! [`Destroyable`], [`VersionSetter`], [`Deferrable`]); a kind that lacks a
//! capability simply does not override the accessor.

use crate::config::{LoadedModule, Profile};
use crate::context::ScopeTree;
use crate::engine::handle::{DeferredHandle, EngineHandle};
use crate::engine::preload::PreloadedModule;
use crate::engine::{EngineError, Result};
use crate::ident::{ModulePath, Version};
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::Arc;

/// The kind reserved for graph roots. Checked both ways at preload: a root
/// must have it, a dependency must not.
pub const MAIN_SERVICE_KIND: &str = "service/main";

/// Output record a module contributes under `steps.<name>` in its parent's
/// interpolation context.
pub type StepOutput = BTreeMap<String, String>;

/// Executes a module for the `run` execution kind.
pub trait Runnable: Send + Sync {
    fn run(&self, module: &PreloadedModule, handle: &mut EngineHandle) -> Result<StepOutput>;
}

/// Executes a module for the `destroy` execution kind.
pub trait Destroyable: Send + Sync {
    fn destroy(&self, module: &PreloadedModule, handle: &mut EngineHandle) -> Result<StepOutput>;
}

/// Resolves a module's version from the live interpolation context,
/// overriding or establishing the version the parent handed down.
pub trait VersionSetter: Send + Sync {
    fn set_version(&self, module: &PreloadedModule, ctx: &ScopeTree) -> Result<Version>;
}

/// Registers work that outlives the synchronous graph walk (e.g. a
/// background proxy process). Invoked by the caller of `execute_config`
/// after the main graph finishes.
pub trait Deferrable: Send + Sync {
    fn run_deferred(&self, module: &PreloadedModule, handle: &mut DeferredHandle) -> Result<()>;
}

/// One module kind implementation: metadata, schema validation, and
/// capability accessors.
pub trait ModuleKind: Send + Sync {
    /// Discriminator matched against the `kind` field in module configs.
    fn kind(&self) -> &'static str;

    /// Whether the module's whole directory (not just its config file) must
    /// be staged into the session.
    fn is_source(&self) -> bool {
        false
    }

    /// Validate module-level kind-specific fields.
    fn validate_module(&self, module: &LoadedModule) -> Result<()>;

    /// Validate the resolved profile's kind-specific fields.
    fn validate_profile(&self, profile: &Profile, path: &ModulePath) -> Result<()>;

    fn as_runnable(&self) -> Option<&dyn Runnable> {
        None
    }

    fn as_destroyable(&self) -> Option<&dyn Destroyable> {
        None
    }

    fn as_version_setter(&self) -> Option<&dyn VersionSetter> {
        None
    }

    fn as_deferrable(&self) -> Option<&dyn Deferrable> {
        None
    }
}

/// Registry mapping kind strings to implementations.
#[derive(Default)]
pub struct KindRegistry {
    kinds: HashMap<String, Arc<dyn ModuleKind>>,
}

impl KindRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registry with every builtin kind registered.
    pub fn builtin() -> Result<Self> {
        let mut registry = Self::new();
        for kind in crate::kinds::builtin() {
            registry.register(kind)?;
        }
        Ok(registry)
    }

    pub fn register(&mut self, implementation: Arc<dyn ModuleKind>) -> Result<()> {
        let kind = implementation.kind().to_string();
        if self.kinds.contains_key(&kind) {
            return Err(EngineError::DuplicateKind { kind });
        }
        self.kinds.insert(kind, implementation);
        Ok(())
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn ModuleKind>> {
        self.kinds.get(kind).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Dummy;

    impl ModuleKind for Dummy {
        fn kind(&self) -> &'static str {
            "test/dummy"
        }

        fn validate_module(&self, _module: &LoadedModule) -> Result<()> {
            Ok(())
        }

        fn validate_profile(&self, _profile: &Profile, _path: &ModulePath) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn duplicate_registration_is_rejected() {
        let mut registry = KindRegistry::new();
        registry.register(Arc::new(Dummy)).unwrap();
        let err = registry.register(Arc::new(Dummy)).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateKind { kind } if kind == "test/dummy"));
    }

    #[test]
    fn capabilities_default_to_absent() {
        let dummy = Dummy;
        assert!(dummy.as_runnable().is_none());
        assert!(dummy.as_destroyable().is_none());
        assert!(dummy.as_version_setter().is_none());
        assert!(dummy.as_deferrable().is_none());
    }
}
