//! Root orchestrator kind.

use crate::config::{decode_table, LoadedModule, Profile};
use crate::context::{InterpolatedString, ScopeTree};
use crate::engine::preload::PreloadedModule;
use crate::engine::registry::{ModuleKind, VersionSetter, MAIN_SERVICE_KIND};
use crate::engine::{EngineError, Result};
use crate::ident::{ModulePath, Version};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ServiceProfile {
    version: Option<InterpolatedString>,
}

/// `service/main`: the graph root. Contributes no output of its own; its
/// whole job is establishing the version its dependency tree runs at.
pub struct ServiceMainKind;

impl ServiceMainKind {
    fn profile(&self, profile: &Profile, path: &ModulePath) -> Result<ServiceProfile> {
        decode_table(&profile.rest, path, MAIN_SERVICE_KIND, "profile")
    }
}

impl ModuleKind for ServiceMainKind {
    fn kind(&self) -> &'static str {
        MAIN_SERVICE_KIND
    }

    fn validate_module(&self, _module: &LoadedModule) -> Result<()> {
        Ok(())
    }

    fn validate_profile(&self, profile: &Profile, path: &ModulePath) -> Result<()> {
        self.profile(profile, path)?;
        Ok(())
    }

    fn as_version_setter(&self) -> Option<&dyn VersionSetter> {
        Some(self)
    }
}

impl VersionSetter for ServiceMainKind {
    fn set_version(&self, module: &PreloadedModule, ctx: &ScopeTree) -> Result<Version> {
        let profile = self.profile(&module.profile, &module.path)?;
        let raw = profile
            .version
            .ok_or_else(|| EngineError::MissingRootVersion {
                path: module.path.clone(),
            })?;
        let resolved = super::resolve(&raw, ctx, &module.path)?;
        Version::new(&resolved).map_err(|source| EngineError::Ident {
            path: module.path.clone(),
            source,
        })
    }
}
