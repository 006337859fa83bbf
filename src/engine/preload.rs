//! Preload phase: recursively load every module reachable from a root's
//! profile steps, resolve each module's concrete profile, validate it
//! against the registered kind implementation, and reject structural
//! cycles.
//!
//! Modules are read fresh from the loader on every preload; nothing is
//! cached. Each dependency reference yields its own independent subtree,
//! even when the same module path appears twice in the graph.

use crate::config::{ConfigLoader, LoadedModule, Profile, Step};
use crate::engine::registry::{KindRegistry, ModuleKind, MAIN_SERVICE_KIND};
use crate::engine::{EngineError, Result};
use crate::ident::{DependencyName, ModulePath, ProfileName};
use crate::profile::{match_profile_name, merge_profiles, resolve_profile_chain};
use std::path::PathBuf;
use std::sync::Arc;
use toml::Value;

/// One fully resolved, type-checked module instantiated for one profile.
#[derive(Clone)]
pub struct PreloadedModule {
    pub path: ModulePath,
    pub file_path: PathBuf,
    pub module: LoadedModule,
    pub profile: Profile,
    pub kind: Arc<dyn ModuleKind>,
    pub dependencies: Vec<PreloadedDependency>,
}

impl std::fmt::Debug for PreloadedModule {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PreloadedModule")
            .field("path", &self.path)
            .field("file_path", &self.file_path)
            .field("module", &self.module)
            .field("profile", &self.profile)
            .field("kind", &self.kind.kind())
            .field("dependencies", &self.dependencies)
            .finish()
    }
}

/// A preloaded dependency in declaration order: the local name, the raw
/// step declaration, and the child subtree.
#[derive(Clone, Debug)]
pub struct PreloadedDependency {
    pub name: DependencyName,
    pub raw: Step,
    pub module: PreloadedModule,
}

/// Preload a root module. The resolved root must be of kind
/// `service/main`; any other kind is rejected before execution begins.
pub fn preload_config(
    path: &ModulePath,
    profile_name: &ProfileName,
    loader: &dyn ConfigLoader,
    registry: &KindRegistry,
) -> Result<PreloadedModule> {
    let root = preload_internal(path, profile_name, loader, registry, &[])?;
    if root.module.parsed.kind != MAIN_SERVICE_KIND {
        return Err(EngineError::RootKindMismatch {
            path: path.clone(),
            kind: root.module.parsed.kind.clone(),
        });
    }
    Ok(root)
}

fn preload_internal(
    path: &ModulePath,
    profile_name: &ProfileName,
    loader: &dyn ConfigLoader,
    registry: &KindRegistry,
    ancestors: &[ModulePath],
) -> Result<PreloadedModule> {
    let loaded = loader.load_module(path)?;
    let is_root = ancestors.is_empty();

    if !is_root && loaded.parsed.kind == MAIN_SERVICE_KIND {
        return Err(EngineError::MainServiceAsDependency { path: path.clone() });
    }

    let kind = registry
        .get(&loaded.parsed.kind)
        .ok_or_else(|| EngineError::UnknownKind {
            path: path.clone(),
            kind: loaded.parsed.kind.clone(),
        })?;

    // Resolve the concrete profile. A module without any `profiles` table
    // validates an empty profile instead.
    let merged = match &loaded.parsed.profiles {
        Some(_) => {
            let globs = loaded.parsed.glob_keys();
            let matched = match_profile_name(&globs, profile_name).ok_or_else(|| {
                EngineError::NoMatchingProfile {
                    path: path.clone(),
                    profile: profile_name.clone(),
                }
            })?;
            let chain = resolve_profile_chain(&loaded.parsed, matched, path)?;
            merge_profiles(&chain)
        }
        None => Value::Table(toml::value::Table::new()),
    };

    kind.validate_module(&loaded)?;
    let profile = Profile::from_merged(merged, path, &loaded.parsed.kind, is_root)?;
    kind.validate_profile(&profile, path)?;

    let mut chain: Vec<ModulePath> = ancestors.to_vec();
    chain.push(path.clone());

    let mut dependencies = Vec::with_capacity(profile.steps.len());
    for decl in &profile.steps {
        let dep_path = path
            .join(&decl.step.module)
            .map_err(|source| EngineError::Ident {
                path: path.clone(),
                source,
            })?;
        if chain.contains(&dep_path) {
            return Err(EngineError::DependencyCycle {
                path: dep_path,
                chain: render_chain(&chain),
            });
        }
        let child = preload_internal(&dep_path, profile_name, loader, registry, &chain)?;
        dependencies.push(PreloadedDependency {
            name: decl.name.clone(),
            raw: decl.step.clone(),
            module: child,
        });
    }

    Ok(PreloadedModule {
        path: path.clone(),
        file_path: loaded.file_path.clone(),
        module: loaded,
        profile,
        kind,
        dependencies,
    })
}

fn render_chain(chain: &[ModulePath]) -> String {
    chain
        .iter()
        .map(ModulePath::as_str)
        .collect::<Vec<_>>()
        .join(" -> ")
}
