//! Execute phase: walk a preloaded module graph in dependency order,
//! threading versions and interpolation context, staging module files into
//! the session, and dispatching to each kind's execution hooks.

use crate::context::ScopeTree;
use crate::engine::handle::{DeferredHandle, EngineHandle};
use crate::engine::preload::PreloadedModule;
use crate::engine::registry::{ModuleKind, StepOutput};
use crate::engine::{EngineError, Result};
use crate::ident::{ModulePath, ProfileName, Version};
use crate::runner::CommandRunner;
use crate::tmpfiles::TmpFilesSession;
use crate::{config, git};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What the walk does at each module.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionKind {
    Run,
    Destroy,
    Publish,
}

/// Per-invocation facts exposed to interpolation under the `git` and
/// `session` scopes.
pub struct EngineSession {
    pub project_root: PathBuf,
    pub profile: ProfileName,
    pub branch: String,
    pub unique_id: String,
    pub unix_time: String,
}

impl EngineSession {
    pub fn new(project_root: PathBuf, profile: ProfileName) -> Self {
        let branch =
            git::current_branch(&project_root).unwrap_or_else(|| "unknown".to_string());
        Self {
            project_root,
            profile,
            branch,
            unique_id: uuid::Uuid::new_v4().to_string(),
            unix_time: chrono::Utc::now().timestamp().to_string(),
        }
    }
}

/// Work a module registered to run after the synchronous graph walk.
pub struct DeferredRun {
    kind: Arc<dyn ModuleKind>,
    pub path: ModulePath,
    module: PreloadedModule,
    handle: DeferredHandle,
}

impl std::fmt::Debug for DeferredRun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeferredRun")
            .field("kind", &self.kind.kind())
            .field("path", &self.path)
            .field("module", &self.module)
            .finish_non_exhaustive()
    }
}

impl DeferredRun {
    /// Invoke the deferred hook. The caller decides whether a failure here
    /// is fatal; the main walk has already completed.
    pub fn invoke(&mut self) -> Result<()> {
        match self.kind.as_deferrable() {
            Some(deferrable) => deferrable.run_deferred(&self.module, &mut self.handle),
            None => Ok(()),
        }
    }

    pub fn has_cancel(&self) -> bool {
        self.handle.has_cancel()
    }

    /// Tear down whatever the deferred hook left running.
    pub fn cancel(&mut self) {
        self.handle.cancel();
    }
}

/// Execute a preloaded graph. Returns the deferred runs registered along the
/// way; invoking and cancelling them is the caller's responsibility.
pub fn execute_config(
    root: &PreloadedModule,
    execution: ExecutionKind,
    session: &EngineSession,
    tmp: &TmpFilesSession,
    runner: Arc<dyn CommandRunner>,
) -> Result<Vec<DeferredRun>> {
    let mut deferred = Vec::new();
    execute_internal(
        root,
        execution,
        session,
        tmp,
        &runner,
        Vec::new(),
        None,
        &mut deferred,
    )?;
    Ok(deferred)
}

#[allow(clippy::too_many_arguments)]
fn execute_internal(
    module: &PreloadedModule,
    execution: ExecutionKind,
    session: &EngineSession,
    tmp: &TmpFilesSession,
    runner: &Arc<dyn CommandRunner>,
    params: Vec<(String, String)>,
    parent_version: Option<&Version>,
    deferred: &mut Vec<DeferredRun>,
) -> Result<StepOutput> {
    if execution == ExecutionKind::Publish {
        return Err(EngineError::UnimplementedExecution("publish"));
    }
    log::info!("executing module {}", module.path);

    let mut ctx = base_context(session, params);

    // Version resolution: publish the parent's version first, then let the
    // profile's override and the kind's own setter each republish.
    let mut version: Option<Version> = parent_version.cloned();
    if let Some(v) = &version {
        ctx.scope_mut("service").set_leaf("version", v.as_str());
    }
    if let Some(override_version) = &module.profile.override_version {
        let resolved = override_version
            .resolve(&ctx)
            .map_err(|e| EngineError::interpolation(&module.path, e))?;
        let v = Version::new(&resolved).map_err(|source| EngineError::Ident {
            path: module.path.clone(),
            source,
        })?;
        ctx.scope_mut("service").set_leaf("version", v.as_str());
        version = Some(v);
    }
    if let Some(setter) = module.kind.as_version_setter() {
        let v = setter.set_version(module, &ctx)?;
        ctx.scope_mut("service").set_leaf("version", v.as_str());
        version = Some(v);
    }
    let version = version.ok_or_else(|| EngineError::MissingRootVersion {
        path: module.path.clone(),
    })?;

    // Defaults fill only the params the parent did not pass, resolved in
    // this module's context with the version already published;
    // requirements are checked after defaults apply.
    for (key, default) in &module.profile.default_params {
        if ctx.lookup_leaf(&format!("params.{key}")).is_none() {
            let value = default
                .resolve(&ctx)
                .map_err(|e| EngineError::interpolation(&module.path, e))?;
            ctx.scope_mut("params").set_leaf(key, &value);
        }
    }
    for key in &module.profile.required_params {
        if ctx.lookup_leaf(&format!("params.{key}")).is_none() {
            return Err(EngineError::MissingParam {
                path: module.path.clone(),
                param: key.clone(),
            });
        }
    }

    // Dependencies run strictly sequentially in declaration order; each
    // one's output lands under steps.<name> before the next starts, so
    // later steps may interpolate earlier outputs.
    for dep in &module.dependencies {
        let mut child_params = Vec::with_capacity(dep.raw.params.len());
        for (key, value) in &dep.raw.params {
            let resolved = value.resolve(&ctx).map_err(|e| {
                log::debug!(
                    "step param {key} = {:?} for {} renders as {:?}",
                    value.raw(),
                    dep.name,
                    value.resolve_lossy(&ctx)
                );
                EngineError::interpolation(&module.path, e)
            })?;
            child_params.push((key.clone(), resolved));
        }
        let output = execute_internal(
            &dep.module,
            execution,
            session,
            tmp,
            runner,
            child_params,
            Some(&version),
            deferred,
        )?;
        ctx.scope_mut("steps")
            .set_scope(dep.name.as_str(), ScopeTree::from_record(&output));
    }

    if module.kind.as_deferrable().is_some() {
        deferred.push(DeferredRun {
            kind: Arc::clone(&module.kind),
            path: module.path.clone(),
            module: module.clone(),
            handle: DeferredHandle::new(ctx.clone(), Arc::clone(runner)),
        });
    }

    let work_dir = stage_module(module, session, tmp)?;

    let mut handle = EngineHandle::new(
        &session.project_root,
        module.path.dir_under(&session.project_root),
        work_dir,
        &ctx,
        &version,
        tmp,
        runner.as_ref(),
    );

    match execution {
        ExecutionKind::Run => match module.kind.as_runnable() {
            Some(runnable) => runnable.run(module, &mut handle),
            None => Ok(StepOutput::new()),
        },
        ExecutionKind::Destroy => match module.kind.as_destroyable() {
            Some(destroyable) => destroyable.destroy(module, &mut handle),
            None => Ok(StepOutput::new()),
        },
        ExecutionKind::Publish => Err(EngineError::UnimplementedExecution("publish")),
    }
}

fn base_context(session: &EngineSession, params: Vec<(String, String)>) -> ScopeTree {
    let mut ctx = ScopeTree::new();
    let params_scope = ctx.scope_mut("params");
    for (key, value) in params {
        params_scope.set_leaf(&key, &value);
    }
    ctx.scope_mut("steps");
    ctx.scope_mut("service");
    ctx.scope_mut("git").set_leaf("branch", &session.branch);
    let session_scope = ctx.scope_mut("session");
    session_scope.set_leaf("unique_id", &session.unique_id);
    session_scope.set_leaf("unix_time", &session.unix_time);
    session_scope.set_leaf("profile", session.profile.as_str());
    ctx
}

/// Copy the module's config file (or, for source kinds, its whole
/// directory) into the session's working tree. Overwrites on conflict.
fn stage_module(
    module: &PreloadedModule,
    session: &EngineSession,
    tmp: &TmpFilesSession,
) -> Result<PathBuf> {
    let source_dir = module.path.dir_under(&session.project_root);
    let staged_dir = module.path.dir_under(&tmp.stage_root());
    let staging_err = |path: &Path| {
        let path = path.to_path_buf();
        move |source: std::io::Error| EngineError::Staging { path, source }
    };

    fs::create_dir_all(&staged_dir).map_err(staging_err(&staged_dir))?;

    if module.kind.is_source() {
        for entry in walkdir::WalkDir::new(&source_dir) {
            let entry = entry.map_err(|e| EngineError::Staging {
                path: source_dir.clone(),
                source: e.into(),
            })?;
            let Ok(relative) = entry.path().strip_prefix(&source_dir) else {
                continue;
            };
            let target = staged_dir.join(relative);
            if entry.file_type().is_dir() {
                fs::create_dir_all(&target).map_err(staging_err(&target))?;
            } else {
                fs::copy(entry.path(), &target).map_err(staging_err(entry.path()))?;
            }
        }
    } else {
        let target = staged_dir.join(config::MODULE_FILE);
        fs::copy(&module.file_path, &target).map_err(staging_err(&module.file_path))?;
    }

    Ok(staged_dir)
}
