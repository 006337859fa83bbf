use crate::cli::RunArgs;
use crate::config::{resolve_project_root, FsConfigLoader};
use crate::engine::{
    execute_config, preload_config, EngineSession, ExecutionKind, KindRegistry, PreloadedModule,
};
use crate::ident::{ModulePath, ProfileName};
use crate::runner::{CommandRunner, ShellRunner};
use crate::tmpfiles::{collect_stale_sessions, TmpFilesSession};
use crate::Context;
use anyhow::{Context as _, Result};
use colored::Colorize;
use std::path::Path;
use std::sync::mpsc;
use std::sync::Arc;

pub fn run(ctx: &Context, args: &RunArgs) -> Result<()> {
    run_with_base(ctx, args, &TmpFilesSession::default_base())
}

fn run_with_base(ctx: &Context, args: &RunArgs, session_base: &Path) -> Result<()> {
    let project_root = resolve_project_root(args.dir.as_deref())?;
    let service = ModulePath::new(&args.service)
        .with_context(|| format!("invalid service path {:?}", args.service))?;
    let profile = ProfileName::new(args.profile_name())
        .with_context(|| format!("invalid profile name {:?}", args.profile_name()))?;

    // Sessions left behind by crashed runs are collected on the way in.
    match collect_stale_sessions(session_base) {
        Ok(0) => {}
        Ok(removed) => log::info!("collected {removed} stale session(s)"),
        Err(e) => log::warn!("stale session collection failed: {e}"),
    }

    let registry = KindRegistry::builtin()?;
    let loader = FsConfigLoader::new(&project_root);
    let preloaded = preload_config(&service, &profile, &loader, &registry)?;

    let session = EngineSession::new(project_root, profile.clone());
    if ctx.verbose > 0 {
        println!("session {} on branch {}", session.unique_id, session.branch);
    }
    let tmp = TmpFilesSession::open(session_base, &session.unique_id)?;
    let result = deploy(ctx, &service, &profile, &preloaded, &session, &tmp);

    // The session lingers for the stale collector only when the process
    // dies; a handled engine failure still tears it down here.
    if let Err(e) = tmp.close() {
        log::warn!("failed to close session: {e}");
    }
    result
}

fn deploy(
    ctx: &Context,
    service: &ModulePath,
    profile: &ProfileName,
    preloaded: &PreloadedModule,
    session: &EngineSession,
    tmp: &TmpFilesSession,
) -> Result<()> {
    let runner: Arc<dyn CommandRunner> = Arc::new(ShellRunner);
    let mut deferred = execute_config(preloaded, ExecutionKind::Run, session, tmp, runner)?;

    if !ctx.quiet {
        println!(
            "{} {} deployed at {}",
            "✓".green(),
            service.as_str().bold(),
            profile.as_str().cyan()
        );
    }

    // Deferred failures are logged, not fatal: the synchronous graph has
    // already completed.
    for run in &mut deferred {
        if let Err(e) = run.invoke() {
            log::error!("deferred run for {} failed: {e}", run.path);
        }
    }

    if deferred.iter().any(|run| run.has_cancel()) {
        if !ctx.quiet {
            println!("background processes running, press Ctrl-C to stop");
        }
        let (tx, rx) = mpsc::channel();
        ctrlc::set_handler(move || {
            let _ = tx.send(());
        })?;
        let _ = rx.recv();
        for run in &mut deferred {
            run.cancel();
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn failed_run_does_not_leave_a_session_behind() {
        let project = tempfile::tempdir().unwrap();
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(project.path().join("web")).unwrap();
        // Preloads cleanly but fails during execution: the root never
        // resolves a version.
        fs::write(
            project.path().join("web/module.toml"),
            "kind = 'service/main'\n\n[profiles.dev]\n",
        )
        .unwrap();

        let ctx = Context {
            verbose: 0,
            quiet: true,
        };
        let args = RunArgs {
            service: "web".to_string(),
            profile: ":dev".to_string(),
            dir: Some(project.path().to_string_lossy().into_owned()),
        };

        let err = run_with_base(&ctx, &args, base.path()).unwrap_err();
        assert!(err.to_string().contains("version"));
        // The session opened for the run was closed on the way out.
        assert_eq!(fs::read_dir(base.path()).unwrap().count(), 0);
    }
}
