//! Handles passed into module kind implementations.
//!
//! [`EngineHandle`] is the synchronous-execution facade: it exposes the
//! resolved context and version, the staged working directory, scratch
//! directories, file staging, and command execution. [`DeferredHandle`] is
//! its owned counterpart for work that outlives the graph walk.

use crate::context::ScopeTree;
use crate::engine::{EngineError, Result};
use crate::ident::Version;
use crate::runner::{CommandOutput, CommandRunner, CommandSpec};
use crate::tmpfiles::TmpFilesSession;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Execution facade handed to [`Runnable`](crate::engine::registry::Runnable)
/// and [`Destroyable`](crate::engine::registry::Destroyable) implementations.
pub struct EngineHandle<'a> {
    project_root: &'a Path,
    module_dir: PathBuf,
    work_dir: PathBuf,
    context: &'a ScopeTree,
    version: &'a Version,
    session: &'a TmpFilesSession,
    runner: &'a dyn CommandRunner,
}

impl<'a> EngineHandle<'a> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        project_root: &'a Path,
        module_dir: PathBuf,
        work_dir: PathBuf,
        context: &'a ScopeTree,
        version: &'a Version,
        session: &'a TmpFilesSession,
        runner: &'a dyn CommandRunner,
    ) -> Self {
        Self {
            project_root,
            module_dir,
            work_dir,
            context,
            version,
            session,
            runner,
        }
    }

    pub fn project_root(&self) -> &Path {
        self.project_root
    }

    /// The staged copy of the module directory inside the session. Commands
    /// that operate on module files run here, not on the source tree.
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn context(&self) -> &ScopeTree {
        self.context
    }

    /// The version in effect for the executing module.
    pub fn version(&self) -> &Version {
        self.version
    }

    /// Allocate a fresh scratch directory inside the session.
    pub fn create_tmp_dir(&self) -> Result<PathBuf> {
        self.session.create_tmp_dir()
    }

    /// Copy extra files into the staged module directory. Each pair is
    /// `(source, dest)`: sources starting with `./` or `../` resolve against
    /// the module's own directory, anything else against the project root;
    /// destinations are relative to the staged directory and must stay
    /// inside it. Existing files are overwritten, so repeating a copy is
    /// harmless.
    pub fn copy_files(&self, pairs: &[(String, String)]) -> Result<()> {
        for (source, dest) in pairs {
            let from = if source.starts_with("./") || source.starts_with("../") {
                self.module_dir.join(source)
            } else {
                self.project_root.join(source)
            };
            let dest_path = Path::new(dest);
            let escapes = dest_path.is_absolute()
                || dest_path
                    .components()
                    .any(|c| matches!(c, std::path::Component::ParentDir));
            if escapes {
                return Err(EngineError::Staging {
                    path: self.work_dir.join(dest),
                    source: std::io::Error::new(
                        std::io::ErrorKind::InvalidInput,
                        format!("destination {dest:?} escapes the staged module directory"),
                    ),
                });
            }
            let to = self.work_dir.join(dest);
            let staging_err = |source: std::io::Error| EngineError::Staging {
                path: to.clone(),
                source,
            };
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).map_err(staging_err)?;
            }
            fs::copy(&from, &to).map_err(|source| EngineError::Staging {
                path: from.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Run a command with live output, failing on non-zero exit.
    pub fn execute_command(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        Self::check(spec, self.runner.run(spec)?)
    }

    /// Run a command silently, failing on non-zero exit.
    pub fn execute_hidden_command(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        Self::check(spec, self.runner.run_hidden(spec)?)
    }

    fn check(spec: &CommandSpec, output: CommandOutput) -> Result<CommandOutput> {
        if !output.success() {
            return Err(EngineError::CommandFailed {
                argv: spec.render(),
                status: output.status,
                stderr: output.stderr,
            });
        }
        Ok(output)
    }
}

/// Owned handle for deferred work. Carries a snapshot of the module's
/// resolved context and a shared runner; the implementation may register a
/// cancel hook (e.g. to kill a background child process).
pub struct DeferredHandle {
    context: ScopeTree,
    runner: Arc<dyn CommandRunner>,
    cancel: Option<Box<dyn FnOnce() + Send>>,
}

impl DeferredHandle {
    pub(crate) fn new(context: ScopeTree, runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            context,
            runner,
            cancel: None,
        }
    }

    pub fn context(&self) -> &ScopeTree {
        &self.context
    }

    pub fn runner(&self) -> &dyn CommandRunner {
        self.runner.as_ref()
    }

    /// Register the hook invoked when the deferred work is torn down.
    pub fn register_cancel(&mut self, hook: impl FnOnce() + Send + 'static) {
        self.cancel = Some(Box::new(hook));
    }

    pub fn has_cancel(&self) -> bool {
        self.cancel.is_some()
    }

    /// Invoke the registered cancel hook, if any. Idempotent.
    pub fn cancel(&mut self) {
        if let Some(hook) = self.cancel.take() {
            hook();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runner::ShellRunner;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn version() -> Version {
        Version::new("1.0.0").unwrap()
    }

    #[test]
    fn copy_files_is_idempotent_and_resolves_both_bases() {
        let base = tempfile::tempdir().unwrap();
        let session = TmpFilesSession::open(base.path(), "s").unwrap();
        let project = tempfile::tempdir().unwrap();
        let module_dir = project.path().join("web");
        fs::create_dir_all(&module_dir).unwrap();
        fs::write(project.path().join("shared.conf"), "root").unwrap();
        fs::write(module_dir.join("local.conf"), "module").unwrap();

        let work_dir = session.stage_root().join("web");
        fs::create_dir_all(&work_dir).unwrap();

        let ctx = ScopeTree::new();
        let version = version();
        let handle = EngineHandle::new(
            project.path(),
            module_dir,
            work_dir.clone(),
            &ctx,
            &version,
            &session,
            &ShellRunner,
        );

        let pairs = vec![
            ("shared.conf".to_string(), "conf/shared.conf".to_string()),
            ("./local.conf".to_string(), "local.conf".to_string()),
        ];
        handle.copy_files(&pairs).unwrap();
        handle.copy_files(&pairs).unwrap();

        assert_eq!(
            fs::read_to_string(work_dir.join("conf/shared.conf")).unwrap(),
            "root"
        );
        assert_eq!(
            fs::read_to_string(work_dir.join("local.conf")).unwrap(),
            "module"
        );
        session.close().unwrap();
    }

    #[test]
    fn copy_files_rejects_destinations_escaping_the_staged_dir() {
        let base = tempfile::tempdir().unwrap();
        let session = TmpFilesSession::open(base.path(), "s").unwrap();
        let project = tempfile::tempdir().unwrap();
        let module_dir = project.path().join("web");
        fs::create_dir_all(&module_dir).unwrap();
        fs::write(project.path().join("shared.conf"), "root").unwrap();

        let work_dir = session.stage_root().join("web");
        fs::create_dir_all(&work_dir).unwrap();

        let ctx = ScopeTree::new();
        let version = version();
        let handle = EngineHandle::new(
            project.path(),
            module_dir,
            work_dir.clone(),
            &ctx,
            &version,
            &session,
            &ShellRunner,
        );

        for dest in ["../escaped.conf", "/tmp/escaped.conf", "a/../../escaped.conf"] {
            let err = handle
                .copy_files(&[("shared.conf".to_string(), dest.to_string())])
                .unwrap_err();
            assert!(matches!(err, EngineError::Staging { .. }), "{dest}: {err}");
        }
        // Nothing landed next to the staged directory.
        assert!(!session.stage_root().join("escaped.conf").exists());
        session.close().unwrap();
    }

    #[test]
    fn execute_command_rejects_nonzero_exit() {
        let base = tempfile::tempdir().unwrap();
        let session = TmpFilesSession::open(base.path(), "s").unwrap();
        let project = tempfile::tempdir().unwrap();
        let ctx = ScopeTree::new();
        let version = version();
        let handle = EngineHandle::new(
            project.path(),
            project.path().to_path_buf(),
            project.path().to_path_buf(),
            &ctx,
            &version,
            &session,
            &ShellRunner,
        );

        let err = handle
            .execute_hidden_command(&CommandSpec::new("sh").args(["-c", "echo oops >&2; exit 2"]))
            .unwrap_err();
        match err {
            EngineError::CommandFailed { status, stderr, .. } => {
                assert_eq!(status, 2);
                assert!(stderr.contains("oops"));
            }
            other => panic!("expected command failure, got: {other}"),
        }
        session.close().unwrap();
    }

    #[test]
    fn deferred_cancel_runs_once() {
        let counter = Arc::new(AtomicUsize::new(0));
        let mut handle = DeferredHandle::new(ScopeTree::new(), Arc::new(ShellRunner));
        assert!(!handle.has_cancel());
        let inner = Arc::clone(&counter);
        handle.register_cancel(move || {
            inner.fetch_add(1, Ordering::SeqCst);
        });
        assert!(handle.has_cancel());
        handle.cancel();
        handle.cancel();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }
}
