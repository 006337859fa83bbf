//! Session-scoped staging directories with crash recovery.
//!
//! Each top-level invocation opens one session: a directory under the
//! sessions base holding a `staging/` working copy of the module tree and an
//! `artifacts/` area for per-artifact scratch dirs. While the session is
//! open a background thread touches a lock file on a fixed interval; at
//! startup, session directories whose lock file (or, absent that, the
//! directory itself) has not been touched within the staleness cutoff are
//! garbage-collected. A session is exclusively owned by the process that
//! created it; there is no cross-process coordination beyond this
//! mtime-based heuristic.

use crate::engine::{EngineError, Result};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant, SystemTime};

const LOCK_FILE: &str = "session.lock";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);
const STALE_AFTER: Duration = Duration::from_secs(6 * 60 * 60);

/// An open staging session. Closing it stops the heartbeat and removes the
/// directory; a crashed process leaves it for the next startup's GC.
pub struct TmpFilesSession {
    root: PathBuf,
    stop: Arc<AtomicBool>,
    heartbeat: Option<JoinHandle<()>>,
}

impl TmpFilesSession {
    /// Default base directory for sessions.
    pub fn default_base() -> PathBuf {
        dirs::cache_dir()
            .unwrap_or_else(std::env::temp_dir)
            .join("caravela")
            .join("sessions")
    }

    /// Open a new session under `base`, spawning the heartbeat writer.
    pub fn open(base: &Path, session_id: &str) -> Result<Self> {
        let root = base.join(session_id);
        let session_err =
            |e: std::io::Error| EngineError::Session(format!("{}: {e}", root.display()));

        fs::create_dir_all(root.join("staging")).map_err(session_err)?;
        fs::create_dir_all(root.join("artifacts")).map_err(session_err)?;
        touch_lock(&root).map_err(session_err)?;

        let stop = Arc::new(AtomicBool::new(false));
        let heartbeat = {
            let root = root.clone();
            let stop = Arc::clone(&stop);
            std::thread::spawn(move || {
                let mut last_touch = Instant::now();
                while !stop.load(Ordering::Relaxed) {
                    std::thread::sleep(Duration::from_millis(200));
                    if last_touch.elapsed() >= HEARTBEAT_INTERVAL {
                        if let Err(e) = touch_lock(&root) {
                            log::warn!("session heartbeat failed: {e}");
                        }
                        last_touch = Instant::now();
                    }
                }
            })
        };

        log::debug!("opened tmp session at {}", root.display());
        Ok(Self {
            root,
            stop,
            heartbeat: Some(heartbeat),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// The working copy of the module tree inside this session.
    pub fn stage_root(&self) -> PathBuf {
        self.root.join("staging")
    }

    /// Allocate a fresh scratch directory for one build artifact.
    pub fn create_tmp_dir(&self) -> Result<PathBuf> {
        let dir = self
            .root
            .join("artifacts")
            .join(uuid::Uuid::new_v4().to_string());
        fs::create_dir_all(&dir)
            .map_err(|e| EngineError::Session(format!("{}: {e}", dir.display())))?;
        Ok(dir)
    }

    /// Stop the heartbeat and remove the session directory.
    pub fn close(mut self) -> Result<()> {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(heartbeat) = self.heartbeat.take() {
            let _ = heartbeat.join();
        }
        fs::remove_dir_all(&self.root)
            .map_err(|e| EngineError::Session(format!("{}: {e}", self.root.display())))?;
        log::debug!("closed tmp session at {}", self.root.display());
        Ok(())
    }
}

impl Drop for TmpFilesSession {
    fn drop(&mut self) {
        // If close() was skipped (error path), stop the heartbeat but keep
        // the directory for the staleness GC.
        self.stop.store(true, Ordering::Relaxed);
        if let Some(heartbeat) = self.heartbeat.take() {
            let _ = heartbeat.join();
        }
    }
}

fn touch_lock(root: &Path) -> std::io::Result<()> {
    fs::write(
        root.join(LOCK_FILE),
        format!("{}\n", std::process::id()),
    )
}

/// Remove session directories under `base` that have not been heartbeated
/// within the default staleness cutoff. Returns how many were removed.
pub fn collect_stale_sessions(base: &Path) -> Result<usize> {
    collect_stale_sessions_older_than(base, STALE_AFTER)
}

fn collect_stale_sessions_older_than(base: &Path, cutoff: Duration) -> Result<usize> {
    if !base.is_dir() {
        return Ok(0);
    }
    let entries = fs::read_dir(base)
        .map_err(|e| EngineError::Session(format!("{}: {e}", base.display())))?;

    let mut removed = 0;
    for entry in entries.flatten() {
        let dir = entry.path();
        if !dir.is_dir() {
            continue;
        }
        if is_stale(&dir, cutoff) {
            match fs::remove_dir_all(&dir) {
                Ok(()) => {
                    log::info!("removed stale session {}", dir.display());
                    removed += 1;
                }
                Err(e) => log::warn!("could not remove stale session {}: {e}", dir.display()),
            }
        }
    }
    Ok(removed)
}

/// Staleness is judged by the lock file's mtime, falling back to the
/// directory's own mtime for sessions that died before writing one.
fn is_stale(dir: &Path, cutoff: Duration) -> bool {
    let probe = {
        let lock = dir.join(LOCK_FILE);
        if lock.is_file() {
            lock
        } else {
            dir.to_path_buf()
        }
    };
    let Ok(meta) = fs::metadata(&probe) else {
        return false;
    };
    let Ok(mtime) = meta.modified() else {
        return false;
    };
    SystemTime::now()
        .duration_since(mtime)
        .map(|age| age > cutoff)
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_creates_layout_and_close_removes_it() {
        let base = tempfile::tempdir().unwrap();
        let session = TmpFilesSession::open(base.path(), "s1").unwrap();
        let root = session.root().to_path_buf();
        assert!(root.join("staging").is_dir());
        assert!(root.join("artifacts").is_dir());
        assert!(root.join(LOCK_FILE).is_file());

        session.close().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn tmp_dirs_are_unique() {
        let base = tempfile::tempdir().unwrap();
        let session = TmpFilesSession::open(base.path(), "s1").unwrap();
        let a = session.create_tmp_dir().unwrap();
        let b = session.create_tmp_dir().unwrap();
        assert_ne!(a, b);
        assert!(a.is_dir() && b.is_dir());
        session.close().unwrap();
    }

    #[test]
    fn stale_collection_respects_cutoff() {
        let base = tempfile::tempdir().unwrap();
        let session = TmpFilesSession::open(base.path(), "old").unwrap();
        let root = session.root().to_path_buf();
        drop(session); // crash-like: directory survives without close()
        assert!(root.exists());

        // Fresh lock file: a generous cutoff keeps the session around.
        let kept = collect_stale_sessions_older_than(base.path(), Duration::from_secs(3600))
            .unwrap();
        assert_eq!(kept, 0);
        assert!(root.exists());

        // Zero cutoff: any past mtime counts as stale.
        std::thread::sleep(Duration::from_millis(20));
        let removed =
            collect_stale_sessions_older_than(base.path(), Duration::ZERO).unwrap();
        assert_eq!(removed, 1);
        assert!(!root.exists());
    }

    #[test]
    fn lockless_directory_is_judged_by_its_own_mtime() {
        let base = tempfile::tempdir().unwrap();
        fs::create_dir_all(base.path().join("dead")).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let removed =
            collect_stale_sessions_older_than(base.path(), Duration::ZERO).unwrap();
        assert_eq!(removed, 1);
    }
}
