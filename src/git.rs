//! Source-control state for the interpolation context.

use std::path::Path;
use std::process::Command;

/// Current branch of the repository at `root`, or `None` outside a repo /
/// without git. The engine substitutes "unknown" in that case.
pub fn current_branch(root: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["rev-parse", "--abbrev-ref", "HEAD"])
        .current_dir(root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let branch = String::from_utf8_lossy(&output.stdout).trim().to_string();
    if branch.is_empty() {
        None
    } else {
        Some(branch)
    }
}
