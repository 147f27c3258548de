//! Git integration: revision lookup and isolated checkouts.

use std::path::Path;
use std::process::Command;

use crate::domain::error::{Result, ShipgateError};

fn git(dir: Option<&Path>, args: &[&str]) -> Result<String> {
    let mut cmd = Command::new("git");
    cmd.args(args);
    if let Some(dir) = dir {
        cmd.current_dir(dir);
    }
    let output = cmd
        .output()
        .map_err(|e| ShipgateError::GitError(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ShipgateError::GitError(format!(
            "git {} failed: {}",
            args.first().copied().unwrap_or_default(),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

/// Capture the HEAD commit SHA from a git repository.
pub fn capture_head_sha(repo_dir: &Path) -> Result<String> {
    resolve_revision(repo_dir, "HEAD")
}

/// Resolve a revision expression (`HEAD`, a tag, a short SHA) to a full commit SHA.
///
/// Revisions starting with `-` are rejected so they can never be read as git options.
pub fn resolve_revision(repo_dir: &Path, revision: &str) -> Result<String> {
    if revision.is_empty() || revision.starts_with('-') {
        return Err(ShipgateError::GitError(format!("refusing revision '{revision}'")));
    }
    let spec = format!("{revision}^{{commit}}");
    let sha = git(Some(repo_dir), &["rev-parse", "--verify", "--quiet", &spec])?;
    if sha.is_empty() {
        return Err(ShipgateError::GitError(format!(
            "revision '{revision}' did not resolve to a commit"
        )));
    }
    Ok(sha)
}

/// Check whether a directory is inside a git work tree.
pub fn is_git_repo(dir: &Path) -> bool {
    git(Some(dir), &["rev-parse", "--is-inside-work-tree"]).is_ok()
}

/// Clone `source` into `dest` and detach at exactly `revision`.
///
/// `dest` must not exist or be empty. The result never shares a working tree
/// with `source` or with any other checkout. The revision is resolved to a
/// full SHA before checkout, and only that SHA reaches `git checkout`.
pub fn checkout_revision(source: &str, revision: &str, dest: &Path) -> Result<()> {
    let dest_str = dest.to_string_lossy();
    git(None, &["clone", "--quiet", "--no-checkout", "--", source, &dest_str])?;
    let wanted = resolve_revision(dest, revision)?;
    git(
        Some(dest),
        &["-c", "advice.detachedHead=false", "checkout", "--quiet", "--detach", &wanted],
    )?;

    let head = capture_head_sha(dest)?;
    if head != wanted {
        return Err(ShipgateError::GitError(format!(
            "checkout of {revision} landed on {head}"
        )));
    }
    Ok(())
}
