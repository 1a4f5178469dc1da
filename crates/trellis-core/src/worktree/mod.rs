//! Git worktree/SCM contract: the boundary between the scheduler and
//! repository checkouts.
//!
//! Worktree creation has no bearing on scheduling correctness -- the run
//! executes whether or not a checkout exists -- so this contract is
//! consumed as plain functions rather than threaded through the state
//! machine. All mutating `git` invocations are serialized behind a
//! process-local lock since git's own lock files don't tolerate concurrent
//! writers against one repository.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Mutex;

use anyhow::{Context, Result};
use thiserror::Error;

use sqlx::PgPool;
use trellis_db::queries::repositories;

#[derive(Debug, Error)]
pub enum WorktreeError {
    #[error("repository {0:?} is not registered")]
    UnknownRepository(String),

    #[error("git command failed: {message}")]
    GitCommand {
        message: String,
        #[source]
        source: std::io::Error,
    },

    #[error("git {command} failed (exit {code}): {stderr}")]
    GitExit { command: String, code: i32, stderr: String },

    #[error("resolved worktree path {0} escapes the sandbox root {1}")]
    PathEscapesSandbox(PathBuf, PathBuf),
}

/// The result of creating a per-run checkout.
#[derive(Debug, Clone)]
pub struct CreatedWorktree {
    pub path: PathBuf,
    pub branch: String,
}

/// Outcome of a credential/auth probe for a given environment.
#[derive(Debug, Clone)]
pub struct AuthStatus {
    pub authenticated: bool,
    pub error: Option<String>,
}

static GIT_LOCK: Mutex<()> = Mutex::new(());

fn run_git(args: &[&str], current_dir: &Path) -> Result<(), WorktreeError> {
    let _guard = GIT_LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());

    let output = Command::new("git")
        .args(args)
        .current_dir(current_dir)
        .output()
        .map_err(|source| WorktreeError::GitCommand { message: format!("git {}", args.join(" ")), source })?;

    if !output.status.success() {
        return Err(WorktreeError::GitExit {
            command: args.join(" "),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        });
    }

    Ok(())
}

/// Resolve a candidate path against `sandbox_root`, rejecting anything
/// (via a symlink or a literal `..`) that would land outside it.
fn resolve_within_sandbox(sandbox_root: &Path, candidate: &Path) -> Result<PathBuf, WorktreeError> {
    let joined = sandbox_root.join(candidate);
    let root_abs = sandbox_root
        .canonicalize()
        .unwrap_or_else(|_| sandbox_root.to_path_buf());
    match joined.canonicalize() {
        Ok(resolved) if resolved.starts_with(&root_abs) => Ok(resolved),
        Ok(resolved) => Err(WorktreeError::PathEscapesSandbox(resolved, root_abs)),
        Err(_) => {
            // Path doesn't exist yet (normal for a fresh worktree target);
            // fall back to lexical containment.
            if joined.starts_with(sandbox_root) {
                Ok(joined)
            } else {
                Err(WorktreeError::PathEscapesSandbox(joined, sandbox_root.to_path_buf()))
            }
        }
    }
}

/// Ensure a bare clone of a registered repository exists under
/// `sandbox_root/repos/<name>`, cloning it if absent.
pub async fn ensure_clone(pool: &PgPool, sandbox_root: &Path, repo_name: &str) -> Result<PathBuf> {
    let repo = repositories::get_repository_by_name(pool, repo_name)
        .await?
        .ok_or_else(|| WorktreeError::UnknownRepository(repo_name.to_owned()))?;

    let clone_path = resolve_within_sandbox(sandbox_root, Path::new("repos").join(&repo.name).as_path())?;

    if clone_path.join(".git").exists() {
        return Ok(clone_path);
    }

    std::fs::create_dir_all(sandbox_root.join("repos")).context("failed to create sandbox repos directory")?;
    run_git(
        &["clone", &repo.remote_url, clone_path.to_str().unwrap_or_default()],
        sandbox_root,
    )?;

    Ok(clone_path)
}

/// Create a per-run worktree checked out from a registered repository's
/// clone, recording it in the store. Branch defaults to
/// `trellis/run-<run_id>` when not given.
pub async fn create_run_worktree(
    pool: &PgPool,
    sandbox_root: &Path,
    repo_name: &str,
    tree_key: &str,
    run_id: i64,
    branch: Option<&str>,
) -> Result<CreatedWorktree> {
    let repo = repositories::get_repository_by_name(pool, repo_name)
        .await?
        .ok_or_else(|| WorktreeError::UnknownRepository(repo_name.to_owned()))?;

    let clone_path = ensure_clone(pool, sandbox_root, repo_name).await?;
    let branch = branch.map(str::to_owned).unwrap_or_else(|| format!("trellis/run-{run_id}"));

    let relative = Path::new("worktrees").join(format!("{tree_key}-run-{run_id}"));
    let worktree_path = resolve_within_sandbox(sandbox_root, &relative)?;

    std::fs::create_dir_all(sandbox_root.join("worktrees")).context("failed to create sandbox worktrees directory")?;
    run_git(
        &[
            "worktree",
            "add",
            "-B",
            &branch,
            worktree_path.to_str().unwrap_or_default(),
            &repo.default_branch,
        ],
        &clone_path,
    )?;

    repositories::insert_run_worktree(
        pool,
        run_id,
        repo.id,
        worktree_path.to_str().unwrap_or_default(),
        &branch,
    )
    .await?;

    Ok(CreatedWorktree { path: worktree_path, branch })
}

/// Remove every worktree recorded for a run and mark them removed.
/// Best-effort: a `git worktree remove` failure for one row doesn't stop
/// cleanup of the rest.
pub async fn cleanup_run(pool: &PgPool, repo_clone_path: &Path, run_id: i64) -> Result<()> {
    let worktrees = repositories::list_worktrees_for_run(pool, run_id).await?;

    for wt in worktrees {
        if wt.removed_at.is_some() {
            continue;
        }
        let _ = run_git(&["worktree", "remove", "--force", &wt.path], repo_clone_path);
        repositories::mark_worktree_removed(pool, wt.id).await?;
    }

    Ok(())
}

/// Probe whether the process environment carries usable Git credentials.
/// Recognizes an SSH agent socket or a personal-access-token-style
/// variable; anything else is reported unauthenticated rather than
/// guessed at.
pub fn check_auth(env: &HashMap<String, String>) -> AuthStatus {
    if env.contains_key("SSH_AUTH_SOCK") {
        return AuthStatus { authenticated: true, error: None };
    }
    if let Some(token) = env.get("GIT_ASKPASS").or_else(|| env.get("GITHUB_TOKEN")) {
        if !token.trim().is_empty() {
            return AuthStatus { authenticated: true, error: None };
        }
    }
    AuthStatus {
        authenticated: false,
        error: Some("no SSH agent or token credential found in environment".to_owned()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn check_auth_detects_ssh_agent() {
        let mut env = HashMap::new();
        env.insert("SSH_AUTH_SOCK".to_owned(), "/tmp/agent.sock".to_owned());
        assert!(check_auth(&env).authenticated);
    }

    #[test]
    fn check_auth_detects_token() {
        let mut env = HashMap::new();
        env.insert("GITHUB_TOKEN".to_owned(), "ghp_xxx".to_owned());
        assert!(check_auth(&env).authenticated);
    }

    #[test]
    fn check_auth_reports_missing_credentials() {
        let env = HashMap::new();
        let status = check_auth(&env);
        assert!(!status.authenticated);
        assert!(status.error.is_some());
    }

    #[test]
    fn resolve_within_sandbox_rejects_traversal() {
        let tmp = std::env::temp_dir().join("trellis-worktree-sandbox-test");
        let _ = std::fs::create_dir_all(&tmp);
        let escape = Path::new("../../etc");
        assert!(resolve_within_sandbox(&tmp, escape).is_err());
    }
}
