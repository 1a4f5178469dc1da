//! `trellis repo add|list|show|remove|sync` -- manage registered Git remotes.

use std::path::Path;

use anyhow::anyhow;
use sqlx::PgPool;
use trellis_core::worktree;
use trellis_db::queries::repositories;

use crate::error::CliError;

pub async fn add(
    pool: &PgPool,
    name: &str,
    remote_url: &str,
    default_branch: &str,
) -> Result<(), CliError> {
    let repo = repositories::insert_repository(pool, name, remote_url, default_branch)
        .await
        .map_err(CliError::runtime)?;
    println!("registered repository {} ({})", repo.name, repo.remote_url);
    Ok(())
}

pub async fn list(pool: &PgPool) -> Result<(), CliError> {
    let repos = repositories::list_repositories(pool).await.map_err(CliError::runtime)?;
    if repos.is_empty() {
        println!("no repositories registered");
        return Ok(());
    }
    for repo in repos {
        println!(
            "{:<24} {:<50} {:<10} synced={}",
            repo.name,
            repo.remote_url,
            repo.default_branch,
            repo.last_synced_at.map(|t| t.to_string()).unwrap_or_else(|| "never".to_owned()),
        );
    }
    Ok(())
}

pub async fn show(pool: &PgPool, name: &str) -> Result<(), CliError> {
    let repo = repositories::get_repository_by_name(pool, name)
        .await
        .map_err(CliError::runtime)?
        .ok_or_else(|| CliError::not_found(anyhow!("repository {name:?} not registered")))?;

    println!("name            {}", repo.name);
    println!("remote_url      {}", repo.remote_url);
    println!("default_branch  {}", repo.default_branch);
    println!(
        "last_synced_at  {}",
        repo.last_synced_at.map(|t| t.to_string()).unwrap_or_else(|| "never".to_owned())
    );
    Ok(())
}

pub async fn remove(pool: &PgPool, name: &str, purge: bool, sandbox_dir: &Path) -> Result<(), CliError> {
    let rows = repositories::delete_repository(pool, name).await.map_err(CliError::runtime)?;
    if rows == 0 {
        return Err(CliError::not_found(anyhow!("repository {name:?} not registered")));
    }

    if purge {
        let clone_path = sandbox_dir.join("repos").join(name);
        if clone_path.exists() {
            std::fs::remove_dir_all(&clone_path).map_err(|err| {
                CliError::runtime(anyhow!("failed to purge clone at {}: {err}", clone_path.display()))
            })?;
        }
    }

    println!("removed repository {name}");
    Ok(())
}

pub async fn sync(pool: &PgPool, sandbox_dir: &Path, name: &str) -> Result<(), CliError> {
    let clone_path = worktree::ensure_clone(pool, sandbox_dir, name)
        .await
        .map_err(CliError::runtime)?;
    repositories::mark_repository_synced(pool, name, chrono::Utc::now())
        .await
        .map_err(CliError::runtime)?;
    println!("synced {name} at {}", clone_path.display());
    Ok(())
}
