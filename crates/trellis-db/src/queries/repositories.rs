//! Database query functions for `repositories` and `run_worktrees`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{Repository, RunWorktree};

pub async fn insert_repository(
    pool: &PgPool,
    name: &str,
    remote_url: &str,
    default_branch: &str,
) -> Result<Repository> {
    sqlx::query_as::<_, Repository>(
        "INSERT INTO repositories (name, remote_url, default_branch) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(name)
    .bind(remote_url)
    .bind(default_branch)
    .fetch_one(pool)
    .await
    .context("failed to insert repository")
}

pub async fn get_repository_by_name(pool: &PgPool, name: &str) -> Result<Option<Repository>> {
    sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE name = $1")
        .bind(name)
        .fetch_optional(pool)
        .await
        .context("failed to fetch repository")
}

pub async fn list_repositories(pool: &PgPool) -> Result<Vec<Repository>> {
    sqlx::query_as::<_, Repository>("SELECT * FROM repositories ORDER BY name ASC")
        .fetch_all(pool)
        .await
        .context("failed to list repositories")
}

pub async fn delete_repository(pool: &PgPool, name: &str) -> Result<u64> {
    let result = sqlx::query("DELETE FROM repositories WHERE name = $1")
        .bind(name)
        .execute(pool)
        .await
        .context("failed to delete repository")?;

    Ok(result.rows_affected())
}

pub async fn mark_repository_synced(
    pool: &PgPool,
    name: &str,
    synced_at: DateTime<Utc>,
) -> Result<u64> {
    let result = sqlx::query("UPDATE repositories SET last_synced_at = $1 WHERE name = $2")
        .bind(synced_at)
        .bind(name)
        .execute(pool)
        .await
        .context("failed to mark repository synced")?;

    Ok(result.rows_affected())
}

pub async fn insert_run_worktree(
    pool: &PgPool,
    run_id: i64,
    repository_id: Uuid,
    path: &str,
    branch: &str,
) -> Result<RunWorktree> {
    sqlx::query_as::<_, RunWorktree>(
        "INSERT INTO run_worktrees (run_id, repository_id, path, branch) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(run_id)
    .bind(repository_id)
    .bind(path)
    .bind(branch)
    .fetch_one(pool)
    .await
    .context("failed to insert run worktree")
}

pub async fn list_worktrees_for_run(pool: &PgPool, run_id: i64) -> Result<Vec<RunWorktree>> {
    sqlx::query_as::<_, RunWorktree>(
        "SELECT * FROM run_worktrees WHERE run_id = $1 ORDER BY created_at ASC",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("failed to list worktrees for run")
}

pub async fn mark_worktree_removed(pool: &PgPool, id: i64) -> Result<u64> {
    let result = sqlx::query("UPDATE run_worktrees SET removed_at = now() WHERE id = $1")
        .bind(id)
        .execute(pool)
        .await
        .context("failed to mark worktree removed")?;

    Ok(result.rows_affected())
}
