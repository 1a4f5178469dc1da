//! Database query functions for `workflow_runs`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{RunStatus, WorkflowRun};

pub async fn insert_run(
    pool: &PgPool,
    tree_id: Uuid,
    status: RunStatus,
    max_steps: i32,
    started_at: Option<DateTime<Utc>>,
) -> Result<WorkflowRun> {
    sqlx::query_as::<_, WorkflowRun>(
        "INSERT INTO workflow_runs (tree_id, status, max_steps, started_at) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(tree_id)
    .bind(status)
    .bind(max_steps)
    .bind(started_at)
    .fetch_one(pool)
    .await
    .context("failed to insert workflow run")
}

pub async fn get_run(pool: &PgPool, id: i64) -> Result<Option<WorkflowRun>> {
    sqlx::query_as::<_, WorkflowRun>("SELECT * FROM workflow_runs WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch workflow run")
}

pub async fn list_recent_runs(pool: &PgPool, limit: i64) -> Result<Vec<WorkflowRun>> {
    sqlx::query_as::<_, WorkflowRun>(
        "SELECT * FROM workflow_runs ORDER BY created_at DESC LIMIT $1",
    )
    .bind(limit)
    .fetch_all(pool)
    .await
    .context("failed to list recent workflow runs")
}

/// Transition a run's status with optimistic locking on `from`.
///
/// Returns the number of rows affected; `0` means either the run does not
/// exist or its status no longer matches `from`.
pub async fn transition_run_status(
    pool: &PgPool,
    run_id: i64,
    from: RunStatus,
    to: RunStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
    failure_reason: Option<&str>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE workflow_runs \
         SET status = $1, \
             started_at = COALESCE(started_at, $2), \
             completed_at = COALESCE($3, completed_at), \
             failure_reason = COALESCE($4, failure_reason), \
             updated_at = now() \
         WHERE id = $5 AND status = $6",
    )
    .bind(to)
    .bind(started_at)
    .bind(completed_at)
    .bind(failure_reason)
    .bind(run_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition workflow run status")?;

    Ok(result.rows_affected())
}
