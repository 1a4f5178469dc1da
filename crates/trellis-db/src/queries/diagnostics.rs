//! Database query functions for `run_node_diagnostics`.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::RunNodeDiagnostics;

/// Insert or merge a diagnostics payload for an attempt. Called multiple
/// times over an attempt's lifetime (context manifest, then error-handler
/// block, then failure-route block), so new keys are merged into any
/// existing payload rather than overwriting it.
pub async fn upsert_diagnostics(
    pool: &PgPool,
    run_id: i64,
    run_node_id: i64,
    attempt: i32,
    patch: serde_json::Value,
) -> Result<RunNodeDiagnostics> {
    sqlx::query_as::<_, RunNodeDiagnostics>(
        "INSERT INTO run_node_diagnostics (run_id, run_node_id, attempt, payload) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (run_node_id, attempt) \
         DO UPDATE SET payload = run_node_diagnostics.payload || EXCLUDED.payload, \
                       updated_at = now() \
         RETURNING *",
    )
    .bind(run_id)
    .bind(run_node_id)
    .bind(attempt)
    .bind(patch)
    .fetch_one(pool)
    .await
    .context("failed to upsert run node diagnostics")
}

pub async fn get_diagnostics(
    pool: &PgPool,
    run_node_id: i64,
    attempt: i32,
) -> Result<Option<RunNodeDiagnostics>> {
    sqlx::query_as::<_, RunNodeDiagnostics>(
        "SELECT * FROM run_node_diagnostics WHERE run_node_id = $1 AND attempt = $2",
    )
    .bind(run_node_id)
    .bind(attempt)
    .fetch_optional(pool)
    .await
    .context("failed to fetch run node diagnostics")
}
