//! Database query functions for `phase_artifacts`.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::PhaseArtifact;

pub async fn insert_artifact(
    pool: &PgPool,
    run_id: i64,
    run_node_id: i64,
    attempt: i32,
    artifact_type: &str,
    content_type: &str,
    content: &str,
    metadata: serde_json::Value,
) -> Result<PhaseArtifact> {
    sqlx::query_as::<_, PhaseArtifact>(
        "INSERT INTO phase_artifacts \
         (run_id, run_node_id, attempt, artifact_type, content_type, content, metadata) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(run_id)
    .bind(run_node_id)
    .bind(attempt)
    .bind(artifact_type)
    .bind(content_type)
    .bind(content)
    .bind(metadata)
    .fetch_one(pool)
    .await
    .context("failed to insert phase artifact")
}

pub async fn get_artifact(pool: &PgPool, id: i64) -> Result<Option<PhaseArtifact>> {
    sqlx::query_as::<_, PhaseArtifact>("SELECT * FROM phase_artifacts WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch phase artifact")
}

/// Latest `report` artifact for a run-node (across its attempts), used by
/// the context assembler to pull a predecessor's output.
pub async fn latest_report_for_run_node(
    pool: &PgPool,
    run_node_id: i64,
) -> Result<Option<PhaseArtifact>> {
    sqlx::query_as::<_, PhaseArtifact>(
        "SELECT * FROM phase_artifacts \
         WHERE run_node_id = $1 AND artifact_type = 'report' \
         ORDER BY attempt DESC, created_at DESC LIMIT 1",
    )
    .bind(run_node_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest report artifact")
}

/// A `note` artifact tagged with a given `metadata->>'kind'` for a specific
/// source attempt of a run-node -- used to locate the error-handler summary.
pub async fn find_note_by_kind_and_source_attempt(
    pool: &PgPool,
    run_node_id: i64,
    kind: &str,
    source_attempt: i32,
) -> Result<Option<PhaseArtifact>> {
    sqlx::query_as::<_, PhaseArtifact>(
        "SELECT * FROM phase_artifacts \
         WHERE run_node_id = $1 AND artifact_type = 'note' \
         AND metadata ->> 'kind' = $2 \
         AND (metadata ->> 'source_attempt')::int = $3 \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(run_node_id)
    .bind(kind)
    .bind(source_attempt)
    .fetch_optional(pool)
    .await
    .context("failed to fetch note artifact by kind/source attempt")
}

pub async fn list_artifacts_for_run_node(
    pool: &PgPool,
    run_node_id: i64,
) -> Result<Vec<PhaseArtifact>> {
    sqlx::query_as::<_, PhaseArtifact>(
        "SELECT * FROM phase_artifacts WHERE run_node_id = $1 ORDER BY created_at ASC",
    )
    .bind(run_node_id)
    .fetch_all(pool)
    .await
    .context("failed to list artifacts for run node")
}
