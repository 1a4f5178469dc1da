//! Database query functions for `run_nodes`.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{RunNode, RunNodeStatus};

#[allow(clippy::too_many_arguments)]
pub async fn insert_run_node(
    pool: &PgPool,
    run_id: i64,
    tree_node_id: Option<Uuid>,
    node_key: &str,
    attempt: i32,
    status: RunNodeStatus,
    spawner_node_id: Option<i64>,
    join_node_id: Option<i64>,
    lineage_depth: i32,
    sequence_path: Option<&str>,
) -> Result<RunNode> {
    sqlx::query_as::<_, RunNode>(
        "INSERT INTO run_nodes \
         (run_id, tree_node_id, node_key, attempt, status, spawner_node_id, \
          join_node_id, lineage_depth, sequence_path) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
         RETURNING *",
    )
    .bind(run_id)
    .bind(tree_node_id)
    .bind(node_key)
    .bind(attempt)
    .bind(status)
    .bind(spawner_node_id)
    .bind(join_node_id)
    .bind(lineage_depth)
    .bind(sequence_path)
    .fetch_one(pool)
    .await
    .context("failed to insert run node")
}

pub async fn get_run_node(pool: &PgPool, id: i64) -> Result<Option<RunNode>> {
    sqlx::query_as::<_, RunNode>("SELECT * FROM run_nodes WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch run node")
}

/// All run-nodes for a run, ordered by their tree node's `sequence_index`
/// (ties broken by `node_key`, then `id`) -- the round-trip order required
/// by the materialize-then-reload property. Dynamically spawned nodes carry
/// no tree node, so they sort after every tree-materialized node, ordered
/// among themselves by `node_key` then `id`.
pub async fn list_run_nodes_for_run(pool: &PgPool, run_id: i64) -> Result<Vec<RunNode>> {
    sqlx::query_as::<_, RunNode>(
        "SELECT rn.* FROM run_nodes rn \
         LEFT JOIN tree_nodes tn ON tn.id = rn.tree_node_id \
         WHERE rn.run_id = $1 \
         ORDER BY (tn.sequence_index IS NULL) ASC, tn.sequence_index ASC, rn.node_key ASC, rn.id ASC",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("failed to list run nodes for run")
}

/// The latest (highest-attempt) run-node row for a given tree node in a run.
pub async fn get_latest_attempt(
    pool: &PgPool,
    run_id: i64,
    tree_node_id: Uuid,
) -> Result<Option<RunNode>> {
    sqlx::query_as::<_, RunNode>(
        "SELECT * FROM run_nodes WHERE run_id = $1 AND tree_node_id = $2 \
         ORDER BY attempt DESC LIMIT 1",
    )
    .bind(run_id)
    .bind(tree_node_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest run node attempt")
}

/// The latest run-node row for a given node key in a run, keyed by
/// `node_key` rather than `tree_node_id` -- the only lookup that works
/// uniformly for both tree-materialized and dynamically spawned nodes,
/// since the latter carry no `tree_node_id`.
pub async fn get_latest_attempt_by_node_key(
    pool: &PgPool,
    run_id: i64,
    node_key: &str,
) -> Result<Option<RunNode>> {
    sqlx::query_as::<_, RunNode>(
        "SELECT * FROM run_nodes WHERE run_id = $1 AND node_key = $2 \
         ORDER BY attempt DESC LIMIT 1",
    )
    .bind(run_id)
    .bind(node_key)
    .fetch_optional(pool)
    .await
    .context("failed to fetch latest run node attempt")
}

/// Every run-node currently sitting in `pending`, latest attempt per node
/// identity, ordered for the executor's tie-break: `(sequence_index,
/// node_key, id)`. "Latest attempt per node identity" matches by `node_key`
/// rather than `tree_node_id` so it also holds for dynamically spawned
/// nodes, which share a `node_key` across retries but carry no tree node.
pub async fn list_pending_latest_attempts(pool: &PgPool, run_id: i64) -> Result<Vec<RunNode>> {
    sqlx::query_as::<_, RunNode>(
        "SELECT rn.* FROM run_nodes rn \
         LEFT JOIN tree_nodes tn ON tn.id = rn.tree_node_id \
         WHERE rn.run_id = $1 AND rn.status = 'pending' \
         AND rn.attempt = (SELECT MAX(attempt) FROM run_nodes WHERE run_id = rn.run_id AND node_key = rn.node_key) \
         ORDER BY (tn.sequence_index IS NULL) ASC, tn.sequence_index ASC, rn.node_key ASC, rn.id ASC",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("failed to list pending run nodes")
}

/// Transition a run-node's status with optimistic locking on `from`.
#[allow(clippy::too_many_arguments)]
pub async fn transition_run_node_status(
    pool: &PgPool,
    run_node_id: i64,
    from: RunNodeStatus,
    to: RunNodeStatus,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE run_nodes \
         SET status = $1, \
             started_at = COALESCE(started_at, $2), \
             completed_at = $3, \
             updated_at = now() \
         WHERE id = $4 AND status = $5",
    )
    .bind(to)
    .bind(started_at)
    .bind(completed_at)
    .bind(run_node_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to transition run node status")?;

    Ok(result.rows_affected())
}

/// Reactivate a run-node (`skipped -> pending` or `completed -> pending`).
pub async fn reactivate_run_node(
    pool: &PgPool,
    run_node_id: i64,
    from: RunNodeStatus,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE run_nodes \
         SET status = 'pending', started_at = NULL, completed_at = NULL, updated_at = now() \
         WHERE id = $1 AND status = $2",
    )
    .bind(run_node_id)
    .bind(from)
    .execute(pool)
    .await
    .context("failed to reactivate run node")?;

    Ok(result.rows_affected())
}

/// Materialize the next attempt of the same tree node (used for retry
/// scheduling and failure-route reactivation that requires a fresh attempt).
pub async fn insert_next_attempt(
    pool: &PgPool,
    run_id: i64,
    tree_node_id: Option<Uuid>,
    node_key: &str,
    attempt: i32,
    status: RunNodeStatus,
    spawner_node_id: Option<i64>,
    join_node_id: Option<i64>,
    lineage_depth: i32,
    sequence_path: Option<&str>,
) -> Result<RunNode> {
    insert_run_node(
        pool,
        run_id,
        tree_node_id,
        node_key,
        attempt,
        status,
        spawner_node_id,
        join_node_id,
        lineage_depth,
        sequence_path,
    )
    .await
}

/// Mark every run-node still `pending` for the given tree-node ids as
/// `skipped` -- used when a routing decision makes them unreachable.
pub async fn skip_pending_nodes(
    pool: &PgPool,
    run_id: i64,
    tree_node_ids: &[Uuid],
) -> Result<u64> {
    if tree_node_ids.is_empty() {
        return Ok(0);
    }
    let result = sqlx::query(
        "UPDATE run_nodes \
         SET status = 'skipped', completed_at = now(), updated_at = now() \
         WHERE run_id = $1 AND status = 'pending' AND tree_node_id = ANY($2)",
    )
    .bind(run_id)
    .bind(tree_node_ids)
    .execute(pool)
    .await
    .context("failed to skip unreachable pending run nodes")?;

    Ok(result.rows_affected())
}
