//! Database query functions for `run_node_edges`.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::RunNodeEdge;

#[allow(clippy::too_many_arguments)]
pub async fn insert_run_node_edge(
    pool: &PgPool,
    run_id: i64,
    source_run_node_id: i64,
    target_run_node_id: i64,
    route_on: &str,
    priority: i32,
    auto: bool,
    guard_definition_id: Option<Uuid>,
    edge_kind: &str,
) -> Result<RunNodeEdge> {
    sqlx::query_as::<_, RunNodeEdge>(
        "INSERT INTO run_node_edges \
         (run_id, source_run_node_id, target_run_node_id, route_on, priority, auto, guard_definition_id, edge_kind) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
         RETURNING *",
    )
    .bind(run_id)
    .bind(source_run_node_id)
    .bind(target_run_node_id)
    .bind(route_on)
    .bind(priority)
    .bind(auto)
    .bind(guard_definition_id)
    .bind(edge_kind)
    .fetch_one(pool)
    .await
    .context("failed to insert run node edge")
}

/// Outgoing edges for a source run-node, deterministic order
/// `(priority, target_id, id)`.
pub async fn list_outgoing_edges(
    pool: &PgPool,
    source_run_node_id: i64,
    route_on: &str,
) -> Result<Vec<RunNodeEdge>> {
    sqlx::query_as::<_, RunNodeEdge>(
        "SELECT * FROM run_node_edges WHERE source_run_node_id = $1 AND route_on = $2 \
         ORDER BY priority ASC, target_run_node_id ASC, id ASC",
    )
    .bind(source_run_node_id)
    .bind(route_on)
    .fetch_all(pool)
    .await
    .context("failed to list outgoing run node edges")
}

pub async fn list_incoming_edges(
    pool: &PgPool,
    target_run_node_id: i64,
) -> Result<Vec<RunNodeEdge>> {
    sqlx::query_as::<_, RunNodeEdge>(
        "SELECT * FROM run_node_edges WHERE target_run_node_id = $1 \
         ORDER BY priority ASC, source_run_node_id ASC, id ASC",
    )
    .bind(target_run_node_id)
    .fetch_all(pool)
    .await
    .context("failed to list incoming run node edges")
}

pub async fn list_edges_for_run(pool: &PgPool, run_id: i64) -> Result<Vec<RunNodeEdge>> {
    sqlx::query_as::<_, RunNodeEdge>(
        "SELECT * FROM run_node_edges WHERE run_id = $1 ORDER BY id ASC",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .context("failed to list run node edges for run")
}
