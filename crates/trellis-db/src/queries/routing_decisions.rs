//! Database query functions for `routing_decisions`.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::RoutingDecision;

#[allow(clippy::too_many_arguments)]
pub async fn insert_routing_decision(
    pool: &PgPool,
    run_id: i64,
    run_node_id: i64,
    attempt: i32,
    decision_type: &str,
    signal: Option<&str>,
    rationale: Option<&str>,
    raw_output: Option<&str>,
) -> Result<RoutingDecision> {
    sqlx::query_as::<_, RoutingDecision>(
        "INSERT INTO routing_decisions \
         (run_id, run_node_id, attempt, decision_type, signal, rationale, raw_output) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(run_id)
    .bind(run_node_id)
    .bind(attempt)
    .bind(decision_type)
    .bind(signal)
    .bind(rationale)
    .bind(raw_output)
    .fetch_one(pool)
    .await
    .context("failed to insert routing decision")
}

pub async fn get_routing_decision(
    pool: &PgPool,
    run_node_id: i64,
    attempt: i32,
) -> Result<Option<RoutingDecision>> {
    sqlx::query_as::<_, RoutingDecision>(
        "SELECT * FROM routing_decisions WHERE run_node_id = $1 AND attempt = $2",
    )
    .bind(run_node_id)
    .bind(attempt)
    .fetch_optional(pool)
    .await
    .context("failed to fetch routing decision")
}
