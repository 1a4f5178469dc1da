//! Database query functions for `run_join_barriers`.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::{BarrierStatus, JoinBarrier};

pub async fn insert_barrier(
    pool: &PgPool,
    run_id: i64,
    spawner_run_node_id: i64,
    join_run_node_id: i64,
    spawn_source_artifact_id: Option<i64>,
    expected_children: i32,
    status: BarrierStatus,
) -> Result<JoinBarrier> {
    sqlx::query_as::<_, JoinBarrier>(
        "INSERT INTO run_join_barriers \
         (run_id, spawner_run_node_id, join_run_node_id, spawn_source_artifact_id, \
          expected_children, status) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING *",
    )
    .bind(run_id)
    .bind(spawner_run_node_id)
    .bind(join_run_node_id)
    .bind(spawn_source_artifact_id)
    .bind(expected_children)
    .bind(status)
    .fetch_one(pool)
    .await
    .context("failed to insert join barrier")
}

pub async fn get_barrier_for_join(
    pool: &PgPool,
    join_run_node_id: i64,
) -> Result<Option<JoinBarrier>> {
    sqlx::query_as::<_, JoinBarrier>(
        "SELECT * FROM run_join_barriers WHERE join_run_node_id = $1 \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(join_run_node_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch join barrier")
}

pub async fn get_barrier_for_spawner(
    pool: &PgPool,
    spawner_run_node_id: i64,
) -> Result<Option<JoinBarrier>> {
    sqlx::query_as::<_, JoinBarrier>(
        "SELECT * FROM run_join_barriers WHERE spawner_run_node_id = $1 \
         ORDER BY created_at DESC LIMIT 1",
    )
    .bind(spawner_run_node_id)
    .fetch_optional(pool)
    .await
    .context("failed to fetch join barrier for spawner")
}

/// Record one more terminal child against the barrier, bumping the
/// appropriate counter, and flip `pending -> ready` once every child is
/// terminal. Performed as a single statement so two concurrent terminations
/// in the same transaction serialize on the row lock rather than racing.
pub async fn record_child_terminal(
    pool: &PgPool,
    barrier_id: i64,
    child_completed: bool,
) -> Result<JoinBarrier> {
    let column = if child_completed {
        "completed_children"
    } else {
        "failed_children"
    };
    let sql = format!(
        "UPDATE run_join_barriers \
         SET terminal_children = terminal_children + 1, \
             {column} = {column} + 1, \
             status = CASE \
                 WHEN terminal_children + 1 = expected_children AND status = 'pending' THEN 'ready' \
                 ELSE status \
             END, \
             updated_at = now() \
         WHERE id = $1 \
         RETURNING *"
    );
    sqlx::query_as::<_, JoinBarrier>(&sql)
        .bind(barrier_id)
        .fetch_one(pool)
        .await
        .context("failed to record barrier child termination")
}

pub async fn release_barrier(pool: &PgPool, barrier_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE run_join_barriers SET status = 'released', updated_at = now() \
         WHERE id = $1 AND status = 'ready'",
    )
    .bind(barrier_id)
    .execute(pool)
    .await
    .context("failed to release join barrier")?;

    Ok(result.rows_affected())
}

pub async fn cancel_open_barriers_for_run(pool: &PgPool, run_id: i64) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE run_join_barriers SET status = 'cancelled', updated_at = now() \
         WHERE run_id = $1 AND status IN ('pending', 'ready')",
    )
    .bind(run_id)
    .execute(pool)
    .await
    .context("failed to cancel open join barriers")?;

    Ok(result.rows_affected())
}
