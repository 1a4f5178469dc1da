//! Convenience dispatch helpers that wrap [`super::RunNodeStateMachine`] and
//! [`super::RunStateMachine`] transitions with semantic names.

use sqlx::PgPool;
use uuid::Uuid;

use trellis_db::models::{RunNode, RunNodeStatus, RunStatus};

use crate::errors::TransitionError;

use super::{RunNodeStateMachine, RunStateMachine};

/// Claim a run-node for execution: transition `pending -> running`.
pub async fn claim_run_node(pool: &PgPool, run_node_id: i64) -> Result<(), TransitionError> {
    RunNodeStateMachine::transition(
        pool,
        run_node_id,
        RunNodeStatus::Pending,
        RunNodeStatus::Running,
    )
    .await
}

/// Record a successful attempt: transition `running -> completed`.
pub async fn complete_run_node(pool: &PgPool, run_node_id: i64) -> Result<(), TransitionError> {
    RunNodeStateMachine::transition(
        pool,
        run_node_id,
        RunNodeStatus::Running,
        RunNodeStatus::Completed,
    )
    .await
}

/// Record a failed attempt: transition `running -> failed`.
pub async fn fail_run_node(pool: &PgPool, run_node_id: i64) -> Result<(), TransitionError> {
    RunNodeStateMachine::transition(
        pool,
        run_node_id,
        RunNodeStatus::Running,
        RunNodeStatus::Failed,
    )
    .await
}

/// Mark a run-node unreachable after a routing decision: `pending -> skipped`.
pub async fn skip_run_node(pool: &PgPool, run_node_id: i64) -> Result<(), TransitionError> {
    RunNodeStateMachine::transition(
        pool,
        run_node_id,
        RunNodeStatus::Pending,
        RunNodeStatus::Skipped,
    )
    .await
}

/// Cancel a run-node from `pending` or `running`.
pub async fn cancel_run_node(
    pool: &PgPool,
    run_node_id: i64,
    from: RunNodeStatus,
) -> Result<(), TransitionError> {
    RunNodeStateMachine::transition(pool, run_node_id, from, RunNodeStatus::Cancelled).await
}

/// Schedule the next attempt of a failed run-node.
#[allow(clippy::too_many_arguments)]
pub async fn retry_run_node(
    pool: &PgPool,
    failed_run_node_id: i64,
    run_id: i64,
    tree_node_id: Option<Uuid>,
    node_key: &str,
    next_attempt: i32,
    max_retries: i32,
    to: RunNodeStatus,
    spawner_node_id: Option<i64>,
    join_node_id: Option<i64>,
    lineage_depth: i32,
    sequence_path: Option<&str>,
) -> Result<RunNode, TransitionError> {
    RunNodeStateMachine::retry(
        pool,
        failed_run_node_id,
        run_id,
        tree_node_id,
        node_key,
        next_attempt,
        max_retries,
        to,
        spawner_node_id,
        join_node_id,
        lineage_depth,
        sequence_path,
    )
    .await
}

/// Start a run: transition `pending -> running`.
pub async fn start_run(pool: &PgPool, run_id: i64) -> Result<(), TransitionError> {
    RunStateMachine::transition(pool, run_id, RunStatus::Pending, RunStatus::Running, None).await
}

/// Resolve a run to `completed` once no runnable node remains.
pub async fn complete_run(pool: &PgPool, run_id: i64) -> Result<(), TransitionError> {
    RunStateMachine::transition(pool, run_id, RunStatus::Running, RunStatus::Completed, None).await
}

/// Resolve a run to `failed` with a recorded reason.
pub async fn fail_run(pool: &PgPool, run_id: i64, reason: &str) -> Result<(), TransitionError> {
    RunStateMachine::transition(pool, run_id, RunStatus::Running, RunStatus::Failed, Some(reason))
        .await
}

/// Pause a running run.
pub async fn pause_run(pool: &PgPool, run_id: i64) -> Result<(), TransitionError> {
    RunStateMachine::transition(pool, run_id, RunStatus::Running, RunStatus::Paused, None).await
}

/// Resume a paused run.
pub async fn resume_run(pool: &PgPool, run_id: i64) -> Result<(), TransitionError> {
    RunStateMachine::transition(pool, run_id, RunStatus::Paused, RunStatus::Running, None).await
}

/// Cancel a run from any non-terminal status.
pub async fn cancel_run(
    pool: &PgPool,
    run_id: i64,
    from: RunStatus,
) -> Result<(), TransitionError> {
    RunStateMachine::transition(pool, run_id, from, RunStatus::Cancelled, None).await
}

/// Retry a failed run: transition `failed -> running`.
pub async fn retry_run(pool: &PgPool, run_id: i64) -> Result<(), TransitionError> {
    RunStateMachine::transition(pool, run_id, RunStatus::Failed, RunStatus::Running, None).await
}
