//! Query helpers for run progress tracking, layered on top of the lower-level
//! DB queries from [`trellis_db::queries::run_nodes`].

use anyhow::Result;
use sqlx::PgPool;

use trellis_db::models::RunNode;

/// All run-nodes currently runnable: latest attempt per tree node, status
/// `pending`, ordered for the executor's deterministic tie-break.
pub async fn get_runnable_nodes(pool: &PgPool, run_id: i64) -> Result<Vec<RunNode>> {
    trellis_db::queries::run_nodes::list_pending_latest_attempts(pool, run_id).await
}

/// Whether every run-node (latest attempt per tree node) in the run has
/// reached a terminal status.
pub async fn is_run_drained(pool: &PgPool, run_id: i64) -> Result<bool> {
    let nodes = trellis_db::queries::run_nodes::list_run_nodes_for_run(pool, run_id).await?;
    Ok(nodes.iter().all(|n| n.status.is_terminal()))
}

/// Whether any latest-attempt run-node in the run has status `failed`.
pub async fn has_failed_node(pool: &PgPool, run_id: i64) -> Result<bool> {
    let nodes = trellis_db::queries::run_nodes::list_run_nodes_for_run(pool, run_id).await?;
    Ok(nodes
        .iter()
        .any(|n| n.status == trellis_db::models::RunNodeStatus::Failed))
}
