//! Run and run-node state machine transitions.
//!
//! Validates and executes state transitions, enforcing the allowed
//! transition graph, optimistic locking, and timestamp management. The
//! actual transition legality and timestamp invariants are *also* enforced
//! by triggers in the store (so a bypassing writer still can't corrupt the
//! graph), but this layer is what the engine calls through and is the place
//! that turns a stale-row update into a typed error instead of a silent
//! no-op.

pub mod dispatch;
pub mod queries;

use chrono::Utc;
use sqlx::PgPool;

use trellis_db::models::{RunNodeStatus, RunStatus};
use trellis_db::queries::{run_nodes as run_node_db, runs as run_db};

use crate::errors::TransitionError;

/// The run-level state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// pending -> running, cancelled
/// running -> completed, failed, cancelled, paused
/// paused  -> running, cancelled
/// failed  -> running   (operator retry only)
/// completed, cancelled: terminal
/// ```
pub struct RunStateMachine;

impl RunStateMachine {
    pub fn is_valid_transition(from: RunStatus, to: RunStatus) -> bool {
        use RunStatus::*;
        matches!(
            (from, to),
            (Pending, Running)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Running, Paused)
                | (Paused, Running)
                | (Paused, Cancelled)
                | (Failed, Running)
        )
    }

    /// Execute a run-status transition with optimistic locking.
    ///
    /// Sets `started_at` on the first `pending -> running` transition and
    /// `completed_at` on entry into any terminal status.
    pub async fn transition(
        pool: &PgPool,
        run_id: i64,
        from: RunStatus,
        to: RunStatus,
        failure_reason: Option<&str>,
    ) -> Result<(), TransitionError> {
        if !Self::is_valid_transition(from, to) {
            return Err(TransitionError::IllegalRunTransition {
                run_id,
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        let started_at = (from == RunStatus::Pending && to == RunStatus::Running)
            .then(Utc::now);
        let completed_at = to.is_terminal().then(Utc::now);

        let rows = run_db::transition_run_status(
            pool,
            run_id,
            from,
            to,
            started_at,
            completed_at,
            failure_reason,
        )
        .await
        .map_err(|_| TransitionError::RunNotFound(run_id))?;

        if rows == 0 {
            let run = run_db::get_run(pool, run_id)
                .await
                .ok()
                .flatten();
            return Err(match run {
                None => TransitionError::RunNotFound(run_id),
                Some(r) => TransitionError::RunStaleStatus {
                    run_id,
                    actual: r.status.to_string(),
                    expected: from.to_string(),
                },
            });
        }

        Ok(())
    }
}

/// The run-node (attempt) state machine.
///
/// Enforces the valid transition graph:
///
/// ```text
/// pending   -> running, skipped, cancelled
/// running   -> completed, failed, cancelled
/// completed -> pending   (operator retry)
/// failed    -> running, pending   (retry scheduling)
/// skipped   -> pending   (reactivation)
/// cancelled: terminal
/// ```
pub struct RunNodeStateMachine;

impl RunNodeStateMachine {
    pub fn is_valid_transition(from: RunNodeStatus, to: RunNodeStatus) -> bool {
        use RunNodeStatus::*;
        matches!(
            (from, to),
            (Pending, Running)
                | (Pending, Skipped)
                | (Pending, Cancelled)
                | (Running, Completed)
                | (Running, Failed)
                | (Running, Cancelled)
                | (Completed, Pending)
                | (Failed, Running)
                | (Failed, Pending)
                | (Skipped, Pending)
        )
    }

    /// Execute a run-node transition with optimistic locking.
    ///
    /// Sets `started_at` on entry into `running` and `completed_at` on
    /// entry into any terminal status. Reactivations (`completed|skipped ->
    /// pending`) clear both timestamps via [`reactivate`] rather than this
    /// path.
    pub async fn transition(
        pool: &PgPool,
        run_node_id: i64,
        from: RunNodeStatus,
        to: RunNodeStatus,
    ) -> Result<(), TransitionError> {
        if !Self::is_valid_transition(from, to) {
            return Err(TransitionError::IllegalRunNodeTransition {
                run_node_id,
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        if to == RunNodeStatus::Pending {
            return Self::reactivate(pool, run_node_id, from).await;
        }

        let started_at = (to == RunNodeStatus::Running).then(Utc::now);
        let completed_at = to.is_terminal().then(Utc::now);

        let rows = run_node_db::transition_run_node_status(
            pool,
            run_node_id,
            from,
            to,
            started_at,
            completed_at,
        )
        .await
        .map_err(|_| TransitionError::RunNodeNotFound(run_node_id))?;

        if rows == 0 {
            return Err(Self::stale_or_missing(pool, run_node_id, from).await);
        }

        Ok(())
    }

    /// Reactivate a terminal run-node back to `pending` (operator retry on a
    /// `completed` node, or automatic reactivation of a `skipped` one).
    /// Clears both timestamps.
    async fn reactivate(
        pool: &PgPool,
        run_node_id: i64,
        from: RunNodeStatus,
    ) -> Result<(), TransitionError> {
        let rows = run_node_db::reactivate_run_node(pool, run_node_id, from)
            .await
            .map_err(|_| TransitionError::RunNodeNotFound(run_node_id))?;

        if rows == 0 {
            return Err(Self::stale_or_missing(pool, run_node_id, from).await);
        }

        Ok(())
    }

    /// Schedule the next attempt of a failed run-node (`failed -> pending`
    /// or `failed -> running`, materialized as a brand-new row rather than
    /// an in-place update, since each attempt is its own immutable record).
    #[allow(clippy::too_many_arguments)]
    pub async fn retry(
        pool: &PgPool,
        failed_run_node_id: i64,
        run_id: i64,
        tree_node_id: Option<uuid::Uuid>,
        node_key: &str,
        next_attempt: i32,
        max_retries: i32,
        to: RunNodeStatus,
        spawner_node_id: Option<i64>,
        join_node_id: Option<i64>,
        lineage_depth: i32,
        sequence_path: Option<&str>,
    ) -> Result<trellis_db::models::RunNode, TransitionError> {
        if !matches!(to, RunNodeStatus::Running | RunNodeStatus::Pending) {
            return Err(TransitionError::IllegalRunNodeTransition {
                run_node_id: failed_run_node_id,
                from: RunNodeStatus::Failed.to_string(),
                to: to.to_string(),
            });
        }

        if next_attempt - 1 > max_retries {
            return Err(TransitionError::RetriesExhausted {
                run_node_id: failed_run_node_id,
                attempt: next_attempt - 1,
                max_retries,
            });
        }

        run_node_db::insert_next_attempt(
            pool,
            run_id,
            tree_node_id,
            node_key,
            next_attempt,
            to,
            spawner_node_id,
            join_node_id,
            lineage_depth,
            sequence_path,
        )
        .await
        .map_err(|_| TransitionError::RunNodeNotFound(failed_run_node_id))
    }

    async fn stale_or_missing(
        pool: &PgPool,
        run_node_id: i64,
        expected: RunNodeStatus,
    ) -> TransitionError {
        match run_node_db::get_run_node(pool, run_node_id).await {
            Ok(Some(node)) => TransitionError::RunNodeStaleStatus {
                run_node_id,
                actual: node.status.to_string(),
                expected: expected.to_string(),
            },
            _ => TransitionError::RunNodeNotFound(run_node_id),
        }
    }
}
