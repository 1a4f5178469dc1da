//! Operator control actions: `cancel`/`pause`/`resume`/`retry`.
//!
//! Thin wrapper over [`crate::state::dispatch`] that resolves the run's
//! current status first so the CLI and the dashboard HTTP surface share one
//! place that turns "invalid for current status" into a [`ControlError`]
//! instead of the lower-level transition error.

use sqlx::PgPool;
use trellis_db::models::RunStatus;

use crate::errors::ControlError;
use crate::state::dispatch;

async fn load_status(pool: &PgPool, run_id: i64) -> Result<RunStatus, ControlError> {
    trellis_db::queries::runs::get_run(pool, run_id)
        .await
        .map_err(|_| ControlError::RunNotFound(run_id))?
        .map(|run| run.status)
        .ok_or(ControlError::RunNotFound(run_id))
}

pub async fn cancel_run(pool: &PgPool, run_id: i64) -> Result<(), ControlError> {
    let status = load_status(pool, run_id).await?;
    if status.is_terminal() {
        return Err(ControlError::InvalidForStatus {
            action: "cancel",
            run_id,
            status: status.to_string(),
        });
    }
    dispatch::cancel_run(pool, run_id, status)
        .await
        .map_err(|_| ControlError::InvalidForStatus {
            action: "cancel",
            run_id,
            status: status.to_string(),
        })?;

    // Mirror the executor's own cooperative-cancellation path: an operator
    // cancel should leave the same open-barrier cleanup behind as a
    // self-initiated one, regardless of which side notices the cancellation
    // first.
    let _ = trellis_db::queries::barriers::cancel_open_barriers_for_run(pool, run_id).await;

    Ok(())
}

pub async fn pause_run(pool: &PgPool, run_id: i64) -> Result<(), ControlError> {
    let status = load_status(pool, run_id).await?;
    dispatch::pause_run(pool, run_id)
        .await
        .map_err(|_| ControlError::InvalidForStatus { action: "pause", run_id, status: status.to_string() })
}

pub async fn resume_run(pool: &PgPool, run_id: i64) -> Result<(), ControlError> {
    let status = load_status(pool, run_id).await?;
    dispatch::resume_run(pool, run_id)
        .await
        .map_err(|_| ControlError::InvalidForStatus { action: "resume", run_id, status: status.to_string() })
}

pub async fn retry_run(pool: &PgPool, run_id: i64) -> Result<(), ControlError> {
    let status = load_status(pool, run_id).await?;
    dispatch::retry_run(pool, run_id)
        .await
        .map_err(|_| ControlError::InvalidForStatus { action: "retry", run_id, status: status.to_string() })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn control_error_display_names_action_and_status() {
        let err = ControlError::InvalidForStatus { action: "resume", run_id: 7, status: "running".to_owned() };
        assert!(err.to_string().contains("resume"));
        assert!(err.to_string().contains("running"));
    }
}
