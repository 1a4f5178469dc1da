//! Database query functions for `run_node_stream_events`.

use anyhow::{Context, Result};
use sqlx::PgPool;

use crate::models::RunNodeStreamEvent;

/// Allocate the next strictly-increasing sequence number for an attempt and
/// insert the event in one round trip. Must be called against a connection
/// already holding the attempt's row lock (or inside the scheduler-step
/// transaction) so concurrent events cannot allocate the same sequence.
#[allow(clippy::too_many_arguments)]
pub async fn insert_next_event(
    pool: &PgPool,
    run_id: i64,
    run_node_id: i64,
    attempt: i32,
    event_type: &str,
    content_preview: Option<&str>,
    tokens_delta: Option<i32>,
    tokens_cumulative: Option<i32>,
) -> Result<RunNodeStreamEvent> {
    sqlx::query_as::<_, RunNodeStreamEvent>(
        "INSERT INTO run_node_stream_events \
         (run_id, run_node_id, attempt, sequence, event_type, content_preview, \
          tokens_delta, tokens_cumulative) \
         VALUES ( \
             $1, $2, $3, \
             COALESCE((SELECT MAX(sequence) FROM run_node_stream_events \
                       WHERE run_node_id = $2 AND attempt = $3), 0) + 1, \
             $4, $5, $6, $7 \
         ) \
         RETURNING *",
    )
    .bind(run_id)
    .bind(run_node_id)
    .bind(attempt)
    .bind(event_type)
    .bind(content_preview)
    .bind(tokens_delta)
    .bind(tokens_cumulative)
    .fetch_one(pool)
    .await
    .context("failed to insert stream event")
}

pub async fn list_events_for_attempt(
    pool: &PgPool,
    run_node_id: i64,
    attempt: i32,
) -> Result<Vec<RunNodeStreamEvent>> {
    sqlx::query_as::<_, RunNodeStreamEvent>(
        "SELECT * FROM run_node_stream_events WHERE run_node_id = $1 AND attempt = $2 \
         ORDER BY sequence ASC",
    )
    .bind(run_node_id)
    .bind(attempt)
    .fetch_all(pool)
    .await
    .context("failed to list stream events for attempt")
}
