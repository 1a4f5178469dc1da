//! Bounded context assembly: select upstream artifacts, retry/failure-route
//! summaries, and join rollups for a node about to execute, and pack them
//! into a total character budget.

use anyhow::Result;
use chrono::Utc;
use sqlx::PgPool;

use trellis_db::models::{BarrierStatus, NodeRole, RunNode, RunNodeStatus};
use trellis_db::queries::{artifacts, barriers, run_edges, run_nodes, trees};

use super::envelope::{
    JoinChildRow, render_failure_route_context, render_join_subtasks, render_retry_failure_summary,
    render_upstream_artifact,
};

pub const MAX_UPSTREAM_ARTIFACTS: usize = 4;
pub const MAX_CONTEXT_CHARS_TOTAL: usize = 32_000;
pub const MAX_CHARS_PER_ARTIFACT: usize = 12_000;
pub const RETRY_SUMMARY_RESERVATION: usize = 4_000;
pub const FAILURE_ROUTE_RESERVATION: usize = 6_000;
pub const JOIN_SUMMARY_RESERVATION: usize = 8_000;
const MIN_REMAINING_TO_INCLUDE: usize = 1_000;

/// The assembled context ready to append to a node's prompt, plus the
/// manifest recorded onto the downstream attempt's outcome artifact.
pub struct AssembledContext {
    pub blocks: Vec<String>,
    pub manifest: serde_json::Value,
}

struct Candidate {
    run_node_id: i64,
    node_key: String,
    sequence_index: i32,
    artifact: trellis_db::models::PhaseArtifact,
}

/// Assemble the full context for `run_node`'s next attempt: upstream
/// artifacts always, plus a retry summary, failure-route context, or join
/// rollup depending on how the node was activated.
pub async fn assemble_context(pool: &PgPool, run_node: &RunNode) -> Result<AssembledContext> {
    let mut blocks = Vec::new();
    let mut remaining = MAX_CONTEXT_CHARS_TOTAL;

    let retry_block = if run_node.attempt > 1 {
        render_retry_summary(pool, run_node).await?
    } else {
        None
    };
    if retry_block.is_some() {
        remaining = remaining.saturating_sub(RETRY_SUMMARY_RESERVATION);
    }

    let failure_route_block = render_failure_route(pool, run_node).await?;
    if failure_route_block.is_some() {
        remaining = remaining.saturating_sub(FAILURE_ROUTE_RESERVATION);
    }

    let join_block = render_join(pool, run_node).await?;
    if join_block.is_some() {
        remaining = remaining.saturating_sub(JOIN_SUMMARY_RESERVATION);
    }

    let candidates = select_upstream_candidates(pool, run_node).await?;

    let mut included_ids = Vec::new();
    let mut missing_upstream = Vec::new();
    let mut truncation_stats = Vec::new();

    for candidate in candidates {
        if remaining < MIN_REMAINING_TO_INCLUDE {
            missing_upstream.push(candidate.run_node_id);
            continue;
        }
        let cap = remaining.min(MAX_CHARS_PER_ARTIFACT);
        let (rendered, truncation) = render_upstream_artifact(
            run_node.run_id,
            &run_node.node_key,
            &candidate.node_key,
            candidate.run_node_id,
            candidate.artifact.attempt,
            candidate.artifact.id,
            &candidate.artifact.artifact_type.to_string(),
            &candidate.artifact.content_type.to_string(),
            candidate.artifact.created_at,
            &candidate.artifact.content,
            cap,
        );
        remaining = remaining.saturating_sub(rendered.chars().count().min(remaining));
        included_ids.push(candidate.artifact.id);
        if let Some(t) = truncation {
            truncation_stats.push(serde_json::json!({
                "artifact_id": candidate.artifact.id,
                "omitted_chars": t.omitted_chars,
            }));
        }
        blocks.push(rendered);
    }

    if let Some(b) = retry_block {
        blocks.push(b);
    }
    if let Some(b) = failure_route_block {
        blocks.push(b);
    }
    if let Some(b) = join_block {
        blocks.push(b);
    }

    let manifest = serde_json::json!({
        "context_policy_version": super::envelope::POLICY_VERSION,
        "included_artifact_ids": included_ids,
        "upstream_artifact_count": blocks.len(),
        "missing_upstream_run_node_ids": missing_upstream,
        "truncation_stats": truncation_stats,
        "assembled_at": Utc::now().to_rfc3339(),
    });

    Ok(AssembledContext { blocks, manifest })
}

/// Direct predecessors reachable by a `success` edge into this node, with a
/// completed latest report artifact, ordered by graph distance (always 1
/// for direct predecessors), then source sequence_index, then node_key,
/// then run_node_id -- and capped at [`MAX_UPSTREAM_ARTIFACTS`].
async fn select_upstream_candidates(pool: &PgPool, run_node: &RunNode) -> Result<Vec<Candidate>> {
    let incoming = run_edges::list_incoming_edges(pool, run_node.id).await?;

    let mut candidates = Vec::new();
    for edge in incoming {
        let source = run_nodes::get_run_node(pool, edge.source_run_node_id).await?;
        let Some(source) = source else { continue };
        if source.status != RunNodeStatus::Completed {
            continue;
        }
        let Some(artifact) = artifacts::latest_report_for_run_node(pool, source.id).await? else {
            continue;
        };
        let tree_node = match source.tree_node_id {
            Some(id) => trees::get_tree_node(pool, id).await?,
            None => None,
        };
        let sequence_index = tree_node.map(|n| n.sequence_index).unwrap_or(i32::MAX);
        candidates.push(Candidate {
            run_node_id: source.id,
            node_key: source.node_key.clone(),
            sequence_index,
            artifact,
        });
    }

    candidates.sort_by(|a, b| {
        a.sequence_index
            .cmp(&b.sequence_index)
            .then_with(|| a.node_key.cmp(&b.node_key))
            .then_with(|| a.run_node_id.cmp(&b.run_node_id))
    });
    candidates.truncate(MAX_UPSTREAM_ARTIFACTS);

    Ok(candidates)
}

/// If this is a retry (attempt > 1), look up the error handler's summary of
/// the previous attempt's failure and render it.
async fn render_retry_summary(pool: &PgPool, run_node: &RunNode) -> Result<Option<String>> {
    let previous_attempt = run_node.attempt - 1;
    let prev = run_nodes::get_latest_attempt_by_node_key(pool, run_node.run_id, &run_node.node_key)
        .await?
        .filter(|n| n.attempt == previous_attempt);
    let Some(prev) = prev else { return Ok(None) };

    let summary = artifacts::find_note_by_kind_and_source_attempt(
        pool,
        prev.id,
        "error_handler_summary_v1",
        previous_attempt,
    )
    .await?;
    let Some(summary) = summary else { return Ok(None) };

    Ok(Some(render_retry_failure_summary(
        run_node.run_id,
        &run_node.node_key,
        previous_attempt,
        &summary.content,
        RETRY_SUMMARY_RESERVATION,
    )))
}

/// If this node was reactivated via a `route_on = failure` edge, render the
/// upstream failure's context.
async fn render_failure_route(pool: &PgPool, run_node: &RunNode) -> Result<Option<String>> {
    let incoming = run_edges::list_incoming_edges(pool, run_node.id).await?;
    let Some(edge) = incoming.iter().find(|e| e.route_on == trellis_db::models::RouteOn::Failure)
    else {
        return Ok(None);
    };

    let source = run_nodes::get_run_node(pool, edge.source_run_node_id).await?;
    let Some(source) = source else { return Ok(None) };
    if source.status != RunNodeStatus::Failed {
        return Ok(None);
    }

    let log = artifacts::list_artifacts_for_run_node(pool, source.id)
        .await?
        .into_iter()
        .filter(|a| a.artifact_type == trellis_db::models::ArtifactType::Log && a.attempt == source.attempt)
        .next_back();
    let error_message = log.map(|a| a.content).unwrap_or_else(|| "(no error detail recorded)".to_owned());

    Ok(Some(render_failure_route_context(
        run_node.run_id,
        &source.node_key,
        source.attempt,
        &error_message,
        FAILURE_ROUTE_RESERVATION,
    )))
}

/// If this node is a join and its barrier is ready, render a rollup of its
/// spawned children.
async fn render_join(pool: &PgPool, run_node: &RunNode) -> Result<Option<String>> {
    let Some(tree_node_id) = run_node.tree_node_id else { return Ok(None) };
    let tree_node = trees::get_tree_node(pool, tree_node_id).await?;
    let Some(tree_node) = tree_node else { return Ok(None) };
    if tree_node.node_role != NodeRole::Join {
        return Ok(None);
    }

    let barrier = barriers::get_barrier_for_join(pool, run_node.id).await?;
    let Some(barrier) = barrier else { return Ok(None) };
    if barrier.status != BarrierStatus::Ready && barrier.status != BarrierStatus::Released {
        return Ok(None);
    }

    let children = run_edges::list_incoming_edges(pool, run_node.id).await?;
    let mut rows = Vec::new();
    for edge in &children {
        let Some(child) = run_nodes::get_run_node(pool, edge.source_run_node_id).await? else {
            continue;
        };
        let report = artifacts::latest_report_for_run_node(pool, child.id).await?;
        rows.push((child, report));
    }

    rows.sort_by(|a, b| {
        let a_failed = a.0.status == RunNodeStatus::Failed;
        let b_failed = b.0.status == RunNodeStatus::Failed;
        b_failed.cmp(&a_failed).then_with(|| b.0.completed_at.cmp(&a.0.completed_at))
    });

    let total = rows.len();
    let completed = rows.iter().filter(|(n, _)| n.status == RunNodeStatus::Completed).count();
    let failed = rows.iter().filter(|(n, _)| n.status == RunNodeStatus::Failed).count();

    let render_rows: Vec<JoinChildRow> = rows
        .into_iter()
        .map(|(n, report)| JoinChildRow {
            node_key: n.node_key.clone(),
            status: n.status.to_string(),
            title: n.node_key.clone(),
            report: report.map(|a| a.content),
        })
        .collect();

    let max_chars_per_report = JOIN_SUMMARY_RESERVATION / render_rows.len().max(1);
    Ok(Some(render_join_subtasks(
        run_node.run_id,
        &tree_node.node_key,
        total,
        completed,
        failed,
        &render_rows,
        max_chars_per_report,
    )))
}
