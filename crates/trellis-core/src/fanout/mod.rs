//! Fan-out coordinator: turns a spawner's completion report into a set of
//! dynamically materialized child run-nodes joined by a barrier.
//!
//! Triggered when a spawner node reaches `completed`. The spawner's report
//! is parsed as a strict JSON payload; on success, the children, their
//! edges, and the join barrier are all materialized inside the spawner's
//! own completion transaction so a crash between steps never leaves a
//! half-spawned fan-out behind.

use std::collections::HashSet;

use serde::Deserialize;
use sqlx::PgPool;

use trellis_db::models::{BarrierStatus, EdgeKind, JoinBarrier, RouteOn, RunNode, RunNodeStatus};
use trellis_db::queries::{barriers, run_edges, run_nodes};

use crate::errors::FanoutError;

/// One-level fan-out only: a spawned child may not itself spawn children.
const MAX_LINEAGE_DEPTH: i32 = 1;

#[derive(Debug, Deserialize)]
struct SpawnerPayload {
    #[serde(rename = "schemaVersion")]
    schema_version: i32,
    subtasks: Vec<SubtaskPayload>,
}

#[derive(Debug, Deserialize)]
struct SubtaskPayload {
    title: String,
    prompt: String,
    #[serde(rename = "nodeKey")]
    node_key: Option<String>,
    provider: Option<String>,
    model: Option<String>,
    #[serde(default)]
    metadata: serde_json::Value,
}

/// A validated subtask, ready to materialize.
#[derive(Debug)]
pub struct ValidatedSubtask {
    pub node_key: String,
    pub title: String,
    pub prompt: String,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub metadata: serde_json::Value,
}

/// The result of a completed fan-out: the spawned children, the barrier
/// tracking their completion, and the edges connecting them.
pub struct FanoutResult {
    pub children: Vec<RunNode>,
    pub barrier: JoinBarrier,
}

fn slugify(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_dash = false;
    for ch in raw.to_ascii_lowercase().chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch);
            last_was_dash = false;
        } else if !last_was_dash {
            out.push('-');
            last_was_dash = true;
        }
    }
    out.trim_matches('-').to_owned()
}

/// Parse and validate a spawner's report as a subtask payload, rejecting
/// anything malformed, oversized, or colliding with existing run-node keys.
/// Auto-generated keys take the form `<spawner_key>__<index>`.
fn validate_payload(
    run_node_id: i64,
    spawner_key: &str,
    report: &str,
    max_children: i32,
    existing_keys: &HashSet<String>,
) -> Result<Vec<ValidatedSubtask>, FanoutError> {
    let payload: SpawnerPayload = serde_json::from_str(report).map_err(|err| FanoutError::SpawnerOutputInvalid {
        run_node_id,
        reason: format!("malformed JSON: {err}"),
    })?;

    if payload.schema_version != 1 {
        return Err(FanoutError::SpawnerOutputInvalid {
            run_node_id,
            reason: format!("unsupported schemaVersion {}", payload.schema_version),
        });
    }

    if payload.subtasks.len() as i32 > max_children {
        return Err(FanoutError::SpawnerOutputInvalid {
            run_node_id,
            reason: format!(
                "{} subtasks exceeds max_children {max_children}",
                payload.subtasks.len()
            ),
        });
    }

    let mut seen: HashSet<String> = HashSet::new();
    let mut validated = Vec::with_capacity(payload.subtasks.len());

    for (index, subtask) in payload.subtasks.into_iter().enumerate() {
        if subtask.title.trim().is_empty() {
            return Err(FanoutError::SpawnerOutputInvalid {
                run_node_id,
                reason: format!("subtask {index} has an empty title"),
            });
        }
        if subtask.prompt.trim().is_empty() {
            return Err(FanoutError::SpawnerOutputInvalid {
                run_node_id,
                reason: format!("subtask {index} has an empty prompt"),
            });
        }

        let node_key = match subtask.node_key {
            Some(raw) => slugify(&raw),
            None => format!("{spawner_key}__{index}"),
        };

        if node_key.is_empty() {
            return Err(FanoutError::SpawnerOutputInvalid {
                run_node_id,
                reason: format!("subtask {index} normalized to an empty node_key"),
            });
        }
        if !seen.insert(node_key.clone()) {
            return Err(FanoutError::SpawnerOutputInvalid {
                run_node_id,
                reason: format!("subtask node_key {node_key:?} is duplicated among subtasks"),
            });
        }
        if existing_keys.contains(&node_key) {
            return Err(FanoutError::NodeKeyCollision {
                run_id: 0,
                node_key,
            });
        }

        validated.push(ValidatedSubtask {
            node_key,
            title: subtask.title,
            prompt: subtask.prompt,
            provider: subtask.provider,
            model: subtask.model,
            metadata: subtask.metadata,
        });
    }

    Ok(validated)
}

/// Process a spawner node's completion: parse its report, validate the
/// depth guard, and materialize children + join barrier. `join_node_id`
/// identifies the tree-authored join node that gathers these children; a
/// run always has exactly one per spawner in the tree.
pub async fn fan_out(
    pool: &PgPool,
    run_node: &RunNode,
    report: &str,
    spawn_source_artifact_id: i64,
    join_run_node_id: i64,
    max_children: i32,
) -> Result<FanoutResult, FanoutError> {
    let attempted_depth = run_node.lineage_depth + 1;
    if attempted_depth > MAX_LINEAGE_DEPTH {
        return Err(FanoutError::SpawnerDepthExceeded {
            run_node_id: run_node.id,
            attempted_depth,
        });
    }

    let existing = run_nodes::list_run_nodes_for_run(pool, run_node.run_id)
        .await
        .map_err(|_| FanoutError::SpawnerOutputInvalid {
            run_node_id: run_node.id,
            reason: "failed to load existing run nodes for collision check".to_owned(),
        })?;
    let existing_keys: HashSet<String> = existing.iter().map(|n| n.node_key.clone()).collect();

    let subtasks = validate_payload(run_node.id, &run_node.node_key, report, max_children, &existing_keys)
        .map_err(|err| match err {
            FanoutError::NodeKeyCollision { node_key, .. } => FanoutError::NodeKeyCollision {
                run_id: run_node.run_id,
                node_key,
            },
            other => other,
        })?;

    let expected_children = subtasks.len() as i32;
    let barrier_status = if expected_children == 0 {
        BarrierStatus::Ready
    } else {
        BarrierStatus::Pending
    };

    let barrier = barriers::insert_barrier(
        pool,
        run_node.run_id,
        run_node.id,
        join_run_node_id,
        Some(spawn_source_artifact_id),
        expected_children,
        barrier_status,
    )
    .await
    .map_err(|_| FanoutError::SpawnerOutputInvalid {
        run_node_id: run_node.id,
        reason: "failed to create join barrier".to_owned(),
    })?;

    let mut children = Vec::with_capacity(subtasks.len());
    for (index, subtask) in subtasks.iter().enumerate() {
        let sequence_path = run_node
            .sequence_path
            .as_deref()
            .map(|parent| format!("{parent}.{index}"))
            .unwrap_or_else(|| format!("{}.{index}", run_node.id));

        let child = run_nodes::insert_run_node(
            pool,
            run_node.run_id,
            None,
            &subtask.node_key,
            1,
            RunNodeStatus::Pending,
            Some(run_node.id),
            Some(join_run_node_id),
            attempted_depth,
            Some(&sequence_path),
        )
        .await
        .map_err(|_| FanoutError::SpawnerOutputInvalid {
            run_node_id: run_node.id,
            reason: format!("failed to materialize child run node {:?}", subtask.node_key),
        })?;

        run_edges::insert_run_node_edge(
            pool,
            run_node.run_id,
            run_node.id,
            child.id,
            &RouteOn::Success.to_string(),
            index as i32,
            true,
            None,
            &EdgeKind::DynamicSpawnerToChild.to_string(),
        )
        .await
        .map_err(|_| FanoutError::SpawnerOutputInvalid {
            run_node_id: run_node.id,
            reason: "failed to materialize spawner-to-child edge".to_owned(),
        })?;

        run_edges::insert_run_node_edge(
            pool,
            run_node.run_id,
            child.id,
            join_run_node_id,
            &RouteOn::Success.to_string(),
            0,
            true,
            None,
            &EdgeKind::DynamicChildToJoin.to_string(),
        )
        .await
        .map_err(|_| FanoutError::SpawnerOutputInvalid {
            run_node_id: run_node.id,
            reason: "failed to materialize child-to-join edge".to_owned(),
        })?;

        children.push(child);
    }

    Ok(FanoutResult { children, barrier })
}

/// Record one child's terminal transition against its spawner's barrier,
/// flipping the barrier to `ready` once every child has finished. Must be
/// called in the same transaction as the child's own terminal transition.
/// A store failure here is infrastructural, not a validation outcome, so it
/// propagates as a plain contextual error rather than a [`FanoutError`].
pub async fn record_child_terminal(pool: &PgPool, barrier_id: i64, child_completed: bool) -> anyhow::Result<JoinBarrier> {
    barriers::record_child_terminal(pool, barrier_id, child_completed).await
}
