//! Tree service layer.
//!
//! Orchestrates publishing a tree from a parsed TOML definition and
//! materializing a run from a published tree, inserting all rows for either
//! operation inside a single database transaction.

use std::collections::HashMap;

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use trellis_db::models::{
    EdgeKind, NodeRole, NodeType, RouteOn, RunNodeStatus, RunStatus, TreeStatus, WorkflowRun,
    WorkflowTree,
};

use crate::errors::PlannerError;

use super::toml_format::TreeToml;

/// Publish a tree and all its nodes, edges, and guards from a parsed and
/// validated [`TreeToml`].
///
/// Inserts the tree row, all node rows, guard rows, and edge rows inside a
/// single transaction. Node and guard keys are resolved to UUIDs as they are
/// inserted so edges (which reference both by key) can be linked in the same
/// pass.
pub async fn publish_tree(pool: &PgPool, tree_toml: &TreeToml) -> Result<WorkflowTree> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let status = if tree_toml.tree.status == "published" {
        TreeStatus::Published
    } else {
        TreeStatus::Draft
    };

    let tree = sqlx::query_as::<_, WorkflowTree>(
        "INSERT INTO workflow_trees (tree_key, version, name, status) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(&tree_toml.tree.tree_key)
    .bind(tree_toml.tree.version)
    .bind(&tree_toml.tree.name)
    .bind(status)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert workflow tree")?;

    let mut guard_key_to_id: HashMap<&str, Uuid> = HashMap::new();
    for guard in &tree_toml.guards {
        let expression = serde_json::to_value(&guard.expression)
            .with_context(|| format!("failed to encode guard {:?} expression", guard.key))?;
        let row: (Uuid,) = sqlx::query_as(
            "INSERT INTO guard_definitions (guard_key, version, expression) \
             VALUES ($1, $2, $3) \
             RETURNING id",
        )
        .bind(&guard.key)
        .bind(guard.version)
        .bind(expression)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to insert guard {:?}", guard.key))?;
        guard_key_to_id.insert(guard.key.as_str(), row.0);
    }

    let mut node_key_to_id: HashMap<&str, Uuid> = HashMap::new();
    for (index, node) in tree_toml.nodes.iter().enumerate() {
        let node_type: NodeType = node
            .node_type
            .parse()
            .with_context(|| format!("invalid node_type on node {:?}", node.key))?;
        let node_role: NodeRole = node
            .role
            .parse()
            .with_context(|| format!("invalid role on node {:?}", node.key))?;
        let error_handler_config = node
            .error_handler
            .as_ref()
            .map(serde_json::to_value)
            .transpose()
            .with_context(|| format!("failed to encode error_handler on node {:?}", node.key))?;

        let row: (Uuid,) = sqlx::query_as(
            "INSERT INTO tree_nodes \
             (tree_id, node_key, sequence_index, node_type, node_role, provider, model, \
              prompt_template_id, max_retries, max_children, error_handler_config) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             RETURNING id",
        )
        .bind(tree.id)
        .bind(&node.key)
        .bind(index as i32)
        .bind(node_type)
        .bind(node_role)
        .bind(&node.provider)
        .bind(&node.model)
        .bind(&node.prompt_template_id)
        .bind(node.max_retries)
        .bind(node.max_children)
        .bind(error_handler_config)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to insert tree node {:?}", node.key))?;

        node_key_to_id.insert(node.key.as_str(), row.0);
    }

    for edge in &tree_toml.edges {
        let source_id = node_key_to_id[edge.source.as_str()];
        let target_id = node_key_to_id[edge.target.as_str()];
        let route_on: RouteOn = edge.route_on.parse().with_context(|| {
            format!(
                "invalid route_on on edge {:?} -> {:?}",
                edge.source, edge.target
            )
        })?;
        let guard_id = edge.guard.as_deref().map(|key| guard_key_to_id[key]);

        sqlx::query(
            "INSERT INTO tree_edges \
             (tree_id, source_node_id, target_node_id, route_on, priority, auto, guard_definition_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(tree.id)
        .bind(source_id)
        .bind(target_id)
        .bind(route_on)
        .bind(edge.priority)
        .bind(edge.auto)
        .bind(guard_id)
        .execute(&mut *tx)
        .await
        .with_context(|| {
            format!(
                "failed to insert tree edge {:?} -> {:?}",
                edge.source, edge.target
            )
        })?;
    }

    tx.commit().await.context("failed to commit transaction")?;

    Ok(tree)
}

/// Resolve `(tree_key, version)` to the tree to run. When `version` is
/// `None`, there must be exactly one published version of the key.
pub async fn load_tree_for_run(
    pool: &PgPool,
    tree_key: &str,
    version: Option<i32>,
) -> Result<WorkflowTree, PlannerError> {
    match version {
        Some(v) => trellis_db::queries::trees::get_tree_by_key_version(pool, tree_key, v)
            .await
            .map_err(|_| PlannerError::WorkflowTreeVersionNotFound {
                tree_key: tree_key.to_owned(),
                version: v,
            })?
            .ok_or_else(|| PlannerError::WorkflowTreeVersionNotFound {
                tree_key: tree_key.to_owned(),
                version: v,
            }),
        None => {
            let mut published =
                trellis_db::queries::trees::list_published_versions(pool, tree_key)
                    .await
                    .map_err(|_| PlannerError::WorkflowTreeNotFound {
                        tree_key: tree_key.to_owned(),
                    })?;
            match published.len() {
                0 => Err(PlannerError::WorkflowTreeNotFound {
                    tree_key: tree_key.to_owned(),
                }),
                1 => Ok(published.remove(0)),
                count => Err(PlannerError::AmbiguousWorkflowTreeVersion {
                    tree_key: tree_key.to_owned(),
                    count,
                }),
            }
        }
    }
}

/// The result of materializing a run from a tree: the run row plus the
/// node keys with no incoming tree edges, ready to execute immediately.
pub struct MaterializedRun {
    pub run: WorkflowRun,
    pub initial_runnable_node_keys: Vec<String>,
}

/// Materialize a run from a published tree: one `pending` run-node per tree
/// node and one `run_node_edge` per tree edge, all in a single transaction.
pub async fn materialize_run(
    pool: &PgPool,
    tree: &WorkflowTree,
    max_steps: i32,
) -> Result<MaterializedRun> {
    let mut tx = pool.begin().await.context("failed to begin transaction")?;

    let nodes = trellis_db::queries::trees::list_tree_nodes(pool, tree.id)
        .await
        .context("failed to list tree nodes")?;
    let edges = trellis_db::queries::trees::list_tree_edges(pool, tree.id)
        .await
        .context("failed to list tree edges")?;

    let run = sqlx::query_as::<_, WorkflowRun>(
        "INSERT INTO workflow_runs (tree_id, status, max_steps) VALUES ($1, $2, $3) RETURNING *",
    )
    .bind(tree.id)
    .bind(RunStatus::Pending)
    .bind(max_steps)
    .fetch_one(&mut *tx)
    .await
    .context("failed to insert workflow run")?;

    let mut has_incoming: HashMap<Uuid, bool> = nodes.iter().map(|n| (n.id, false)).collect();
    for edge in &edges {
        has_incoming.insert(edge.target_node_id, true);
    }

    // Only nodes with no incoming tree edge are reachable at materialization
    // time; everything downstream of them starts `skipped` and is promoted
    // to `pending` when routing reactivates it (see `routing::selector`).
    let mut tree_node_to_run_node: HashMap<Uuid, i64> = HashMap::new();
    for node in &nodes {
        let initial_status = if has_incoming.get(&node.id).copied().unwrap_or(false) {
            RunNodeStatus::Skipped
        } else {
            RunNodeStatus::Pending
        };

        let row: (i64,) = sqlx::query_as(
            "INSERT INTO run_nodes (run_id, tree_node_id, node_key, attempt, status) \
             VALUES ($1, $2, $3, 1, $4) RETURNING id",
        )
        .bind(run.id)
        .bind(node.id)
        .bind(&node.node_key)
        .bind(initial_status)
        .fetch_one(&mut *tx)
        .await
        .with_context(|| format!("failed to materialize run node {:?}", node.node_key))?;

        tree_node_to_run_node.insert(node.id, row.0);
    }

    for edge in &edges {
        let source_run_node_id = tree_node_to_run_node[&edge.source_node_id];
        let target_run_node_id = tree_node_to_run_node[&edge.target_node_id];

        sqlx::query(
            "INSERT INTO run_node_edges \
             (run_id, source_run_node_id, target_run_node_id, route_on, priority, auto, guard_definition_id, edge_kind) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(run.id)
        .bind(source_run_node_id)
        .bind(target_run_node_id)
        .bind(edge.route_on)
        .bind(edge.priority)
        .bind(edge.auto)
        .bind(edge.guard_definition_id)
        .bind(EdgeKind::Tree)
        .execute(&mut *tx)
        .await
        .context("failed to materialize run node edge")?;
    }

    tx.commit().await.context("failed to commit transaction")?;

    let initial_runnable_node_keys = nodes
        .iter()
        .filter(|n| !has_incoming.get(&n.id).copied().unwrap_or(false))
        .map(|n| n.node_key.clone())
        .collect();

    Ok(MaterializedRun {
        run,
        initial_runnable_node_keys,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_parses_draft_by_default() {
        let tree_toml = TreeToml {
            tree: super::super::toml_format::TreeMeta {
                tree_key: "t".to_owned(),
                version: 1,
                name: "T".to_owned(),
                status: "draft".to_owned(),
            },
            nodes: vec![],
            edges: vec![],
            guards: vec![],
        };
        assert_eq!(tree_toml.tree.status, "draft");
    }
}
