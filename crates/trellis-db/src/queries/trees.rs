//! Database query functions for `workflow_trees`, `tree_nodes`, `tree_edges`
//! and `guard_definitions`.

use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

use crate::models::{GuardDefinition, TreeEdge, TreeNode, TreeStatus, WorkflowTree};

pub async fn insert_tree(
    pool: &PgPool,
    tree_key: &str,
    version: i32,
    name: &str,
    status: TreeStatus,
) -> Result<WorkflowTree> {
    sqlx::query_as::<_, WorkflowTree>(
        "INSERT INTO workflow_trees (tree_key, version, name, status) \
         VALUES ($1, $2, $3, $4) \
         RETURNING *",
    )
    .bind(tree_key)
    .bind(version)
    .bind(name)
    .bind(status)
    .fetch_one(pool)
    .await
    .context("failed to insert workflow tree")
}

pub async fn get_tree(pool: &PgPool, id: Uuid) -> Result<Option<WorkflowTree>> {
    sqlx::query_as::<_, WorkflowTree>("SELECT * FROM workflow_trees WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch workflow tree")
}

/// Fetch the tree for an exact `(tree_key, version)` pair.
pub async fn get_tree_by_key_version(
    pool: &PgPool,
    tree_key: &str,
    version: i32,
) -> Result<Option<WorkflowTree>> {
    sqlx::query_as::<_, WorkflowTree>(
        "SELECT * FROM workflow_trees WHERE tree_key = $1 AND version = $2",
    )
    .bind(tree_key)
    .bind(version)
    .fetch_optional(pool)
    .await
    .context("failed to fetch workflow tree by key/version")
}

/// Fetch all published trees for a given key. The caller resolves ambiguity
/// (more than one published version is a planner-level error).
pub async fn list_published_versions(pool: &PgPool, tree_key: &str) -> Result<Vec<WorkflowTree>> {
    sqlx::query_as::<_, WorkflowTree>(
        "SELECT * FROM workflow_trees WHERE tree_key = $1 AND status = 'published' \
         ORDER BY version ASC",
    )
    .bind(tree_key)
    .fetch_all(pool)
    .await
    .context("failed to list published tree versions")
}

pub async fn insert_tree_node(
    pool: &PgPool,
    tree_id: Uuid,
    node_key: &str,
    sequence_index: i32,
    node_type: &str,
    node_role: &str,
    provider: Option<&str>,
    model: Option<&str>,
    prompt_template_id: Option<&str>,
    max_retries: i32,
    max_children: i32,
    error_handler_config: Option<serde_json::Value>,
) -> Result<TreeNode> {
    sqlx::query_as::<_, TreeNode>(
        "INSERT INTO tree_nodes \
         (tree_id, node_key, sequence_index, node_type, node_role, provider, model, \
          prompt_template_id, max_retries, max_children, error_handler_config) \
         VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
         RETURNING *",
    )
    .bind(tree_id)
    .bind(node_key)
    .bind(sequence_index)
    .bind(node_type)
    .bind(node_role)
    .bind(provider)
    .bind(model)
    .bind(prompt_template_id)
    .bind(max_retries)
    .bind(max_children)
    .bind(error_handler_config)
    .fetch_one(pool)
    .await
    .context("failed to insert tree node")
}

/// List a tree's nodes in deterministic planner order:
/// `(sequence_index, node_key, id)`.
pub async fn list_tree_nodes(pool: &PgPool, tree_id: Uuid) -> Result<Vec<TreeNode>> {
    sqlx::query_as::<_, TreeNode>(
        "SELECT * FROM tree_nodes WHERE tree_id = $1 \
         ORDER BY sequence_index ASC, node_key ASC, id ASC",
    )
    .bind(tree_id)
    .fetch_all(pool)
    .await
    .context("failed to list tree nodes")
}

pub async fn get_tree_node(pool: &PgPool, id: Uuid) -> Result<Option<TreeNode>> {
    sqlx::query_as::<_, TreeNode>("SELECT * FROM tree_nodes WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch tree node")
}

#[allow(clippy::too_many_arguments)]
pub async fn insert_tree_edge(
    pool: &PgPool,
    tree_id: Uuid,
    source_node_id: Uuid,
    target_node_id: Uuid,
    route_on: &str,
    priority: i32,
    auto: bool,
    guard_definition_id: Option<Uuid>,
) -> Result<TreeEdge> {
    sqlx::query_as::<_, TreeEdge>(
        "INSERT INTO tree_edges \
         (tree_id, source_node_id, target_node_id, route_on, priority, auto, guard_definition_id) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         RETURNING *",
    )
    .bind(tree_id)
    .bind(source_node_id)
    .bind(target_node_id)
    .bind(route_on)
    .bind(priority)
    .bind(auto)
    .bind(guard_definition_id)
    .fetch_one(pool)
    .await
    .context("failed to insert tree edge")
}

/// List a tree's edges in deterministic planner order:
/// `(source_id, route_on, priority, target_id, id)`.
pub async fn list_tree_edges(pool: &PgPool, tree_id: Uuid) -> Result<Vec<TreeEdge>> {
    sqlx::query_as::<_, TreeEdge>(
        "SELECT * FROM tree_edges WHERE tree_id = $1 \
         ORDER BY source_node_id ASC, route_on ASC, priority ASC, target_node_id ASC, id ASC",
    )
    .bind(tree_id)
    .fetch_all(pool)
    .await
    .context("failed to list tree edges")
}

pub async fn list_outgoing_tree_edges(
    pool: &PgPool,
    source_node_id: Uuid,
    route_on: &str,
) -> Result<Vec<TreeEdge>> {
    sqlx::query_as::<_, TreeEdge>(
        "SELECT * FROM tree_edges WHERE source_node_id = $1 AND route_on = $2 \
         ORDER BY priority ASC, target_node_id ASC, id ASC",
    )
    .bind(source_node_id)
    .bind(route_on)
    .fetch_all(pool)
    .await
    .context("failed to list outgoing tree edges")
}

pub async fn insert_guard_definition(
    pool: &PgPool,
    guard_key: &str,
    version: i32,
    expression: serde_json::Value,
) -> Result<GuardDefinition> {
    sqlx::query_as::<_, GuardDefinition>(
        "INSERT INTO guard_definitions (guard_key, version, expression) \
         VALUES ($1, $2, $3) \
         RETURNING *",
    )
    .bind(guard_key)
    .bind(version)
    .bind(expression)
    .fetch_one(pool)
    .await
    .context("failed to insert guard definition")
}

pub async fn get_guard_definition(pool: &PgPool, id: Uuid) -> Result<Option<GuardDefinition>> {
    sqlx::query_as::<_, GuardDefinition>("SELECT * FROM guard_definitions WHERE id = $1")
        .bind(id)
        .fetch_optional(pool)
        .await
        .context("failed to fetch guard definition")
}
