//! Tree materialization: reconstruct tree TOML and run-node markdown from DB
//! state.
//!
//! - [`materialize_tree`] produces a valid tree TOML document from the
//!   database, suitable for round-tripping through [`super::parse_tree_toml`].
//! - [`materialize_run_node`] produces a standalone markdown document for a
//!   single run-node attempt, suitable for handing to an agent provider.

use std::collections::HashMap;

use anyhow::{Context, Result};
use uuid::Uuid;

use sqlx::PgPool;

use trellis_db::queries::{artifacts, diagnostics, routing_decisions, run_nodes, trees};

/// Materialize a tree from the database back to tree TOML content.
///
/// The output is valid TOML that can be parsed by [`super::parse_tree_toml`].
pub async fn materialize_tree(pool: &PgPool, tree_id: Uuid) -> Result<String> {
    let tree = trees::get_tree(pool, tree_id)
        .await?
        .with_context(|| format!("tree {tree_id} not found"))?;

    let nodes = trees::list_tree_nodes(pool, tree_id).await?;
    let edges = trees::list_tree_edges(pool, tree_id).await?;

    let mut guard_ids: Vec<Uuid> = edges.iter().filter_map(|e| e.guard_definition_id).collect();
    guard_ids.sort();
    guard_ids.dedup();

    let mut guards = Vec::with_capacity(guard_ids.len());
    for guard_id in &guard_ids {
        let guard = trees::get_guard_definition(pool, *guard_id)
            .await?
            .with_context(|| format!("guard {guard_id} referenced by tree but missing"))?;
        guards.push(guard);
    }

    let node_id_to_key: HashMap<Uuid, &str> = nodes.iter().map(|n| (n.id, n.node_key.as_str())).collect();
    let guard_id_to_key: HashMap<Uuid, &str> = guards.iter().map(|g| (g.id, g.guard_key.as_str())).collect();

    let mut out = String::new();

    out.push_str("[tree]\n");
    out.push_str(&format!("tree_key = {}\n", toml_quote(&tree.tree_key)));
    out.push_str(&format!("version = {}\n", tree.version));
    out.push_str(&format!("name = {}\n", toml_quote(&tree.name)));
    out.push_str(&format!("status = {}\n", toml_quote(&tree.status.to_string())));

    for node in &nodes {
        out.push('\n');
        out.push_str("[[nodes]]\n");
        out.push_str(&format!("key = {}\n", toml_quote(&node.node_key)));
        out.push_str(&format!("node_type = {}\n", toml_quote(&node.node_type.to_string())));
        out.push_str(&format!("role = {}\n", toml_quote(&node.node_role.to_string())));
        if let Some(ref provider) = node.provider {
            out.push_str(&format!("provider = {}\n", toml_quote(provider)));
        }
        if let Some(ref model) = node.model {
            out.push_str(&format!("model = {}\n", toml_quote(model)));
        }
        if let Some(ref template_id) = node.prompt_template_id {
            out.push_str(&format!("prompt_template_id = {}\n", toml_quote(template_id)));
        }
        out.push_str(&format!("max_retries = {}\n", node.max_retries));
        out.push_str(&format!("max_children = {}\n", node.max_children));
    }

    for edge in &edges {
        out.push('\n');
        out.push_str("[[edges]]\n");
        out.push_str(&format!(
            "source = {}\n",
            toml_quote(node_id_to_key[&edge.source_node_id])
        ));
        out.push_str(&format!(
            "target = {}\n",
            toml_quote(node_id_to_key[&edge.target_node_id])
        ));
        out.push_str(&format!("route_on = {}\n", toml_quote(&edge.route_on.to_string())));
        out.push_str(&format!("priority = {}\n", edge.priority));
        out.push_str(&format!("auto = {}\n", edge.auto));
        if let Some(guard_id) = edge.guard_definition_id {
            out.push_str(&format!("guard = {}\n", toml_quote(guard_id_to_key[&guard_id])));
        }
    }

    for guard in &guards {
        out.push('\n');
        out.push_str("[[guards]]\n");
        out.push_str(&format!("key = {}\n", toml_quote(&guard.guard_key)));
        out.push_str(&format!("version = {}\n", guard.version));
        out.push_str(&format!(
            "expression = {}\n",
            serde_json::to_string(&guard.expression).unwrap_or_else(|_| "{}".to_owned())
        ));
    }

    Ok(out)
}

/// Materialize a single run-node attempt as a standalone markdown document.
///
/// The document is designed to be handed to an agent provider and includes:
/// - Node key and attempt number
/// - Upstream artifacts from edges routed into this node
/// - Prior attempt's failure diagnostics, if this is a retry
///
/// It does NOT include other run-nodes' details or internal database
/// identifiers beyond what the provider needs to report back against.
pub async fn materialize_run_node(pool: &PgPool, run_node_id: i64) -> Result<String> {
    let node = run_nodes::get_run_node(pool, run_node_id)
        .await?
        .with_context(|| format!("run node {run_node_id} not found"))?;

    let mut out = String::new();

    out.push_str(&format!("# Node: {}\n\n", node.node_key));
    out.push_str(&format!("**Attempt:** {}\n\n", node.attempt));
    out.push_str(&format!("**Status:** {}\n\n", node.status));

    let node_artifacts = artifacts::list_artifacts_for_run_node(pool, run_node_id).await?;
    if !node_artifacts.is_empty() {
        out.push_str("## Upstream Artifacts\n\n");
        for artifact in &node_artifacts {
            out.push_str(&format!(
                "### {} (attempt {})\n\n",
                artifact.artifact_type, artifact.attempt
            ));
            out.push_str("```\n");
            out.push_str(&truncate_feedback_snippet(&artifact.content, 4096));
            out.push_str("\n```\n\n");
        }
    }

    if node.attempt > 1 {
        let prev = run_nodes::get_latest_attempt_by_node_key(pool, node.run_id, &node.node_key)
            .await?
            .filter(|n| n.attempt == node.attempt - 1);

        if let Some(prev_node) = prev {
            let prev_decision =
                routing_decisions::get_routing_decision(pool, prev_node.id, prev_node.attempt)
                    .await?;
            let prev_diagnostics =
                diagnostics::get_diagnostics(pool, prev_node.id, prev_node.attempt).await?;

            if prev_decision.is_some() || prev_diagnostics.is_some() {
                out.push_str("## Previous Attempt Feedback\n\n");
                out.push_str(&format!(
                    "Attempt {} did not complete successfully.\n\n",
                    prev_node.attempt
                ));

                if let Some(decision) = &prev_decision {
                    out.push_str(&format!(
                        "- **Routing signal:** `{}`",
                        decision.decision_type
                    ));
                    if let Some(signal) = &decision.signal {
                        out.push_str(&format!(" ({signal})"));
                    }
                    out.push('\n');
                    if let Some(rationale) = &decision.rationale {
                        out.push_str(&format!("- **Rationale:** {rationale}\n"));
                    }
                }

                if let Some(diag) = &prev_diagnostics {
                    out.push_str("\n```\n");
                    out.push_str(&truncate_feedback_snippet(
                        &serde_json::to_string_pretty(&diag.payload).unwrap_or_default(),
                        2048,
                    ));
                    out.push_str("\n```\n\n");
                }
            }
        }
    }

    Ok(out)
}

/// Truncate a string to at most `max_bytes` bytes for feedback snippets,
/// appending "..." if truncated.
fn truncate_feedback_snippet(s: &str, max_bytes: usize) -> String {
    if s.len() <= max_bytes {
        return s.to_owned();
    }
    let mut end = max_bytes;
    while end > 0 && !s.is_char_boundary(end) {
        end -= 1;
    }
    let mut truncated = s[..end].to_owned();
    truncated.push_str("...");
    truncated
}

/// Quote a string as a TOML value. Uses triple-quoted strings for multiline
/// values and regular quoted strings otherwise.
fn toml_quote(s: &str) -> String {
    if s.contains('\n') {
        format!("\"\"\"\n{}\\\n\"\"\"", s)
    } else {
        let escaped = s.replace('\\', "\\\\").replace('"', "\\\"");
        format!("\"{}\"", escaped)
    }
}
