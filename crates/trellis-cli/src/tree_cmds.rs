//! `trellis tree publish|show` -- author a tree into the store, or
//! materialize one back out for inspection.

use sqlx::PgPool;
use trellis_core::plan;
use trellis_db::queries::{run_nodes, trees};

use crate::error::CliError;

pub async fn publish(pool: &PgPool, file: &str) -> Result<(), CliError> {
    let content = std::fs::read_to_string(file)
        .map_err(|err| CliError::runtime(anyhow::anyhow!("failed to read {file}: {err}")))?;
    let tree_toml = plan::parse_tree_toml(&content)
        .map_err(|err| CliError::runtime(anyhow::anyhow!("{err}")))?;
    let tree = plan::publish_tree(pool, &tree_toml).await.map_err(CliError::runtime)?;

    println!(
        "published {} v{} ({}) as {}",
        tree.tree_key, tree.version, tree.name, tree.status
    );
    Ok(())
}

pub async fn show(
    pool: &PgPool,
    tree_key: &str,
    version: Option<i32>,
    run_id: Option<i64>,
) -> Result<(), CliError> {
    let tree = plan::load_tree_for_run(pool, tree_key, version).await?;

    println!("# {} v{} ({})", tree.tree_key, tree.version, tree.status);
    println!();

    let nodes = trees::list_tree_nodes(pool, tree.id).await.map_err(CliError::runtime)?;
    let edges = trees::list_tree_edges(pool, tree.id).await.map_err(CliError::runtime)?;

    let run_node_by_tree_node = if let Some(run_id) = run_id {
        let run_nodes = run_nodes::list_run_nodes_for_run(pool, run_id)
            .await
            .map_err(CliError::runtime)?;
        run_nodes
            .into_iter()
            .filter_map(|n| n.tree_node_id.map(|tid| (tid, n)))
            .collect()
    } else {
        std::collections::HashMap::new()
    };

    println!("## nodes");
    for node in &nodes {
        let live = run_node_by_tree_node
            .get(&node.id)
            .map(|n| format!(" [{} attempt {}]", n.status, n.attempt))
            .unwrap_or_default();
        println!(
            "- {} ({}/{}){}",
            node.node_key, node.node_type, node.node_role, live
        );
    }

    println!();
    println!("## edges");
    for edge in &edges {
        let source = nodes.iter().find(|n| n.id == edge.source_node_id).map(|n| n.node_key.as_str()).unwrap_or("?");
        let target = nodes.iter().find(|n| n.id == edge.target_node_id).map(|n| n.node_key.as_str()).unwrap_or("?");
        println!("- {source} -> {target} on {}", edge.route_on);
    }

    Ok(())
}
