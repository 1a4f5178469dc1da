//! `trellis status --run <id>` -- prints a run summary and its nodes.

use sqlx::PgPool;
use trellis_core::PlannerError;
use trellis_db::queries::{run_nodes, runs, trees};

use crate::error::CliError;

pub async fn run_status(pool: &PgPool, run_id: i64) -> Result<(), CliError> {
    let run = runs::get_run(pool, run_id)
        .await
        .map_err(CliError::runtime)?
        .ok_or(PlannerError::RunNotFound(run_id))?;

    let tree = trees::get_tree(pool, run.tree_id)
        .await
        .map_err(CliError::runtime)?;

    println!("run {}", run.id);
    if let Some(tree) = &tree {
        println!("  tree        {} v{}", tree.tree_key, tree.version);
    }
    println!("  status      {}", run.status);
    println!("  max_steps   {}", run.max_steps);
    if let Some(started) = run.started_at {
        println!("  started_at  {started}");
    }
    if let Some(completed) = run.completed_at {
        println!("  completed_at {completed}");
    }
    if let Some(reason) = &run.failure_reason {
        println!("  failure_reason {reason}");
    }

    let nodes = run_nodes::list_run_nodes_for_run(pool, run_id)
        .await
        .map_err(CliError::runtime)?;

    println!();
    println!(
        "  {:<24} {:>7} {:<10} {:<24} {:<24}",
        "node_key", "attempt", "status", "started_at", "completed_at"
    );
    for node in &nodes {
        println!(
            "  {:<24} {:>7} {:<10} {:<24} {:<24}",
            node.node_key,
            node.attempt,
            node.status,
            node.started_at.map(|t| t.to_string()).unwrap_or_default(),
            node.completed_at.map(|t| t.to_string()).unwrap_or_default(),
        );
    }

    Ok(())
}
