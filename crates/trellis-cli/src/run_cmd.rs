//! `trellis run` -- start a new run from a published tree, or drive an
//! existing run through an operator control action.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use sqlx::PgPool;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use trellis_core::control;
use trellis_core::provider::default_registry;
use trellis_core::{plan, worktree, EngineConfig, ExecutorConfig, ExecutorResult};

use crate::error::CliError;

const DEFAULT_MAX_STEPS: i32 = 500;
/// How many runs this process drives at once. One `trellis run` invocation
/// only ever starts one, but the semaphore is process-wide so a future
/// multi-run driver (e.g. the dashboard) shares the same cap instead of
/// each run carving out its own.
const DEFAULT_MAX_CONCURRENT_RUNS: usize = 4;
const DEFAULT_NODE_TIMEOUT_SECS: u64 = 1800;

/// Resolve a `--repo` value to a registered repository name, transparently
/// registering a `scheme:owner/repo` shorthand the first time it is used.
async fn resolve_repo_name(pool: &PgPool, repo_spec: &str) -> anyhow::Result<String> {
    if let Some(rest) = repo_spec.strip_prefix("github:") {
        let name = rest.rsplit('/').next().unwrap_or(rest).to_owned();
        let remote_url = format!("https://github.com/{rest}.git");
        if trellis_db::queries::repositories::get_repository_by_name(pool, &name)
            .await?
            .is_none()
        {
            trellis_db::queries::repositories::insert_repository(pool, &name, &remote_url, "main")
                .await
                .context("failed to auto-register github repository")?;
        }
        return Ok(name);
    }
    if let Some(rest) = repo_spec.strip_prefix("azure:") {
        let name = rest.rsplit('/').next().unwrap_or(rest).to_owned();
        let remote_url = format!("https://dev.azure.com/{rest}.git");
        if trellis_db::queries::repositories::get_repository_by_name(pool, &name)
            .await?
            .is_none()
        {
            trellis_db::queries::repositories::insert_repository(pool, &name, &remote_url, "main")
                .await
                .context("failed to auto-register azure repository")?;
        }
        return Ok(name);
    }
    Ok(repo_spec.to_owned())
}

pub async fn start_run(
    pool: &PgPool,
    config: &EngineConfig,
    tree_key: &str,
    repo: Option<&str>,
    branch: Option<&str>,
) -> Result<(), CliError> {
    let tree = plan::load_tree_for_run(pool, tree_key, None).await?;
    let materialized = plan::materialize_run(pool, &tree, DEFAULT_MAX_STEPS)
        .await
        .map_err(CliError::runtime)?;
    let run = materialized.run;

    println!("started run {} from tree {tree_key}", run.id);

    let working_directory = if let Some(repo_spec) = repo {
        let repo_name = resolve_repo_name(pool, repo_spec)
            .await
            .map_err(CliError::runtime)?;
        let created = worktree::create_run_worktree(
            pool,
            &config.sandbox_dir,
            &repo_name,
            tree_key,
            run.id,
            branch,
        )
        .await
        .map_err(CliError::runtime)?;
        println!("checked out {} at branch {}", created.path.display(), created.branch);
        created.path
    } else {
        config.sandbox_dir.join("work").join(run.id.to_string())
    };

    let registry = Arc::new(default_registry());
    let executor_config = ExecutorConfig {
        node_timeout: Duration::from_secs(DEFAULT_NODE_TIMEOUT_SECS),
        working_directory,
    };
    let concurrency = Arc::new(Semaphore::new(DEFAULT_MAX_CONCURRENT_RUNS));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            shutdown.cancel();
        }
    });

    let result = trellis_core::execute_run(pool, registry, &executor_config, run.id, cancel, concurrency)
        .await
        .map_err(CliError::runtime)?;

    match result {
        ExecutorResult::Completed => {
            println!("run {} completed", run.id);
            Ok(())
        }
        ExecutorResult::Failed { failed_node_keys } => {
            println!("run {} failed: {}", run.id, failed_node_keys.join(", "));
            Err(CliError::runtime(anyhow::anyhow!(
                "run {} failed at node(s): {}",
                run.id,
                failed_node_keys.join(", ")
            )))
        }
        ExecutorResult::Cancelled => {
            println!("run {} cancelled", run.id);
            Ok(())
        }
        ExecutorResult::Paused => {
            println!("run {} paused", run.id);
            Ok(())
        }
    }
}

pub async fn cancel(pool: &PgPool, run_id: i64) -> Result<(), CliError> {
    control::cancel_run(pool, run_id).await?;
    println!("run {run_id} cancelled");
    Ok(())
}

pub async fn pause(pool: &PgPool, run_id: i64) -> Result<(), CliError> {
    control::pause_run(pool, run_id).await?;
    println!("run {run_id} paused");
    Ok(())
}

pub async fn resume(pool: &PgPool, run_id: i64) -> Result<(), CliError> {
    control::resume_run(pool, run_id).await?;
    println!("run {run_id} resumed");
    Ok(())
}

pub async fn retry(pool: &PgPool, run_id: i64) -> Result<(), CliError> {
    control::retry_run(pool, run_id).await?;
    println!("run {run_id} reset to running for retry");
    Ok(())
}
