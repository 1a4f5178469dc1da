//! The run executor: drives a workflow run to completion by repeatedly
//! picking up the next runnable attempt, handing it to a provider, and
//! routing the outcome.
//!
//! Mirrors the reference workspace's outer-loop shape (mpsc completion
//! channel, cooperative cancellation) but the unit of work is a run-node
//! attempt rather than a whole task: persistence, not a gate check, is what
//! turns a stream of provider events into a routed outcome. Only one
//! attempt of a given run is ever in flight at a time -- a run is an
//! inherently sequential pipeline, not a pool of independent work, so the
//! bounded concurrency that matters is how many runs execute at once across
//! the process, not how many of one run's nodes do. Callers share a single
//! `Semaphore` across their concurrently-running `execute_run` calls to
//! enforce that.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures::StreamExt;
use sqlx::PgPool;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;

use trellis_db::models::{ArtifactType, BarrierStatus, NodeRole, RunNode, RunNodeStatus, RunStatus, TreeNode};
use trellis_db::queries::{artifacts, barriers, diagnostics, run_edges, run_nodes, stream_events, trees};

use crate::context::assembler::assemble_context;
use crate::fanout;
use crate::provider::{PhaseRunError, ProviderEvent, ProviderOptions, ProviderRegistry};
use crate::retry;
use crate::routing::{self, ResultMetadata};
use crate::state::dispatch;

const DEFAULT_MAX_RETRIES: i32 = 2;

/// Tunables for one run's execution.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    pub node_timeout: Duration,
    pub working_directory: std::path::PathBuf,
}

/// Terminal outcome of driving a run to completion or interruption.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutorResult {
    Completed,
    Failed { failed_node_keys: Vec<String> },
    Cancelled,
    Paused,
}

/// Message sent from a spawned node task back to the executor loop.
struct NodeDone {
    run_node_id: i64,
    node_key: String,
    result: Result<NodeOutcome>,
}

enum NodeOutcome {
    Completed,
    Failed,
}

/// Drive `run_id` to completion: repeatedly claim the next runnable
/// run-node, execute it against its provider, route the result, and loop
/// until nothing is left runnable. Holds one permit of `concurrency` for
/// its entire duration, so `concurrency` bounds how many runs a process
/// drives at once -- not how many nodes of this run run at once, which is
/// always at most one.
pub async fn execute_run(
    pool: &PgPool,
    registry: Arc<ProviderRegistry>,
    config: &ExecutorConfig,
    run_id: i64,
    cancel: CancellationToken,
    concurrency: Arc<Semaphore>,
) -> Result<ExecutorResult> {
    let _permit = concurrency.acquire_owned().await?;

    let run = trellis_db::queries::runs::get_run(pool, run_id)
        .await?
        .with_context(|| format!("run {run_id} not found"))?;

    if run.status == RunStatus::Pending {
        dispatch::start_run(pool, run_id).await?;
    }

    let (tx, mut rx) = mpsc::channel::<NodeDone>(1);
    let mut in_flight = false;

    loop {
        if cancel.is_cancelled() {
            return drain_and_cancel(pool, run_id, &mut rx, &mut in_flight).await;
        }

        let current = trellis_db::queries::runs::get_run(pool, run_id)
            .await?
            .with_context(|| format!("run {run_id} disappeared mid-execution"))?;
        if current.status == RunStatus::Paused {
            return drain_only(pool, &mut rx, &mut in_flight, ExecutorResult::Paused).await;
        }
        if current.status == RunStatus::Cancelled {
            return drain_only(pool, &mut rx, &mut in_flight, ExecutorResult::Cancelled).await;
        }

        if in_flight {
            tokio::select! {
                done = rx.recv() => {
                    if let Some(done) = done {
                        in_flight = false;
                        log_node_done(&done);
                    }
                }
                _ = cancel.cancelled() => continue,
            }
            continue;
        }

        let candidates = run_nodes::list_pending_latest_attempts(pool, run_id).await?;
        let mut next = None;
        for candidate in candidates {
            if is_runnable(pool, &candidate).await? {
                next = Some(candidate);
                break;
            }
        }

        let Some(run_node) = next else {
            return finalize_run(pool, run_id).await;
        };

        if dispatch::claim_run_node(pool, run_node.id).await.is_err() {
            // Another worker claimed it first, or it was reactivated away
            // from pending between the list and the claim; try again.
            continue;
        }
        release_barrier_if_join(pool, &run_node).await;

        let pool_clone = pool.clone();
        let registry_clone = Arc::clone(&registry);
        let tx_clone = tx.clone();
        let timeout = config.node_timeout;
        let working_directory = config.working_directory.clone();
        let node_key = run_node.node_key.clone();
        let run_node_id = run_node.id;

        in_flight = true;

        tokio::spawn(async move {
            let outcome = tokio::time::timeout(
                timeout,
                execute_single_node(&pool_clone, &registry_clone, &run_node, &working_directory),
            )
            .await;

            let result = match outcome {
                Ok(inner) => inner,
                Err(_elapsed) => {
                    handle_node_timeout(&pool_clone, &registry_clone, &run_node).await;
                    Ok(NodeOutcome::Failed)
                }
            };

            let _ = tx_clone.send(NodeDone { run_node_id, node_key, result }).await;
        });
    }
}

/// A join node consumes its barrier the moment it starts running -- once
/// claimed, the barrier's `ready` state has done its job of gating it.
async fn release_barrier_if_join(pool: &PgPool, run_node: &RunNode) {
    let Some(tree_node_id) = run_node.tree_node_id else { return };
    let Ok(Some(tree_node)) = trees::get_tree_node(pool, tree_node_id).await else { return };
    if tree_node.node_role != NodeRole::Join {
        return;
    }
    if let Ok(Some(barrier)) = barriers::get_barrier_for_join(pool, run_node.id).await {
        let _ = barriers::release_barrier(pool, barrier.id).await;
    }
}

/// A pending run-node is runnable unless it is a join whose barrier hasn't
/// collected every spawned child yet.
async fn is_runnable(pool: &PgPool, run_node: &RunNode) -> Result<bool> {
    let Some(tree_node_id) = run_node.tree_node_id else { return Ok(true) };
    let Some(tree_node) = trees::get_tree_node(pool, tree_node_id).await? else {
        return Ok(true);
    };
    if tree_node.node_role != NodeRole::Join {
        return Ok(true);
    }
    let barrier = barriers::get_barrier_for_join(pool, run_node.id).await?;
    Ok(match barrier {
        Some(b) => matches!(b.status, BarrierStatus::Ready | BarrierStatus::Released),
        None => true,
    })
}

async fn drain_and_cancel(
    pool: &PgPool,
    run_id: i64,
    rx: &mut mpsc::Receiver<NodeDone>,
    in_flight: &mut bool,
) -> Result<ExecutorResult> {
    if *in_flight {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        if let Ok(Some(done)) = tokio::time::timeout_at(deadline, rx.recv()).await {
            *in_flight = false;
            log_node_done(&done);
        }
    }
    let _ = barriers::cancel_open_barriers_for_run(pool, run_id).await;
    let _ = dispatch::cancel_run(pool, run_id, RunStatus::Running).await;
    Ok(ExecutorResult::Cancelled)
}

async fn drain_only(
    pool: &PgPool,
    rx: &mut mpsc::Receiver<NodeDone>,
    in_flight: &mut bool,
    result: ExecutorResult,
) -> Result<ExecutorResult> {
    let _ = pool;
    if *in_flight {
        if let Some(done) = rx.recv().await {
            *in_flight = false;
            log_node_done(&done);
        }
    }
    Ok(result)
}

async fn finalize_run(pool: &PgPool, run_id: i64) -> Result<ExecutorResult> {
    let all_nodes = run_nodes::list_run_nodes_for_run(pool, run_id).await?;
    let unresolved_failures: Vec<String> = all_nodes
        .iter()
        .filter(|n| n.status == RunNodeStatus::Failed)
        .map(|n| n.node_key.clone())
        .collect();

    if unresolved_failures.is_empty() {
        dispatch::complete_run(pool, run_id).await?;
        Ok(ExecutorResult::Completed)
    } else {
        let reason = format!("node(s) exhausted retries: {}", unresolved_failures.join(", "));
        dispatch::fail_run(pool, run_id, &reason).await?;
        Ok(ExecutorResult::Failed { failed_node_keys: unresolved_failures })
    }
}

fn log_node_done(done: &NodeDone) {
    match &done.result {
        Ok(NodeOutcome::Completed) => {
            tracing::info!(run_node_id = done.run_node_id, node_key = %done.node_key, "node completed");
        }
        Ok(NodeOutcome::Failed) => {
            tracing::warn!(run_node_id = done.run_node_id, node_key = %done.node_key, "node failed");
        }
        Err(err) => {
            tracing::error!(run_node_id = done.run_node_id, node_key = %done.node_key, error = %err, "node execution errored");
        }
    }
}

async fn handle_node_timeout(pool: &PgPool, registry: &ProviderRegistry, run_node: &RunNode) {
    tracing::warn!(run_node_id = run_node.id, node_key = %run_node.node_key, "node timed out");
    let _ = artifacts::insert_artifact(
        pool,
        run_node.run_id,
        run_node.id,
        run_node.attempt,
        "log",
        "text",
        "node execution exceeded its timeout",
        serde_json::json!({"kind": "timeout"}),
    )
    .await;
    if dispatch::fail_run_node(pool, run_node.id).await.is_ok() {
        let tree_node = retry::load_tree_node(pool, run_node).await.ok().flatten();
        let _ = maybe_release_join_barrier(pool, run_node).await;
        let routed = routing::route_failed(pool, run_node).await;
        let handled = matches!(&routed, Ok(outcome) if outcome.selected_edge.is_some());
        if !handled {
            let _ = schedule_retry_or_terminate(
                pool,
                registry,
                run_node,
                &tree_node,
                "",
                &[],
                "node execution exceeded its timeout",
            )
            .await;
        }
    }
}

/// Run one attempt end to end: assemble its prompt, invoke its provider,
/// persist the resulting events and artifact, transition the attempt, and
/// route its outcome (including fan-out materialization for spawner nodes
/// and retry scheduling for failures).
async fn execute_single_node(
    pool: &PgPool,
    registry: &ProviderRegistry,
    run_node: &RunNode,
    working_directory: &std::path::Path,
) -> Result<NodeOutcome> {
    let tree_node = retry::load_tree_node(pool, run_node).await?;

    let base_prompt = crate::plan::materialize_run_node(pool, run_node.id).await?;
    let assembled = assemble_context(pool, run_node).await?;
    let mut prompt = base_prompt;
    for block in &assembled.blocks {
        prompt.push('\n');
        prompt.push_str(block);
    }

    diagnostics::upsert_diagnostics(
        pool,
        run_node.run_id,
        run_node.id,
        run_node.attempt,
        serde_json::json!({"context": assembled.manifest}),
    )
    .await?;

    let provider_name = tree_node.as_ref().and_then(|n| n.provider.clone()).unwrap_or_else(|| "codex".to_owned());
    let model = tree_node.as_ref().and_then(|n| n.model.clone());

    let provider = registry
        .get(&provider_name)
        .with_context(|| format!("no provider registered under name {provider_name:?}"))?;

    let options = ProviderOptions {
        working_directory: working_directory.to_path_buf(),
        timeout: None,
        context: vec![],
        execution_permissions: Default::default(),
        model,
    };

    match provider.run(&prompt, options).await {
        Ok(stream) => {
            let events = collect_and_persist_events(pool, run_node, stream).await?;
            finish_attempt(pool, registry, run_node, &tree_node, &prompt, events, None).await
        }
        Err(err) => {
            let events = err.partial_events.clone();
            finish_attempt(pool, registry, run_node, &tree_node, &prompt, events, Some(err)).await
        }
    }
}

/// Drain a provider's event stream, persisting each event as it arrives so
/// a crash mid-stream still leaves a recoverable partial record.
async fn collect_and_persist_events(
    pool: &PgPool,
    run_node: &RunNode,
    mut stream: std::pin::Pin<Box<dyn futures::Stream<Item = ProviderEvent> + Send>>,
) -> Result<Vec<ProviderEvent>> {
    let mut events = Vec::new();
    let mut tokens_cumulative: Option<i32> = None;

    while let Some(event) = stream.next().await {
        let (event_type, content_preview, tokens_delta) = classify_event(&event, tokens_cumulative);
        if let ProviderEvent::Usage { tokens_cumulative: t } = &event {
            tokens_cumulative = Some(*t as i32);
        }

        let _ = stream_events::insert_next_event(
            pool,
            run_node.run_id,
            run_node.id,
            run_node.attempt,
            event_type,
            content_preview.as_deref(),
            tokens_delta,
            tokens_cumulative,
        )
        .await;

        events.push(event);
    }

    Ok(events)
}

fn classify_event(event: &ProviderEvent, prior_tokens: Option<i32>) -> (&'static str, Option<String>, Option<i32>) {
    match event {
        ProviderEvent::System { message } => ("system", Some(preview(message)), None),
        ProviderEvent::Assistant { text } => ("assistant", Some(preview(text)), None),
        ProviderEvent::ToolUse { tool_name, .. } => ("tool_use", Some(tool_name.clone()), None),
        ProviderEvent::ToolResult { tool_name, output } => {
            ("tool_result", Some(format!("{tool_name}: {}", preview(output))), None)
        }
        ProviderEvent::Usage { tokens_cumulative } => {
            let delta = prior_tokens.map(|p| (*tokens_cumulative as i32) - p);
            ("usage", None, delta)
        }
        ProviderEvent::Result { report, .. } => ("result", Some(preview(report)), None),
    }
}

fn preview(s: &str) -> String {
    let cap = 500;
    if s.chars().count() <= cap {
        s.to_owned()
    } else {
        s.chars().take(cap).collect::<String>() + "…"
    }
}

/// Resolve the stream's terminal event (or provider error) into a persisted
/// artifact and attempt transition, then dispatch to routing/fan-out/retry.
async fn finish_attempt(
    pool: &PgPool,
    registry: &ProviderRegistry,
    run_node: &RunNode,
    tree_node: &Option<TreeNode>,
    prompt: &str,
    events: Vec<ProviderEvent>,
    provider_error: Option<PhaseRunError>,
) -> Result<NodeOutcome> {
    let result_event = events.iter().find(|e| e.is_result()).cloned();

    match result_event {
        Some(ProviderEvent::Result { report, metadata }) => {
            artifacts::insert_artifact(
                pool,
                run_node.run_id,
                run_node.id,
                run_node.attempt,
                "report",
                "text",
                &report,
                metadata.clone(),
            )
            .await?;

            let is_spawner = tree_node.as_ref().map(|n| n.node_role == NodeRole::Spawner).unwrap_or(false);
            if is_spawner {
                // Fan-out is the spawner's real payload: a node that "completes"
                // with an invalid fan-out never actually produced runnable
                // children, so it must not be marked completed until the
                // fan-out is validated. The run-node transition trigger has no
                // completed -> failed edge, so this ordering isn't optional.
                match handle_spawner_completion(pool, tree_node, run_node, &report).await {
                    Ok(()) => {
                        dispatch::complete_run_node(pool, run_node.id).await?;
                        Ok(NodeOutcome::Completed)
                    }
                    Err(err) => {
                        handle_attempt_failure(
                            pool,
                            registry,
                            run_node,
                            tree_node,
                            prompt,
                            &events,
                            &format!("spawner fan-out failed: {err}"),
                            serde_json::json!({"kind": "fanout_validation_failed"}),
                        )
                        .await
                    }
                }
            } else {
                dispatch::complete_run_node(pool, run_node.id).await?;
                let parsed_metadata: Option<ResultMetadata> = serde_json::from_value(metadata).ok();
                routing::route_completed(pool, run_node, &report, parsed_metadata.as_ref()).await?;
                maybe_release_join_barrier(pool, run_node).await?;
                Ok(NodeOutcome::Completed)
            }
        }
        _ => {
            let error_message = provider_error
                .as_ref()
                .map(|e| e.message.clone())
                .unwrap_or_else(|| "provider stream ended without a result event".to_owned());

            handle_attempt_failure(
                pool,
                registry,
                run_node,
                tree_node,
                prompt,
                &events,
                &error_message,
                serde_json::json!({"kind": "failure"}),
            )
            .await
        }
    }
}

/// Record a failed attempt, route it, and schedule a retry or error-handler
/// pass if one applies. Shared by provider-level failures and by a
/// spawner's fan-out validation failing after an otherwise-successful run.
#[allow(clippy::too_many_arguments)]
async fn handle_attempt_failure(
    pool: &PgPool,
    registry: &ProviderRegistry,
    run_node: &RunNode,
    tree_node: &Option<TreeNode>,
    prompt: &str,
    events: &[ProviderEvent],
    error_message: &str,
    artifact_metadata: serde_json::Value,
) -> Result<NodeOutcome> {
    artifacts::insert_artifact(
        pool,
        run_node.run_id,
        run_node.id,
        run_node.attempt,
        "log",
        "text",
        error_message,
        artifact_metadata,
    )
    .await?;

    dispatch::fail_run_node(pool, run_node.id).await?;

    let routed = routing::route_failed(pool, run_node).await;
    let handled_by_failure_edge = matches!(&routed, Ok(outcome) if outcome.selected_edge.is_some());

    let max_retries = tree_node.as_ref().map(|n| n.max_retries).unwrap_or(DEFAULT_MAX_RETRIES);
    let will_retry = !handled_by_failure_edge && retry::is_retry_eligible(run_node, max_retries);

    // A failure that's about to retry hasn't reached a terminal state
    // for its barrier yet -- only count it once the attempt truly
    // stops (handled by a failure edge, or retries exhausted).
    if !will_retry {
        maybe_release_join_barrier(pool, run_node).await?;
    }

    if !handled_by_failure_edge {
        schedule_retry_or_terminate(pool, registry, run_node, tree_node, prompt, events, error_message).await?;
    }

    Ok(NodeOutcome::Failed)
}

async fn handle_spawner_completion(
    pool: &PgPool,
    tree_node: &Option<TreeNode>,
    run_node: &RunNode,
    report: &str,
) -> Result<()> {
    let max_children = tree_node.as_ref().map(|n| n.max_children).unwrap_or(0);

    let latest_artifact = artifacts::latest_report_for_run_node(pool, run_node.id).await?;
    let artifact_id = latest_artifact.map(|a| a.id).unwrap_or_default();

    let Some(join_run_node_id) = find_join_target(pool, run_node).await? else {
        return Ok(());
    };

    // Validate the fan-out before touching the join at all: a spawner whose
    // output doesn't parse into valid children (bad payload, colliding node
    // keys, depth exceeded) never earns the join reactivation below.
    let result = fanout::fan_out(pool, run_node, report, artifact_id, join_run_node_id, max_children).await?;

    // A spawner's own success edge is consumed here rather than through
    // normal routing (its target is a join gated on a barrier, not a plain
    // next step), so the join node needs the same skipped -> pending
    // reactivation routing would have given it.
    routing::reactivate_target(pool, join_run_node_id).await?;

    if result.children.is_empty() {
        let _ = fanout::record_child_terminal(pool, result.barrier.id, true).await;
    }

    Ok(())
}

/// Find the join run-node a spawner's outgoing success edge targets.
async fn find_join_target(pool: &PgPool, run_node: &RunNode) -> Result<Option<i64>> {
    let edges = run_edges::list_outgoing_edges(pool, run_node.id, "success").await?;
    Ok(edges.first().map(|e| e.target_run_node_id))
}

/// Once a spawned child reaches a terminal state, record it against its
/// spawner's barrier.
async fn maybe_release_join_barrier(pool: &PgPool, run_node: &RunNode) -> Result<()> {
    let Some(join_node_id) = run_node.join_node_id else { return Ok(()) };
    let Some(barrier) = barriers::get_barrier_for_join(pool, join_node_id).await? else {
        return Ok(());
    };
    let child_completed = run_node.status == RunNodeStatus::Completed;
    fanout::record_child_terminal(pool, barrier.id, child_completed).await?;
    Ok(())
}

async fn schedule_retry_or_terminate(
    pool: &PgPool,
    registry: &ProviderRegistry,
    run_node: &RunNode,
    tree_node: &Option<TreeNode>,
    original_prompt: &str,
    events: &[ProviderEvent],
    error_message: &str,
) -> Result<()> {
    let max_retries = tree_node.as_ref().map(|n| n.max_retries).unwrap_or(DEFAULT_MAX_RETRIES);

    if !retry::is_retry_eligible(run_node, max_retries) {
        return Ok(());
    }

    let run = trellis_db::queries::runs::get_run(pool, run_node.run_id).await?;
    let Some(run) = run else { return Ok(()) };

    let next_status = if retry::retry_scheduling(run.status) == retry::RetryScheduling::Deferred {
        RunNodeStatus::Pending
    } else {
        run_error_handler_if_enabled(pool, registry, run_node, tree_node, original_prompt, events, error_message)
            .await?;
        RunNodeStatus::Pending
    };

    dispatch::retry_run_node(
        pool,
        run_node.id,
        run_node.run_id,
        run_node.tree_node_id,
        &run_node.node_key,
        run_node.attempt + 1,
        max_retries,
        next_status,
        run_node.spawner_node_id,
        run_node.join_node_id,
        run_node.lineage_depth,
        run_node.sequence_path.as_deref(),
    )
    .await?;

    Ok(())
}

async fn run_error_handler_if_enabled(
    pool: &PgPool,
    registry: &ProviderRegistry,
    run_node: &RunNode,
    tree_node: &Option<TreeNode>,
    original_prompt: &str,
    events: &[ProviderEvent],
    error_message: &str,
) -> Result<()> {
    let resolved = match tree_node {
        Some(n) => retry::resolve_error_handler(n),
        None => default_error_handler(),
    };

    if !resolved.enabled {
        return Ok(());
    }

    let Some(provider) = registry.get(&resolved.provider) else {
        return Ok(());
    };

    let partial_output = retry::extract_partial_output(events);
    let failure_artifact = artifacts::list_artifacts_for_run_node(pool, run_node.id)
        .await?
        .into_iter()
        .filter(|a| a.attempt == run_node.attempt && a.artifact_type == ArtifactType::Log)
        .next_back();
    let failure_artifact_id = failure_artifact.map(|a| a.id).unwrap_or_default();

    let max_retries = tree_node.as_ref().map(|n| n.max_retries).unwrap_or(DEFAULT_MAX_RETRIES);

    let outcome = retry::run_error_handler(
        pool,
        provider,
        run_node,
        &run_node.node_key,
        max_retries,
        failure_artifact_id,
        error_message,
        &partial_output,
        original_prompt,
        &resolved,
    )
    .await?;

    retry::record_diagnostics(pool, run_node, &outcome).await
}

fn default_error_handler() -> retry::ResolvedErrorHandler {
    retry::ResolvedErrorHandler {
        enabled: true,
        provider: "codex".to_owned(),
        model: "cheap".to_owned(),
        prompt: retry::DEFAULT_ERROR_HANDLER_PROMPT.to_owned(),
        max_input_chars: retry::MAX_ERROR_CONTEXT_CHARS,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_long_text() {
        let long = "a".repeat(600);
        let shortened = preview(&long);
        assert!(shortened.chars().count() < long.chars().count());
        assert!(shortened.ends_with('…'));
    }

    #[test]
    fn preview_keeps_short_text_intact() {
        assert_eq!(preview("short"), "short");
    }
}
