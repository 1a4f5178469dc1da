//! Evaluate a completed or failed attempt's outgoing edges and select the
//! one that reactivates the next run-node, persisting the routing decision
//! and skipping siblings that are now unreachable.

use anyhow::{Context, Result};
use serde::Deserialize;
use sqlx::PgPool;

use trellis_db::models::{DecisionType, RunNode, RunNodeEdge, RunNodeStatus};
use trellis_db::queries::{routing_decisions, run_edges, run_nodes, trees};

use crate::errors::RoutingError;
use crate::state::RunNodeStateMachine;

use super::parser::{self, ParsedSignal, ResultMetadata};

/// A guard's expression: `{ field = "signal", equals = "<value>" }`. Only
/// `signal` is a supported field today -- guards exist to discriminate on
/// the node's reported routing signal, not on other run state.
#[derive(Debug, Deserialize)]
struct GuardExpression {
    field: String,
    equals: String,
}

fn evaluate_guard(expression: &serde_json::Value, guard_id: uuid::Uuid, signal: Option<&str>) -> Result<bool, RoutingError> {
    let expr: GuardExpression = serde_json::from_value(expression.clone())
        .map_err(|_| RoutingError::UnsupportedGuardExpression { guard_id })?;

    if expr.field != "signal" {
        return Err(RoutingError::UnsupportedGuardExpression { guard_id });
    }

    Ok(signal.is_some_and(|s| s.eq_ignore_ascii_case(&expr.equals)))
}

/// The outcome of routing a completed or failed attempt.
pub struct RouteOutcome {
    pub decision_type: DecisionType,
    pub signal: Option<String>,
    pub selected_edge: Option<RunNodeEdge>,
    pub skipped_run_node_ids: Vec<i64>,
}

/// Route a `completed` attempt: evaluate outgoing `success` edges against
/// the parsed routing signal, select the first match, reactivate its
/// target, and skip any sibling target left with no other path in.
pub async fn route_completed(
    pool: &PgPool,
    run_node: &RunNode,
    report: &str,
    metadata: Option<&ResultMetadata>,
) -> Result<RouteOutcome, RoutingError> {
    let parsed = parser::parse_routing_signal(report, metadata);
    let candidates = run_edges::list_outgoing_edges(pool, run_node.id, "success")
        .await
        .map_err(|_| RoutingError::NoDecisionLine {
            run_node_id: run_node.id,
            attempt: run_node.attempt,
        })?;

    let has_guarded = candidates.iter().any(|e| !e.auto);
    if has_guarded && parsed.is_none() {
        let raw = parser::attempted_raw_signal(report, metadata);
        return Err(match raw {
            Some(signal) => RoutingError::UnrecognizedSignal {
                run_node_id: run_node.id,
                signal,
            },
            None => RoutingError::NoDecisionLine {
                run_node_id: run_node.id,
                attempt: run_node.attempt,
            },
        });
    }

    let signal = parsed.as_ref().map(|p| p.signal.as_str());
    let mut selected: Option<RunNodeEdge> = None;
    for edge in &candidates {
        let matched = if edge.auto {
            true
        } else {
            let guard_id = edge.guard_definition_id.ok_or(RoutingError::UnsupportedGuardExpression {
                guard_id: uuid::Uuid::nil(),
            })?;
            let guard = trees::get_guard_definition(pool, guard_id)
                .await
                .ok()
                .flatten()
                .ok_or(RoutingError::UnsupportedGuardExpression { guard_id })?;
            evaluate_guard(&guard.expression, guard_id, signal)?
        };
        if matched {
            selected = Some(edge.clone());
            break;
        }
    }

    finish_routing(pool, run_node, candidates, selected, parsed).await
}

/// Route a `failed` attempt: evaluate outgoing `failure` edges (always
/// unconditional), select the first in priority order, and reactivate it.
/// A selected failure edge marks the run-node "handled" -- the run does not
/// terminally fail on its account.
pub async fn route_failed(pool: &PgPool, run_node: &RunNode) -> Result<RouteOutcome, RoutingError> {
    let candidates = run_edges::list_outgoing_edges(pool, run_node.id, "failure")
        .await
        .map_err(|_| RoutingError::NoDecisionLine {
            run_node_id: run_node.id,
            attempt: run_node.attempt,
        })?;

    let selected = candidates.first().cloned();

    finish_routing(pool, run_node, candidates, selected, None).await
}

async fn finish_routing(
    pool: &PgPool,
    run_node: &RunNode,
    candidates: Vec<RunNodeEdge>,
    selected: Option<RunNodeEdge>,
    parsed: Option<ParsedSignal>,
) -> Result<RouteOutcome, RoutingError> {
    let signal = parsed.as_ref().map(|p| p.signal.clone());
    let decision_type = match (&parsed, &selected) {
        (Some(p), Some(_)) => p.decision_type,
        _ => DecisionType::NoRoute,
    };

    routing_decisions::insert_routing_decision(
        pool,
        run_node.run_id,
        run_node.id,
        run_node.attempt,
        &decision_type.to_string(),
        signal.as_deref(),
        None,
        None,
    )
    .await
    .map_err(|_| RoutingError::NoDecisionLine {
        run_node_id: run_node.id,
        attempt: run_node.attempt,
    })?;

    let mut skipped_run_node_ids = Vec::new();

    if let Some(edge) = &selected {
        reactivate_target(pool, edge.target_run_node_id)
            .await
            .map_err(|_| RoutingError::NoDecisionLine {
                run_node_id: run_node.id,
                attempt: run_node.attempt,
            })?;

        for sibling in candidates.iter().filter(|e| e.id != edge.id) {
            if sibling.target_run_node_id == edge.target_run_node_id {
                continue;
            }
            if let Some(skipped) = skip_if_now_unreachable(pool, sibling.target_run_node_id)
                .await
                .unwrap_or(None)
            {
                skipped_run_node_ids.push(skipped);
            }
        }
    }

    Ok(RouteOutcome {
        decision_type,
        signal,
        selected_edge: selected,
        skipped_run_node_ids,
    })
}

pub(crate) async fn reactivate_target(pool: &PgPool, target_run_node_id: i64) -> Result<()> {
    let target = run_nodes::get_run_node(pool, target_run_node_id)
        .await?
        .context("routed edge target run node missing")?;

    match target.status {
        RunNodeStatus::Pending => Ok(()),
        RunNodeStatus::Skipped | RunNodeStatus::Completed => {
            RunNodeStateMachine::transition(pool, target_run_node_id, target.status, RunNodeStatus::Pending)
                .await
                .map_err(anyhow::Error::from)
        }
        _ => Ok(()),
    }
}

/// A sibling target becomes unreachable when this was its only incoming
/// edge. Targets with any other incoming edge are left alone -- some other
/// path may still reach them.
async fn skip_if_now_unreachable(pool: &PgPool, target_run_node_id: i64) -> Result<Option<i64>> {
    let target = run_nodes::get_run_node(pool, target_run_node_id)
        .await?
        .context("sibling target run node missing")?;

    if target.status != RunNodeStatus::Pending {
        return Ok(None);
    }

    let incoming = run_edges::list_incoming_edges(pool, target_run_node_id).await?;
    if incoming.len() > 1 {
        return Ok(None);
    }

    RunNodeStateMachine::transition(pool, target_run_node_id, RunNodeStatus::Pending, RunNodeStatus::Skipped).await?;
    Ok(Some(target_run_node_id))
}
