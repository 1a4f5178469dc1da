//! Integration tests covering the authoring-side and execution-side schema
//! together: publish a small tree, materialize a run against it, and push a
//! run-node through a full attempt lifecycle including a join barrier.

use serde_json::json;

use trellis_db::models::{
    BarrierStatus, DecisionType, EdgeKind, NodeRole, NodeType, RouteOn, RunNodeStatus, RunStatus,
    TreeStatus,
};
use trellis_db::pool;
use trellis_db::queries::{artifacts, barriers, diagnostics, routing_decisions, run_edges,
    run_nodes, runs, stream_events, trees};

use trellis_test_utils::{create_test_db, drop_test_db};

#[tokio::test]
async fn tree_publish_and_materialize_round_trip() {
    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool).await.expect("migrations");

    let tree = trees::insert_tree(&pool, "review-flow", 1, "Review Flow", TreeStatus::Published)
        .await
        .expect("insert tree");

    let plan = trees::insert_tree_node(
        &pool, tree.id, "plan", 0, "agent", "standard", Some("codex"), Some("plan-v1"), None, 0, 0, None,
    )
    .await
    .expect("insert plan node");

    let review = trees::insert_tree_node(
        &pool, tree.id, "review", 1, "agent", "standard", Some("claude-code"), Some("review-v1"),
        None, 2, 0, None,
    )
    .await
    .expect("insert review node");

    trees::insert_tree_edge(&pool, tree.id, plan.id, review.id, "success", 0, true, None)
        .await
        .expect("insert edge");

    let nodes = trees::list_tree_nodes(&pool, tree.id).await.expect("list nodes");
    assert_eq!(nodes.len(), 2);
    assert_eq!(nodes[0].node_key, "plan");
    assert_eq!(nodes[1].node_key, "review");

    let edges = trees::list_tree_edges(&pool, tree.id).await.expect("list edges");
    assert_eq!(edges.len(), 1);
    assert_eq!(edges[0].route_on, RouteOn::Success);

    // Materialize a run against this tree: one run-node per tree node plus
    // the corresponding runtime edge, mirroring the planner's one-transaction
    // materialization step.
    let run = runs::insert_run(&pool, tree.id, RunStatus::Pending, 50, None)
        .await
        .expect("insert run");

    let plan_run_node = run_nodes::insert_run_node(
        &pool, run.id, Some(plan.id), "plan", 1, RunNodeStatus::Pending, None, None, 0, Some("0"),
    )
    .await
    .expect("insert plan run node");

    let review_run_node = run_nodes::insert_run_node(
        &pool, run.id, Some(review.id), "review", 1, RunNodeStatus::Pending, None, None, 0, Some("1"),
    )
    .await
    .expect("insert review run node");

    run_edges::insert_run_node_edge(
        &pool,
        run.id,
        plan_run_node.id,
        review_run_node.id,
        "success",
        0,
        true,
        None,
        "tree",
    )
    .await
    .expect("insert run node edge");

    let materialized = run_nodes::list_run_nodes_for_run(&pool, run.id)
        .await
        .expect("list run nodes");
    assert_eq!(materialized.len(), 2);
    assert_eq!(materialized[0].node_key, "plan");
    assert_eq!(materialized[1].node_key, "review");

    let outgoing = run_edges::list_outgoing_edges(&pool, plan_run_node.id, "success")
        .await
        .expect("list outgoing edges");
    assert_eq!(outgoing.len(), 1);
    assert_eq!(outgoing[0].target_run_node_id, review_run_node.id);
    assert_eq!(outgoing[0].edge_kind, EdgeKind::Tree);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn run_node_attempt_lifecycle_with_optimistic_locking() {
    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool).await.expect("migrations");

    let tree = trees::insert_tree(&pool, "solo-flow", 1, "Solo Flow", TreeStatus::Published)
        .await
        .expect("insert tree");
    let node = trees::insert_tree_node(
        &pool, tree.id, "only", 0, "agent", "standard", Some("codex"), None, None, 1, 0, None,
    )
    .await
    .expect("insert node");
    let run = runs::insert_run(&pool, tree.id, RunStatus::Running, 10, None)
        .await
        .expect("insert run");

    let run_node = run_nodes::insert_run_node(
        &pool, run.id, Some(node.id), "only", 1, RunNodeStatus::Pending, None, None, 0, None,
    )
    .await
    .expect("insert run node");

    let now = run.created_at;

    // Correct `from` succeeds.
    let affected = run_nodes::transition_run_node_status(
        &pool,
        run_node.id,
        RunNodeStatus::Pending,
        RunNodeStatus::Running,
        Some(now),
        None,
    )
    .await
    .expect("transition to running");
    assert_eq!(affected, 1);

    // Stale `from` is a no-op, not an error -- the caller distinguishes this
    // from "not found" by checking rows_affected().
    let stale = run_nodes::transition_run_node_status(
        &pool,
        run_node.id,
        RunNodeStatus::Pending,
        RunNodeStatus::Completed,
        None,
        Some(now),
    )
    .await
    .expect("stale transition should not error");
    assert_eq!(stale, 0);

    let completed = run_nodes::transition_run_node_status(
        &pool,
        run_node.id,
        RunNodeStatus::Running,
        RunNodeStatus::Completed,
        None,
        Some(now),
    )
    .await
    .expect("transition to completed");
    assert_eq!(completed, 1);

    let reloaded = run_nodes::get_run_node(&pool, run_node.id)
        .await
        .expect("get run node")
        .expect("run node exists");
    assert_eq!(reloaded.status, RunNodeStatus::Completed);
    assert!(reloaded.completed_at.is_some());

    // An artifact, a routing decision and a diagnostics patch all attach to
    // the same attempt.
    artifacts::insert_artifact(
        &pool,
        run.id,
        run_node.id,
        1,
        "report",
        "markdown",
        "all good",
        json!({"kind": "primary"}),
    )
    .await
    .expect("insert artifact");

    routing_decisions::insert_routing_decision(
        &pool,
        run.id,
        run_node.id,
        1,
        "approved",
        Some("approved"),
        Some("looks fine"),
        Some("raw model output"),
    )
    .await
    .expect("insert routing decision");

    diagnostics::upsert_diagnostics(
        &pool,
        run.id,
        run_node.id,
        1,
        json!({"context_manifest": {"artifacts": []}}),
    )
    .await
    .expect("insert diagnostics");

    diagnostics::upsert_diagnostics(&pool, run.id, run_node.id, 1, json!({"tokens_used": 120}))
        .await
        .expect("merge diagnostics");

    let diag = diagnostics::get_diagnostics(&pool, run_node.id, 1)
        .await
        .expect("get diagnostics")
        .expect("diagnostics exist");
    assert_eq!(diag.payload["tokens_used"], 120);
    assert!(diag.payload.get("context_manifest").is_some());

    let decision = routing_decisions::get_routing_decision(&pool, run_node.id, 1)
        .await
        .expect("get routing decision")
        .expect("decision exists");
    assert_eq!(decision.decision_type, DecisionType::Approved);

    let report = artifacts::latest_report_for_run_node(&pool, run_node.id)
        .await
        .expect("get report")
        .expect("report exists");
    assert_eq!(report.content, "all good");

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn join_barrier_releases_once_every_child_is_terminal() {
    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool).await.expect("migrations");

    let tree = trees::insert_tree(&pool, "fanout-flow", 1, "Fanout Flow", TreeStatus::Published)
        .await
        .expect("insert tree");
    let spawner = trees::insert_tree_node(
        &pool, tree.id, "spawner", 0, "agent", "spawner", Some("codex"), None, None, 0, 4, None,
    )
    .await
    .expect("insert spawner node");
    let join = trees::insert_tree_node(
        &pool, tree.id, "join", 1, "agent", "join", None, None, None, 0, 0, None,
    )
    .await
    .expect("insert join node");

    let run = runs::insert_run(&pool, tree.id, RunStatus::Running, 20, None)
        .await
        .expect("insert run");

    let spawner_run_node = run_nodes::insert_run_node(
        &pool, run.id, Some(spawner.id), "spawner", 1, RunNodeStatus::Completed, None, None, 0, None,
    )
    .await
    .expect("insert spawner run node");
    let join_run_node = run_nodes::insert_run_node(
        &pool, run.id, Some(join.id), "join", 1, RunNodeStatus::Pending, None, None, 0, None,
    )
    .await
    .expect("insert join run node");

    let barrier = barriers::insert_barrier(
        &pool,
        run.id,
        spawner_run_node.id,
        join_run_node.id,
        None,
        2,
        BarrierStatus::Pending,
    )
    .await
    .expect("insert barrier");

    let after_first = barriers::record_child_terminal(&pool, barrier.id, true)
        .await
        .expect("record first child");
    assert_eq!(after_first.terminal_children, 1);
    assert_eq!(after_first.status, BarrierStatus::Pending);

    let after_second = barriers::record_child_terminal(&pool, barrier.id, false)
        .await
        .expect("record second child");
    assert_eq!(after_second.terminal_children, 2);
    assert_eq!(after_second.completed_children, 1);
    assert_eq!(after_second.failed_children, 1);
    assert_eq!(after_second.status, BarrierStatus::Ready);

    let released = barriers::release_barrier(&pool, barrier.id)
        .await
        .expect("release barrier");
    assert_eq!(released, 1);

    let reloaded = barriers::get_barrier_for_join(&pool, join_run_node.id)
        .await
        .expect("get barrier")
        .expect("barrier exists");
    assert_eq!(reloaded.status, BarrierStatus::Released);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn stream_events_allocate_gap_free_sequence_per_attempt() {
    let (pool, db_name) = create_test_db().await;
    pool::run_migrations(&pool).await.expect("migrations");

    let tree = trees::insert_tree(&pool, "stream-flow", 1, "Stream Flow", TreeStatus::Published)
        .await
        .expect("insert tree");
    let node = trees::insert_tree_node(
        &pool, tree.id, "only", 0, "agent", "standard", Some("codex"), None, None, 0, 0, None,
    )
    .await
    .expect("insert node");
    let run = runs::insert_run(&pool, tree.id, RunStatus::Running, 10, None)
        .await
        .expect("insert run");
    let run_node = run_nodes::insert_run_node(
        &pool, run.id, Some(node.id), "only", 1, RunNodeStatus::Running, None, None, 0, None,
    )
    .await
    .expect("insert run node");

    let first = stream_events::insert_next_event(
        &pool, run.id, run_node.id, 1, "system", Some("starting up"), None, None,
    )
    .await
    .expect("insert first event");
    assert_eq!(first.sequence, 1);

    let second = stream_events::insert_next_event(
        &pool, run.id, run_node.id, 1, "assistant", Some("partial output"), Some(40), Some(40),
    )
    .await
    .expect("insert second event");
    assert_eq!(second.sequence, 2);

    let third = stream_events::insert_next_event(
        &pool, run.id, run_node.id, 1, "result", None, Some(10), Some(50),
    )
    .await
    .expect("insert third event");
    assert_eq!(third.sequence, 3);

    let events = stream_events::list_events_for_attempt(&pool, run_node.id, 1)
        .await
        .expect("list events");
    let sequences: Vec<i32> = events.iter().map(|e| e.sequence).collect();
    assert_eq!(sequences, vec![1, 2, 3]);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[test]
fn node_type_and_role_round_trip_through_display_and_parse() {
    use std::str::FromStr;
    for variant in [NodeType::Agent, NodeType::Human, NodeType::Tool] {
        let parsed = NodeType::from_str(&variant.to_string()).expect("parses");
        assert_eq!(parsed, variant);
    }
    for variant in [NodeRole::Standard, NodeRole::Spawner, NodeRole::Join] {
        let parsed = NodeRole::from_str(&variant.to_string()).expect("parses");
        assert_eq!(parsed, variant);
    }
}
