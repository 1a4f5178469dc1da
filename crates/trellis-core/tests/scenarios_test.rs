//! End-to-end scenarios driving a real run through [`trellis_core::execute_run`]
//! against a scripted provider, asserting on final run/node/barrier state.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use trellis_core::executor::{ExecutorConfig, ExecutorResult, execute_run};
use trellis_core::plan::{materialize_run, parse_tree_toml, publish_tree};
use trellis_core::provider::{FakeProvider, ProviderEvent, ProviderRegistry};
use trellis_db::models::{BarrierStatus, RunNodeStatus, RunStatus};
use trellis_db::queries::{barriers, run_nodes};
use trellis_test_utils::{create_test_db, drop_test_db};

fn config() -> ExecutorConfig {
    ExecutorConfig {
        node_timeout: Duration::from_secs(5),
        working_directory: std::env::temp_dir(),
    }
}

fn unbounded() -> Arc<Semaphore> {
    Arc::new(Semaphore::new(1))
}

fn marker(node_key: &str, attempt: i32) -> String {
    format!("# Node: {node_key}\n\n**Attempt:** {attempt}\n\n")
}

fn result(report: &str) -> Vec<ProviderEvent> {
    vec![ProviderEvent::Result {
        report: report.to_owned(),
        metadata: serde_json::json!({}),
    }]
}

fn no_result() -> Vec<ProviderEvent> {
    vec![ProviderEvent::System { message: "nothing to report".to_owned() }]
}

async fn node_status(pool: &sqlx::PgPool, run_id: i64, key: &str) -> RunNodeStatus {
    run_nodes::get_latest_attempt_by_node_key(pool, run_id, key)
        .await
        .unwrap()
        .unwrap_or_else(|| panic!("no run node {key:?}"))
        .status
}

/// S1: a linear a -> b -> c chain, every node auto-succeeding, completes in
/// order with nothing skipped.
#[tokio::test]
async fn linear_chain_completes_in_order() {
    let (pool, db_name) = create_test_db().await;

    let tree_toml = parse_tree_toml(
        r#"
[tree]
tree_key = "linear"
name = "Linear"
status = "published"

[[nodes]]
key = "a"
provider = "codex"

[[nodes]]
key = "b"
provider = "codex"

[[nodes]]
key = "c"
provider = "codex"

[[edges]]
source = "a"
target = "b"

[[edges]]
source = "b"
target = "c"
"#,
    )
    .unwrap();
    let tree = publish_tree(&pool, &tree_toml).await.unwrap();
    let materialized = materialize_run(&pool, &tree, 20).await.unwrap();
    assert_eq!(materialized.initial_runnable_node_keys, vec!["a".to_owned()]);
    let run_id = materialized.run.id;

    let mut registry = ProviderRegistry::new();
    registry.register(
        FakeProvider::named("codex")
            .with_script_for_key(&marker("a", 1), result("a done"))
            .with_script_for_key(&marker("b", 1), result("b done"))
            .with_script_for_key(&marker("c", 1), result("c done")),
    );

    let outcome = execute_run(&pool, Arc::new(registry), &config(), run_id, CancellationToken::new(), unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, ExecutorResult::Completed);

    let run = trellis_db::queries::runs::get_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    for key in ["a", "b", "c"] {
        assert_eq!(node_status(&pool, run_id, key).await, RunNodeStatus::Completed);
    }

    let all = run_nodes::list_run_nodes_for_run(&pool, run_id).await.unwrap();
    let completed_order: Vec<&str> = {
        let mut by_completion = all.iter().collect::<Vec<_>>();
        by_completion.sort_by_key(|n| n.completed_at);
        by_completion.iter().map(|n| n.node_key.as_str()).collect()
    };
    assert_eq!(completed_order, vec!["a", "b", "c"]);

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// S2: a guarded review step routes to `approved` on the `decision:
/// approved` signal, leaving the unguarded fallback skipped; the failure
/// route is never taken since the node does not fail.
#[tokio::test]
async fn guarded_routing_prefers_approved_over_fallback() {
    let (pool, db_name) = create_test_db().await;

    let tree_toml = parse_tree_toml(
        r#"
[tree]
tree_key = "guarded"
name = "Guarded"
status = "published"

[[nodes]]
key = "review"
provider = "codex"

[[nodes]]
key = "approved"
provider = "codex"

[[nodes]]
key = "fallback"
provider = "codex"

[[nodes]]
key = "failure"
provider = "codex"

[[nodes]]
key = "done"
provider = "codex"

[[edges]]
source = "review"
target = "approved"
auto = false
guard = "is-approved"
priority = 0

[[edges]]
source = "review"
target = "fallback"
priority = 1

[[edges]]
source = "review"
target = "failure"
route_on = "failure"

[[edges]]
source = "approved"
target = "done"

[[edges]]
source = "fallback"
target = "done"

[[edges]]
source = "failure"
target = "done"

[[guards]]
key = "is-approved"
expression = { field = "signal", equals = "approved" }
"#,
    )
    .unwrap();
    let tree = publish_tree(&pool, &tree_toml).await.unwrap();
    let materialized = materialize_run(&pool, &tree, 20).await.unwrap();
    let run_id = materialized.run.id;

    let mut registry = ProviderRegistry::new();
    registry.register(
        FakeProvider::named("codex")
            .with_script_for_key(&marker("review", 1), result("decision: approved"))
            .with_script_for_key(&marker("approved", 1), result("approved ok"))
            .with_script_for_key(&marker("done", 1), result("done ok")),
    );

    let outcome = execute_run(&pool, Arc::new(registry), &config(), run_id, CancellationToken::new(), unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, ExecutorResult::Completed);

    assert_eq!(node_status(&pool, run_id, "review").await, RunNodeStatus::Completed);
    assert_eq!(node_status(&pool, run_id, "approved").await, RunNodeStatus::Completed);
    assert_eq!(node_status(&pool, run_id, "fallback").await, RunNodeStatus::Skipped);
    assert_eq!(node_status(&pool, run_id, "failure").await, RunNodeStatus::Skipped);
    assert_eq!(node_status(&pool, run_id, "done").await, RunNodeStatus::Completed);

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// S6: a node that exhausts its retries (max_retries = 0) routes out via
/// its failure edge instead of terminally failing the run.
#[tokio::test]
async fn failure_edge_reroutes_around_exhausted_node() {
    let (pool, db_name) = create_test_db().await;

    let tree_toml = parse_tree_toml(
        r#"
[tree]
tree_key = "failure-route"
name = "Failure Route"
status = "published"

[[nodes]]
key = "build"
provider = "codex"
max_retries = 0

[[nodes]]
key = "triage"
provider = "codex"

[[nodes]]
key = "done"
provider = "codex"

[[edges]]
source = "build"
target = "triage"
route_on = "failure"

[[edges]]
source = "triage"
target = "done"
"#,
    )
    .unwrap();
    let tree = publish_tree(&pool, &tree_toml).await.unwrap();
    let materialized = materialize_run(&pool, &tree, 20).await.unwrap();
    let run_id = materialized.run.id;

    let mut registry = ProviderRegistry::new();
    registry.register(
        FakeProvider::named("codex")
            .with_script_for_key(&marker("build", 1), no_result())
            .with_script_for_key(&marker("triage", 1), result("triaged"))
            .with_script_for_key(&marker("done", 1), result("done ok")),
    );

    let outcome = execute_run(&pool, Arc::new(registry), &config(), run_id, CancellationToken::new(), unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, ExecutorResult::Completed);

    assert_eq!(node_status(&pool, run_id, "build").await, RunNodeStatus::Failed);
    assert_eq!(node_status(&pool, run_id, "triage").await, RunNodeStatus::Completed);
    assert_eq!(node_status(&pool, run_id, "done").await, RunNodeStatus::Completed);

    let run = trellis_db::queries::runs::get_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// S3/S4: a spawner fans out N children into a join barrier, which releases
/// once every child is terminal -- covering both a populated (N=3) and an
/// empty (N=0) fan-out over the same topology.
async fn run_fanout_topology(subtasks_json: &str, expected_children: i32) -> (sqlx::PgPool, String, i64) {
    let (pool, db_name) = create_test_db().await;

    let tree_toml = parse_tree_toml(
        r#"
[tree]
tree_key = "fanout"
name = "Fanout"
status = "published"

[[nodes]]
key = "design"
provider = "codex"

[[nodes]]
key = "breakdown"
provider = "codex"
role = "spawner"
max_children = 8

[[nodes]]
key = "final-review"
provider = "codex"
role = "join"

[[nodes]]
key = "create-pr"
provider = "codex"

[[edges]]
source = "design"
target = "breakdown"

[[edges]]
source = "breakdown"
target = "final-review"

[[edges]]
source = "final-review"
target = "create-pr"
"#,
    )
    .unwrap();
    let tree = publish_tree(&pool, &tree_toml).await.unwrap();
    let materialized = materialize_run(&pool, &tree, 20).await.unwrap();
    let run_id = materialized.run.id;

    let mut registry = ProviderRegistry::new();
    let mut provider = FakeProvider::named("codex")
        .with_script_for_key(&marker("design", 1), result("design ok"))
        .with_script_for_key(&marker("breakdown", 1), result(subtasks_json))
        .with_script_for_key(&marker("final-review", 1), result("final review ok"))
        .with_script_for_key(&marker("create-pr", 1), result("pr opened"));
    for i in 0..expected_children {
        provider = provider.with_script_for_key(&marker(&format!("breakdown__{i}"), 1), result(&format!("child {i} ok")));
    }
    registry.register(provider);

    let outcome = execute_run(&pool, Arc::new(registry), &config(), run_id, CancellationToken::new(), unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, ExecutorResult::Completed);

    (pool, db_name, run_id)
}

#[tokio::test]
async fn fanout_with_three_children_releases_join() {
    let subtasks = r#"{"schemaVersion":1,"subtasks":[
        {"title":"child 0","prompt":"do child 0"},
        {"title":"child 1","prompt":"do child 1"},
        {"title":"child 2","prompt":"do child 2"}
    ]}"#;
    let (pool, db_name, run_id) = run_fanout_topology(subtasks, 3).await;

    for key in ["design", "breakdown", "final-review", "create-pr"] {
        assert_eq!(node_status(&pool, run_id, key).await, RunNodeStatus::Completed);
    }
    for i in 0..3 {
        assert_eq!(
            node_status(&pool, run_id, &format!("breakdown__{i}")).await,
            RunNodeStatus::Completed
        );
    }

    let all = run_nodes::list_run_nodes_for_run(&pool, run_id).await.unwrap();
    assert_eq!(all.len(), 7, "4 tree nodes + 3 spawned children");

    let breakdown = run_nodes::get_latest_attempt_by_node_key(&pool, run_id, "breakdown")
        .await
        .unwrap()
        .unwrap();
    let barrier = barriers::get_barrier_for_spawner(&pool, breakdown.id).await.unwrap().unwrap();
    assert_eq!(barrier.expected_children, 3);
    assert_eq!(barrier.terminal_children, 3);
    assert_eq!(barrier.completed_children, 3);
    assert_eq!(barrier.failed_children, 0);
    assert_eq!(barrier.status, BarrierStatus::Released);

    pool.close().await;
    drop_test_db(&db_name).await;
}

#[tokio::test]
async fn fanout_with_zero_children_releases_join_immediately() {
    let subtasks = r#"{"schemaVersion":1,"subtasks":[]}"#;
    let (pool, db_name, run_id) = run_fanout_topology(subtasks, 0).await;

    for key in ["design", "breakdown", "final-review", "create-pr"] {
        assert_eq!(node_status(&pool, run_id, key).await, RunNodeStatus::Completed);
    }

    let all = run_nodes::list_run_nodes_for_run(&pool, run_id).await.unwrap();
    assert_eq!(all.len(), 4, "no children spawned");

    let breakdown = run_nodes::get_latest_attempt_by_node_key(&pool, run_id, "breakdown")
        .await
        .unwrap()
        .unwrap();
    let barrier = barriers::get_barrier_for_spawner(&pool, breakdown.id).await.unwrap().unwrap();
    assert_eq!(barrier.expected_children, 0);
    assert_eq!(barrier.status, BarrierStatus::Released);

    pool.close().await;
    drop_test_db(&db_name).await;
}

/// S5: one spawned child fails its first attempt (no result event) and
/// succeeds on retry; the executor's default error handler leaves a summary
/// note behind before the retry runs, and the barrier still closes once
/// both children are terminal.
#[tokio::test]
async fn fanout_child_retries_after_failure_then_joins() {
    let subtasks = r#"{"schemaVersion":1,"subtasks":[
        {"title":"flaky","prompt":"do the flaky thing"},
        {"title":"steady","prompt":"do the steady thing"}
    ]}"#;

    let (pool, db_name) = create_test_db().await;

    let tree_toml = parse_tree_toml(
        r#"
[tree]
tree_key = "fanout-retry"
name = "Fanout Retry"
status = "published"

[[nodes]]
key = "design"
provider = "codex"

[[nodes]]
key = "breakdown"
provider = "codex"
role = "spawner"
max_children = 8

[[nodes]]
key = "final-review"
provider = "codex"
role = "join"

[[edges]]
source = "design"
target = "breakdown"

[[edges]]
source = "breakdown"
target = "final-review"
"#,
    )
    .unwrap();
    let tree = publish_tree(&pool, &tree_toml).await.unwrap();
    let materialized = materialize_run(&pool, &tree, 20).await.unwrap();
    let run_id = materialized.run.id;

    let mut registry = ProviderRegistry::new();
    let provider = FakeProvider::named("codex")
        .with_script_for_key(&marker("design", 1), result("design ok"))
        .with_script_for_key(&marker("breakdown", 1), result(subtasks))
        .with_script_for_key(&marker("final-review", 1), result("final review ok"))
        .with_script_for_key(&marker("breakdown__0", 1), no_result())
        .with_script_for_key(&marker("breakdown__0", 2), result("flaky ok on retry"))
        .with_script_for_key(&marker("breakdown__1", 1), result("steady ok"));
    registry.register(provider);

    let outcome = execute_run(&pool, Arc::new(registry), &config(), run_id, CancellationToken::new(), unbounded())
        .await
        .unwrap();
    assert_eq!(outcome, ExecutorResult::Completed);

    let flaky = run_nodes::get_latest_attempt_by_node_key(&pool, run_id, "breakdown__0")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(flaky.status, RunNodeStatus::Completed);
    assert_eq!(flaky.attempt, 2, "flaky child should have retried once");

    let steady = run_nodes::get_latest_attempt_by_node_key(&pool, run_id, "breakdown__1")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(steady.status, RunNodeStatus::Completed);
    assert_eq!(steady.attempt, 1);

    let flaky_first_attempt = run_nodes::list_run_nodes_for_run(&pool, run_id)
        .await
        .unwrap()
        .into_iter()
        .find(|n| n.node_key == "breakdown__0" && n.attempt == 1)
        .expect("breakdown__0's first attempt row should still exist");
    let notes = trellis_db::queries::artifacts::list_artifacts_for_run_node(&pool, flaky_first_attempt.id)
        .await
        .unwrap();
    assert!(
        notes.iter().any(|a| a.artifact_type == trellis_db::models::ArtifactType::Note),
        "error handler should have left a summary note behind before the retry"
    );

    let breakdown = run_nodes::get_latest_attempt_by_node_key(&pool, run_id, "breakdown")
        .await
        .unwrap()
        .unwrap();
    let barrier = barriers::get_barrier_for_spawner(&pool, breakdown.id).await.unwrap().unwrap();
    assert_eq!(barrier.expected_children, 2);
    assert_eq!(barrier.terminal_children, 2);
    assert_eq!(barrier.completed_children, 2);
    assert_eq!(barrier.failed_children, 0);
    assert_eq!(barrier.status, BarrierStatus::Released);

    let run = trellis_db::queries::runs::get_run(&pool, run_id).await.unwrap().unwrap();
    assert_eq!(run.status, RunStatus::Completed);

    pool.close().await;
    drop_test_db(&db_name).await;
}
