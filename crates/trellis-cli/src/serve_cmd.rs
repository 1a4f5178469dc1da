//! The dashboard HTTP surface: JSON read endpoints keyed by `runId` plus a
//! control POST, and a root HTML index of recent runs.

use std::net::SocketAddr;

use anyhow::Result;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{Html, IntoResponse};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use tower_http::cors::CorsLayer;

use trellis_core::control;
use trellis_core::ControlError;
use trellis_db::models::{WorkflowRun, RunNode, RunWorktree};
use trellis_db::queries::{repositories, run_nodes, runs, trees};

const RECENT_RUNS_LIMIT: i64 = 50;

// ---------------------------------------------------------------------------
// Error type
// ---------------------------------------------------------------------------

pub struct AppError {
    status: StatusCode,
    code: &'static str,
    message: String,
}

impl AppError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, code: "invalid_request", message: msg.into() }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, code: "not_found", message: msg.into() }
    }

    pub fn internal(err: anyhow::Error) -> Self {
        Self { status: StatusCode::INTERNAL_SERVER_ERROR, code: "internal_error", message: format!("{err:#}") }
    }
}

impl From<ControlError> for AppError {
    fn from(err: ControlError) -> Self {
        match err {
            ControlError::RunNotFound(id) => Self::not_found(format!("run {id} not found")),
            ControlError::InvalidForStatus { .. } => Self::invalid_request(err.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let body = serde_json::json!({ "error": { "code": self.code, "message": self.message } });
        (self.status, Json(body)).into_response()
    }
}

// ---------------------------------------------------------------------------
// Response types
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize)]
pub struct RunDetailResponse {
    #[serde(flatten)]
    pub run: WorkflowRun,
    pub tree_key: Option<String>,
    pub nodes: Vec<RunNode>,
}

#[derive(Debug, Serialize)]
pub struct WorktreesResponse {
    pub worktrees: Vec<RunWorktree>,
}

#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    pub action: String,
}

#[derive(Debug, Serialize)]
pub struct ControlResponse {
    pub run_id: i64,
    pub action: String,
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

pub fn build_router(pool: PgPool) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/api/runs/{id}", get(get_run_detail))
        .route("/api/runs/{id}/worktrees", get(get_run_worktrees))
        .route("/api/runs/{id}/control", post(post_run_control))
        .layer(CorsLayer::permissive())
        .with_state(pool)
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

pub async fn run_serve(pool: PgPool, bind: &str, port: u16) -> Result<()> {
    let app = build_router(pool);
    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    tracing::info!("trellis serve listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await?;
    tracing::info!("trellis serve shut down");
    Ok(())
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
}

// ---------------------------------------------------------------------------
// Handlers
// ---------------------------------------------------------------------------

async fn index(State(pool): State<PgPool>) -> Result<axum::response::Response, AppError> {
    let recent = runs::list_recent_runs(&pool, RECENT_RUNS_LIMIT).await.map_err(AppError::internal)?;

    let rows = if recent.is_empty() {
        "<tr><td colspan=\"3\">No runs found.</td></tr>".to_string()
    } else {
        recent
            .iter()
            .map(|r| {
                format!(
                    "<tr><td><a href=\"/api/runs/{id}\">{id}</a></td><td>{status}</td><td>{tree_id}</td></tr>",
                    id = r.id,
                    status = r.status,
                    tree_id = r.tree_id,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let html = format!(
        "<!DOCTYPE html>\
<html><head><title>trellis</title></head><body>\
<h1>trellis</h1>\
<table><tr><th>Run</th><th>Status</th><th>Tree</th></tr>{rows}</table>\
</body></html>"
    );

    Ok(Html(html).into_response())
}

fn parse_run_id(raw: &str) -> Result<i64, AppError> {
    let id: i64 = raw
        .parse()
        .map_err(|_| AppError::invalid_request(format!("{raw:?} is not a valid run id")))?;
    if id <= 0 {
        return Err(AppError::invalid_request("run id must be a positive integer"));
    }
    Ok(id)
}

async fn get_run_detail(
    State(pool): State<PgPool>,
    Path(raw_id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let run_id = parse_run_id(&raw_id)?;

    let run = runs::get_run(&pool, run_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("run {run_id} not found")))?;

    let tree = trees::get_tree(&pool, run.tree_id).await.map_err(AppError::internal)?;
    let nodes = run_nodes::list_run_nodes_for_run(&pool, run_id).await.map_err(AppError::internal)?;

    Ok(Json(RunDetailResponse { run, tree_key: tree.map(|t| t.tree_key), nodes }).into_response())
}

async fn get_run_worktrees(
    State(pool): State<PgPool>,
    Path(raw_id): Path<String>,
) -> Result<axum::response::Response, AppError> {
    let run_id = parse_run_id(&raw_id)?;

    runs::get_run(&pool, run_id)
        .await
        .map_err(AppError::internal)?
        .ok_or_else(|| AppError::not_found(format!("run {run_id} not found")))?;

    let worktrees = repositories::list_worktrees_for_run(&pool, run_id).await.map_err(AppError::internal)?;

    Ok(Json(WorktreesResponse { worktrees }).into_response())
}

async fn post_run_control(
    State(pool): State<PgPool>,
    Path(raw_id): Path<String>,
    Json(body): Json<ControlRequest>,
) -> Result<axum::response::Response, AppError> {
    let run_id = parse_run_id(&raw_id)?;

    match body.action.as_str() {
        "cancel" => control::cancel_run(&pool, run_id).await?,
        "pause" => control::pause_run(&pool, run_id).await?,
        "resume" => control::resume_run(&pool, run_id).await?,
        "retry" => control::retry_run(&pool, run_id).await?,
        other => {
            return Err(AppError::invalid_request(format!(
                "unknown action {other:?}; expected cancel, pause, resume, or retry"
            )))
        }
    }

    Ok(Json(ControlResponse { run_id, action: body.action }).into_response())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use sqlx::PgPool;
    use tower::ServiceExt;

    use trellis_core::plan::{self, parse_tree_toml};
    use trellis_test_utils::{create_test_db, drop_test_db};

    async fn send_request(pool: PgPool, method: &str, uri: &str, body: Option<&str>) -> axum::response::Response {
        let app = super::build_router(pool);
        let mut builder = Request::builder().method(method).uri(uri);
        builder = builder.header("content-type", "application/json");
        let request_body = match body {
            Some(b) => Body::from(b.to_owned()),
            None => Body::empty(),
        };
        app.oneshot(builder.body(request_body).unwrap()).await.unwrap()
    }

    async fn body_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), 1_048_576).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    const MINIMAL_TREE: &str = r#"
        [tree]
        tree_key = "serve-test"
        version = 1
        name = "Serve Test"
        status = "published"

        [[nodes]]
        key = "only"
        node_type = "agent"
        role = "standard"
        provider = "codex"
    "#;

    #[tokio::test]
    async fn test_index_returns_html() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_request(pool.clone(), "GET", "/", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let content_type = resp.headers().get("content-type").unwrap().to_str().unwrap();
        assert!(content_type.contains("text/html"));

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_get_run_detail_not_found() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_request(pool.clone(), "GET", "/api/runs/999999", None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], "not_found");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_get_run_detail_invalid_id() {
        let (pool, db_name) = create_test_db().await;

        let resp = send_request(pool.clone(), "GET", "/api/runs/not-a-number", None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], "invalid_request");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_get_run_detail_with_data() {
        let (pool, db_name) = create_test_db().await;

        let tree_toml = parse_tree_toml(MINIMAL_TREE).unwrap();
        let tree = plan::publish_tree(&pool, &tree_toml).await.unwrap();
        let materialized = plan::materialize_run(&pool, &tree, 10).await.unwrap();

        let resp = send_request(pool.clone(), "GET", &format!("/api/runs/{}", materialized.run.id), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["tree_key"], "serve-test");
        assert_eq!(json["nodes"].as_array().unwrap().len(), 1);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_control_unknown_action_is_invalid_request() {
        let (pool, db_name) = create_test_db().await;

        let tree_toml = parse_tree_toml(MINIMAL_TREE).unwrap();
        let tree = plan::publish_tree(&pool, &tree_toml).await.unwrap();
        let materialized = plan::materialize_run(&pool, &tree, 10).await.unwrap();

        let resp = send_request(
            pool.clone(),
            "POST",
            &format!("/api/runs/{}/control", materialized.run.id),
            Some(r#"{"action":"explode"}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let json = body_json(resp).await;
        assert_eq!(json["error"]["code"], "invalid_request");

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_control_pause_then_resume() {
        let (pool, db_name) = create_test_db().await;

        let tree_toml = parse_tree_toml(MINIMAL_TREE).unwrap();
        let tree = plan::publish_tree(&pool, &tree_toml).await.unwrap();
        let materialized = plan::materialize_run(&pool, &tree, 10).await.unwrap();
        let run_id = materialized.run.id;

        trellis_core::state::dispatch::start_run(&pool, run_id).await.unwrap();

        let resp = send_request(
            pool.clone(),
            "POST",
            &format!("/api/runs/{run_id}/control"),
            Some(r#"{"action":"pause"}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = send_request(
            pool.clone(),
            "POST",
            &format!("/api/runs/{run_id}/control"),
            Some(r#"{"action":"resume"}"#),
        )
        .await;
        assert_eq!(resp.status(), StatusCode::OK);

        pool.close().await;
        drop_test_db(&db_name).await;
    }

    #[tokio::test]
    async fn test_get_run_worktrees_empty() {
        let (pool, db_name) = create_test_db().await;

        let tree_toml = parse_tree_toml(MINIMAL_TREE).unwrap();
        let tree = plan::publish_tree(&pool, &tree_toml).await.unwrap();
        let materialized = plan::materialize_run(&pool, &tree, 10).await.unwrap();

        let resp = send_request(pool.clone(), "GET", &format!("/api/runs/{}/worktrees", materialized.run.id), None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let json = body_json(resp).await;
        assert_eq!(json["worktrees"], serde_json::json!([]));

        pool.close().await;
        drop_test_db(&db_name).await;
    }
}
