//! Typed domain errors, one enum per concern.
//!
//! Infrastructure-level failures (I/O, serialization, worktree process
//! failures) are propagated with [`anyhow::Error`] contextual wrapping
//! instead of being typed here — these enums exist only for failures the
//! CLI/HTTP boundary needs to act on (map to an exit code or HTTP status)
//! without string-matching a message.

use uuid::Uuid;

/// Errors raised by the run/run-node state machines.
#[derive(Debug, thiserror::Error)]
pub enum TransitionError {
    #[error("invalid state transition: {from} -> {to} for run node {run_node_id}")]
    IllegalRunNodeTransition {
        run_node_id: i64,
        from: String,
        to: String,
    },
    #[error("invalid state transition: {from} -> {to} for run {run_id}")]
    IllegalRunTransition {
        run_id: i64,
        from: String,
        to: String,
    },
    #[error("run node {0} not found")]
    RunNodeNotFound(i64),
    #[error("run {0} not found")]
    RunNotFound(i64),
    #[error("optimistic lock failed: run node {run_node_id} has status {actual}, expected {expected}")]
    RunNodeStaleStatus {
        run_node_id: i64,
        actual: String,
        expected: String,
    },
    #[error("optimistic lock failed: run {run_id} has status {actual}, expected {expected}")]
    RunStaleStatus {
        run_id: i64,
        actual: String,
        expected: String,
    },
    #[error("cannot retry run node {run_node_id}: attempt {attempt} exceeds max_retries {max_retries}")]
    RetriesExhausted {
        run_node_id: i64,
        attempt: i32,
        max_retries: i32,
    },
}

/// Errors raised while loading or materializing a workflow tree.
#[derive(Debug, thiserror::Error)]
pub enum PlannerError {
    #[error("workflow tree {tree_key:?} not found")]
    WorkflowTreeNotFound { tree_key: String },
    #[error("workflow tree {tree_key:?} has {count} published versions, expected exactly one")]
    AmbiguousWorkflowTreeVersion { tree_key: String, count: usize },
    #[error("workflow tree {tree_key:?} version {version} not found")]
    WorkflowTreeVersionNotFound { tree_key: String, version: i32 },
    #[error("run {0} not found")]
    RunNotFound(i64),
}

/// Errors raised while parsing a routing decision or evaluating a guard.
#[derive(Debug, thiserror::Error)]
pub enum RoutingError {
    #[error("no decision line found in report for run node {run_node_id} attempt {attempt}")]
    NoDecisionLine { run_node_id: i64, attempt: i32 },
    #[error("unrecognized routing signal {signal:?} for run node {run_node_id}")]
    UnrecognizedSignal { run_node_id: i64, signal: String },
    #[error("guard {guard_id} references an unsupported expression shape")]
    UnsupportedGuardExpression { guard_id: Uuid },
}

/// Errors raised while validating a spawner's subtask payload.
#[derive(Debug, thiserror::Error)]
pub enum FanoutError {
    #[error("spawner {run_node_id} produced invalid output: {reason}")]
    SpawnerOutputInvalid { run_node_id: i64, reason: String },
    #[error("spawner {run_node_id} would spawn children at depth {attempted_depth}, exceeding the one-level fan-out limit")]
    SpawnerDepthExceeded { run_node_id: i64, attempted_depth: i32 },
    #[error("subtask node_key {node_key:?} collides with an existing run node in run {run_id}")]
    NodeKeyCollision { run_id: i64, node_key: String },
}

/// Errors raised while resolving or invoking a provider.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    #[error("no provider registered under name {0:?}")]
    UnknownProvider(String),
    #[error("provider {provider} reported a retriable failure: {message}")]
    Retriable { provider: String, message: String },
    #[error("provider {provider} reported a terminal failure: {message}")]
    Terminal { provider: String, message: String },
}

/// Errors raised by operator control actions (`cancel`/`pause`/`resume`/`retry`).
#[derive(Debug, thiserror::Error)]
pub enum ControlError {
    #[error("cannot {action} run {run_id}: current status is {status}")]
    InvalidForStatus {
        action: &'static str,
        run_id: i64,
        status: String,
    },
    #[error("run {0} not found")]
    RunNotFound(i64),
}
