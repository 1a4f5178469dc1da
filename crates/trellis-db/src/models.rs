use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Lifecycle status of an authoring-time [`WorkflowTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum TreeStatus {
    Draft,
    Published,
}

impl fmt::Display for TreeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Draft => "draft",
            Self::Published => "published",
        };
        f.write_str(s)
    }
}

impl FromStr for TreeStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "draft" => Ok(Self::Draft),
            "published" => Ok(Self::Published),
            other => Err(ParseEnumError::new("TreeStatus", other)),
        }
    }
}

/// Kind of a [`TreeNode`]: what executes it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Agent,
    Human,
    Tool,
}

impl fmt::Display for NodeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Agent => "agent",
            Self::Human => "human",
            Self::Tool => "tool",
        };
        f.write_str(s)
    }
}

impl FromStr for NodeType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "agent" => Ok(Self::Agent),
            "human" => Ok(Self::Human),
            "tool" => Ok(Self::Tool),
            other => Err(ParseEnumError::new("NodeType", other)),
        }
    }
}

/// Fan-out role of a [`TreeNode`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum NodeRole {
    Standard,
    Spawner,
    Join,
}

impl fmt::Display for NodeRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Standard => "standard",
            Self::Spawner => "spawner",
            Self::Join => "join",
        };
        f.write_str(s)
    }
}

impl FromStr for NodeRole {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "standard" => Ok(Self::Standard),
            "spawner" => Ok(Self::Spawner),
            "join" => Ok(Self::Join),
            other => Err(ParseEnumError::new("NodeRole", other)),
        }
    }
}

/// Which outcome of a node an edge is keyed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RouteOn {
    Success,
    Failure,
}

impl fmt::Display for RouteOn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Success => "success",
            Self::Failure => "failure",
        };
        f.write_str(s)
    }
}

impl FromStr for RouteOn {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "success" => Ok(Self::Success),
            "failure" => Ok(Self::Failure),
            other => Err(ParseEnumError::new("RouteOn", other)),
        }
    }
}

/// Status of a [`WorkflowRun`] as a whole.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for RunStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "paused" => Ok(Self::Paused),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParseEnumError::new("RunStatus", other)),
        }
    }
}

/// Status of a single [`RunNode`] attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum RunNodeStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
    Cancelled,
}

impl RunNodeStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Skipped | Self::Cancelled
        )
    }
}

impl fmt::Display for RunNodeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for RunNodeStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParseEnumError::new("RunNodeStatus", other)),
        }
    }
}

/// Provenance of a [`RunNodeEdge`]: authored in the tree, or materialized
/// dynamically by the fan-out coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EdgeKind {
    Tree,
    DynamicSpawnerToChild,
    DynamicChildToJoin,
}

impl fmt::Display for EdgeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Tree => "tree",
            Self::DynamicSpawnerToChild => "dynamic_spawner_to_child",
            Self::DynamicChildToJoin => "dynamic_child_to_join",
        };
        f.write_str(s)
    }
}

impl FromStr for EdgeKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tree" => Ok(Self::Tree),
            "dynamic_spawner_to_child" => Ok(Self::DynamicSpawnerToChild),
            "dynamic_child_to_join" => Ok(Self::DynamicChildToJoin),
            other => Err(ParseEnumError::new("EdgeKind", other)),
        }
    }
}

/// Status of a [`JoinBarrier`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum BarrierStatus {
    Pending,
    Ready,
    Released,
    Cancelled,
}

impl fmt::Display for BarrierStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Released => "released",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

impl FromStr for BarrierStatus {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "ready" => Ok(Self::Ready),
            "released" => Ok(Self::Released),
            "cancelled" => Ok(Self::Cancelled),
            other => Err(ParseEnumError::new("BarrierStatus", other)),
        }
    }
}

/// Kind of a [`PhaseArtifact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ArtifactType {
    Report,
    Note,
    Log,
}

impl fmt::Display for ArtifactType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Report => "report",
            Self::Note => "note",
            Self::Log => "log",
        };
        f.write_str(s)
    }
}

impl FromStr for ArtifactType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "report" => Ok(Self::Report),
            "note" => Ok(Self::Note),
            "log" => Ok(Self::Log),
            other => Err(ParseEnumError::new("ArtifactType", other)),
        }
    }
}

/// Content encoding of a [`PhaseArtifact`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum ContentType {
    Text,
    Markdown,
    Json,
    Diff,
}

impl fmt::Display for ContentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Text => "text",
            Self::Markdown => "markdown",
            Self::Json => "json",
            Self::Diff => "diff",
        };
        f.write_str(s)
    }
}

impl FromStr for ContentType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(Self::Text),
            "markdown" => Ok(Self::Markdown),
            "json" => Ok(Self::Json),
            "diff" => Ok(Self::Diff),
            other => Err(ParseEnumError::new("ContentType", other)),
        }
    }
}

/// The routing signal parsed from a completed attempt's report, or the
/// special `no_route` sentinel persisted when no outgoing edge matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    Approved,
    ChangesRequested,
    Blocked,
    Retry,
    NoRoute,
}

impl fmt::Display for DecisionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Approved => "approved",
            Self::ChangesRequested => "changes_requested",
            Self::Blocked => "blocked",
            Self::Retry => "retry",
            Self::NoRoute => "no_route",
        };
        f.write_str(s)
    }
}

impl FromStr for DecisionType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approved" => Ok(Self::Approved),
            "changes_requested" => Ok(Self::ChangesRequested),
            "blocked" => Ok(Self::Blocked),
            "retry" => Ok(Self::Retry),
            "no_route" => Ok(Self::NoRoute),
            other => Err(ParseEnumError::new("DecisionType", other)),
        }
    }
}

/// Kind of a streamed [`RunNodeStreamEvent`] emitted by a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "text", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum StreamEventType {
    System,
    Assistant,
    ToolUse,
    ToolResult,
    Usage,
    Result,
}

impl fmt::Display for StreamEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::System => "system",
            Self::Assistant => "assistant",
            Self::ToolUse => "tool_use",
            Self::ToolResult => "tool_result",
            Self::Usage => "usage",
            Self::Result => "result",
        };
        f.write_str(s)
    }
}

impl FromStr for StreamEventType {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "system" => Ok(Self::System),
            "assistant" => Ok(Self::Assistant),
            "tool_use" => Ok(Self::ToolUse),
            "tool_result" => Ok(Self::ToolResult),
            "usage" => Ok(Self::Usage),
            "result" => Ok(Self::Result),
            other => Err(ParseEnumError::new("StreamEventType", other)),
        }
    }
}

/// Error returned when parsing a stored enum column fails.
#[derive(Debug, Clone)]
pub struct ParseEnumError {
    pub type_name: &'static str,
    pub value: String,
}

impl ParseEnumError {
    fn new(type_name: &'static str, value: &str) -> Self {
        Self {
            type_name,
            value: value.to_owned(),
        }
    }
}

impl fmt::Display for ParseEnumError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid {}: {:?}", self.type_name, self.value)
    }
}

impl std::error::Error for ParseEnumError {}

// ---------------------------------------------------------------------------
// Rows
// ---------------------------------------------------------------------------

/// Authoring-time workflow graph, identified by `(tree_key, version)`.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowTree {
    pub id: Uuid,
    pub tree_key: String,
    pub version: i32,
    pub name: String,
    pub status: TreeStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single node in a [`WorkflowTree`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TreeNode {
    pub id: Uuid,
    pub tree_id: Uuid,
    pub node_key: String,
    pub sequence_index: i32,
    pub node_type: NodeType,
    pub node_role: NodeRole,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub prompt_template_id: Option<String>,
    pub max_retries: i32,
    pub max_children: i32,
    pub error_handler_config: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

/// A static edge between two [`TreeNode`]s.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct TreeEdge {
    pub id: Uuid,
    pub tree_id: Uuid,
    pub source_node_id: Uuid,
    pub target_node_id: Uuid,
    pub route_on: RouteOn,
    pub priority: i32,
    pub auto: bool,
    pub guard_definition_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
}

/// A reusable equality/logic expression evaluated against a routing signal.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct GuardDefinition {
    pub id: Uuid,
    pub guard_key: String,
    pub version: i32,
    pub expression: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// A materialized execution instance of a [`WorkflowTree`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct WorkflowRun {
    pub id: i64,
    pub tree_id: Uuid,
    pub status: RunStatus,
    pub max_steps: i32,
    pub failure_reason: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// One attempt of one [`TreeNode`] within a [`WorkflowRun`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunNode {
    pub id: i64,
    pub run_id: i64,
    pub tree_node_id: Option<Uuid>,
    pub node_key: String,
    pub attempt: i32,
    pub status: RunNodeStatus,
    pub spawner_node_id: Option<i64>,
    pub join_node_id: Option<i64>,
    pub lineage_depth: i32,
    pub sequence_path: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A runtime edge between two [`RunNode`]s, from the tree or a dynamic fan-out.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunNodeEdge {
    pub id: i64,
    pub run_id: i64,
    pub source_run_node_id: i64,
    pub target_run_node_id: i64,
    pub route_on: RouteOn,
    pub priority: i32,
    pub auto: bool,
    pub guard_definition_id: Option<Uuid>,
    pub edge_kind: EdgeKind,
    pub created_at: DateTime<Utc>,
}

/// Synchronization record for one spawner/join fan-out event.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct JoinBarrier {
    pub id: i64,
    pub run_id: i64,
    pub spawner_run_node_id: i64,
    pub join_run_node_id: i64,
    pub spawn_source_artifact_id: Option<i64>,
    pub expected_children: i32,
    pub terminal_children: i32,
    pub completed_children: i32,
    pub failed_children: i32,
    pub status: BarrierStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Output produced by one attempt of a [`RunNode`].
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct PhaseArtifact {
    pub id: i64,
    pub run_id: i64,
    pub run_node_id: i64,
    pub attempt: i32,
    pub artifact_type: ArtifactType,
    pub content_type: ContentType,
    pub content: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

/// The routing signal resolved for one completed attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RoutingDecision {
    pub id: i64,
    pub run_id: i64,
    pub run_node_id: i64,
    pub attempt: i32,
    pub decision_type: DecisionType,
    pub signal: Option<String>,
    pub rationale: Option<String>,
    pub raw_output: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Full diagnostic payload for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunNodeDiagnostics {
    pub id: i64,
    pub run_id: i64,
    pub run_node_id: i64,
    pub attempt: i32,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single event in a provider's stream for one attempt.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunNodeStreamEvent {
    pub id: i64,
    pub run_id: i64,
    pub run_node_id: i64,
    pub attempt: i32,
    pub sequence: i32,
    pub event_type: StreamEventType,
    pub occurred_at: DateTime<Utc>,
    pub content_preview: Option<String>,
    pub tokens_delta: Option<i32>,
    pub tokens_cumulative: Option<i32>,
    pub created_at: DateTime<Utc>,
}

/// A registered Git remote the orchestrator may clone into the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Repository {
    pub id: Uuid,
    pub name: String,
    pub remote_url: String,
    pub default_branch: String,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

/// One checked-out worktree for a `(run, repository)` pair.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct RunWorktree {
    pub id: i64,
    pub run_id: i64,
    pub repository_id: Uuid,
    pub path: String,
    pub branch: String,
    pub created_at: DateTime<Utc>,
    pub removed_at: Option<DateTime<Utc>>,
}
