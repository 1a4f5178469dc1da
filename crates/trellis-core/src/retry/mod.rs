//! Retry eligibility and the error-handler synthetic phase.
//!
//! A failed attempt either gets retried (possibly after an error-handler
//! summary) or becomes a terminal run failure -- decided here, invoked by
//! the executor immediately after it persists a failure.

use anyhow::Result;
use serde::Deserialize;
use sqlx::PgPool;

use trellis_db::models::{RunNode, RunStatus, TreeNode};
use trellis_db::queries::{artifacts, diagnostics, trees};

use crate::context::envelope::render_error_handler_input;
use crate::provider::{Provider, ProviderEvent, ProviderOptions};

pub const DEFAULT_ERROR_HANDLER_PROMPT: &str = "\
Summarize why the previous attempt failed and what a retry should do \
differently. Be specific about the error and any partial progress; do not \
repeat the original instructions verbatim.";
pub const MAX_ERROR_CONTEXT_CHARS: usize = 8_000;
const DEFAULT_ERROR_HANDLER_MODEL: &str = "cheap";

/// Whether a failed attempt is eligible for automatic retry: it must have
/// failed while `running` (not already a deferred `pending` re-queue) and
/// still be within `max_retries`.
pub fn is_retry_eligible(run_node: &RunNode, max_retries: i32) -> bool {
    run_node.attempt <= max_retries
}

/// Outcome of evaluating whether a retry should run immediately or wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryScheduling {
    /// Run is still active; re-execute the next attempt right away.
    Immediate,
    /// Run is paused; queue the next attempt without executing it.
    Deferred,
}

pub fn retry_scheduling(run_status: RunStatus) -> RetryScheduling {
    match run_status {
        RunStatus::Paused => RetryScheduling::Deferred,
        _ => RetryScheduling::Immediate,
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
enum ErrorHandlerConfig {
    Disabled,
    Custom {
        prompt: Option<String>,
        model: Option<String>,
        provider: Option<String>,
        #[serde(rename = "maxInputChars")]
        max_input_chars: Option<usize>,
    },
}

/// A fully resolved error-handler configuration, defaults applied.
pub struct ResolvedErrorHandler {
    pub enabled: bool,
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub max_input_chars: usize,
}

/// Resolve a node's `error_handler_config` against defaults. `null` (absent)
/// means default-enabled; `{mode: disabled}` skips the handler entirely;
/// `{mode: custom, ...}` overrides present fields, falling back to defaults
/// for the rest.
pub fn resolve_error_handler(tree_node: &TreeNode) -> ResolvedErrorHandler {
    let default_provider = tree_node.provider.clone().unwrap_or_else(|| "codex".to_owned());

    let Some(raw) = &tree_node.error_handler_config else {
        return ResolvedErrorHandler {
            enabled: true,
            provider: default_provider,
            model: DEFAULT_ERROR_HANDLER_MODEL.to_owned(),
            prompt: DEFAULT_ERROR_HANDLER_PROMPT.to_owned(),
            max_input_chars: MAX_ERROR_CONTEXT_CHARS,
        };
    };

    let config: Option<ErrorHandlerConfig> = serde_json::from_value(raw.clone()).ok();

    match config {
        Some(ErrorHandlerConfig::Disabled) => ResolvedErrorHandler {
            enabled: false,
            provider: default_provider,
            model: DEFAULT_ERROR_HANDLER_MODEL.to_owned(),
            prompt: DEFAULT_ERROR_HANDLER_PROMPT.to_owned(),
            max_input_chars: MAX_ERROR_CONTEXT_CHARS,
        },
        Some(ErrorHandlerConfig::Custom {
            prompt,
            model,
            provider,
            max_input_chars,
        }) => ResolvedErrorHandler {
            enabled: true,
            provider: provider.unwrap_or(default_provider),
            model: model.unwrap_or_else(|| DEFAULT_ERROR_HANDLER_MODEL.to_owned()),
            prompt: prompt.unwrap_or_else(|| DEFAULT_ERROR_HANDLER_PROMPT.to_owned()),
            max_input_chars: max_input_chars.unwrap_or(MAX_ERROR_CONTEXT_CHARS),
        },
        None => ResolvedErrorHandler {
            enabled: true,
            provider: default_provider,
            model: DEFAULT_ERROR_HANDLER_MODEL.to_owned(),
            prompt: DEFAULT_ERROR_HANDLER_PROMPT.to_owned(),
            max_input_chars: MAX_ERROR_CONTEXT_CHARS,
        },
    }
}

/// Extract a failed attempt's partial output for the error-handler input
/// envelope: the last `result` event's report if one exists (a provider can
/// still emit a trailing malformed result before erroring), else the
/// concatenation of the last up-to-3 `assistant` events, else `"none"`.
pub fn extract_partial_output(events: &[ProviderEvent]) -> String {
    if let Some(ProviderEvent::Result { report, .. }) = events.iter().rev().find(|e| e.is_result()) {
        return report.clone();
    }

    let assistant_texts: Vec<&str> = events
        .iter()
        .rev()
        .filter_map(|e| match e {
            ProviderEvent::Assistant { text } => Some(text.as_str()),
            _ => None,
        })
        .take(3)
        .collect();

    if assistant_texts.is_empty() {
        return "none".to_owned();
    }

    assistant_texts.into_iter().rev().collect::<Vec<_>>().join("\n")
}

/// The outcome of running the error handler.
pub struct ErrorHandlerOutcome {
    pub attempted: bool,
    pub status: &'static str,
    pub summary_artifact_id: Option<i64>,
    pub event_count: usize,
    pub tokens_used: i64,
    pub error_message: Option<String>,
}

/// Run the error handler as a synthetic agent phase over the given
/// provider, and persist a `note` artifact tagged `error_handler_summary_v1`
/// on success. Handler failure never blocks the retry itself -- callers
/// proceed to reschedule the next attempt regardless of this outcome.
#[allow(clippy::too_many_arguments)]
pub async fn run_error_handler(
    pool: &PgPool,
    provider: &dyn Provider,
    run_node: &RunNode,
    node_key: &str,
    max_retries: i32,
    failure_artifact_id: i64,
    error_message: &str,
    partial_output: &str,
    original_prompt: &str,
    config: &ResolvedErrorHandler,
) -> Result<ErrorHandlerOutcome> {
    let source_attempt = run_node.attempt;
    let target_attempt = run_node.attempt + 1;

    let input = render_error_handler_input(
        run_node.run_id,
        node_key,
        source_attempt,
        target_attempt,
        max_retries,
        &config.provider,
        &config.model,
        failure_artifact_id,
        error_message,
        partial_output,
        original_prompt,
        config.max_input_chars,
    );

    let prompt = format!("{}\n\n{}", config.prompt, input);

    let options = ProviderOptions {
        working_directory: std::env::temp_dir(),
        timeout: None,
        context: vec![],
        execution_permissions: Default::default(),
        model: Some(config.model.clone()),
    };

    let stream = match provider.run(&prompt, options).await {
        Ok(stream) => stream,
        Err(err) => {
            return Ok(ErrorHandlerOutcome {
                attempted: true,
                status: "failed",
                summary_artifact_id: None,
                event_count: 0,
                tokens_used: 0,
                error_message: Some(err.message),
            });
        }
    };

    use futures::StreamExt;
    let events: Vec<ProviderEvent> = stream.collect().await;
    let event_count = events.len();
    let tokens_used = events.iter().filter_map(|e| e.tokens_cumulative()).max().unwrap_or(0);

    let Some(ProviderEvent::Result { report, .. }) = events.iter().find(|e| e.is_result()) else {
        return Ok(ErrorHandlerOutcome {
            attempted: true,
            status: "failed",
            summary_artifact_id: None,
            event_count,
            tokens_used,
            error_message: Some("error handler stream ended without a result event".to_owned()),
        });
    };

    let metadata = serde_json::json!({
        "kind": "error_handler_summary_v1",
        "source_attempt": source_attempt,
        "target_attempt": target_attempt,
        "failure_artifact_id": failure_artifact_id,
        "provider": config.provider,
        "model": config.model,
        "prompt_sha256": crate::context::envelope::sha256_hex(&prompt),
        "event_count": event_count,
        "tokens_used": tokens_used,
        "max_input_chars": config.max_input_chars,
    });

    let artifact = artifacts::insert_artifact(
        pool,
        run_node.run_id,
        run_node.id,
        source_attempt,
        "note",
        "text",
        report,
        metadata,
    )
    .await?;

    Ok(ErrorHandlerOutcome {
        attempted: true,
        status: "completed",
        summary_artifact_id: Some(artifact.id),
        event_count,
        tokens_used,
        error_message: None,
    })
}

/// Persist the `errorHandler` diagnostics extension for an attempt.
pub async fn record_diagnostics(pool: &PgPool, run_node: &RunNode, outcome: &ErrorHandlerOutcome) -> Result<()> {
    let payload = serde_json::json!({
        "errorHandler": {
            "attempted": outcome.attempted,
            "status": outcome.status,
            "summaryArtifactId": outcome.summary_artifact_id,
            "sourceAttempt": run_node.attempt,
            "targetAttempt": run_node.attempt + 1,
            "eventCount": outcome.event_count,
            "tokensUsed": outcome.tokens_used,
            "errorMessage": outcome.error_message,
        }
    });
    diagnostics::upsert_diagnostics(pool, run_node.run_id, run_node.id, run_node.attempt, payload).await?;
    Ok(())
}

/// Load the tree node backing a run-node's error-handler config. Returns
/// `None` for dynamically spawned nodes, which have no authored tree node
/// and always run with plain defaults.
pub async fn load_tree_node(pool: &PgPool, run_node: &RunNode) -> Result<Option<TreeNode>> {
    match run_node.tree_node_id {
        Some(id) => trees::get_tree_node(pool, id).await,
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_eligible_within_max_retries() {
        let run_node = sample_run_node(2);
        assert!(is_retry_eligible(&run_node, 3));
        assert!(!is_retry_eligible(&run_node, 1));
    }

    #[test]
    fn deferred_when_run_paused() {
        assert_eq!(retry_scheduling(RunStatus::Paused), RetryScheduling::Deferred);
        assert_eq!(retry_scheduling(RunStatus::Running), RetryScheduling::Immediate);
    }

    #[test]
    fn partial_output_prefers_trailing_result() {
        let events = vec![
            ProviderEvent::Assistant { text: "thinking".to_owned() },
            ProviderEvent::Result {
                report: "malformed but present".to_owned(),
                metadata: serde_json::json!({}),
            },
        ];
        assert_eq!(extract_partial_output(&events), "malformed but present");
    }

    #[test]
    fn partial_output_falls_back_to_assistant_events() {
        let events = vec![
            ProviderEvent::Assistant { text: "one".to_owned() },
            ProviderEvent::Assistant { text: "two".to_owned() },
        ];
        assert_eq!(extract_partial_output(&events), "one\ntwo");
    }

    #[test]
    fn partial_output_defaults_to_none() {
        let events: Vec<ProviderEvent> = vec![];
        assert_eq!(extract_partial_output(&events), "none");
    }

    #[test]
    fn disabled_config_is_respected() {
        let tree_node = sample_tree_node(Some(serde_json::json!({"mode": "disabled"})));
        let resolved = resolve_error_handler(&tree_node);
        assert!(!resolved.enabled);
    }

    #[test]
    fn custom_config_overrides_only_present_fields() {
        let tree_node = sample_tree_node(Some(serde_json::json!({"mode": "custom", "model": "expensive"})));
        let resolved = resolve_error_handler(&tree_node);
        assert!(resolved.enabled);
        assert_eq!(resolved.model, "expensive");
        assert_eq!(resolved.prompt, DEFAULT_ERROR_HANDLER_PROMPT);
    }

    #[test]
    fn null_config_uses_defaults() {
        let tree_node = sample_tree_node(None);
        let resolved = resolve_error_handler(&tree_node);
        assert!(resolved.enabled);
        assert_eq!(resolved.provider, "codex");
        assert_eq!(resolved.max_input_chars, MAX_ERROR_CONTEXT_CHARS);
    }

    fn sample_run_node(attempt: i32) -> RunNode {
        RunNode {
            id: 1,
            run_id: 1,
            tree_node_id: None,
            node_key: "node".to_owned(),
            attempt,
            status: trellis_db::models::RunNodeStatus::Failed,
            spawner_node_id: None,
            join_node_id: None,
            lineage_depth: 0,
            sequence_path: None,
            started_at: None,
            completed_at: None,
            created_at: chrono::Utc::now(),
            updated_at: chrono::Utc::now(),
        }
    }

    fn sample_tree_node(error_handler_config: Option<serde_json::Value>) -> TreeNode {
        TreeNode {
            id: uuid::Uuid::nil(),
            tree_id: uuid::Uuid::nil(),
            node_key: "node".to_owned(),
            sequence_index: 0,
            node_type: trellis_db::models::NodeType::Agent,
            node_role: trellis_db::models::NodeRole::Standard,
            provider: Some("codex".to_owned()),
            model: None,
            prompt_template_id: None,
            max_retries: 1,
            max_children: 0,
            error_handler_config,
            created_at: chrono::Utc::now(),
        }
    }
}
