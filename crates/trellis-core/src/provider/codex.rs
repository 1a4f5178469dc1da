//! Codex provider adapter.
//!
//! Spawns `codex exec --json` as a subprocess and parses its JSONL output
//! into [`ProviderEvent`]s. The wire shape differs slightly from Claude
//! Code's (`msg.type` nested one level deeper, token counts reported as a
//! single running total rather than input/output pairs) but the streaming
//! idiom is the same.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::trait_def::Provider;
use super::types::{PhaseRunError, ProviderErrorKind, ProviderEvent, ProviderOptions};

#[derive(Clone)]
pub struct CodexProvider {
    binary_path: String,
}

impl CodexProvider {
    pub fn new() -> Self {
        Self { binary_path: "codex".to_owned() }
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self { binary_path: path.into() }
    }
}

impl Default for CodexProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn parse_exec_json_line(line: &str) -> Option<ProviderEvent> {
    let v: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(err) => {
            warn!(%err, "malformed JSON in codex exec output");
            return None;
        }
    };

    let msg = v.get("msg").unwrap_or(&v);
    let event_type = msg.get("type").and_then(|t| t.as_str()).unwrap_or("");

    match event_type {
        "session_configured" | "task_started" => Some(ProviderEvent::System {
            message: event_type.to_owned(),
        }),
        "agent_message" => Some(ProviderEvent::Assistant {
            text: msg.get("message").and_then(|m| m.as_str()).unwrap_or_default().to_owned(),
        }),
        "exec_command_begin" => Some(ProviderEvent::ToolUse {
            tool_name: "exec_command".to_owned(),
            input: msg.get("command").cloned().unwrap_or(serde_json::Value::Null),
        }),
        "exec_command_end" => Some(ProviderEvent::ToolResult {
            tool_name: "exec_command".to_owned(),
            output: msg.get("stdout").and_then(|s| s.as_str()).unwrap_or_default().to_owned(),
        }),
        "token_count" => Some(ProviderEvent::Usage {
            tokens_cumulative: msg.get("total_tokens").and_then(|t| t.as_i64()).unwrap_or(0),
        }),
        "task_complete" => Some(ProviderEvent::Result {
            report: msg.get("last_agent_message").and_then(|r| r.as_str()).unwrap_or_default().to_owned(),
            metadata: serde_json::json!({}),
        }),
        other => {
            debug!(event_type = other, "ignoring unrecognized codex exec event");
            None
        }
    }
}

#[async_trait]
impl Provider for CodexProvider {
    fn name(&self) -> &str {
        "codex"
    }

    async fn run(
        &self,
        prompt: &str,
        options: ProviderOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = ProviderEvent> + Send>>, PhaseRunError> {
        let mut command = Command::new(&self.binary_path);
        command
            .arg("exec")
            .arg("--json")
            .arg(prompt)
            .current_dir(&options.working_directory)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null());

        if let Some(model) = &options.model {
            command.arg("--model").arg(model);
        }

        let mut child = command.spawn().map_err(|err| PhaseRunError {
            kind: ProviderErrorKind::Config,
            message: format!("failed to spawn codex: {err}"),
            partial_events: vec![],
            tokens_used: 0,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| PhaseRunError {
            kind: ProviderErrorKind::Internal,
            message: "codex child process had no stdout".to_owned(),
            partial_events: vec![],
            tokens_used: 0,
        })?;

        let stream = async_stream::stream! {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(event) = parse_exec_json_line(&line) {
                            yield event;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(%err, "error reading codex stdout");
                        break;
                    }
                }
            }
            let _ = child.wait().await;
        };

        Ok(Box::pin(stream))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_task_complete() {
        let line = r#"{"msg":{"type":"task_complete","last_agent_message":"decision: approved"}}"#;
        let event = parse_exec_json_line(line).unwrap();
        assert!(event.is_result());
    }

    #[test]
    fn parses_token_count() {
        let line = r#"{"msg":{"type":"token_count","total_tokens":42}}"#;
        let event = parse_exec_json_line(line).unwrap();
        assert_eq!(event.tokens_cumulative(), Some(42));
    }

    #[test]
    fn ignores_malformed_line() {
        assert!(parse_exec_json_line("not json").is_none());
    }
}
