//! Claude Code provider adapter.
//!
//! Spawns `claude -p --output-format stream-json` as a subprocess and
//! parses its JSONL output into [`ProviderEvent`]s.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

use super::trait_def::Provider;
use super::types::{PhaseRunError, ProviderErrorKind, ProviderEvent, ProviderOptions};

/// Adapter for [Claude Code](https://docs.anthropic.com/en/docs/claude-code),
/// run non-interactively in print mode with streaming JSON output.
#[derive(Clone)]
pub struct ClaudeCodeProvider {
    binary_path: String,
}

impl ClaudeCodeProvider {
    pub fn new() -> Self {
        Self {
            binary_path: "claude".to_owned(),
        }
    }

    pub fn with_binary(path: impl Into<String>) -> Self {
        Self { binary_path: path.into() }
    }
}

impl Default for ClaudeCodeProvider {
    fn default() -> Self {
        Self::new()
    }
}

/// Parse one JSONL line from Claude Code's stream-json output into zero or
/// one [`ProviderEvent`]. Unrecognized event types are logged and skipped
/// rather than treated as a stream failure.
fn parse_stream_json_line(line: &str) -> Option<ProviderEvent> {
    let v: serde_json::Value = match serde_json::from_str(line) {
        Ok(v) => v,
        Err(err) => {
            warn!(%err, "malformed JSON in claude-code stream output");
            return None;
        }
    };

    let event_type = v.get("type").and_then(|t| t.as_str()).unwrap_or("");

    match event_type {
        "system" => Some(ProviderEvent::System {
            message: v.get("message").and_then(|m| m.as_str()).unwrap_or_default().to_owned(),
        }),
        "assistant" => {
            let text = v
                .get("message")
                .and_then(|m| m.get("content"))
                .and_then(|c| c.as_array())
                .into_iter()
                .flatten()
                .filter(|b| b.get("type").and_then(|t| t.as_str()) == Some("text"))
                .filter_map(|b| b.get("text").and_then(|t| t.as_str()))
                .collect::<Vec<_>>()
                .join("");
            Some(ProviderEvent::Assistant { text })
        }
        "tool_use" => Some(ProviderEvent::ToolUse {
            tool_name: v.get("name").and_then(|n| n.as_str()).unwrap_or("unknown").to_owned(),
            input: v.get("input").cloned().unwrap_or(serde_json::Value::Null),
        }),
        "tool_result" => Some(ProviderEvent::ToolResult {
            tool_name: v.get("name").and_then(|n| n.as_str()).unwrap_or("unknown").to_owned(),
            output: v.get("output").and_then(|o| o.as_str()).unwrap_or_default().to_owned(),
        }),
        "usage" => Some(ProviderEvent::Usage {
            tokens_cumulative: v.get("tokens_cumulative").and_then(|t| t.as_i64()).unwrap_or(0),
        }),
        "result" => Some(ProviderEvent::Result {
            report: v.get("result").and_then(|r| r.as_str()).unwrap_or_default().to_owned(),
            metadata: v.get("metadata").cloned().unwrap_or(serde_json::json!({})),
        }),
        other => {
            debug!(event_type = other, "ignoring unrecognized claude-code stream event");
            None
        }
    }
}

#[async_trait]
impl Provider for ClaudeCodeProvider {
    fn name(&self) -> &str {
        "claude-code"
    }

    async fn run(
        &self,
        prompt: &str,
        options: ProviderOptions,
    ) -> Result<Pin<Box<dyn Stream<Item = ProviderEvent> + Send>>, PhaseRunError> {
        let mut command = Command::new(&self.binary_path);
        command
            .arg("-p")
            .arg(prompt)
            .arg("--output-format")
            .arg("stream-json")
            .current_dir(&options.working_directory)
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::null());

        if let Some(model) = &options.model {
            command.arg("--model").arg(model);
        }

        let mut child = command.spawn().map_err(|err| PhaseRunError {
            kind: ProviderErrorKind::Config,
            message: format!("failed to spawn claude-code: {err}"),
            partial_events: vec![],
            tokens_used: 0,
        })?;

        let stdout = child.stdout.take().ok_or_else(|| PhaseRunError {
            kind: ProviderErrorKind::Internal,
            message: "claude-code child process had no stdout".to_owned(),
            partial_events: vec![],
            tokens_used: 0,
        })?;

        let stream = async_stream::stream! {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(event) = parse_stream_json_line(&line) {
                            yield event;
                        }
                    }
                    Ok(None) => break,
                    Err(err) => {
                        warn!(%err, "error reading claude-code stdout");
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
    fn parses_result_line() {
        let line = r#"{"type":"result","result":"decision: approved","metadata":{}}"#;
        let event = parse_stream_json_line(line).unwrap();
        assert!(event.is_result());
    }

    #[test]
    fn ignores_malformed_line() {
        assert!(parse_stream_json_line("not json").is_none());
    }

    #[test]
    fn ignores_unknown_event_type() {
        assert!(parse_stream_json_line(r#"{"type":"ping"}"#).is_none());
    }
}
