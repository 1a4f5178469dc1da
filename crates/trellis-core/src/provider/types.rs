//! Types shared by every provider adapter: the event stream vocabulary, the
//! invocation options a node phase supplies, and the error classification
//! the executor uses to decide whether a failure is worth retrying.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// One event emitted by a provider over the course of running a phase.
/// Exactly one `Result` event marks success; its absence after the stream
/// ends is itself a failure. `Usage` totals are cumulative and must be
/// monotonically non-decreasing across a single stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProviderEvent {
    System { message: String },
    Assistant { text: String },
    ToolUse { tool_name: String, input: serde_json::Value },
    ToolResult { tool_name: String, output: String },
    Usage { tokens_cumulative: i64 },
    Result { report: String, metadata: serde_json::Value },
}

impl ProviderEvent {
    pub fn is_result(&self) -> bool {
        matches!(self, Self::Result { .. })
    }

    pub fn tokens_cumulative(&self) -> Option<i64> {
        match self {
            Self::Usage { tokens_cumulative } => Some(*tokens_cumulative),
            _ => None,
        }
    }
}

/// Invocation options supplied to a provider for one phase run.
#[derive(Debug, Clone)]
pub struct ProviderOptions {
    pub working_directory: PathBuf,
    pub timeout: Option<Duration>,
    pub context: Vec<String>,
    pub execution_permissions: HashMap<String, serde_json::Value>,
    pub model: Option<String>,
}

/// Classification of a provider failure. Bootstrap failures (`auth`,
/// `config`) never warrant a retry; `timeout`/`rate_limit`/`transport` do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderErrorKind {
    Auth,
    Config,
    Timeout,
    RateLimit,
    Transport,
    Internal,
}

impl ProviderErrorKind {
    pub fn retryable(self) -> bool {
        matches!(self, Self::Timeout | Self::RateLimit | Self::Transport)
    }
}

impl std::fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Auth => "auth",
            Self::Config => "config",
            Self::Timeout => "timeout",
            Self::RateLimit => "rate_limit",
            Self::Transport => "transport",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// A provider failure mid-phase, carrying whatever events were observed
/// before the failure and the cumulative token count at that point.
#[derive(Debug, thiserror::Error)]
#[error("provider phase run failed ({kind}): {message}")]
pub struct PhaseRunError {
    pub kind: ProviderErrorKind,
    pub message: String,
    pub partial_events: Vec<ProviderEvent>,
    pub tokens_used: i64,
}

impl PhaseRunError {
    pub fn retryable(&self) -> bool {
        self.kind.retryable()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retryable_kinds_match_spec() {
        assert!(ProviderErrorKind::Timeout.retryable());
        assert!(ProviderErrorKind::RateLimit.retryable());
        assert!(ProviderErrorKind::Transport.retryable());
        assert!(!ProviderErrorKind::Auth.retryable());
        assert!(!ProviderErrorKind::Config.retryable());
        assert!(!ProviderErrorKind::Internal.retryable());
    }

    #[test]
    fn result_event_is_detected() {
        let event = ProviderEvent::Result {
            report: "done".to_owned(),
            metadata: serde_json::json!({}),
        };
        assert!(event.is_result());
        assert!(!ProviderEvent::System { message: "hi".to_owned() }.is_result());
    }
}
