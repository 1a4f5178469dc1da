//! Envelope formats handed to a provider alongside a node's own prompt:
//! upstream artifacts, retry failure summaries, failure-route context, and
//! join subtask rollups. Each is a plain-text block with a fixed field
//! order and an explicit `untrusted_data` marker, since the content inside
//! originated from a prior (possibly adversarial, possibly just wrong)
//! agent attempt rather than from the operator who authored the tree.

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

pub const POLICY_VERSION: &str = "v1";

/// Truncate `content` to at most `max_chars` characters using the
/// head-and-tail method: keep the first `floor(max_chars / 2)` characters
/// and the last `max_chars - floor(max_chars / 2)` characters, joined by a
/// marker noting how much was elided. No-op if `content` already fits.
pub fn truncate_head_tail(content: &str, max_chars: usize) -> (String, Option<TruncationInfo>) {
    let chars: Vec<char> = content.chars().collect();
    if chars.len() <= max_chars {
        return (content.to_owned(), None);
    }

    let head_len = max_chars / 2;
    let tail_len = max_chars - head_len;
    let head: String = chars[..head_len].iter().collect();
    let tail: String = chars[chars.len() - tail_len..].iter().collect();
    let omitted = chars.len() - max_chars;

    let truncated = format!("{head}\n...[{omitted} chars omitted]...\n{tail}");
    (
        truncated,
        Some(TruncationInfo {
            method: "head_tail",
            original_chars: chars.len(),
            omitted_chars: omitted,
        }),
    )
}

#[derive(Debug, Clone, Copy)]
pub struct TruncationInfo {
    pub method: &'static str,
    pub original_chars: usize,
    pub omitted_chars: usize,
}

pub fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

/// `ALPHRED_UPSTREAM_ARTIFACT v1` -- one selected predecessor's latest
/// successful report, wrapped with enough provenance for the receiving
/// node to cite it without re-deriving trust.
#[allow(clippy::too_many_arguments)]
pub fn render_upstream_artifact(
    workflow_run_id: i64,
    target_node_key: &str,
    source_node_key: &str,
    source_run_node_id: i64,
    source_attempt: i32,
    artifact_id: i64,
    artifact_type: &str,
    content_type: &str,
    created_at: DateTime<Utc>,
    content: &str,
    max_chars: usize,
) -> (String, Option<TruncationInfo>) {
    let digest = sha256_hex(content);
    let (body, truncation) = truncate_head_tail(content, max_chars);

    let mut out = String::new();
    out.push_str("ALPHRED_UPSTREAM_ARTIFACT v1\n");
    out.push_str(&format!("policy_version: {POLICY_VERSION}\n"));
    out.push_str("untrusted_data: true\n");
    out.push_str(&format!("workflow_run_id: {workflow_run_id}\n"));
    out.push_str(&format!("target_node_key: {target_node_key}\n"));
    out.push_str(&format!("source_node_key: {source_node_key}\n"));
    out.push_str(&format!("source_run_node_id: {source_run_node_id}\n"));
    out.push_str(&format!("source_attempt: {source_attempt}\n"));
    out.push_str(&format!("artifact_id: {artifact_id}\n"));
    out.push_str(&format!("artifact_type: {artifact_type}\n"));
    out.push_str(&format!("content_type: {content_type}\n"));
    out.push_str(&format!("created_at: {}\n", created_at.to_rfc3339()));
    out.push_str(&format!("sha256: {digest}\n"));
    if let Some(t) = &truncation {
        out.push_str(&format!(
            "truncation: method={} original_chars={} omitted_chars={}\n",
            t.method, t.original_chars, t.omitted_chars
        ));
    } else {
        out.push_str("truncation: none\n");
    }
    out.push_str("<<<BEGIN>>>\n");
    out.push_str(&body);
    out.push_str("\n<<<END>>>\n");

    (out, truncation)
}

/// `ALPHRED_RETRY_FAILURE_SUMMARY v1` -- the error handler's summary of why
/// the previous attempt failed, appended to a retry's context.
pub fn render_retry_failure_summary(
    workflow_run_id: i64,
    node_key: &str,
    previous_attempt: i32,
    summary: &str,
    max_chars: usize,
) -> String {
    let (body, truncation) = truncate_head_tail(summary, max_chars);
    let mut out = String::new();
    out.push_str("ALPHRED_RETRY_FAILURE_SUMMARY v1\n");
    out.push_str(&format!("policy_version: {POLICY_VERSION}\n"));
    out.push_str("untrusted_data: true\n");
    out.push_str(&format!("workflow_run_id: {workflow_run_id}\n"));
    out.push_str(&format!("node_key: {node_key}\n"));
    out.push_str(&format!("previous_attempt: {previous_attempt}\n"));
    if let Some(t) = &truncation {
        out.push_str(&format!(
            "truncation: method={} original_chars={} omitted_chars={}\n",
            t.method, t.original_chars, t.omitted_chars
        ));
    } else {
        out.push_str("truncation: none\n");
    }
    out.push_str("<<<BEGIN>>>\n");
    out.push_str(&body);
    out.push_str("\n<<<END>>>\n");
    out
}

/// `ALPHRED_FAILURE_ROUTE_CONTEXT v1` -- context handed to a node reached
/// via a `route_on = failure` edge, describing what failed upstream.
pub fn render_failure_route_context(
    workflow_run_id: i64,
    source_node_key: &str,
    source_attempt: i32,
    error_message: &str,
    max_chars: usize,
) -> String {
    let (body, truncation) = truncate_head_tail(error_message, max_chars);
    let mut out = String::new();
    out.push_str("ALPHRED_FAILURE_ROUTE_CONTEXT v1\n");
    out.push_str(&format!("policy_version: {POLICY_VERSION}\n"));
    out.push_str("untrusted_data: true\n");
    out.push_str(&format!("workflow_run_id: {workflow_run_id}\n"));
    out.push_str(&format!("source_node_key: {source_node_key}\n"));
    out.push_str(&format!("source_attempt: {source_attempt}\n"));
    if let Some(t) = &truncation {
        out.push_str(&format!(
            "truncation: method={} original_chars={} omitted_chars={}\n",
            t.method, t.original_chars, t.omitted_chars
        ));
    } else {
        out.push_str("truncation: none\n");
    }
    out.push_str("<<<BEGIN>>>\n");
    out.push_str(&body);
    out.push_str("\n<<<END>>>\n");
    out
}

/// `ALPHRED_RETRY_ERROR_HANDLER_INPUT v1` -- the prompt handed to the error
/// handler's synthetic phase, describing the failure it needs to summarize.
#[allow(clippy::too_many_arguments)]
pub fn render_error_handler_input(
    workflow_run_id: i64,
    node_key: &str,
    source_attempt: i32,
    target_attempt: i32,
    max_retries: i32,
    provider: &str,
    model: &str,
    failure_artifact_id: i64,
    error_message: &str,
    partial_output: &str,
    original_prompt: &str,
    max_chars: usize,
) -> String {
    let mut out = String::new();
    out.push_str("ALPHRED_RETRY_ERROR_HANDLER_INPUT v1\n");
    out.push_str(&format!("policy_version: {POLICY_VERSION}\n"));
    out.push_str("untrusted_data: true\n");
    out.push_str(&format!("workflow_run_id: {workflow_run_id}\n"));
    out.push_str(&format!("node_key: {node_key}\n"));
    out.push_str(&format!("source_attempt: {source_attempt}\n"));
    out.push_str(&format!("target_attempt: {target_attempt}\n"));
    out.push_str(&format!("max_retries: {max_retries}\n"));
    out.push_str(&format!("provider: {provider}\n"));
    out.push_str(&format!("model: {model}\n"));
    out.push_str(&format!("failure_artifact_id: {failure_artifact_id}\n"));

    let budget_each = max_chars / 3;
    let (error_body, _) = truncate_head_tail(error_message, budget_each);
    let (partial_body, _) = truncate_head_tail(partial_output, budget_each);
    let (prompt_body, _) = truncate_head_tail(original_prompt, max_chars - 2 * budget_each);

    out.push_str("<<<BEGIN error_message>>>\n");
    out.push_str(&error_body);
    out.push_str("\n<<<END error_message>>>\n");
    out.push_str("<<<BEGIN partial_output>>>\n");
    out.push_str(&partial_body);
    out.push_str("\n<<<END partial_output>>>\n");
    out.push_str("<<<BEGIN original_prompt>>>\n");
    out.push_str(&prompt_body);
    out.push_str("\n<<<END original_prompt>>>\n");
    out
}

/// One child's row in an `ALPHRED_JOIN_SUBTASKS v1` rollup.
pub struct JoinChildRow {
    pub node_key: String,
    pub status: String,
    pub title: String,
    pub report: Option<String>,
}

/// `ALPHRED_JOIN_SUBTASKS v1` -- the join node's view of its spawned
/// children: totals, then a compact row per child. `rows` is expected
/// sorted failed-first then most-recently-succeeded; only the first four
/// rows get a full report, regardless of how many children there are in
/// total.
pub fn render_join_subtasks(
    workflow_run_id: i64,
    spawner_node_key: &str,
    total: usize,
    completed: usize,
    failed: usize,
    rows: &[JoinChildRow],
    max_chars_per_report: usize,
) -> String {
    let mut out = String::new();
    out.push_str("ALPHRED_JOIN_SUBTASKS v1\n");
    out.push_str(&format!("policy_version: {POLICY_VERSION}\n"));
    out.push_str("untrusted_data: true\n");
    out.push_str(&format!("workflow_run_id: {workflow_run_id}\n"));
    out.push_str(&format!("spawner_node_key: {spawner_node_key}\n"));
    out.push_str(&format!(
        "totals: total={total} completed={completed} failed={failed}\n"
    ));
    out.push_str("<<<BEGIN>>>\n");

    for (index, row) in rows.iter().enumerate() {
        out.push_str(&format!(
            "- {} [{}] {}\n",
            row.node_key, row.status, row.title
        ));
        let attach_full_report = index < 4;
        if attach_full_report {
            if let Some(report) = &row.report {
                let (body, _) = truncate_head_tail(report, max_chars_per_report);
                out.push_str("  report:\n");
                for line in body.lines() {
                    out.push_str("    ");
                    out.push_str(line);
                    out.push('\n');
                }
            }
        }
    }
    out.push_str("<<<END>>>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_content_is_not_truncated() {
        let (body, info) = truncate_head_tail("short", 100);
        assert_eq!(body, "short");
        assert!(info.is_none());
    }

    #[test]
    fn long_content_keeps_head_and_tail() {
        let content = "a".repeat(50) + &"b".repeat(50);
        let (body, info) = truncate_head_tail(&content, 20);
        assert!(body.starts_with("aaaaaaaaaa"));
        assert!(body.ends_with("bbbbbbbbbb"));
        assert!(info.is_some());
    }

    #[test]
    fn sha256_is_stable() {
        let a = sha256_hex("hello");
        let b = sha256_hex("hello");
        assert_eq!(a, b);
        assert_ne!(a, sha256_hex("world"));
    }

    #[test]
    fn upstream_artifact_has_expected_field_order() {
        let (rendered, _) = render_upstream_artifact(
            1,
            "target",
            "source",
            2,
            1,
            3,
            "report",
            "markdown",
            Utc::now(),
            "hello world",
            1000,
        );
        let policy_idx = rendered.find("policy_version:").unwrap();
        let untrusted_idx = rendered.find("untrusted_data:").unwrap();
        let workflow_idx = rendered.find("workflow_run_id:").unwrap();
        let sha_idx = rendered.find("sha256:").unwrap();
        let begin_idx = rendered.find("<<<BEGIN>>>").unwrap();
        assert!(policy_idx < untrusted_idx);
        assert!(untrusted_idx < workflow_idx);
        assert!(workflow_idx < sha_idx);
        assert!(sha_idx < begin_idx);
    }
}
