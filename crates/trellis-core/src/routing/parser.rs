//! Parse a routing signal out of a completed attempt's report.
//!
//! Two sources are consulted, in order: a node may report its decision
//! structurally via `result.metadata.routingDecision`, or by writing a
//! `decision: <signal>` line in its free-text report. Structured metadata
//! wins when present and valid; a malformed or missing structured value
//! falls through to scanning the report text.

use serde::Deserialize;

use trellis_db::models::DecisionType;

/// The four signals a node can report; `no_route` is never parsed here, it's
/// the sentinel the selector persists when nothing matched.
const KNOWN_SIGNALS: &[(&str, DecisionType)] = &[
    ("approved", DecisionType::Approved),
    ("changes_requested", DecisionType::ChangesRequested),
    ("blocked", DecisionType::Blocked),
    ("retry", DecisionType::Retry),
];

/// Structured result metadata a provider may attach to its final event.
#[derive(Debug, Deserialize)]
pub struct ResultMetadata {
    #[serde(rename = "routingDecision")]
    pub routing_decision: Option<String>,
}

fn signal_to_decision(signal: &str) -> Option<DecisionType> {
    let lowered = signal.to_ascii_lowercase();
    KNOWN_SIGNALS
        .iter()
        .find(|(name, _)| *name == lowered)
        .map(|(_, decision)| *decision)
}

/// Scan a report's lines for the first one that is, case-insensitively and
/// exactly, `decision: <signal>` with a recognized signal and no extra
/// tokens. Leading/trailing whitespace on the line is ignored; anything else
/// on the line invalidates it.
fn first_decision_line(report: &str) -> Option<(DecisionType, String)> {
    for line in report.lines() {
        let trimmed = line.trim();
        let Some(rest) = strip_prefix_ci(trimmed, "decision:") else {
            continue;
        };
        let signal = rest.trim();
        if signal.is_empty() || signal.split_whitespace().count() != 1 {
            continue;
        }
        if let Some(decision) = signal_to_decision(signal) {
            return Some((decision, signal.to_ascii_lowercase()));
        }
    }
    None
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if s.len() < prefix.len() {
        return None;
    }
    let (head, tail) = s.split_at(prefix.len());
    if head.eq_ignore_ascii_case(prefix) {
        Some(tail)
    } else {
        None
    }
}

/// The outcome of parsing a routing signal out of a report.
pub struct ParsedSignal {
    pub decision_type: DecisionType,
    pub signal: String,
}

/// Resolve the routing signal for a completed attempt: structured metadata
/// first, then the first valid `decision:` line, else `None`.
pub fn parse_routing_signal(report: &str, metadata: Option<&ResultMetadata>) -> Option<ParsedSignal> {
    if let Some(meta) = metadata {
        if let Some(raw) = &meta.routing_decision {
            if let Some(decision_type) = signal_to_decision(raw) {
                return Some(ParsedSignal {
                    decision_type,
                    signal: raw.to_ascii_lowercase(),
                });
            }
        }
    }

    first_decision_line(report).map(|(decision_type, signal)| ParsedSignal {
        decision_type,
        signal,
    })
}

/// The raw text a node attempted to report a decision with, even if it
/// didn't resolve to a known signal -- used to distinguish "said nothing"
/// from "said something unrecognized" when a guarded edge requires a
/// decision and none validly parsed.
pub fn attempted_raw_signal(report: &str, metadata: Option<&ResultMetadata>) -> Option<String> {
    if let Some(meta) = metadata {
        if let Some(raw) = &meta.routing_decision {
            return Some(raw.clone());
        }
    }
    for line in report.lines() {
        let trimmed = line.trim();
        if let Some(rest) = strip_prefix_ci(trimmed, "decision:") {
            let signal = rest.trim();
            if !signal.is_empty() {
                return Some(signal.to_owned());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefers_structured_metadata_over_text() {
        let report = "decision: blocked\n";
        let meta = ResultMetadata {
            routing_decision: Some("approved".to_owned()),
        };
        let parsed = parse_routing_signal(report, Some(&meta)).expect("should resolve");
        assert_eq!(parsed.decision_type, DecisionType::Approved);
    }

    #[test]
    fn falls_back_to_text_when_metadata_invalid() {
        let report = "some preamble\ndecision: changes_requested\ntrailing\n";
        let meta = ResultMetadata {
            routing_decision: Some("not-a-signal".to_owned()),
        };
        let parsed = parse_routing_signal(report, Some(&meta)).expect("should resolve");
        assert_eq!(parsed.decision_type, DecisionType::ChangesRequested);
    }

    #[test]
    fn matches_case_insensitively() {
        let report = "DECISION: Approved\n";
        let parsed = parse_routing_signal(report, None).expect("should resolve");
        assert_eq!(parsed.decision_type, DecisionType::Approved);
    }

    #[test]
    fn rejects_line_with_extra_tokens() {
        let report = "decision: approved with reservations\n";
        assert!(parse_routing_signal(report, None).is_none());
    }

    #[test]
    fn rejects_unknown_signal() {
        let report = "decision: maybe\n";
        assert!(parse_routing_signal(report, None).is_none());
    }

    #[test]
    fn returns_none_when_no_decision_present() {
        let report = "just a plain report with no routing hints\n";
        assert!(parse_routing_signal(report, None).is_none());
    }

    #[test]
    fn takes_first_valid_line_when_multiple_present() {
        let report = "decision: retry\ndecision: approved\n";
        let parsed = parse_routing_signal(report, None).expect("should resolve");
        assert_eq!(parsed.decision_type, DecisionType::Retry);
    }
}
