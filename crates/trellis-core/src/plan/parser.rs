//! Tree TOML parser with validation.
//!
//! Parses a tree document string into a [`TreeToml`] and validates:
//! - Node keys are unique; `node_type`/`node_role` values are valid.
//! - Edges reference existing node keys and declared guards.
//! - `auto` and `guard` pair consistently (auto edges carry no guard; guarded
//!   edges must name one) and failure edges are always auto — the same
//!   invariants the store enforces with `CHECK` constraints, caught here so
//!   authoring mistakes surface before a publish round-trips to the database.

use std::collections::HashSet;

use thiserror::Error;

use super::toml_format::TreeToml;

/// Errors that can occur during tree parsing and validation.
#[derive(Debug, Error)]
pub enum TreeParseError {
    #[error("TOML parse error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("tree must contain at least one node")]
    NoNodes,

    #[error("duplicate node key: {0:?}")]
    DuplicateNodeKey(String),

    #[error("duplicate guard key: {0:?}")]
    DuplicateGuardKey(String),

    #[error("edge from {edge_source:?} references unknown target {target:?}")]
    UnknownEdgeTarget { edge_source: String, target: String },

    #[error("edge source {0:?} is not a declared node")]
    UnknownEdgeSource(String),

    #[error("edge {edge_source:?} -> {target:?} references unknown guard {guard:?}")]
    UnknownGuard {
        edge_source: String,
        target: String,
        guard: String,
    },

    #[error("invalid node_type {value:?} on node {key:?} (expected agent, human, or tool)")]
    InvalidNodeType { key: String, value: String },

    #[error("invalid role {value:?} on node {key:?} (expected standard, spawner, or join)")]
    InvalidNodeRole { key: String, value: String },

    #[error("invalid route_on {value:?} on edge {edge_source:?} -> {target:?} (expected success or failure)")]
    InvalidRouteOn {
        edge_source: String,
        target: String,
        value: String,
    },

    #[error("edge {edge_source:?} -> {target:?} is auto but also names a guard")]
    AutoEdgeWithGuard { edge_source: String, target: String },

    #[error("edge {edge_source:?} -> {target:?} is guarded but auto is not false")]
    GuardedEdgeNotManual { edge_source: String, target: String },

    #[error("failure edge {edge_source:?} -> {target:?} must be auto")]
    FailureEdgeNotAuto { edge_source: String, target: String },

    #[error("invalid status {0:?} on tree (expected draft or published)")]
    InvalidTreeStatus(String),
}

/// Parse and validate a tree TOML document.
pub fn parse_tree_toml(content: &str) -> Result<TreeToml, TreeParseError> {
    let tree: TreeToml = toml::from_str(content)?;
    validate(&tree)?;
    Ok(tree)
}

fn validate(tree: &TreeToml) -> Result<(), TreeParseError> {
    if tree.nodes.is_empty() {
        return Err(TreeParseError::NoNodes);
    }

    if !matches!(tree.tree.status.as_str(), "draft" | "published") {
        return Err(TreeParseError::InvalidTreeStatus(tree.tree.status.clone()));
    }

    let mut node_keys = HashSet::new();
    for node in &tree.nodes {
        if !node_keys.insert(node.key.as_str()) {
            return Err(TreeParseError::DuplicateNodeKey(node.key.clone()));
        }
        if !matches!(node.node_type.as_str(), "agent" | "human" | "tool") {
            return Err(TreeParseError::InvalidNodeType {
                key: node.key.clone(),
                value: node.node_type.clone(),
            });
        }
        if !matches!(node.role.as_str(), "standard" | "spawner" | "join") {
            return Err(TreeParseError::InvalidNodeRole {
                key: node.key.clone(),
                value: node.role.clone(),
            });
        }
    }

    let mut guard_keys = HashSet::new();
    for guard in &tree.guards {
        if !guard_keys.insert(guard.key.as_str()) {
            return Err(TreeParseError::DuplicateGuardKey(guard.key.clone()));
        }
    }

    for edge in &tree.edges {
        if !node_keys.contains(edge.source.as_str()) {
            return Err(TreeParseError::UnknownEdgeSource(edge.source.clone()));
        }
        if !node_keys.contains(edge.target.as_str()) {
            return Err(TreeParseError::UnknownEdgeTarget {
                edge_source: edge.source.clone(),
                target: edge.target.clone(),
            });
        }
        if !matches!(edge.route_on.as_str(), "success" | "failure") {
            return Err(TreeParseError::InvalidRouteOn {
                edge_source: edge.source.clone(),
                target: edge.target.clone(),
                value: edge.route_on.clone(),
            });
        }

        match &edge.guard {
            Some(guard_key) => {
                if !guard_keys.contains(guard_key.as_str()) {
                    return Err(TreeParseError::UnknownGuard {
                        edge_source: edge.source.clone(),
                        target: edge.target.clone(),
                        guard: guard_key.clone(),
                    });
                }
                if edge.auto {
                    return Err(TreeParseError::AutoEdgeWithGuard {
                        edge_source: edge.source.clone(),
                        target: edge.target.clone(),
                    });
                }
            }
            None if !edge.auto => {
                return Err(TreeParseError::GuardedEdgeNotManual {
                    edge_source: edge.source.clone(),
                    target: edge.target.clone(),
                });
            }
            None => {}
        }

        if edge.route_on == "failure" && !edge.auto {
            return Err(TreeParseError::FailureEdgeNotAuto {
                edge_source: edge.source.clone(),
                target: edge.target.clone(),
            });
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal() -> &'static str {
        r#"
[tree]
tree_key = "t"
name = "T"

[[nodes]]
key = "a"

[[nodes]]
key = "b"

[[edges]]
source = "a"
target = "b"
"#
    }

    #[test]
    fn parse_valid_tree() {
        let tree = parse_tree_toml(minimal()).expect("should parse");
        assert_eq!(tree.nodes.len(), 2);
    }

    #[test]
    fn rejects_empty_nodes() {
        let toml_str = r#"
[tree]
tree_key = "t"
name = "T"
"#;
        let err = parse_tree_toml(toml_str).unwrap_err();
        assert!(matches!(err, TreeParseError::NoNodes));
    }

    #[test]
    fn rejects_duplicate_node_keys() {
        let toml_str = r#"
[tree]
tree_key = "t"
name = "T"

[[nodes]]
key = "a"

[[nodes]]
key = "a"
"#;
        let err = parse_tree_toml(toml_str).unwrap_err();
        assert!(matches!(err, TreeParseError::DuplicateNodeKey(ref k) if k == "a"));
    }

    #[test]
    fn rejects_unknown_edge_target() {
        let toml_str = r#"
[tree]
tree_key = "t"
name = "T"

[[nodes]]
key = "a"

[[edges]]
source = "a"
target = "missing"
"#;
        let err = parse_tree_toml(toml_str).unwrap_err();
        assert!(matches!(err, TreeParseError::UnknownEdgeTarget { .. }));
    }

    #[test]
    fn rejects_auto_edge_with_guard() {
        let toml_str = r#"
[tree]
tree_key = "t"
name = "T"

[[nodes]]
key = "a"

[[nodes]]
key = "b"

[[edges]]
source = "a"
target = "b"
auto = true
guard = "g"

[[guards]]
key = "g"
expression = { field = "signal", equals = "x" }
"#;
        let err = parse_tree_toml(toml_str).unwrap_err();
        assert!(matches!(err, TreeParseError::AutoEdgeWithGuard { .. }));
    }

    #[test]
    fn rejects_guarded_edge_without_guard() {
        let toml_str = r#"
[tree]
tree_key = "t"
name = "T"

[[nodes]]
key = "a"

[[nodes]]
key = "b"

[[edges]]
source = "a"
target = "b"
auto = false
"#;
        let err = parse_tree_toml(toml_str).unwrap_err();
        assert!(matches!(err, TreeParseError::GuardedEdgeNotManual { .. }));
    }

    #[test]
    fn rejects_non_auto_failure_edge() {
        let toml_str = r#"
[tree]
tree_key = "t"
name = "T"

[[nodes]]
key = "a"

[[nodes]]
key = "b"

[[guards]]
key = "g"
expression = { field = "signal", equals = "x" }

[[edges]]
source = "a"
target = "b"
route_on = "failure"
auto = false
guard = "g"
"#;
        let err = parse_tree_toml(toml_str).unwrap_err();
        assert!(matches!(err, TreeParseError::FailureEdgeNotAuto { .. }));
    }

    #[test]
    fn rejects_invalid_node_role() {
        let toml_str = r#"
[tree]
tree_key = "t"
name = "T"

[[nodes]]
key = "a"
role = "manager"
"#;
        let err = parse_tree_toml(toml_str).unwrap_err();
        assert!(matches!(err, TreeParseError::InvalidNodeRole { .. }));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = parse_tree_toml("not valid {{{").unwrap_err();
        assert!(matches!(err, TreeParseError::TomlError(_)));
    }
}
