//! TOML format types for workflow tree definition files.
//!
//! These types map directly to the tree document authored outside the
//! system and loaded via `tree publish`; they are deserialized via `serde`
//! + the `toml` crate.

use serde::{Deserialize, Serialize};

/// Top-level structure of a tree TOML document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeToml {
    pub tree: TreeMeta,
    #[serde(default)]
    pub nodes: Vec<NodeToml>,
    #[serde(default)]
    pub edges: Vec<EdgeToml>,
    #[serde(default)]
    pub guards: Vec<GuardToml>,
}

/// Tree-level metadata in `[tree]`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TreeMeta {
    pub tree_key: String,
    #[serde(default = "default_version")]
    pub version: i32,
    pub name: String,
    /// `draft` or `published`; defaults to `draft` so authoring a tree never
    /// accidentally locks it.
    #[serde(default = "default_status")]
    pub status: String,
}

fn default_version() -> i32 {
    1
}

fn default_status() -> String {
    "draft".to_owned()
}

/// A single `[[nodes]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct NodeToml {
    pub key: String,
    #[serde(default = "default_node_type")]
    pub node_type: String,
    #[serde(default = "default_node_role")]
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_template_id: Option<String>,
    #[serde(default)]
    pub max_retries: i32,
    #[serde(default)]
    pub max_children: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_handler: Option<toml::Value>,
}

fn default_node_type() -> String {
    "agent".to_owned()
}

fn default_node_role() -> String {
    "standard".to_owned()
}

/// A single `[[edges]]` entry, referencing nodes and guards by key.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EdgeToml {
    pub source: String,
    pub target: String,
    #[serde(default = "default_route_on")]
    pub route_on: String,
    #[serde(default)]
    pub priority: i32,
    #[serde(default = "default_auto")]
    pub auto: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub guard: Option<String>,
}

fn default_route_on() -> String {
    "success".to_owned()
}

fn default_auto() -> bool {
    true
}

/// A single `[[guards]]` entry.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GuardToml {
    pub key: String,
    #[serde(default = "default_version")]
    pub version: i32,
    pub expression: toml::Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deserialize_minimal_tree() {
        let toml_str = r#"
[tree]
tree_key = "review-flow"
name = "Review Flow"

[[nodes]]
key = "plan"

[[nodes]]
key = "review"
role = "standard"
"#;
        let tree: TreeToml = toml::from_str(toml_str).expect("should parse");
        assert_eq!(tree.tree.tree_key, "review-flow");
        assert_eq!(tree.tree.version, 1);
        assert_eq!(tree.tree.status, "draft");
        assert_eq!(tree.nodes.len(), 2);
        assert_eq!(tree.nodes[0].node_type, "agent");
        assert!(tree.edges.is_empty());
    }

    #[test]
    fn deserialize_guarded_edge() {
        let toml_str = r#"
[tree]
tree_key = "review-flow"
name = "Review Flow"
status = "published"

[[nodes]]
key = "review"

[[nodes]]
key = "approved"

[[edges]]
source = "review"
target = "approved"
auto = false
guard = "is-approved"

[[guards]]
key = "is-approved"
expression = { field = "signal", equals = "approved" }
"#;
        let tree: TreeToml = toml::from_str(toml_str).expect("should parse");
        assert_eq!(tree.tree.status, "published");
        assert_eq!(tree.edges[0].guard.as_deref(), Some("is-approved"));
        assert!(!tree.edges[0].auto);
        assert_eq!(tree.guards.len(), 1);
    }

    #[test]
    fn roundtrip_serialize_deserialize() {
        let tree = TreeToml {
            tree: TreeMeta {
                tree_key: "rt".to_owned(),
                version: 2,
                name: "Round Trip".to_owned(),
                status: "draft".to_owned(),
            },
            nodes: vec![NodeToml {
                key: "only".to_owned(),
                node_type: "agent".to_owned(),
                role: "standard".to_owned(),
                provider: Some("codex".to_owned()),
                model: None,
                prompt_template_id: None,
                max_retries: 1,
                max_children: 0,
                error_handler: None,
            }],
            edges: vec![],
            guards: vec![],
        };
        let serialized = toml::to_string(&tree).expect("should serialize");
        let deserialized: TreeToml = toml::from_str(&serialized).expect("should deserialize");
        assert_eq!(tree, deserialized);
    }
}
