//! Tree management: TOML parsing, service layer, materialization.

pub mod materialize;
pub mod parser;
pub mod service;
pub mod toml_format;

pub use materialize::{materialize_run_node, materialize_tree};
pub use parser::{TreeParseError, parse_tree_toml};
pub use service::{MaterializedRun, load_tree_for_run, materialize_run, publish_tree};
pub use toml_format::{EdgeToml, GuardToml, NodeToml, TreeMeta, TreeToml};
