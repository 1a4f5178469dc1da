//! Provider bridge -- the boundary between the engine and agent runtimes.
//!
//! Core scheduling logic never depends on a specific agent runtime; it
//! depends on the [`trait_def::Provider`] trait and looks up an
//! implementation by name from a [`registry::ProviderRegistry`] built at
//! process startup.

pub mod claude_code;
pub mod codex;
pub mod fake;
pub mod registry;
pub mod trait_def;
pub mod types;

pub use claude_code::ClaudeCodeProvider;
pub use codex::CodexProvider;
pub use fake::FakeProvider;
pub use registry::ProviderRegistry;
pub use trait_def::Provider;
pub use types::{PhaseRunError, ProviderErrorKind, ProviderEvent, ProviderOptions};

/// Build the registry shipped by default: `codex` and `claude-code`.
pub fn default_registry() -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    registry.register(CodexProvider::new());
    registry.register(ClaudeCodeProvider::new());
    registry
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_registry_has_both_named_providers() {
        let registry = default_registry();
        assert!(registry.get("codex").is_some());
        assert!(registry.get("claude-code").is_some());
        assert_eq!(registry.len(), 2);
    }
}
