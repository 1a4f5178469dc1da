//! Engine-wide runtime configuration.
//!
//! Resolved once per process invocation from environment variables with
//! explicit defaults, mirroring the store's own `StoreConfig::from_env`
//! shape. Never re-read mid-run.

use std::env;
use std::path::PathBuf;

use trellis_db::config::StoreConfig;

/// Process-wide configuration: where the store lives and where worktrees
/// and repository clones are allowed to land.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub store: StoreConfig,
    /// Root all worktree and repository paths must resolve within.
    pub sandbox_dir: PathBuf,
}

impl EngineConfig {
    pub const DEFAULT_SANDBOX_DIR: &str = ".trellis/sandbox";

    /// Resolve configuration from the environment: `ALPHRED_DB_PATH` for the
    /// store connection, `ALPHRED_SANDBOX_DIR` for the sandbox root.
    pub fn from_env() -> Self {
        let sandbox_dir = env::var("ALPHRED_SANDBOX_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from(Self::DEFAULT_SANDBOX_DIR));

        Self { store: StoreConfig::from_env(), sandbox_dir }
    }

    /// Build a config from explicit values (tests, CLI flags).
    pub fn new(database_url: impl Into<String>, sandbox_dir: impl Into<PathBuf>) -> Self {
        Self { store: StoreConfig::new(database_url), sandbox_dir: sandbox_dir.into() }
    }

    /// Render a starter config file body for `trellis init`.
    pub fn starter_toml(&self) -> String {
        format!(
            "# trellis configuration\n\
             database_url = {:?}\n\
             sandbox_dir = {:?}\n",
            self.store.database_url,
            self.sandbox_dir.to_string_lossy(),
        )
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_sandbox_dir() {
        let config = EngineConfig::new("postgresql://localhost/trellis", EngineConfig::DEFAULT_SANDBOX_DIR);
        assert_eq!(config.sandbox_dir, PathBuf::from(".trellis/sandbox"));
    }

    #[test]
    fn starter_toml_includes_both_fields() {
        let config = EngineConfig::new("postgresql://localhost/trellis", "/var/trellis/sandbox");
        let toml = config.starter_toml();
        assert!(toml.contains("database_url"));
        assert!(toml.contains("sandbox_dir"));
    }
}
