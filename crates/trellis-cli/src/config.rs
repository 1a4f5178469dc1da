//! Configuration file management for trellis.
//!
//! Provides a TOML config file at `~/.config/trellis/config.toml` and a
//! resolution chain: CLI flag > env var > config file > default, mirroring
//! `trellis_core::EngineConfig::from_env`'s own variable names.

use std::path::PathBuf;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use trellis_core::EngineConfig;
use trellis_db::config::StoreConfig;

#[derive(Debug, Serialize, Deserialize)]
pub struct ConfigFile {
    pub database_url: String,
    pub sandbox_dir: String,
}

/// Always uses XDG layout: `$XDG_CONFIG_HOME/trellis` or `~/.config/trellis`.
pub fn config_dir() -> PathBuf {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        return PathBuf::from(xdg).join("trellis");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("trellis")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn load_config() -> Result<ConfigFile> {
    let path = config_path();
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read config file at {}", path.display()))?;
    toml::from_str(&contents).context("failed to parse config file")
}

pub fn save_config(config: &ConfigFile) -> Result<()> {
    let path = config_path();
    let dir = config_dir();
    std::fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create config directory {}", dir.display()))?;

    let contents = toml::to_string_pretty(config).context("failed to serialize config")?;
    std::fs::write(&path, &contents)
        .with_context(|| format!("failed to write config file at {}", path.display()))?;

    Ok(())
}

/// Resolve an [`EngineConfig`] using the chain: CLI flag > env var > config
/// file > default.
pub fn resolve(cli_db_url: Option<&str>) -> Result<EngineConfig> {
    let file = load_config().ok();

    let database_url = if let Some(url) = cli_db_url {
        url.to_owned()
    } else if let Ok(url) = std::env::var("ALPHRED_DB_PATH") {
        url
    } else if let Some(ref cfg) = file {
        cfg.database_url.clone()
    } else {
        StoreConfig::DEFAULT_URL.to_owned()
    };

    let sandbox_dir = if let Ok(dir) = std::env::var("ALPHRED_SANDBOX_DIR") {
        dir
    } else if let Some(ref cfg) = file {
        cfg.sandbox_dir.clone()
    } else {
        EngineConfig::DEFAULT_SANDBOX_DIR.to_owned()
    };

    Ok(EngineConfig::new(database_url, sandbox_dir))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_with_cli_flag_overrides_env() {
        unsafe { std::env::set_var("ALPHRED_DB_PATH", "postgresql://env:5432/envdb") };
        let config = resolve(Some("postgresql://cli:5432/clidb")).unwrap();
        assert_eq!(config.store.database_url, "postgresql://cli:5432/clidb");
        unsafe { std::env::remove_var("ALPHRED_DB_PATH") };
    }

    #[test]
    fn resolve_defaults_when_nothing_set() {
        unsafe { std::env::remove_var("ALPHRED_DB_PATH") };
        unsafe { std::env::remove_var("ALPHRED_SANDBOX_DIR") };
        let config = resolve(None).unwrap();
        assert_eq!(config.store.database_url, StoreConfig::DEFAULT_URL);
        assert_eq!(config.sandbox_dir, PathBuf::from(EngineConfig::DEFAULT_SANDBOX_DIR));
    }

    #[test]
    fn config_path_ends_with_expected_filename() {
        let path = config_path();
        assert!(path.ends_with("trellis/config.toml"));
    }
}
