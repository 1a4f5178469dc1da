//! `trellis init` -- write a starter config file for local development.

use trellis_core::EngineConfig;

use crate::config::{self, ConfigFile};
use crate::error::CliError;

pub fn run(force: bool) -> Result<(), CliError> {
    let path = config::config_path();
    if path.exists() && !force {
        return Err(CliError::runtime(anyhow::anyhow!(
            "config file already exists at {}; pass --force to overwrite",
            path.display()
        )));
    }

    let engine_config = EngineConfig::default();
    let file = ConfigFile {
        database_url: engine_config.store.database_url.clone(),
        sandbox_dir: engine_config.sandbox_dir.to_string_lossy().into_owned(),
    };
    config::save_config(&file).map_err(CliError::runtime)?;

    println!("config written to {}", path.display());
    println!("{}", engine_config.starter_toml());
    println!("next: run `trellis db init` to create and migrate the database.");

    Ok(())
}
