//! `trellis db init` -- create the configured database and apply migrations.

use trellis_core::EngineConfig;
use trellis_db::pool;

use crate::error::CliError;

pub async fn init(config: &EngineConfig) -> Result<(), CliError> {
    println!("initializing trellis database at {}", config.store.database_url);

    pool::ensure_database_exists(&config.store).await.map_err(CliError::runtime)?;
    let db_pool = pool::create_pool(&config.store).await.map_err(CliError::runtime)?;
    pool::run_migrations(&db_pool).await.map_err(CliError::runtime)?;

    let counts = pool::table_counts(&db_pool).await.map_err(CliError::runtime)?;
    println!("database ready. tables:");
    for (table, count) in &counts {
        println!("  {table}: {count} rows");
    }

    db_pool.close().await;
    Ok(())
}
