//! CLI subcommands.
//!
//! Every command except `verify` needs `DATABASE_URL`.

pub mod backup;
pub mod migrate;
pub mod restore;
pub mod seed;
pub mod verify;

use flor_migrate::config::DatabaseConfig;
use flor_migrate::store::{Binder, PgBinder, PgStore};

/// Connect to the database named by the environment.
async fn connect() -> Result<PgStore, Box<dyn std::error::Error>> {
    let database = DatabaseConfig::from_env()?;
    tracing::info!("Connecting to database...");
    let store = PgBinder::new(database.url, database.max_connections)
        .bind()
        .await?;
    Ok(store)
}
