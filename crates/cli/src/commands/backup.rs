//! Snapshot the live database.
//!
//! # Usage
//!
//! ```bash
//! flor-cli backup
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` - `PostgreSQL` connection string
//! - `BACKUP_DIR` - Output directory (default: backups)

use flor_migrate::config::MigrateConfig;
use flor_migrate::snapshot;

/// Write a snapshot file and print its path.
///
/// # Errors
///
/// Returns an error if configuration is missing, the database cannot be
/// reached or the file cannot be written.
pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config = MigrateConfig::from_env()?;
    let store = super::connect().await?;

    let path = snapshot::backup(&store, &config.backup_dir).await?;

    #[allow(clippy::print_stdout)]
    {
        println!("{}", path.display());
    }
    Ok(())
}
