//! Schema migration to multiple categories per product.
//!
//! Runs backup, schema reset, `add_multiple_categories` and restore in one
//! go. The reset drops all data; if anything fails after it, the error names
//! the backup file and the two commands that finish the migration by hand.
//!
//! # Usage
//!
//! ```bash
//! flor-cli migrate
//! ```
//!
//! Ctrl-C stops the run only until the schema reset begins.
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` - `PostgreSQL` connection string
//! - `DB_MAX_CONNECTIONS` - Pool size (default: 10)
//! - `BACKUP_DIR` - Output directory (default: backups)
//! - `RESTORE_CONCURRENCY` - Upserts in flight per pass (default: 8)

use std::process::ExitCode;

use tracing::{error, info, warn};

use flor_migrate::config::{DatabaseConfig, MigrateConfig};
use flor_migrate::orchestrator::{MigrationOutcome, MigrationPlan, Orchestrator, StopSignal};
use flor_migrate::replay::ReplayOptions;
use flor_migrate::store::PgBinder;

/// Exit status for a run stopped by the operator.
const EXIT_CANCELLED: u8 = 130;

/// Run the full migration.
///
/// Fatal phase errors are reported here and turned into exit code 1.
///
/// # Errors
///
/// Returns an error only if the configuration cannot be loaded.
pub async fn run() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let database = DatabaseConfig::from_env()?;
    let config = MigrateConfig::from_env()?;

    let plan = MigrationPlan {
        replay: ReplayOptions {
            concurrency: config.restore_concurrency,
        },
        ..MigrationPlan::new(config.backup_dir)
    };
    let binder = PgBinder::new(database.url, database.max_connections);

    let stop = StopSignal::new();
    let listener = {
        let stop = stop.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Ctrl-C received");
                stop.request();
            }
        })
    };

    let result = Orchestrator::new(binder, plan, stop).run().await;
    listener.abort();

    match result {
        Ok(MigrationOutcome::Completed { backup, report }) => {
            #[allow(clippy::print_stdout)]
            {
                println!("Migration complete. Backup kept at {}", backup.display());
                println!("  replayed: {report}");
            }
            Ok(ExitCode::SUCCESS)
        }
        Ok(MigrationOutcome::Cancelled { before, backup }) => {
            info!(before = %before, "Migration cancelled, schema untouched");
            if let Some(backup) = backup {
                #[allow(clippy::print_stdout)]
                {
                    println!("Cancelled before {before}. Backup written to {}", backup.display());
                }
            }
            Ok(ExitCode::from(EXIT_CANCELLED))
        }
        Err(e) => {
            sentry::capture_error(&e);
            error!(phase = %e.phase, "Migration failed");
            #[allow(clippy::print_stderr)]
            {
                eprintln!("{e}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}
