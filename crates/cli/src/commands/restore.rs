//! Replay a snapshot into the database.
//!
//! This is the manual recovery path after a failed `migrate`: once the
//! schema is on the multi-category shape, replaying the backup finishes the
//! job. Replays are idempotent and can be repeated.
//!
//! # Usage
//!
//! ```bash
//! flor-cli restore backups/backup-1736510400000.json
//! ```
//!
//! # Environment Variables
//!
//! - `DATABASE_URL` - `PostgreSQL` connection string
//! - `DB_MAX_CONNECTIONS` - Pool size (default: 10)
//! - `RESTORE_CONCURRENCY` - Upserts in flight per pass (default: 8)

use std::path::Path;
use std::process::ExitCode;

use tracing::error;

use flor_migrate::config::{DatabaseConfig, MigrateConfig};
use flor_migrate::orchestrator::{Phase, TransitionError, restore_backup};
use flor_migrate::replay::{ReplayOptions, ReplayReport};
use flor_migrate::store::{Binder, PgBinder};

/// Read `path` and replay it.
///
/// Replay failures are reported here, with the snapshot path and the command
/// to re-run, and turned into exit code 1.
///
/// # Errors
///
/// Returns an error only if the configuration cannot be loaded.
pub async fn run(path: &Path) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let database = DatabaseConfig::from_env()?;
    let config = MigrateConfig::from_env()?;
    let options = ReplayOptions {
        concurrency: config.restore_concurrency,
    };

    tracing::info!("Connecting to database...");
    let binder = PgBinder::new(database.url, database.max_connections);

    match replay_into(&binder, path, &options).await {
        Ok(report) => {
            #[allow(clippy::print_stdout)]
            {
                println!("Restored {}: {report}", path.display());
            }
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            sentry::capture_error(&e);
            error!(phase = %e.phase, backup = %path.display(), "Restore failed");
            #[allow(clippy::print_stderr)]
            {
                eprintln!("{e}");
            }
            Ok(ExitCode::FAILURE)
        }
    }
}

async fn replay_into<B: Binder>(
    binder: &B,
    path: &Path,
    options: &ReplayOptions,
) -> Result<ReplayReport, TransitionError> {
    let store = binder.bind().await.map_err(|e| TransitionError {
        phase: Phase::RegenerateBindings,
        backup: Some(path.to_path_buf()),
        source: e.into(),
    })?;
    restore_backup(&store, path, options).await
}
