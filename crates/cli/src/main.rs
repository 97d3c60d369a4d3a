//! Flor de Maio CLI - Backup, restore and schema migration tools.
//!
//! # Usage
//!
//! ```bash
//! # Write a snapshot of the live database to BACKUP_DIR
//! flor-cli backup
//!
//! # Replay a snapshot into the (already migrated) database
//! flor-cli restore backups/backup-1736510400000.json
//!
//! # Backup, reset the schema, apply add_multiple_categories and restore
//! flor-cli migrate
//!
//! # Dry-run a replay into an in-memory store, no database needed
//! flor-cli verify backups/backup-1736510400000.json
//!
//! # Create the default site config if missing
//! flor-cli seed
//! ```
//!
//! # Exit codes
//!
//! - `0` - completed
//! - `1` - failed (`migrate` and `restore` name the phase, the backup to
//!   recover from, if any, and the command to re-run)
//! - `130` - `migrate` stopped by Ctrl-C before the schema was reset

#![cfg_attr(not(test), forbid(unsafe_code))]

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use sentry::integrations::tracing as sentry_tracing;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use flor_migrate::config::TelemetryConfig;

mod commands;

#[derive(Parser)]
#[command(name = "flor-cli")]
#[command(author, version, about = "Flor de Maio database tools")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a snapshot of the database
    Backup,
    /// Replay a snapshot into the database
    Restore {
        /// Snapshot file written by `backup` or `migrate`
        path: PathBuf,
    },
    /// Back up, reset the schema, apply the category migration and restore
    Migrate,
    /// Replay a snapshot into an in-memory store and report what it holds
    Verify {
        /// Snapshot file to check
        path: PathBuf,
    },
    /// Create the default site config if none exists
    Seed,
}

/// Initialize Sentry error tracking and return guard that must be kept alive.
fn init_sentry(config: &TelemetryConfig) -> Option<sentry::ClientInitGuard> {
    let dsn = config.sentry_dsn.as_ref()?;

    let guard = sentry::init((
        dsn.as_str(),
        sentry::ClientOptions {
            release: sentry::release_name!(),
            environment: config
                .sentry_environment
                .clone()
                .map(std::borrow::Cow::Owned),
            attach_stacktrace: true,
            ..Default::default()
        },
    ));

    Some(guard)
}

/// Filter tracing events to Sentry event types.
fn sentry_event_filter(metadata: &tracing::Metadata<'_>) -> sentry_tracing::EventFilter {
    match *metadata.level() {
        tracing::Level::ERROR | tracing::Level::WARN => sentry_tracing::EventFilter::Event,
        tracing::Level::INFO | tracing::Level::DEBUG => sentry_tracing::EventFilter::Breadcrumb,
        _ => sentry_tracing::EventFilter::Ignore,
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let telemetry = TelemetryConfig::from_env();

    // Sentry must be initialized before the tracing subscriber
    let sentry_guard = init_sentry(&telemetry);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "flor_cli=info,flor_migrate=info".into());

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .with(sentry_tracing::layer().event_filter(sentry_event_filter))
        .init();

    if sentry_guard.is_some() {
        tracing::info!("Sentry initialized");
    }

    let cli = Cli::parse();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!("Command failed: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    match cli.command {
        Commands::Backup => commands::backup::run().await?,
        Commands::Restore { path } => return Ok(commands::restore::run(&path).await?),
        Commands::Migrate => return Ok(commands::migrate::run().await?),
        Commands::Verify { path } => commands::verify::run(&path).await?,
        Commands::Seed => commands::seed::run().await?,
    }
    Ok(ExitCode::SUCCESS)
}
