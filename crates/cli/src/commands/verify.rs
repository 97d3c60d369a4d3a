//! Dry-run a snapshot replay.
//!
//! Replays the file into an empty in-memory store on the multi-category
//! schema, with the same reference and constraint checks as a real restore.
//! No database is touched.
//!
//! # Usage
//!
//! ```bash
//! flor-cli verify backups/backup-1736510400000.json
//! ```

use std::path::Path;

use flor_migrate::config::MigrateConfig;
use flor_migrate::replay::{self, ReplayOptions};
use flor_migrate::snapshot;
use flor_migrate::store::MemoryStore;

/// Replay `path` into memory and print what it holds.
///
/// # Errors
///
/// Returns an error if the snapshot is corrupt or would not replay cleanly.
pub async fn run(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let config = MigrateConfig::from_env()?;
    let snapshot = snapshot::read(path).await?;

    let store = MemoryStore::multi_category();
    let options = ReplayOptions {
        concurrency: config.restore_concurrency,
    };
    let report = replay::restore(&store, &snapshot, &options).await?;

    #[allow(clippy::print_stdout)]
    {
        println!("{} ({} taken {})", path.display(), snapshot.version, snapshot.timestamp);
        println!("  snapshot: {}", snapshot.stats());
        println!("  replayed: {report}");
    }
    Ok(())
}
