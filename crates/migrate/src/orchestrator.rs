//! Schema transition workflow.
//!
//! Runs the full migration as a strict sequence of phases:
//!
//! ```text
//! GenerateSchemaBindings -> Backup -> ResetSchema -> ApplyNewMigration
//!     -> RegenerateBindings -> Restore -> Done
//! ```
//!
//! `ResetSchema` drops every row. There is no rollback: once it has started,
//! the only way back is forward, by replaying the backup written in the
//! `Backup` phase. Every failure after that point reports the backup path
//! and the commands that finish the job by hand.
//!
//! A stop request is honoured between phases up to and including the start
//! of `ResetSchema`. After that it is logged and ignored.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use thiserror::Error;
use tracing::{error, info, instrument, warn};

use crate::replay::{self, ReplayError, ReplayOptions, ReplayReport};
use crate::snapshot::{self, SnapshotError};
use crate::store::{ADD_MULTIPLE_CATEGORIES, Binder, Store, StoreError};

/// A step of the migration workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    GenerateSchemaBindings,
    Backup,
    ResetSchema,
    ApplyNewMigration,
    RegenerateBindings,
    Restore,
    Done,
}

impl Phase {
    /// The phase that follows this one.
    #[must_use]
    pub const fn next(self) -> Option<Self> {
        match self {
            Self::GenerateSchemaBindings => Some(Self::Backup),
            Self::Backup => Some(Self::ResetSchema),
            Self::ResetSchema => Some(Self::ApplyNewMigration),
            Self::ApplyNewMigration => Some(Self::RegenerateBindings),
            Self::RegenerateBindings => Some(Self::Restore),
            Self::Restore => Some(Self::Done),
            Self::Done => None,
        }
    }

    /// Whether a stop request may still end the workflow before this phase.
    #[must_use]
    pub const fn is_cancellable(self) -> bool {
        matches!(
            self,
            Self::GenerateSchemaBindings | Self::Backup | Self::ResetSchema
        )
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::GenerateSchemaBindings => "GenerateSchemaBindings",
            Self::Backup => "Backup",
            Self::ResetSchema => "ResetSchema",
            Self::ApplyNewMigration => "ApplyNewMigration",
            Self::RegenerateBindings => "RegenerateBindings",
            Self::Restore => "Restore",
            Self::Done => "Done",
        };
        f.write_str(name)
    }
}

/// The underlying failure of a phase.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Snapshot(#[from] SnapshotError),
    #[error(transparent)]
    Replay(#[from] ReplayError),
}

/// A fatal workflow error.
///
/// `backup` is set once the `Backup` phase has written a file; from then on
/// that file is the recovery point.
#[derive(Debug)]
pub struct TransitionError {
    pub phase: Phase,
    pub backup: Option<PathBuf>,
    pub source: PhaseError,
}

impl TransitionError {
    /// Manual steps that complete the migration from the backup.
    #[must_use]
    pub fn recovery_steps(&self) -> Option<[String; 2]> {
        let backup = self.backup.as_ref()?;
        Some([
            "confirm the database is on the multi-category schema \
             (`flor-cli restore` rebinds to it on connect and refuses any other)"
                .to_owned(),
            format!("flor-cli restore {}", backup.display()),
        ])
    }
}

impl fmt::Display for TransitionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "migration failed in phase {}: {}", self.phase, self.source)?;
        match (&self.backup, self.recovery_steps()) {
            (Some(backup), Some([bindings, restore])) => {
                write!(f, "\nbackup: {}", backup.display())?;
                write!(f, "\nto recover:\n  1. {bindings}\n  2. {restore}")
            }
            _ => f.write_str("\nno data was changed"),
        }
    }
}

impl std::error::Error for TransitionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.source)
    }
}

/// How the workflow ended without a fatal error.
#[derive(Debug)]
pub enum MigrationOutcome {
    Completed {
        backup: PathBuf,
        report: ReplayReport,
    },
    Cancelled {
        before: Phase,
        backup: Option<PathBuf>,
    },
}

/// Operator stop request, shared with a signal handler.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What the workflow should do.
#[derive(Debug, Clone)]
pub struct MigrationPlan {
    pub backup_dir: PathBuf,
    /// Migration applied after the reset.
    pub migration: String,
    pub replay: ReplayOptions,
}

impl MigrationPlan {
    /// The category migration with default replay options.
    #[must_use]
    pub fn new(backup_dir: impl Into<PathBuf>) -> Self {
        Self {
            backup_dir: backup_dir.into(),
            migration: ADD_MULTIPLE_CATEGORIES.to_owned(),
            replay: ReplayOptions::default(),
        }
    }
}

fn fail<E: Into<PhaseError>>(
    phase: Phase,
    backup: Option<&Path>,
) -> impl FnOnce(E) -> TransitionError + '_ {
    move |e| {
        let err = TransitionError {
            phase,
            backup: backup.map(Path::to_path_buf),
            source: e.into(),
        };
        error!(phase = %phase, backup = ?err.backup, error = %err.source, "Migration phase failed");
        err
    }
}

/// Read `backup` and replay it into `store`, as the `Restore` phase.
///
/// Also used on its own by `flor-cli restore`, so a failed manual restore
/// reports the same phase, backup and recipe as a failed migration.
///
/// # Errors
///
/// Returns `TransitionError` in phase `Restore` naming `backup` if the file
/// is corrupt or the replay fails.
pub async fn restore_backup<S: Store>(
    store: &S,
    backup: &Path,
    options: &ReplayOptions,
) -> Result<ReplayReport, TransitionError> {
    let snapshot = snapshot::read(backup)
        .await
        .map_err(fail(Phase::Restore, Some(backup)))?;
    info!(
        version = %snapshot.version,
        taken_at = %snapshot.timestamp,
        stats = %snapshot.stats(),
        "Snapshot loaded"
    );
    replay::restore(store, &snapshot, options)
        .await
        .map_err(fail(Phase::Restore, Some(backup)))
}

/// Drives one migration run.
pub struct Orchestrator<B> {
    binder: B,
    plan: MigrationPlan,
    stop: StopSignal,
}

impl<B: Binder> Orchestrator<B> {
    #[must_use]
    pub const fn new(binder: B, plan: MigrationPlan, stop: StopSignal) -> Self {
        Self { binder, plan, stop }
    }

    /// Returns the cancelled outcome if a stop was requested.
    fn checkpoint(&self, next: Phase, backup: Option<&Path>) -> Option<MigrationOutcome> {
        if !self.stop.is_requested() {
            info!(phase = %next, "Entering phase");
            return None;
        }
        if next.is_cancellable() {
            info!(before = %next, "Stop requested, ending migration before the schema is touched");
            return Some(MigrationOutcome::Cancelled {
                before: next,
                backup: backup.map(Path::to_path_buf),
            });
        }
        warn!(phase = %next, "Stop requested after the schema reset began, ignoring it");
        None
    }

    /// Run every phase in order.
    ///
    /// # Errors
    ///
    /// Returns `TransitionError` naming the failed phase and, once a backup
    /// exists, its path.
    #[instrument(skip(self), fields(migration = %self.plan.migration))]
    pub async fn run(&self) -> Result<MigrationOutcome, TransitionError> {
        if let Some(outcome) = self.checkpoint(Phase::GenerateSchemaBindings, None) {
            return Ok(outcome);
        }
        let store = self
            .binder
            .bind()
            .await
            .map_err(fail(Phase::GenerateSchemaBindings, None))?;

        if let Some(outcome) = self.checkpoint(Phase::Backup, None) {
            return Ok(outcome);
        }
        let backup = snapshot::backup(&store, &self.plan.backup_dir)
            .await
            .map_err(fail(Phase::Backup, None))?;

        if let Some(outcome) = self.checkpoint(Phase::ResetSchema, Some(&backup)) {
            return Ok(outcome);
        }
        warn!(
            backup = %backup.display(),
            "Dropping every table and all data. There is no rollback: recovery is a replay of the backup"
        );
        store
            .reset_schema()
            .await
            .map_err(fail(Phase::ResetSchema, Some(&backup)))?;

        self.checkpoint(Phase::ApplyNewMigration, Some(&backup));
        store
            .apply_migration(&self.plan.migration)
            .await
            .map_err(fail(Phase::ApplyNewMigration, Some(&backup)))?;
        drop(store);

        self.checkpoint(Phase::RegenerateBindings, Some(&backup));
        let store = self
            .binder
            .bind()
            .await
            .map_err(fail(Phase::RegenerateBindings, Some(&backup)))?;

        self.checkpoint(Phase::Restore, Some(&backup));
        let report = restore_backup(&store, &backup, &self.plan.replay).await?;

        info!(phase = %Phase::Done, backup = %backup.display(), report = %report, "Migration complete");
        Ok(MigrationOutcome::Completed { backup, report })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::store::{EntityKind, MemoryBinder, MemoryStore, SchemaShape};

    #[test]
    fn test_phase_sequence() {
        let mut phase = Phase::GenerateSchemaBindings;
        let mut seen = vec![phase];
        while let Some(next) = phase.next() {
            seen.push(next);
            phase = next;
        }
        assert_eq!(seen.len(), 7);
        assert_eq!(seen.last(), Some(&Phase::Done));
    }

    #[test]
    fn test_only_early_phases_are_cancellable() {
        assert!(Phase::Backup.is_cancellable());
        assert!(Phase::ResetSchema.is_cancellable());
        assert!(!Phase::ApplyNewMigration.is_cancellable());
        assert!(!Phase::Restore.is_cancellable());
    }

    #[test]
    fn test_error_display_includes_recipe() {
        let err = TransitionError {
            phase: Phase::Restore,
            backup: Some(PathBuf::from("backups/backup-1736510400000.json")),
            source: PhaseError::Store(StoreError::Schema("boom".to_owned())),
        };
        let text = err.to_string();
        assert!(text.contains("Restore"));
        assert!(text.contains("flor-cli restore backups/backup-1736510400000.json"));
        assert!(text.contains("multi-category schema"));
    }

    #[test]
    fn test_error_without_backup_has_no_recipe() {
        let err = TransitionError {
            phase: Phase::Backup,
            backup: None,
            source: PhaseError::Store(StoreError::Schema("disk full".to_owned())),
        };
        assert!(err.recovery_steps().is_none());
        assert!(err.to_string().contains("no data was changed"));
    }

    #[tokio::test]
    async fn test_run_migrates_empty_legacy_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = MemoryStore::legacy();
        let orchestrator = Orchestrator::new(
            MemoryBinder::new(store.clone()),
            MigrationPlan::new(dir.path()),
            StopSignal::new(),
        );

        let outcome = orchestrator.run().await.unwrap();

        let MigrationOutcome::Completed { backup, report } = outcome else {
            panic!("expected completion");
        };
        assert!(backup.exists());
        assert!(report.default_config);
        assert_eq!(store.rebind().shape(), SchemaShape::MultiCategory);
        assert_eq!(store.count(EntityKind::SiteConfig).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_restore_backup_failure_names_phase_and_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("backup-1736510400000.json");
        tokio::fs::write(&path, b"{\"version\": 2, \"users\": ").await.unwrap();

        let err = restore_backup(&MemoryStore::multi_category(), &path, &ReplayOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.phase, Phase::Restore);
        assert_eq!(err.backup.as_deref(), Some(path.as_path()));
        assert!(matches!(err.source, PhaseError::Snapshot(SnapshotError::Corrupt { .. })));
        let text = err.to_string();
        assert!(text.contains("phase Restore"));
        assert!(text.contains(&format!("flor-cli restore {}", path.display())));
    }

    #[tokio::test]
    async fn test_restore_backup_into_legacy_schema_reports_recipe() {
        let dir = tempfile::tempdir().unwrap();
        let path = snapshot::backup(&MemoryStore::legacy(), dir.path())
            .await
            .unwrap();

        let err = restore_backup(&MemoryStore::legacy(), &path, &ReplayOptions::default())
            .await
            .unwrap_err();

        assert_eq!(err.phase, Phase::Restore);
        assert!(matches!(
            err.source,
            PhaseError::Replay(ReplayError::WrongShape(SchemaShape::Legacy))
        ));
        assert!(err.recovery_steps().is_some());
    }

    #[tokio::test]
    async fn test_stop_before_start_touches_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let stop = StopSignal::new();
        stop.request();
        let orchestrator = Orchestrator::new(
            MemoryBinder::new(MemoryStore::legacy()),
            MigrationPlan::new(dir.path().join("backups")),
            stop,
        );

        let outcome = orchestrator.run().await.unwrap();

        assert!(matches!(
            outcome,
            MigrationOutcome::Cancelled {
                before: Phase::GenerateSchemaBindings,
                backup: None
            }
        ));
        assert!(!dir.path().join("backups").exists());
    }
}
