//! Engine facade.
//!
//! One `MigrationEngine` per process owns the database connection, the
//! exclusive attempt lock, the progress notifier, and the loaded canonical
//! schema definition. Callers (IPC command layer, maintenance binary) go
//! through the request/response operations here and never touch the
//! components directly.

use std::path::PathBuf;
use std::sync::mpsc::Receiver;

use crate::backup::{self, BackupSet};
use crate::cleanup::{self, CleanupPreview, CleanupReport};
use crate::db::{self, CaptureDb};
use crate::error::MigrationError;
use crate::executor;
use crate::lock::MigrationLock;
use crate::progress::{ProgressEvent, ProgressNotifier, SubscriptionToken};
use crate::rollback;
use crate::schema::SchemaDefinition;
use crate::types::{EngineStatus, MigrationResult, RollbackResult};

pub struct MigrationEngine {
    db: CaptureDb,
    lock: MigrationLock,
    notifier: ProgressNotifier,
    schema: SchemaDefinition,
}

impl MigrationEngine {
    /// Build an engine over an already-opened database, using the bundled
    /// canonical schema definition.
    pub fn new(db: CaptureDb) -> Result<Self, MigrationError> {
        Ok(Self::with_schema(db, SchemaDefinition::load_bundled()?))
    }

    /// Build an engine with an explicit schema definition (devtools).
    pub fn with_schema(db: CaptureDb, schema: SchemaDefinition) -> Self {
        Self {
            db,
            lock: MigrationLock::new(),
            notifier: ProgressNotifier::new(),
            schema,
        }
    }

    /// Open the default database (`~/.captureos/capture.db`) and build an
    /// engine over it.
    pub fn open() -> Result<Self, MigrationError> {
        Ok(Self::new(CaptureDb::open()?)?)
    }

    /// Open a database at an explicit path and build an engine over it.
    pub fn open_at(path: PathBuf) -> Result<Self, MigrationError> {
        Ok(Self::new(CaptureDb::open_at(path)?)?)
    }

    pub fn db(&self) -> &CaptureDb {
        &self.db
    }

    // =========================================================================
    // Operations
    // =========================================================================

    /// Count damage without mutating anything. Takes the attempt lock: scans
    /// are safe next to ordinary reads but not next to a running attempt.
    pub fn preview_cleanup(&self) -> Result<CleanupPreview, MigrationError> {
        let _guard = self.lock.acquire().ok_or(MigrationError::Concurrency)?;
        cleanup::preview(self.db.conn_ref())
    }

    /// Run the standalone repair pass: snapshot affected rows, repair each
    /// category in isolation, dispose the snapshots on full success.
    pub fn run_cleanup(&self) -> Result<CleanupReport, MigrationError> {
        let _guard = self.lock.acquire().ok_or(MigrationError::Concurrency)?;
        let conn = self.db.conn_ref();

        // This attempt supersedes any snapshots left by earlier ones.
        backup::dispose_stale(conn)?;

        let attempt_id = uuid::Uuid::new_v4().simple().to_string();
        let backups = BackupSet::create(conn, &attempt_id, &cleanup::backup_specs())?;

        let report = cleanup::repair(conn);

        if report.is_full_success() {
            backups.dispose(conn)?;
        } else {
            // Keep the snapshots for inspection; the failure set is already
            // in the report, sanitized.
            log::warn!(
                "{}",
                MigrationError::PartialCleanup {
                    failed: report.errors.len(),
                    total: 4,
                }
            );
        }

        Ok(report)
    }

    /// Full Locked→Committed/Failed migration flow.
    pub fn run_migration(&self) -> MigrationResult {
        executor::run_migration(&self.db, &self.lock, &self.notifier, &self.schema)
    }

    /// Revert the last attempt from its snapshots.
    pub fn rollback_migration(&self) -> RollbackResult {
        rollback::rollback_migration(&self.db, &self.lock, &self.notifier)
    }

    /// Current persisted version/status/bookkeeping.
    pub fn status(&self) -> Result<EngineStatus, MigrationError> {
        let state = db::migration_state(self.db.conn_ref())?;
        Ok(EngineStatus {
            current_version: state.schema_version,
            status: state.status,
            last_attempt_at: state.last_attempt_at,
            last_error: state.last_error,
        })
    }

    // =========================================================================
    // Progress events
    // =========================================================================

    /// Subscribe to phase-transition events. Returns the token to pass to
    /// [`unsubscribe_progress`](Self::unsubscribe_progress) plus the
    /// receiving end of the event channel.
    pub fn subscribe_progress(&self) -> (SubscriptionToken, Receiver<ProgressEvent>) {
        self.notifier.subscribe()
    }

    pub fn unsubscribe_progress(&self, token: SubscriptionToken) {
        self.notifier.unsubscribe(token);
    }
}
