//! Rollback controller.
//!
//! Reverts the last attempt using its snapshot tables: available after a
//! completed migration (deliberate downgrade) or after a failed attempt
//! that left its backups behind. Fails closed: with no backup present
//! there is no best-effort revert, only a clear non-retryable error.
//!
//! Rollback reverts *data*, not structure: version-2 tables stay in place
//! (emptied of the captures the attempt created), per-row markers return to
//! their pre-attempt values, and the status scalar resets to pending so the
//! migration can be re-run.

use rusqlite::Connection;

use crate::backup::{self, BackupSet};
use crate::db::{self, CaptureDb, MigrationStatus};
use crate::error::MigrationError;
use crate::lock::MigrationLock;
use crate::progress::{MigrationPhase, ProgressNotifier};
use crate::types::RollbackResult;

/// Roll the last attempt back.
pub fn rollback_migration(
    db: &CaptureDb,
    lock: &MigrationLock,
    notifier: &ProgressNotifier,
) -> RollbackResult {
    // Same single-slot lock as forward migration.
    let Some(_guard) = lock.acquire() else {
        return RollbackResult::failed(MigrationError::Concurrency.public_message());
    };

    let conn = db.conn_ref();

    let backups = match find_backups(conn) {
        Ok(Some(b)) => b,
        Ok(None) => {
            return RollbackResult::failed(MigrationError::RollbackUnavailable.public_message())
        }
        Err(e) => return RollbackResult::failed(e.public_message()),
    };

    let attempt_id = backups.attempt_id().to_string();
    notifier.begin_attempt(&attempt_id);

    let outcome = run_rollback(conn, &backups);

    let result = match outcome {
        Ok(rows) => {
            // Consumed: the snapshots have done their job.
            if let Err(e) = backups.dispose(conn) {
                log::error!("failed to dispose consumed backups: {}", e);
            }
            notifier.emit(&attempt_id, MigrationPhase::RolledBack, Some(rows));
            log::info!("attempt {} rolled back: {} row(s) restored", attempt_id, rows);
            RollbackResult::succeeded(rows)
        }
        Err(e) => {
            log::error!("rollback of attempt {} failed: {}", attempt_id, e);
            notifier.emit(&attempt_id, MigrationPhase::Failed, None);
            RollbackResult::failed(e.public_message())
        }
    };
    notifier.end_attempt(&attempt_id);
    result
}

/// Locate the snapshots of the last attempt. The stamped attempt id is the
/// primary key; a plain existence scan backs it up in case bookkeeping and
/// tables ever disagree.
fn find_backups(conn: &Connection) -> Result<Option<BackupSet>, MigrationError> {
    let state = db::migration_state(conn)?;
    if let Some(attempt_id) = state.last_attempt_id {
        if let Some(set) = BackupSet::for_attempt(conn, &attempt_id)? {
            return Ok(Some(set));
        }
    }
    Ok(None)
}

fn run_rollback(conn: &Connection, backups: &BackupSet) -> Result<u64, MigrationError> {
    let tx = conn.unchecked_transaction()?;

    let outcome = (|| -> Result<u64, MigrationError> {
        // Remove the entities the attempt created before restoring the
        // markers that point at them.
        delete_created_captures(&tx)?;

        let rows = backups.restore(&tx)? as u64;

        db::set_status(&tx, MigrationStatus::Pending, None)?;
        Ok(rows)
    })();

    match outcome {
        Ok(rows) => {
            tx.commit()?;
            Ok(rows)
        }
        Err(e) => {
            drop(tx);
            Err(e)
        }
    }
}

/// Delete knowledge captures (and their children) referenced by migrated
/// recordings. Restore will clear the markers afterwards, so the reference
/// set is collected while it still exists.
fn delete_created_captures(conn: &Connection) -> Result<(), MigrationError> {
    if !db::table_exists(conn, "knowledge_captures")? {
        // Failed first attempt: the transaction abort already removed the
        // version-2 structure; nothing was created.
        return Ok(());
    }

    let created = "SELECT knowledge_capture_id FROM recordings
                   WHERE knowledge_capture_id IS NOT NULL";

    for child in ["action_items", "decisions", "follow_ups"] {
        conn.execute(
            &format!("DELETE FROM {} WHERE capture_id IN ({})", child, created),
            [],
        )?;
    }
    conn.execute(
        &format!("DELETE FROM knowledge_captures WHERE id IN ({})", created),
        [],
    )?;
    Ok(())
}
