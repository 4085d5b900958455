//! Migration executor.
//!
//! Orchestrates one attempt: lock → backup → cleanup → schema-apply →
//! data-transform → verify → commit, with Failed reachable from every
//! non-terminal step. All destructive work after the backup freeze runs
//! inside a single transaction, so an abort at any step leaves no partial
//! writes behind. The backup tables are created *before* the transaction
//! begins and therefore survive an abort for inspection and rollback.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::backup::{self, BackupSet, BackupSpec};
use crate::cleanup::{self, DELETED_SENTINEL};
use crate::db::{self, CaptureDb, MigrationStatus};
use crate::error::MigrationError;
use crate::lock::MigrationLock;
use crate::normalizer::{self, ItemKind, NormalizedItem};
use crate::progress::{MigrationPhase, ProgressNotifier};
use crate::schema::SchemaDefinition;
use crate::types::{MigrationResult, MigrationStats};
use crate::verify;

/// Marker value stamped on a recording once its capture exists.
pub const MIGRATED_MARKER: &str = "migrated";

/// Title used when neither meeting nor filename yields one.
const FALLBACK_TITLE: &str = "Untitled capture";

/// Run one full migration attempt.
///
/// Never panics and never returns a raw error: the outcome, including every
/// sanitized failure message, is carried by [`MigrationResult`].
pub fn run_migration(
    db: &CaptureDb,
    lock: &MigrationLock,
    notifier: &ProgressNotifier,
    schema: &SchemaDefinition,
) -> MigrationResult {
    // Non-blocking: a concurrent attempt is refused immediately, and the
    // database is left untouched.
    let Some(_guard) = lock.acquire() else {
        return MigrationResult::failed(MigrationError::Concurrency.public_message());
    };

    let conn = db.conn_ref();

    let state = match db::migration_state(conn) {
        Ok(s) => s,
        Err(e) => return MigrationResult::failed(MigrationError::from(e).public_message()),
    };
    if state.status == MigrationStatus::Completed && state.schema_version >= schema.version {
        // Re-running a completed migration is a no-op by construction.
        log::info!(
            "migration already completed at schema version {}",
            state.schema_version
        );
        return MigrationResult::succeeded(MigrationStats::default());
    }

    let attempt_id = uuid::Uuid::new_v4().simple().to_string();
    notifier.begin_attempt(&attempt_id);
    notifier.emit(&attempt_id, MigrationPhase::Locked, None);

    let outcome = run_attempt(conn, notifier, schema, &attempt_id, state.schema_version);

    let result = match outcome {
        Ok(stats) => {
            notifier.emit(&attempt_id, MigrationPhase::Committed, Some(stats.captures_created));
            log::info!(
                "migration attempt {} committed: {} capture(s) from {} recording(s)",
                attempt_id,
                stats.captures_created,
                stats.recordings_migrated
            );
            MigrationResult::succeeded(stats)
        }
        Err(e) => {
            let public = e.public_message();
            if let Err(re) = db::record_last_error(conn, &public) {
                log::error!("failed to record attempt error: {}", re);
            }
            notifier.emit(&attempt_id, MigrationPhase::Failed, None);
            log::error!("migration attempt {} failed: {}", attempt_id, e);
            MigrationResult::failed(public)
        }
    };
    notifier.end_attempt(&attempt_id);
    result
}

fn run_attempt(
    conn: &Connection,
    notifier: &ProgressNotifier,
    schema: &SchemaDefinition,
    attempt_id: &str,
    current_version: i64,
) -> Result<MigrationStats, MigrationError> {
    // Whole-file hot copy next to the database, cheap extra safety on top
    // of the row-level snapshots. Skipped for in-memory databases.
    backup_database_file(conn)?;

    // A new attempt supersedes whatever snapshots earlier attempts left.
    backup::dispose_stale(conn)?;
    db::stamp_attempt(conn, attempt_id, &Utc::now().to_rfc3339())?;

    // Freeze affected rows before the first destructive statement. Runs in
    // autocommit so the snapshot outlives a transaction abort.
    notifier.emit(attempt_id, MigrationPhase::BackingUp, None);
    let specs = attempt_backup_specs(conn)?;
    let backups = BackupSet::create(conn, attempt_id, &specs)?;

    let tx = conn.unchecked_transaction()?;

    let outcome = (|| -> Result<MigrationStats, MigrationError> {
        db::set_status(&tx, MigrationStatus::InProgress, None)?;

        // Pre-migration cleanup. Inside the attempt, a failing category is
        // a fault like any other; standalone cleanup is where isolation
        // surfaces to the caller.
        notifier.emit(attempt_id, MigrationPhase::Cleanup, None);
        let cleanup_report = cleanup::repair(&tx);
        if !cleanup_report.is_full_success() {
            return Err(MigrationError::Transaction(format!(
                "cleanup failed: {}",
                cleanup_report.errors.join("; ")
            )));
        }

        // The canonical definition, verbatim. Skipped when the structure is
        // already at target (re-run after a data-only rollback).
        if current_version < schema.version {
            tx.execute_batch(&schema.sql).map_err(|e| {
                MigrationError::Transaction(format!("schema apply failed: {}", e))
            })?;
        }
        notifier.emit(attempt_id, MigrationPhase::SchemaApplied, None);

        let mut stats = migrate_data(&tx)?;
        stats.cleanup = Some(cleanup_report);
        notifier.emit(
            attempt_id,
            MigrationPhase::DataMigrated,
            Some(stats.captures_created),
        );

        verify::verify(&tx)?;
        notifier.emit(attempt_id, MigrationPhase::Verified, None);

        db::set_status(&tx, MigrationStatus::Completed, Some(schema.version))?;
        Ok(stats)
    })();

    match outcome {
        Ok(stats) => {
            tx.commit()?;
            // Snapshots are retained past commit: they are what makes a
            // deliberate downgrade of a completed migration possible. The
            // next attempt sweeps them.
            Ok(stats)
        }
        Err(e) => {
            // Dropping the transaction rolls back every statement since
            // BEGIN. restore() then reapplies the frozen fields; the
            // contract is exact reversal regardless of what the abort
            // already undid.
            drop(tx);
            if let Err(re) = backups.restore(conn) {
                log::error!("restore after failed attempt {}: {}", attempt_id, re);
            }
            // Backup tables stay behind for inspection and rollback.
            Err(e)
        }
    }
}

/// Backup specs for a migration attempt: every cleanup category plus the
/// migration cohort (rows whose markers will be stamped).
fn attempt_backup_specs(conn: &Connection) -> Result<Vec<BackupSpec>, MigrationError> {
    let mut cohort = format!(
        "(COALESCE(file_path, '') <> '{}'
          AND id IN (SELECT recording_id FROM transcripts WHERE recording_id IS NOT NULL))",
        DELETED_SENTINEL
    );
    // On a first migration the marker column does not exist yet; on a
    // re-run it restricts the cohort to unmigrated rows.
    if db::column_exists(conn, "recordings", "migration_status")? {
        cohort = format!("({} AND migration_status IS NULL)", cohort);
    }

    let mut specs = cleanup::backup_specs();
    for spec in &mut specs {
        if spec.table == "recordings" {
            spec.predicate = format!("({}) OR {}", spec.predicate, cohort);
        }
    }
    Ok(specs)
}

/// Create one knowledge capture per eligible recording/transcript pair and
/// stamp the source recording's markers.
fn migrate_data(conn: &Connection) -> Result<MigrationStats, MigrationError> {
    let mut stats = MigrationStats::default();
    let now = Utc::now().to_rfc3339();

    let pairs: Vec<(String, String, String, Option<String>)> = {
        let mut stmt = conn.prepare(&format!(
            "SELECT id, filename, created_at, meeting_id
             FROM recordings
             WHERE COALESCE(file_path, '') <> '{}'
               AND migration_status IS NULL
               AND id IN (SELECT recording_id FROM transcripts WHERE recording_id IS NOT NULL)
             ORDER BY created_at, rowid",
            DELETED_SENTINEL
        ))?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?))
        })?;
        let mut pairs = Vec::new();
        for row in rows {
            pairs.push(row?);
        }
        pairs
    };

    for (rec_id, filename, rec_created_at, rec_meeting_id) in pairs {
        let (transcript_id, actions_raw, decisions_raw, follow_ups_raw): (
            String,
            Option<String>,
            Option<String>,
            Option<String>,
        ) = conn.query_row(
            "SELECT id, action_items, decisions, follow_ups
             FROM transcripts
             WHERE recording_id = ?1
             ORDER BY created_at, rowid
             LIMIT 1",
            params![rec_id],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
        )?;

        // Meeting link: the recording's own reference (validated by the
        // cleanup pass) or a meeting pointing back at this recording.
        let meeting_id: Option<String> = match rec_meeting_id {
            Some(m) => Some(m),
            None => conn
                .query_row(
                    "SELECT id FROM meetings WHERE recording_id = ?1 LIMIT 1",
                    params![rec_id],
                    |row| row.get(0),
                )
                .optional()?,
        };

        let title = capture_title(conn, meeting_id.as_deref(), &filename)?;

        // Deterministic id: re-running against the same source row would
        // produce the same capture identity.
        let capture_id = format!("kc-{}", rec_id);
        conn.execute(
            "INSERT INTO knowledge_captures
                (id, title, captured_at, recording_id, meeting_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![capture_id, title, rec_created_at, rec_id, meeting_id, now],
        )?;

        let actions = normalizer::normalize_field(&capture_id, ItemKind::Action, actions_raw.as_deref());
        let decisions = normalizer::normalize_field(&capture_id, ItemKind::Decision, decisions_raw.as_deref());
        let mut follow_ups =
            normalizer::normalize_field(&capture_id, ItemKind::FollowUp, follow_ups_raw.as_deref());
        let derived = normalizer::derive_follow_ups(&capture_id, &actions.items);

        insert_action_items(conn, &capture_id, &actions.items, &now)?;
        insert_decisions(conn, &capture_id, &decisions.items, &now)?;
        follow_ups.items.extend(derived);
        insert_follow_ups(conn, &capture_id, &follow_ups.items, &now)?;

        stats.action_items_created += actions.items.len() as u64;
        stats.decisions_created += decisions.items.len() as u64;
        stats.follow_ups_created += follow_ups.items.len() as u64;
        stats.normalizer_warnings +=
            (actions.warnings.len() + decisions.warnings.len() + follow_ups.warnings.len()) as u64;

        conn.execute(
            "UPDATE recordings
             SET migration_status = ?1, migrated_at = ?2, knowledge_capture_id = ?3
             WHERE id = ?4",
            params![MIGRATED_MARKER, now, capture_id, rec_id],
        )?;

        log::debug!(
            "migrated recording {} (transcript {}) into capture {}",
            rec_id,
            transcript_id,
            capture_id
        );
        stats.recordings_migrated += 1;
        stats.captures_created += 1;
    }

    Ok(stats)
}

/// Title fallback chain: meeting title, filename stem, generic placeholder.
fn capture_title(
    conn: &Connection,
    meeting_id: Option<&str>,
    filename: &str,
) -> Result<String, MigrationError> {
    if let Some(mid) = meeting_id {
        let title: Option<String> = conn
            .query_row(
                "SELECT title FROM meetings WHERE id = ?1",
                params![mid],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(t) = title {
            let t = t.trim().to_string();
            if !t.is_empty() {
                return Ok(t);
            }
        }
    }

    let stem = filename
        .rsplit_once('.')
        .map(|(stem, _)| stem)
        .unwrap_or(filename)
        .trim();
    if stem.is_empty() {
        Ok(FALLBACK_TITLE.to_string())
    } else {
        Ok(stem.to_string())
    }
}

fn insert_action_items(
    conn: &Connection,
    capture_id: &str,
    items: &[NormalizedItem],
    now: &str,
) -> Result<(), MigrationError> {
    for item in items {
        conn.execute(
            "INSERT INTO action_items (id, capture_id, content, assignee, due_date, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![item.id, capture_id, item.content, item.assignee, item.due_date, item.status, now],
        )?;
    }
    Ok(())
}

fn insert_decisions(
    conn: &Connection,
    capture_id: &str,
    items: &[NormalizedItem],
    now: &str,
) -> Result<(), MigrationError> {
    for item in items {
        conn.execute(
            "INSERT INTO decisions (id, capture_id, content, decided_by, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![item.id, capture_id, item.content, item.assignee, item.status, now],
        )?;
    }
    Ok(())
}

fn insert_follow_ups(
    conn: &Connection,
    capture_id: &str,
    items: &[NormalizedItem],
    now: &str,
) -> Result<(), MigrationError> {
    for item in items {
        conn.execute(
            "INSERT INTO follow_ups (id, capture_id, content, contact, due_date, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![item.id, capture_id, item.content, item.assignee, item.due_date, item.status, now],
        )?;
    }
    Ok(())
}

/// Pre-attempt whole-file copy via SQLite's online backup API, written next
/// to the live database as `<db>.pre-migration.bak`.
fn backup_database_file(conn: &Connection) -> Result<(), MigrationError> {
    let db_path: String = conn.query_row("PRAGMA database_list", [], |row| row.get(2))?;
    if db_path.is_empty() {
        // In-memory or temp database, nothing to copy.
        return Ok(());
    }

    let backup_path = format!("{}.pre-migration.bak", db_path);
    let mut backup_conn = Connection::open(&backup_path)?;
    let file_backup = rusqlite::backup::Backup::new(conn, &mut backup_conn)?;
    file_backup.step(-1)?;

    log::info!("pre-migration file backup created at {}", backup_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::ProgressNotifier;

    fn test_db() -> CaptureDb {
        CaptureDb::open_in_memory().expect("db")
    }

    fn seed_recording(conn: &Connection, id: &str, filename: &str, created_at: &str) {
        conn.execute(
            "INSERT INTO recordings (id, filename, file_path, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![id, filename, format!("/captures/{}", filename), created_at],
        )
        .expect("seed recording");
    }

    fn seed_transcript_with_fields(
        conn: &Connection,
        id: &str,
        recording_id: &str,
        action_items: Option<&str>,
        decisions: Option<&str>,
        follow_ups: Option<&str>,
    ) {
        conn.execute(
            "INSERT INTO transcripts (id, recording_id, content, action_items, decisions, follow_ups, created_at)
             VALUES (?1, ?2, 'text', ?3, ?4, ?5, '2024-01-01T00:00:00Z')",
            params![id, recording_id, action_items, decisions, follow_ups],
        )
        .expect("seed transcript");
    }

    fn run(db: &CaptureDb) -> MigrationResult {
        let lock = MigrationLock::new();
        let notifier = ProgressNotifier::new();
        let schema = SchemaDefinition::load_bundled().expect("schema");
        run_migration(db, &lock, &notifier, &schema)
    }

    /// Bundled definition plus an appended hook for fault injection.
    fn schema_with_suffix(suffix: &str) -> SchemaDefinition {
        let bundled = SchemaDefinition::load_bundled().expect("schema");
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("schema.sql");
        std::fs::write(&path, format!("{}\n{}", bundled.sql, suffix)).expect("write");
        let def = SchemaDefinition::load_from(&path).expect("load");
        // Keep tempdir alive long enough; the file content is already read.
        std::mem::forget(dir);
        def
    }

    fn table_snapshot(conn: &Connection, table: &str) -> Vec<String> {
        let mut stmt = conn
            .prepare(&format!("SELECT * FROM {} ORDER BY rowid", table))
            .expect("prepare");
        let n = stmt.column_count();
        let rows = stmt
            .query_map([], |row| {
                let mut parts = Vec::with_capacity(n);
                for i in 0..n {
                    let v: rusqlite::types::Value = row.get(i).expect("value");
                    parts.push(format!("{:?}", v));
                }
                Ok(parts.join("|"))
            })
            .expect("query");
        rows.map(|r| r.expect("row")).collect()
    }

    #[test]
    fn test_happy_path_end_to_end() {
        let db = test_db();
        let conn = db.conn_ref();

        conn.execute(
            "INSERT INTO meetings (id, title, recording_id, created_at)
             VALUES ('m1', 'Q3 Planning', 'r1', '2024-01-01T00:00:00Z')",
            [],
        )
        .expect("meeting");
        seed_recording(conn, "r1", "q3-planning.wav", "2024-03-01T10:00:00Z");
        seed_transcript_with_fields(
            conn,
            "t1",
            "r1",
            Some(r#"["Call Bob", "Email report"]"#),
            Some(r#"[{"text": "Ship in June", "owner": "ana"}]"#),
            None,
        );

        let result = run(&db);
        assert!(result.success, "errors: {:?}", result.errors);
        assert_eq!(result.stats.recordings_migrated, 1);
        assert_eq!(result.stats.captures_created, 1);
        assert_eq!(result.stats.action_items_created, 2);
        assert_eq!(result.stats.decisions_created, 1);
        // Both legacy actions carry follow-up keywords ("call", "email").
        assert_eq!(result.stats.follow_ups_created, 2);

        // Capture fields: title from the linked meeting, timestamp from the
        // recording, source link preserved.
        let (title, captured_at, rec_link): (String, String, String) = conn
            .query_row(
                "SELECT title, captured_at, recording_id FROM knowledge_captures WHERE id = 'kc-r1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )
            .expect("capture");
        assert_eq!(title, "Q3 Planning");
        assert_eq!(captured_at, "2024-03-01T10:00:00Z");
        assert_eq!(rec_link, "r1");

        // Source recording is marked.
        let (status, capture_ref): (String, String) = conn
            .query_row(
                "SELECT migration_status, knowledge_capture_id FROM recordings WHERE id = 'r1'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("markers");
        assert_eq!(status, MIGRATED_MARKER);
        assert_eq!(capture_ref, "kc-r1");

        // Persisted scalar state advanced.
        let state = db.migration_state().expect("state");
        assert_eq!(state.status, MigrationStatus::Completed);
        assert_eq!(state.schema_version, crate::schema::TARGET_SCHEMA_VERSION);

        // Snapshots are retained for a later deliberate downgrade.
        assert!(backup::any_backups(conn).expect("backups"));
    }

    #[test]
    fn test_title_falls_back_to_filename_stem() {
        let db = test_db();
        let conn = db.conn_ref();
        seed_recording(conn, "r1", "standup-notes.wav", "2024-03-01T10:00:00Z");
        seed_transcript_with_fields(conn, "t1", "r1", None, None, None);

        let result = run(&db);
        assert!(result.success, "errors: {:?}", result.errors);

        let title: String = conn
            .query_row("SELECT title FROM knowledge_captures", [], |r| r.get(0))
            .expect("title");
        assert_eq!(title, "standup-notes");
    }

    #[test]
    fn test_rerun_is_noop_with_identical_content() {
        let db = test_db();
        let conn = db.conn_ref();
        seed_recording(conn, "r1", "a.wav", "2024-03-01T10:00:00Z");
        seed_transcript_with_fields(conn, "t1", "r1", Some(r#"["Do the thing"]"#), None, None);

        let first = run(&db);
        assert!(first.success);
        let captures_after_first = table_snapshot(conn, "knowledge_captures");
        let items_after_first = table_snapshot(conn, "action_items");

        let second = run(&db);
        assert!(second.success, "errors: {:?}", second.errors);
        assert_eq!(second.stats.captures_created, 0, "no-op re-run");

        assert_eq!(table_snapshot(conn, "knowledge_captures"), captures_after_first);
        assert_eq!(table_snapshot(conn, "action_items"), items_after_first);
    }

    #[test]
    fn test_second_caller_refused_while_locked() {
        let db = test_db();
        let conn = db.conn_ref();
        seed_recording(conn, "r1", "a.wav", "2024-03-01T10:00:00Z");
        seed_transcript_with_fields(conn, "t1", "r1", None, None, None);

        let before = table_snapshot(conn, "recordings");

        let lock = MigrationLock::new();
        let notifier = ProgressNotifier::new();
        let schema = SchemaDefinition::load_bundled().expect("schema");

        let _held = lock.acquire().expect("hold lock like a running attempt");
        let result = run_migration(&db, &lock, &notifier, &schema);

        assert!(!result.success);
        assert!(
            result.errors[0].contains("already in progress"),
            "concurrency error expected: {:?}",
            result.errors
        );
        // Refused caller must leave the database unmodified.
        assert_eq!(table_snapshot(conn, "recordings"), before);
        assert!(!crate::db::table_exists(conn, "knowledge_captures").expect("exists"));
    }

    #[test]
    fn test_fault_after_schema_apply_leaves_state_unchanged() {
        let db = test_db();
        let conn = db.conn_ref();
        seed_recording(conn, "r1", "a.wav", "2024-03-01T10:00:00Z");
        // The follow_ups blob guarantees the data phase touches follow_ups.
        seed_transcript_with_fields(conn, "t1", "r1", None, None, Some(r#"["ping legal"]"#));
        // Orphan transcript exercises the cleanup phase too.
        seed_transcript_with_fields(conn, "t-orphan", "ghost", None, None, None);

        let before_recordings = table_snapshot(conn, "recordings");
        let before_transcripts = table_snapshot(conn, "transcripts");
        let before_status = db.migration_state().expect("state");

        // Inject a fault between SchemaApplied and Verified: the data phase
        // trips over a sabotaged follow_ups table.
        let schema = schema_with_suffix(
            "DROP TABLE follow_ups;
             CREATE TABLE follow_ups (wrong_shape INTEGER);",
        );
        let lock = MigrationLock::new();
        let notifier = ProgressNotifier::new();
        let result = run_migration(&db, &lock, &notifier, &schema);

        assert!(!result.success);
        // Observable state identical to the pre-call state.
        assert_eq!(table_snapshot(conn, "recordings"), before_recordings);
        assert_eq!(table_snapshot(conn, "transcripts"), before_transcripts);
        assert!(!crate::db::table_exists(conn, "knowledge_captures").expect("exists"));
        assert!(
            !crate::db::column_exists(conn, "recordings", "migration_status").expect("col"),
            "DDL must roll back with the transaction"
        );

        let after_status = db.migration_state().expect("state");
        assert_eq!(after_status.status, before_status.status);
        assert_eq!(after_status.schema_version, before_status.schema_version);
        assert!(after_status.last_error.is_some(), "failure must be recorded");

        // The lock is free again for a retry.
        assert!(lock.acquire().is_some());
    }

    #[test]
    fn test_failed_verification_keeps_backups_and_status() {
        let db = test_db();
        let conn = db.conn_ref();
        seed_recording(conn, "r1", "a.wav", "2024-03-01T10:00:00Z");
        seed_transcript_with_fields(conn, "t1", "r1", None, None, None);

        // Verbatim-applied definition with a hostile trigger: every new
        // capture gets its title blanked, so verification must fail.
        let schema = schema_with_suffix(
            "CREATE TRIGGER IF NOT EXISTS sabotage_titles
             AFTER INSERT ON knowledge_captures
             BEGIN
                 UPDATE knowledge_captures SET title = '' WHERE id = NEW.id;
             END;",
        );
        let lock = MigrationLock::new();
        let notifier = ProgressNotifier::new();
        let (_token, rx) = notifier.subscribe();
        let result = run_migration(&db, &lock, &notifier, &schema);

        assert!(!result.success);
        assert!(
            result.errors[0].contains("verification failed"),
            "got: {:?}",
            result.errors
        );
        assert!(result.errors[0].contains("missing title"));

        // Status scalar stays at its pre-attempt value.
        let state = db.migration_state().expect("state");
        assert_eq!(state.status, MigrationStatus::Pending);
        assert_eq!(state.schema_version, 1);

        // Backup tables remain for inspection.
        assert!(backup::any_backups(conn).expect("backups"));

        // Phase stream ends in failed, with no committed event.
        let phases: Vec<MigrationPhase> = rx.try_iter().map(|e| e.phase).collect();
        assert_eq!(phases.last(), Some(&MigrationPhase::Failed));
        assert!(!phases.contains(&MigrationPhase::Committed));

        // No active attempts left registered.
        assert_eq!(notifier.active_attempts(), 0);
    }

    #[test]
    fn test_duplicate_losers_are_not_migrated() {
        let db = test_db();
        let conn = db.conn_ref();
        seed_recording(conn, "old", "dup.wav", "2024-01-01T00:00:00Z");
        seed_recording(conn, "new", "dup.wav", "2024-02-01T00:00:00Z");
        seed_transcript_with_fields(conn, "t-old", "old", None, None, None);
        seed_transcript_with_fields(conn, "t-new", "new", None, None, None);

        let result = run(&db);
        assert!(result.success, "errors: {:?}", result.errors);

        // Only the duplicate winner becomes a capture.
        assert_eq!(result.stats.captures_created, 1);
        let rec_link: String = conn
            .query_row("SELECT recording_id FROM knowledge_captures", [], |r| r.get(0))
            .expect("link");
        assert_eq!(rec_link, "new");

        // The loser is marked, not migrated.
        let (path, status): (String, Option<String>) = conn
            .query_row(
                "SELECT file_path, migration_status FROM recordings WHERE id = 'old'",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .expect("loser");
        assert_eq!(path, DELETED_SENTINEL);
        assert!(status.is_none());
    }

    #[test]
    fn test_phase_events_in_forward_order() {
        let db = test_db();
        let conn = db.conn_ref();
        seed_recording(conn, "r1", "a.wav", "2024-03-01T10:00:00Z");
        seed_transcript_with_fields(conn, "t1", "r1", None, None, None);

        let lock = MigrationLock::new();
        let notifier = ProgressNotifier::new();
        let (_token, rx) = notifier.subscribe();
        let schema = SchemaDefinition::load_bundled().expect("schema");
        let result = run_migration(&db, &lock, &notifier, &schema);
        assert!(result.success);

        let phases: Vec<MigrationPhase> = rx.try_iter().map(|e| e.phase).collect();
        assert_eq!(
            phases,
            vec![
                MigrationPhase::Locked,
                MigrationPhase::BackingUp,
                MigrationPhase::Cleanup,
                MigrationPhase::SchemaApplied,
                MigrationPhase::DataMigrated,
                MigrationPhase::Verified,
                MigrationPhase::Committed,
            ]
        );
    }
}
