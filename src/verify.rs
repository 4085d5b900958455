//! Pre-commit structural verification.
//!
//! Runs inside the same transaction as data migration, immediately before
//! commit. Checks accumulate: every failure is collected so one bad row
//! doesn't hide the rest, and any accumulated failure aborts the attempt
//! exactly like a thrown statement error. There are no soft warnings at
//! this layer.

use rusqlite::Connection;

use crate::cleanup::DELETED_SENTINEL;
use crate::error::MigrationError;

/// Run every structural check. `Ok(())` only when all pass.
pub fn verify(conn: &Connection) -> Result<(), MigrationError> {
    let mut reasons = Vec::new();

    // (a) Row-count parity: one capture per migrated recording.
    let migrated: i64 = conn.query_row(
        "SELECT COUNT(*) FROM recordings WHERE migration_status = 'migrated'",
        [],
        |row| row.get(0),
    )?;
    let captures: i64 = conn.query_row("SELECT COUNT(*) FROM knowledge_captures", [], |row| {
        row.get(0)
    })?;
    if migrated != captures {
        reasons.push(format!(
            "row-count mismatch: {} migrated recording(s) but {} knowledge capture(s)",
            migrated, captures
        ));
    }

    // (b) Required fields on every capture.
    let incomplete: i64 = conn.query_row(
        "SELECT COUNT(*) FROM knowledge_captures
         WHERE TRIM(COALESCE(title, '')) = ''
            OR TRIM(COALESCE(captured_at, '')) = ''
            OR TRIM(COALESCE(recording_id, '')) = ''",
        [],
        |row| row.get(0),
    )?;
    if incomplete > 0 {
        reasons.push(format!(
            "{} knowledge capture(s) missing title, capture timestamp, or recording link",
            incomplete
        ));
    }

    // (c) Optional meeting link must resolve when present. Deliberately the
    // same severity as a broken required link.
    let bad_meeting_links: i64 = conn.query_row(
        "SELECT COUNT(*) FROM knowledge_captures
         WHERE meeting_id IS NOT NULL
           AND meeting_id NOT IN (SELECT id FROM meetings)",
        [],
        |row| row.get(0),
    )?;
    if bad_meeting_links > 0 {
        reasons.push(format!(
            "{} knowledge capture(s) reference a missing meeting",
            bad_meeting_links
        ));
    }

    // (d) Source-recording link must resolve, and not to a duplicate loser.
    let bad_recording_links: i64 = conn.query_row(
        &format!(
            "SELECT COUNT(*) FROM knowledge_captures
             WHERE recording_id NOT IN (
                 SELECT id FROM recordings WHERE COALESCE(file_path, '') <> '{}'
             )",
            DELETED_SENTINEL
        ),
        [],
        |row| row.get(0),
    )?;
    if bad_recording_links > 0 {
        reasons.push(format!(
            "{} knowledge capture(s) reference a missing or deleted recording",
            bad_recording_links
        ));
    }

    if reasons.is_empty() {
        Ok(())
    } else {
        Err(MigrationError::Verification { reasons })
    }
}
