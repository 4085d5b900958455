//! Orphan and consistency scanning/repair.
//!
//! Four categories of legacy damage, each detected by one predicate shared
//! between preview (read-only counts) and repair (mutating):
//!
//! 1. transcripts whose recording no longer exists: deleted
//! 2. embeddings whose transcript no longer exists: deleted
//! 3. duplicate recordings by filename: all but the most recently created
//!    get the sentinel "deleted" location, no physical delete
//! 4. recordings referencing a vanished meeting: reference cleared,
//!    recording kept
//!
//! Repair isolates categories: one failing never blocks the others, and
//! every failure lands in the report.

use rusqlite::Connection;
use serde::Serialize;

use crate::backup::BackupSpec;
use crate::error::MigrationError;
use crate::sanitize::sanitize_message;

/// Sentinel written into `file_path` for duplicate losers. Kept as a plain
/// string marker so legacy UI queries that filter on location keep working.
pub const DELETED_SENTINEL: &str = "deleted";

const ORPHAN_TRANSCRIPTS: &str =
    "recording_id IS NULL OR recording_id NOT IN (SELECT id FROM recordings)";

const ORPHAN_EMBEDDINGS: &str =
    "transcript_id IS NULL OR transcript_id NOT IN (SELECT id FROM transcripts)";

const DANGLING_MEETING_REF: &str =
    "meeting_id IS NOT NULL AND meeting_id NOT IN (SELECT id FROM meetings)";

/// Losers of per-filename duplicate resolution: every live row except the
/// most recently created one of its filename group.
fn duplicate_losers() -> String {
    format!(
        "id IN (SELECT id FROM (
            SELECT id,
                   ROW_NUMBER() OVER (
                       PARTITION BY filename
                       ORDER BY created_at DESC, rowid DESC
                   ) AS rn
            FROM recordings
            WHERE COALESCE(file_path, '') <> '{}'
        ) WHERE rn > 1)",
        DELETED_SENTINEL
    )
}

/// Read-only damage counts.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupPreview {
    pub orphaned_transcripts: u64,
    pub orphaned_embeddings: u64,
    pub duplicate_recordings: u64,
    pub invalid_meeting_refs: u64,
}

impl CleanupPreview {
    pub fn is_clean(&self) -> bool {
        self.orphaned_transcripts == 0
            && self.orphaned_embeddings == 0
            && self.duplicate_recordings == 0
            && self.invalid_meeting_refs == 0
    }
}

/// Outcome of a repair run: per-category counts plus collected failures.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CleanupReport {
    pub transcripts_deleted: u64,
    pub embeddings_deleted: u64,
    pub duplicates_marked: u64,
    pub meeting_refs_cleared: u64,
    /// Sanitized messages from categories that failed; empty on full success.
    pub errors: Vec<String>,
}

impl CleanupReport {
    pub fn is_full_success(&self) -> bool {
        self.errors.is_empty()
    }
}

fn count_where(conn: &Connection, table: &str, predicate: &str) -> Result<u64, MigrationError> {
    let count: i64 = conn.query_row(
        &format!("SELECT COUNT(*) FROM {} WHERE {}", table, predicate),
        [],
        |row| row.get(0),
    )?;
    Ok(count as u64)
}

/// Count each damage category without mutating anything.
pub fn preview(conn: &Connection) -> Result<CleanupPreview, MigrationError> {
    Ok(CleanupPreview {
        orphaned_transcripts: count_where(conn, "transcripts", ORPHAN_TRANSCRIPTS)?,
        orphaned_embeddings: count_where(conn, "embeddings", ORPHAN_EMBEDDINGS)?,
        duplicate_recordings: count_where(conn, "recordings", &duplicate_losers())?,
        invalid_meeting_refs: count_where(conn, "recordings", DANGLING_MEETING_REF)?,
    })
}

/// Backup specs covering every row repair may touch. The recordings spec
/// combines both recording-mutating categories into one snapshot table.
pub fn backup_specs() -> Vec<BackupSpec> {
    vec![
        BackupSpec {
            table: "transcripts",
            predicate: ORPHAN_TRANSCRIPTS.to_string(),
        },
        BackupSpec {
            table: "embeddings",
            predicate: ORPHAN_EMBEDDINGS.to_string(),
        },
        BackupSpec {
            table: "recordings",
            predicate: format!("({}) OR ({})", duplicate_losers(), DANGLING_MEETING_REF),
        },
    ]
}

/// Repair every category. Caller is responsible for freezing backups first.
pub fn repair(conn: &Connection) -> CleanupReport {
    let mut report = CleanupReport::default();

    run_category(
        "orphaned transcripts",
        &mut report.errors,
        &mut report.transcripts_deleted,
        || {
            let n = conn.execute(
                &format!("DELETE FROM transcripts WHERE {}", ORPHAN_TRANSCRIPTS),
                [],
            )?;
            Ok(n as u64)
        },
    );

    run_category(
        "orphaned embeddings",
        &mut report.errors,
        &mut report.embeddings_deleted,
        || {
            let n = conn.execute(
                &format!("DELETE FROM embeddings WHERE {}", ORPHAN_EMBEDDINGS),
                [],
            )?;
            Ok(n as u64)
        },
    );

    run_category(
        "duplicate recordings",
        &mut report.errors,
        &mut report.duplicates_marked,
        || {
            let n = conn.execute(
                &format!(
                    "UPDATE recordings SET file_path = '{}' WHERE {}",
                    DELETED_SENTINEL,
                    duplicate_losers()
                ),
                [],
            )?;
            Ok(n as u64)
        },
    );

    run_category(
        "invalid meeting references",
        &mut report.errors,
        &mut report.meeting_refs_cleared,
        || {
            let n = conn.execute(
                &format!(
                    "UPDATE recordings SET meeting_id = NULL WHERE {}",
                    DANGLING_MEETING_REF
                ),
                [],
            )?;
            Ok(n as u64)
        },
    );

    report
}

fn run_category(
    name: &str,
    errors: &mut Vec<String>,
    slot: &mut u64,
    f: impl FnOnce() -> Result<u64, MigrationError>,
) {
    match f() {
        Ok(n) => {
            if n > 0 {
                log::info!("cleanup: {}: {} row(s) repaired", name, n);
            }
            *slot = n;
        }
        Err(e) => {
            log::error!("cleanup: {} failed: {}", name, e);
            errors.push(format!("{}: {}", name, sanitize_message(&e.to_string())));
        }
    }
}
