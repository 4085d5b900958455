//! SQLite-based local state for the capture database.
//!
//! The database lives at `~/.captureos/capture.db`. It is the single source
//! of truth for recordings, transcripts, and (after migration) knowledge
//! captures. The legacy (version 1) schema is applied idempotently on every
//! open; version-2 structures are only ever created by the migration
//! executor from the canonical schema document.

use std::path::PathBuf;

use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use thiserror::Error;

/// Errors specific to database plumbing (open, bookkeeping reads/writes).
#[derive(Debug, Error)]
pub enum DbError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Home directory not found")]
    HomeDirNotFound,

    #[error("Failed to create database directory: {0}")]
    CreateDir(std::io::Error),
}

/// Persisted migration status scalar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    RolledBack,
}

impl MigrationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MigrationStatus::Pending => "pending",
            MigrationStatus::InProgress => "in_progress",
            MigrationStatus::Completed => "completed",
            MigrationStatus::Failed => "failed",
            MigrationStatus::RolledBack => "rolled_back",
        }
    }

    /// Unknown strings deliberately read as `Pending` so a corrupted scalar
    /// can always be re-migrated rather than wedging the engine.
    pub fn parse(s: &str) -> Self {
        match s {
            "in_progress" => MigrationStatus::InProgress,
            "completed" => MigrationStatus::Completed,
            "failed" => MigrationStatus::Failed,
            "rolled_back" => MigrationStatus::RolledBack,
            _ => MigrationStatus::Pending,
        }
    }
}

/// The single `migration_state` row.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationState {
    pub status: MigrationStatus,
    pub schema_version: i64,
    pub last_attempt_id: Option<String>,
    pub last_attempt_at: Option<String>,
    pub last_error: Option<String>,
}

/// SQLite connection wrapper for the capture database.
///
/// Intentionally NOT `Clone` or `Sync`: the engine is the single writer and
/// holds exactly one of these.
pub struct CaptureDb {
    conn: Connection,
}

impl CaptureDb {
    /// Borrow the underlying connection for ad-hoc queries.
    pub fn conn_ref(&self) -> &Connection {
        &self.conn
    }

    /// Open (or create) the database at `~/.captureos/capture.db`.
    pub fn open() -> Result<Self, DbError> {
        let path = Self::db_path()?;
        Self::open_at(path)
    }

    /// Open a database at an explicit path. Useful for testing.
    pub fn open_at(path: PathBuf) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(DbError::CreateDir)?;
            }
        }

        let conn = Connection::open(&path)?;

        // WAL keeps read-only scans cheap while an attempt holds the writer.
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;

        // Legacy baseline, idempotent (IF NOT EXISTS throughout).
        conn.execute_batch(include_str!("schema.sql"))?;

        ensure_migration_state(&conn)?;

        Ok(Self { conn })
    }

    /// Open an in-memory database with the legacy baseline applied.
    pub fn open_in_memory() -> Result<Self, DbError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(include_str!("schema.sql"))?;
        ensure_migration_state(&conn)?;
        Ok(Self { conn })
    }

    /// Resolve the default database path: `~/.captureos/capture.db`.
    fn db_path() -> Result<PathBuf, DbError> {
        let home = dirs::home_dir().ok_or(DbError::HomeDirNotFound)?;
        Ok(home.join(".captureos").join("capture.db"))
    }

    /// Read the persisted migration state scalar.
    pub fn migration_state(&self) -> Result<MigrationState, DbError> {
        migration_state(&self.conn)
    }
}

/// Create the single-row `migration_state` table if missing.
fn ensure_migration_state(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS migration_state (
            id INTEGER PRIMARY KEY CHECK (id = 1),
            status TEXT NOT NULL DEFAULT 'pending',
            schema_version INTEGER NOT NULL DEFAULT 1,
            last_attempt_id TEXT,
            last_attempt_at TEXT,
            last_error TEXT
        );
        INSERT OR IGNORE INTO migration_state (id) VALUES (1);",
    )
}

/// Read the migration state. Free function so the executor can use it on a
/// transaction handle as well as on the wrapper.
pub fn migration_state(conn: &Connection) -> Result<MigrationState, DbError> {
    let state = conn.query_row(
        "SELECT status, schema_version, last_attempt_id, last_attempt_at, last_error
         FROM migration_state WHERE id = 1",
        [],
        |row| {
            Ok(MigrationState {
                status: MigrationStatus::parse(&row.get::<_, String>(0)?),
                schema_version: row.get(1)?,
                last_attempt_id: row.get(2)?,
                last_attempt_at: row.get(3)?,
                last_error: row.get(4)?,
            })
        },
    )?;
    Ok(state)
}

/// Update the status scalar (and schema version when advancing/committing).
pub fn set_status(
    conn: &Connection,
    status: MigrationStatus,
    schema_version: Option<i64>,
) -> Result<(), DbError> {
    match schema_version {
        Some(v) => conn.execute(
            "UPDATE migration_state SET status = ?1, schema_version = ?2 WHERE id = 1",
            params![status.as_str(), v],
        )?,
        None => conn.execute(
            "UPDATE migration_state SET status = ?1 WHERE id = 1",
            params![status.as_str()],
        )?,
    };
    Ok(())
}

/// Stamp attempt bookkeeping. Runs outside the attempt transaction so the
/// stamp survives an abort.
pub fn stamp_attempt(conn: &Connection, attempt_id: &str, at: &str) -> Result<(), DbError> {
    conn.execute(
        "UPDATE migration_state
         SET last_attempt_id = ?1, last_attempt_at = ?2, last_error = NULL
         WHERE id = 1",
        params![attempt_id, at],
    )?;
    Ok(())
}

/// Record the sanitized failure text of the last attempt.
pub fn record_last_error(conn: &Connection, message: &str) -> Result<(), DbError> {
    conn.execute(
        "UPDATE migration_state SET last_error = ?1 WHERE id = 1",
        params![message],
    )?;
    Ok(())
}

/// Whether `table` exists.
pub fn table_exists(conn: &Connection, table: &str) -> Result<bool, DbError> {
    let found: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = ?1",
            params![table],
            |row| row.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

/// Whether `table` has a column named `column`.
pub fn column_exists(conn: &Connection, table: &str, column: &str) -> Result<bool, DbError> {
    // Table names cannot be bound; every caller passes a literal.
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

/// Column names of `table`, in declaration order.
pub fn table_columns(conn: &Connection, table: &str) -> Result<Vec<String>, DbError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let rows = stmt.query_map([], |row| row.get::<_, String>(1))?;
    let mut columns = Vec::new();
    for row in rows {
        columns.push(row?);
    }
    Ok(columns)
}
