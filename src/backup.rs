//! Attempt-scoped snapshot tables.
//!
//! Before the first destructive statement of a migration/cleanup attempt,
//! one backup table per affected source table is created with only the rows
//! that attempt will touch. Backups are real tables (they survive process
//! restarts and transaction aborts) named `_backup_<table>_<attempt>`.
//!
//! `restore` reverses the attempt row by row: a live row that still exists
//! gets every backed-up column reapplied; a live row the attempt deleted is
//! reinserted whole. Columns the attempt *added* to the source table (the
//! migration markers) are reset to NULL when absent from the backup, since
//! their pre-attempt value was the column not existing at all.

use rusqlite::types::Value;
use rusqlite::{params_from_iter, Connection};

use crate::db::table_columns;
use crate::error::MigrationError;

/// Prefix shared by every snapshot table.
pub const BACKUP_PREFIX: &str = "_backup_";

/// All source tables carry a TEXT `id` primary key.
const PK_COLUMN: &str = "id";

/// One source table plus the predicate selecting the rows an attempt will
/// touch.
#[derive(Debug, Clone)]
pub struct BackupSpec {
    pub table: &'static str,
    pub predicate: String,
}

/// The set of snapshot tables belonging to one attempt.
#[derive(Debug, Clone)]
pub struct BackupSet {
    attempt_id: String,
    /// (source table, backup table) pairs.
    tables: Vec<(String, String)>,
}

fn backup_table_name(table: &str, attempt_id: &str) -> String {
    format!("{}{}_{}", BACKUP_PREFIX, table, attempt_id)
}

impl BackupSet {
    /// Freeze the affected rows of each spec into snapshot tables.
    ///
    /// Runs in autocommit (outside the attempt transaction) so the snapshot
    /// survives a later abort.
    pub fn create(
        conn: &Connection,
        attempt_id: &str,
        specs: &[BackupSpec],
    ) -> Result<Self, MigrationError> {
        let mut tables = Vec::with_capacity(specs.len());
        for spec in specs {
            let backup = backup_table_name(spec.table, attempt_id);
            // Identifiers cannot be bound; both names are engine-generated.
            conn.execute_batch(&format!(
                "CREATE TABLE {} AS SELECT * FROM {} WHERE {}",
                backup, spec.table, spec.predicate
            ))?;
            tables.push((spec.table.to_string(), backup));
        }
        log::info!(
            "attempt {}: froze {} backup table(s)",
            attempt_id,
            tables.len()
        );
        Ok(Self {
            attempt_id: attempt_id.to_string(),
            tables,
        })
    }

    /// Rediscover the snapshot tables of a previous attempt, if any.
    pub fn for_attempt(
        conn: &Connection,
        attempt_id: &str,
    ) -> Result<Option<Self>, MigrationError> {
        let suffix = format!("_{}", attempt_id);
        let mut stmt = conn.prepare(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name GLOB ?1",
        )?;
        let pattern = format!("{}*{}", BACKUP_PREFIX, suffix);
        let rows = stmt.query_map([pattern], |row| row.get::<_, String>(0))?;

        let mut tables = Vec::new();
        for row in rows {
            let backup = row?;
            let source = backup
                .strip_prefix(BACKUP_PREFIX)
                .and_then(|s| s.strip_suffix(&suffix))
                .unwrap_or_default()
                .to_string();
            if !source.is_empty() {
                tables.push((source, backup));
            }
        }

        if tables.is_empty() {
            Ok(None)
        } else {
            Ok(Some(Self {
                attempt_id: attempt_id.to_string(),
                tables,
            }))
        }
    }

    pub fn attempt_id(&self) -> &str {
        &self.attempt_id
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }

    /// Reapply every backed-up row onto the live tables. Returns the number
    /// of rows restored (updated + reinserted).
    pub fn restore(&self, conn: &Connection) -> Result<usize, MigrationError> {
        let mut restored = 0;
        for (source, backup) in &self.tables {
            restored += restore_table(conn, source, backup)?;
        }
        log::info!(
            "attempt {}: restored {} row(s) from backup",
            self.attempt_id,
            restored
        );
        Ok(restored)
    }

    /// Drop every snapshot table of this attempt. Called only after a
    /// confirmed terminal outcome.
    pub fn dispose(self, conn: &Connection) -> Result<(), MigrationError> {
        for (_, backup) in &self.tables {
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", backup))?;
        }
        log::info!("attempt {}: disposed backup tables", self.attempt_id);
        Ok(())
    }
}

/// Drop snapshot tables left behind by earlier attempts. Returns how many
/// were dropped.
pub fn dispose_stale(conn: &Connection) -> Result<usize, MigrationError> {
    let names = all_backup_tables(conn)?;
    for name in &names {
        conn.execute_batch(&format!("DROP TABLE IF EXISTS {}", name))?;
    }
    if !names.is_empty() {
        log::info!("dropped {} stale backup table(s)", names.len());
    }
    Ok(names.len())
}

/// Whether any snapshot tables exist at all.
pub fn any_backups(conn: &Connection) -> Result<bool, MigrationError> {
    Ok(!all_backup_tables(conn)?.is_empty())
}

fn all_backup_tables(conn: &Connection) -> Result<Vec<String>, MigrationError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name GLOB ?1",
    )?;
    let rows = stmt.query_map([format!("{}*", BACKUP_PREFIX)], |row| {
        row.get::<_, String>(0)
    })?;
    let mut names = Vec::new();
    for row in rows {
        names.push(row?);
    }
    Ok(names)
}

fn restore_table(conn: &Connection, source: &str, backup: &str) -> Result<usize, MigrationError> {
    let backup_cols = table_columns(conn, backup)?;
    let live_cols = table_columns(conn, source)?;

    let pk_idx = backup_cols
        .iter()
        .position(|c| c == PK_COLUMN)
        .ok_or_else(|| {
            MigrationError::Transaction(format!("backup table {} has no primary key", backup))
        })?;

    // Columns present on the live table but not in the snapshot were added
    // after the snapshot froze; their pre-attempt value is NULL.
    let added_cols: Vec<&String> = live_cols
        .iter()
        .filter(|c| !backup_cols.contains(c))
        .collect();

    let mut select = conn.prepare(&format!("SELECT * FROM {}", backup))?;
    let mut rows = select.query([])?;

    let mut restored = 0;
    while let Some(row) = rows.next()? {
        let mut values: Vec<Value> = Vec::with_capacity(backup_cols.len());
        for i in 0..backup_cols.len() {
            values.push(row.get::<_, Value>(i)?);
        }
        let pk_value = values[pk_idx].clone();

        let exists: bool = conn
            .prepare(&format!(
                "SELECT 1 FROM {} WHERE {} = ?1 LIMIT 1",
                source, PK_COLUMN
            ))?
            .exists([&pk_value])?;

        if exists {
            let mut set_clauses: Vec<String> = backup_cols
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != pk_idx)
                .map(|(_, c)| format!("{} = ?", c))
                .collect();
            for col in &added_cols {
                set_clauses.push(format!("{} = NULL", col));
            }
            if set_clauses.is_empty() {
                continue;
            }

            let sql = format!(
                "UPDATE {} SET {} WHERE {} = ?",
                source,
                set_clauses.join(", "),
                PK_COLUMN
            );
            let mut bind: Vec<Value> = values
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != pk_idx)
                .map(|(_, v)| v.clone())
                .collect();
            bind.push(pk_value);
            conn.execute(&sql, params_from_iter(bind))?;
        } else {
            let placeholders: Vec<&str> = backup_cols.iter().map(|_| "?").collect();
            let sql = format!(
                "INSERT INTO {} ({}) VALUES ({})",
                source,
                backup_cols.join(", "),
                placeholders.join(", ")
            );
            conn.execute(&sql, params_from_iter(values))?;
        }
        restored += 1;
    }

    Ok(restored)
}
