//! Result and status payloads returned across the engine boundary.
//!
//! Everything here serializes camelCase for the IPC layer. Error strings
//! inside these payloads are sanitized before they are stored.

use serde::Serialize;

use crate::cleanup::CleanupReport;
use crate::db::MigrationStatus;

/// Counters from one migration attempt.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationStats {
    pub recordings_migrated: u64,
    pub captures_created: u64,
    pub action_items_created: u64,
    pub decisions_created: u64,
    pub follow_ups_created: u64,
    /// Free-form fields the normalizer had to give up on (logged per field).
    pub normalizer_warnings: u64,
    /// Outcome of the embedded pre-migration cleanup pass.
    pub cleanup: Option<CleanupReport>,
}

/// Outcome of `run_migration`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationResult {
    pub success: bool,
    /// Sanitized failure messages; empty on success.
    pub errors: Vec<String>,
    pub stats: MigrationStats,
}

impl MigrationResult {
    pub fn succeeded(stats: MigrationStats) -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            stats,
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            success: false,
            errors: vec![message],
            stats: MigrationStats::default(),
        }
    }
}

/// Outcome of `rollback_migration`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RollbackResult {
    pub success: bool,
    /// Sanitized failure messages; empty on success.
    pub errors: Vec<String>,
    pub rows_restored: u64,
}

impl RollbackResult {
    pub fn succeeded(rows_restored: u64) -> Self {
        Self {
            success: true,
            errors: Vec::new(),
            rows_restored,
        }
    }

    pub fn failed(message: String) -> Self {
        Self {
            success: false,
            errors: vec![message],
            rows_restored: 0,
        }
    }
}

/// Snapshot of the persisted migration state for `status()`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStatus {
    pub current_version: i64,
    pub status: MigrationStatus,
    pub last_attempt_at: Option<String>,
    pub last_error: Option<String>,
}
