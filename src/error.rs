//! Error taxonomy for the migration engine.
//!
//! Errors are classified by how the caller may react:
//! - Terminal, no retry: lock already held, no backup to roll back from
//! - Abort + restore: statement failures and verification failures inside
//!   a transactional phase
//! - Partial: one cleanup category failed, siblings still report

use thiserror::Error;

use crate::sanitize::sanitize_message;

/// Errors raised by the migration engine.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// A migration or rollback attempt is already running in this process.
    #[error("another migration or rollback is already in progress")]
    Concurrency,

    /// The canonical target-schema document is missing or unreadable.
    #[error("failed to load target schema definition: {0}")]
    SchemaLoad(String),

    /// A statement failed inside a transactional phase.
    #[error("transaction failed: {0}")]
    Transaction(String),

    /// Post-migration checks failed; carries every accumulated reason.
    #[error("verification failed: {}", .reasons.join("; "))]
    Verification { reasons: Vec<String> },

    /// Rollback was requested but no backup exists to restore from.
    #[error("no backup available to roll back from")]
    RollbackUnavailable,

    /// One or more cleanup categories failed; the others still ran.
    #[error("cleanup finished with {failed} of {total} categories failing")]
    PartialCleanup { failed: usize, total: usize },

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl MigrationError {
    /// Terminal errors are reported immediately and must not be retried.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            MigrationError::Concurrency | MigrationError::RollbackUnavailable
        )
    }

    /// Stable category tag for logs and IPC payloads.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MigrationError::Concurrency => ErrorKind::Concurrency,
            MigrationError::SchemaLoad(_) => ErrorKind::SchemaLoad,
            MigrationError::Verification { .. } => ErrorKind::Verification,
            MigrationError::RollbackUnavailable => ErrorKind::RollbackUnavailable,
            MigrationError::PartialCleanup { .. } => ErrorKind::PartialCleanup,
            MigrationError::Transaction(_)
            | MigrationError::Sqlite(_)
            | MigrationError::Io(_) => ErrorKind::Transaction,
        }
    }

    /// Sanitized, display-ready message for anything outside the engine.
    pub fn public_message(&self) -> String {
        sanitize_message(&self.to_string())
    }
}

impl From<crate::db::DbError> for MigrationError {
    fn from(err: crate::db::DbError) -> Self {
        match err {
            crate::db::DbError::Sqlite(e) => MigrationError::Sqlite(e),
            other => MigrationError::Transaction(other.to_string()),
        }
    }
}

/// Error category exposed to callers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorKind {
    Concurrency,
    SchemaLoad,
    Transaction,
    Verification,
    RollbackUnavailable,
    PartialCleanup,
}

/// Serializable error representation for IPC.
///
/// Built exclusively through [`From<&MigrationError>`] so every message has
/// passed the sanitizer by construction.
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineError {
    pub message: String,
    pub kind: ErrorKind,
    pub can_retry: bool,
}

impl From<&MigrationError> for EngineError {
    fn from(err: &MigrationError) -> Self {
        EngineError {
            message: err.public_message(),
            kind: err.kind(),
            can_retry: !err.is_terminal(),
        }
    }
}
