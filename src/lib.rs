//! CaptureOS database backend: schema migration and data integrity.
//!
//! Evolves the local capture database from the legacy recording/transcript
//! layout to normalized knowledge captures without losing user data. The
//! moving parts, leaf-first:
//!
//! - [`normalizer`] - heterogeneous legacy JSON blobs → typed child records
//! - [`cleanup`] - orphan/duplicate detection and repair
//! - [`schema`] - the single canonical target-schema document
//! - [`backup`] - attempt-scoped row snapshots with exact-reversal restore
//! - [`executor`] - lock → backup → cleanup → schema → transform → verify →
//!   commit/abort, all destructive work in one transaction
//! - [`verify`] - accumulated structural checks before commit
//! - [`lock`] - single-flight guarantee across migration and rollback
//! - [`progress`] - fire-and-forget phase-transition events
//! - [`sanitize`] - path/internal redaction on every outward error
//! - [`rollback`] - snapshot-consuming revert of the last attempt
//! - [`engine`] - the request/response facade callers use

pub mod backup;
pub mod cleanup;
pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod lock;
pub mod normalizer;
pub mod progress;
pub mod rollback;
pub mod sanitize;
pub mod schema;
pub mod types;
pub mod verify;

pub use db::{CaptureDb, MigrationStatus};
pub use engine::MigrationEngine;
pub use error::{EngineError, ErrorKind, MigrationError};
pub use progress::{MigrationPhase, ProgressEvent};
pub use types::{EngineStatus, MigrationResult, MigrationStats, RollbackResult};
