//! Canonical target-schema loader.
//!
//! The version-2 structure lives in exactly one place: the numbered SQL
//! document embedded at compile time. The executor applies it verbatim via
//! `execute_batch`; nothing else in the crate declares target-version table
//! shapes, so the applied schema always matches the published definition.

use std::path::Path;

use crate::error::MigrationError;

/// Structural version this build migrates to.
pub const TARGET_SCHEMA_VERSION: i64 = 2;

const TARGET_SCHEMA_SQL: &str = include_str!("migrations/002_knowledge_capture.sql");

/// Tables the canonical document must define; load fails closed if the
/// document stops mentioning one of them.
const REQUIRED_TABLES: &[&str] = &[
    "knowledge_captures",
    "action_items",
    "decisions",
    "follow_ups",
];

/// A loaded, validated target-schema document.
#[derive(Debug, Clone)]
pub struct SchemaDefinition {
    pub version: i64,
    pub sql: String,
}

impl SchemaDefinition {
    /// Load the compiled-in canonical definition.
    pub fn load_bundled() -> Result<Self, MigrationError> {
        Self::validate(TARGET_SCHEMA_SQL.to_string())
    }

    /// Load a definition from disk (devtools and tests).
    pub fn load_from(path: &Path) -> Result<Self, MigrationError> {
        let sql = std::fs::read_to_string(path).map_err(|e| {
            MigrationError::SchemaLoad(format!("unreadable definition: {}", e))
        })?;
        Self::validate(sql)
    }

    fn validate(sql: String) -> Result<Self, MigrationError> {
        if sql.trim().is_empty() {
            return Err(MigrationError::SchemaLoad(
                "definition document is empty".to_string(),
            ));
        }
        for table in REQUIRED_TABLES {
            if !sql.contains(table) {
                return Err(MigrationError::SchemaLoad(format!(
                    "definition does not declare required table '{}'",
                    table
                )));
            }
        }
        Ok(Self {
            version: TARGET_SCHEMA_VERSION,
            sql,
        })
    }
}
