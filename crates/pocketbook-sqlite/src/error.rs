// crates/pocketbook-sqlite/src/error.rs
// ============================================================================
// Module: SQLite Adapter Errors
// Description: Error taxonomy for the native SQLite adapter.
// Purpose: Surface failures with the SQL text and values needed upstream.
// Dependencies: rusqlite, thiserror
// ============================================================================

//! ## Overview
//! Every adapter failure is a [`SqliteAdapterError`]. Native engine failures
//! keep the original [`rusqlite::Error`] as their source so callers observe
//! the real cause; parameter failures are raised before the engine is touched.

// ============================================================================
// SECTION: Imports
// ============================================================================

use thiserror::Error;

// ============================================================================
// SECTION: Errors
// ============================================================================

/// `SQLite` adapter errors.
///
/// # Invariants
/// - `Native` always carries the statement text that failed.
/// - `InvalidParameter` is produced before any native call is issued.
#[derive(Debug, Error)]
pub enum SqliteAdapterError {
    /// Query parameter outside the accepted {string, number, null} set.
    #[error("invalid field type {value} for sql {sql}")]
    InvalidParameter {
        /// Statement text the parameter was bound to.
        sql: String,
        /// Rendered offending value.
        value: String,
    },
    /// Native engine failed to prepare or execute a statement.
    #[error("sqlite statement failed: {sql}: {source}")]
    Native {
        /// Statement text that failed.
        sql: String,
        /// Unchanged engine error.
        #[source]
        source: rusqlite::Error,
    },
    /// Native connection could not be opened or configured.
    #[error("sqlite open failed for {name}: {source}")]
    Open {
        /// Logical database name.
        name: String,
        /// Unchanged engine error.
        #[source]
        source: rusqlite::Error,
    },
    /// Migration ledger could not be created on a fresh database.
    #[error("migration ledger bootstrap failed for {name}: {source}")]
    Bootstrap {
        /// Logical database name.
        name: String,
        /// Unchanged engine error.
        #[source]
        source: rusqlite::Error,
    },
    /// Operation issued against a handle that was already closed.
    #[error("database handle closed: {name}")]
    Closed {
        /// Logical database name.
        name: String,
    },
    /// Database name could not be resolved to a safe file name.
    #[error("invalid database name: {0}")]
    InvalidName(String),
    /// Transaction exceeded its deadline and was rolled back.
    #[error("transaction exceeded deadline of {limit_ms} ms")]
    TransactionTimeout {
        /// Configured deadline in milliseconds.
        limit_ms: u64,
    },
    /// Operation not permitted in the current handle state.
    #[error("invalid adapter state: {0}")]
    InvalidState(String),
    /// Malformed migration manifest entry.
    #[error("invalid migration: {0}")]
    InvalidMigration(String),
    /// Applied migrations disagree with the manifest.
    #[error("out of sync migrations: {0}")]
    OutOfSyncMigrations(String),
    /// Invalid adapter configuration.
    #[error("invalid sqlite adapter config: {0}")]
    Config(String),
    /// Filesystem error.
    #[error("sqlite adapter io error: {0}")]
    Io(String),
    /// A guarding mutex was poisoned by a panicking holder.
    #[error("sqlite adapter lock poisoned: {0}")]
    Lock(String),
}

impl SqliteAdapterError {
    /// Builds a [`SqliteAdapterError::Native`] for the given statement.
    pub(crate) fn native(sql: &str, source: rusqlite::Error) -> Self {
        Self::Native {
            sql: sql.to_string(),
            source,
        }
    }

    /// Returns the statement text when the error is tied to one.
    #[must_use]
    pub fn sql(&self) -> Option<&str> {
        match self {
            Self::InvalidParameter {
                sql, ..
            }
            | Self::Native {
                sql, ..
            } => Some(sql.as_str()),
            _ => None,
        }
    }
}
