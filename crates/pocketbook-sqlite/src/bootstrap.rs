// crates/pocketbook-sqlite/src/bootstrap.rs
// ============================================================================
// Module: Migration Ledger Bootstrap
// Description: Guarantees the migration ledger table exists on open.
// Purpose: Give every opened handle a consistent migration starting point.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! A database without the `__migrations__` table is a fresh database. The
//! bootstrap step detects that state and creates the table with a single
//! integer primary key. It never inserts ledger rows; the external migration
//! runner owns those.
//!
//! Detection prefers `sqlite_master` introspection. A direct read of the table
//! (`SELECT 1 FROM __migrations__`) is only a safeguard for an engine build
//! where introspection itself errors; the bundled engine always answers it.

// ============================================================================
// SECTION: Imports
// ============================================================================

use rusqlite::Connection;
use rusqlite::OptionalExtension;
use rusqlite::params;

use crate::error::SqliteAdapterError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Name of the migration ledger table.
pub const MIGRATION_LEDGER_TABLE: &str = "__migrations__";
/// DDL creating the migration ledger.
const CREATE_LEDGER_SQL: &str = "CREATE TABLE IF NOT EXISTS __migrations__ (id INTEGER PRIMARY KEY);";
/// Direct table read used when introspection is unavailable.
const DIRECT_LEDGER_SQL: &str = "SELECT 1 FROM __migrations__ LIMIT 1";
/// Introspection query for the ledger table.
const INTROSPECT_LEDGER_SQL: &str =
    "SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1 LIMIT 1";

// ============================================================================
// SECTION: Bootstrap
// ============================================================================

/// Ledger state observed when a handle was created.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerState {
    /// The ledger table already existed.
    Present,
    /// The database was fresh and the ledger table was created.
    Created,
}

/// Ensures the migration ledger exists on `connection`.
///
/// # Errors
///
/// Returns [`SqliteAdapterError::Bootstrap`] when the table cannot be
/// created; the database is unusable in that case.
pub fn ensure_migration_ledger(
    connection: &Connection,
    name: &str,
) -> Result<LedgerState, SqliteAdapterError> {
    if ledger_exists(connection) {
        return Ok(LedgerState::Present);
    }
    connection.execute_batch(CREATE_LEDGER_SQL).map_err(|source| {
        SqliteAdapterError::Bootstrap {
            name: name.to_string(),
            source,
        }
    })?;
    Ok(LedgerState::Created)
}

/// Returns whether the ledger table exists.
fn ledger_exists(connection: &Connection) -> bool {
    let introspected = connection
        .query_row(INTROSPECT_LEDGER_SQL, params![MIGRATION_LEDGER_TABLE], |row| {
            row.get::<_, i64>(0)
        })
        .optional();
    resolve_ledger_presence(connection, introspected)
}

/// Interprets the introspection result, reading the table when it failed.
fn resolve_ledger_presence(
    connection: &Connection,
    introspected: Result<Option<i64>, rusqlite::Error>,
) -> bool {
    match introspected {
        Ok(found) => found.is_some(),
        Err(err) => {
            tracing::warn!(error = %err, "ledger introspection failed, reading table directly");
            connection.query_row(DIRECT_LEDGER_SQL, [], |_| Ok(())).optional().is_ok()
        }
    }
}

// ============================================================================
// SECTION: Tests
// ============================================================================
