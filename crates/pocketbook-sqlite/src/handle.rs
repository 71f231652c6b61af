// crates/pocketbook-sqlite/src/handle.rs
// ============================================================================
// Module: Database Handle
// Description: One open native connection plus its statement executor.
// Purpose: Run reads, writes, and raw statements against a named database.
// Dependencies: rusqlite, serde, serde_json, tracing
// ============================================================================

//! ## Overview
//! A [`DatabaseHandle`] owns one native connection for one logical database
//! name. Reads return materialized [`Row`] sequences, writes return a
//! [`Changes`] count, and raw statements (DDL, pragmas, transaction control)
//! return nothing. Parameters are validated before the connection is locked,
//! so a rejected call never reaches the engine.
//!
//! Each statement locks the connection only for its own duration, which lets
//! transaction bodies issue statements on the same handle they run inside.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::params_from_iter;
use rusqlite::types::Value as NativeValue;
use serde::Serialize;
use serde_json::Value;

use crate::bootstrap::MIGRATION_LEDGER_TABLE;
use crate::error::SqliteAdapterError;
use crate::registry::DatabaseTarget;
use crate::value::Changes;
use crate::value::QueryOutcome;
use crate::value::Row;
use crate::value::SqlValue;
use crate::value::bind_params;

// ============================================================================
// SECTION: Stats
// ============================================================================

/// Counts of statements that reached the native engine on one handle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HandleStats {
    /// Row-returning queries.
    pub queries: u64,
    /// Parameterized writes.
    pub executes: u64,
    /// Raw statements, including transaction control.
    pub execs: u64,
    /// Committed outermost transactions and released savepoints.
    pub commits: u64,
    /// Rolled back transactions and savepoints.
    pub rollbacks: u64,
}

impl HandleStats {
    /// Returns the total number of native statement executions.
    #[must_use]
    pub const fn native_calls(&self) -> u64 {
        self.queries.saturating_add(self.executes).saturating_add(self.execs)
    }
}

/// Statement classes tracked in [`HandleStats`].
#[derive(Debug, Clone, Copy)]
pub(crate) enum HandleOp {
    /// Row-returning query.
    Query,
    /// Parameterized write.
    Execute,
    /// Raw statement.
    Exec,
    /// Transaction or savepoint commit.
    Commit,
    /// Transaction or savepoint rollback.
    Rollback,
}

// ============================================================================
// SECTION: Handle
// ============================================================================

/// One open connection to a named database.
///
/// # Invariants
/// - At most one live handle per name exists in a registry.
/// - `depth` counts the transaction frames currently open on this handle.
/// - Once closed, the connection slot stays empty and every statement fails
///   with [`SqliteAdapterError::Closed`].
#[derive(Debug)]
pub struct DatabaseHandle {
    /// Logical database name.
    name: String,
    /// Backing file, `None` for in-memory databases.
    path: Option<PathBuf>,
    /// Native connection; emptied on close.
    connection: Mutex<Option<Connection>>,
    /// Transaction nesting depth.
    depth: Mutex<u32>,
    /// Default deadline applied to transactions.
    default_timeout: Option<Duration>,
    /// Native statement counters.
    stats: Mutex<HandleStats>,
}

impl DatabaseHandle {
    /// Wraps an opened and bootstrapped connection.
    pub(crate) fn new(
        target: DatabaseTarget,
        connection: Connection,
        default_timeout: Option<Duration>,
    ) -> Arc<Self> {
        Arc::new(Self {
            name: target.name,
            path: target.path,
            connection: Mutex::new(Some(connection)),
            depth: Mutex::new(0),
            default_timeout,
            stats: Mutex::new(HandleStats::default()),
        })
    }

    /// Returns the logical database name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the backing file path, `None` for in-memory databases.
    #[must_use]
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Returns true once the handle has been closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.connection.lock().unwrap_or_else(PoisonError::into_inner).is_none()
    }

    /// Returns the current transaction nesting depth.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError::Lock`] when the depth mutex is poisoned.
    pub fn transaction_depth(&self) -> Result<u32, SqliteAdapterError> {
        Ok(*self.lock_depth()?)
    }

    /// Returns the default transaction deadline for this handle.
    #[must_use]
    pub const fn default_timeout(&self) -> Option<Duration> {
        self.default_timeout
    }

    /// Returns a snapshot of native statement counters.
    #[must_use]
    pub fn stats(&self) -> HandleStats {
        *self.stats.lock().unwrap_or_else(PoisonError::into_inner)
    }

    // ------------------------------------------------------------------------
    // Statement execution
    // ------------------------------------------------------------------------

    /// Runs a row-returning statement and materializes every row.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError::InvalidParameter`] before touching the
    /// engine, or [`SqliteAdapterError::Native`] when the engine fails.
    pub fn query(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>, SqliteAdapterError> {
        let bound = bind_params(sql, params)?;
        self.with_connection(|connection| {
            self.record(HandleOp::Query);
            materialize_rows(connection, sql, &bound).map_err(|source| native_failure(sql, source))
        })
    }

    /// Runs a write statement once and returns the affected row count.
    ///
    /// Rows produced by the statement (`RETURNING`, a plain `SELECT`) are
    /// stepped through and discarded. Read-only statements report zero.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError::InvalidParameter`] before touching the
    /// engine, or [`SqliteAdapterError::Native`] when the engine fails.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<Changes, SqliteAdapterError> {
        let bound = bind_params(sql, params)?;
        self.with_connection(|connection| {
            self.record(HandleOp::Execute);
            run_to_completion(connection, sql, &bound).map_err(|source| native_failure(sql, source))
        })
    }

    /// Runs one or more raw statements with no parameters and no result.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError::Native`] carrying the statement text.
    pub fn exec(&self, sql: &str) -> Result<(), SqliteAdapterError> {
        self.with_connection(|connection| {
            self.record(HandleOp::Exec);
            connection.execute_batch(sql).map_err(|source| native_failure(sql, source))
        })
    }

    /// Runs a statement, returning rows when `fetch_all` is set and the
    /// affected row count otherwise.
    ///
    /// # Errors
    ///
    /// See [`DatabaseHandle::query`] and [`DatabaseHandle::execute`].
    pub fn run_query(
        &self,
        sql: &str,
        params: &[Value],
        fetch_all: bool,
    ) -> Result<QueryOutcome, SqliteAdapterError> {
        if fetch_all {
            self.query(sql, params).map(QueryOutcome::Rows)
        } else {
            self.execute(sql, params).map(QueryOutcome::Changes)
        }
    }

    /// Returns the migration ids recorded in the ledger, ascending.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError::Native`] when the ledger cannot be read.
    pub fn applied_migrations(&self) -> Result<Vec<i64>, SqliteAdapterError> {
        let sql = format!("SELECT id FROM {MIGRATION_LEDGER_TABLE} ORDER BY id");
        let rows = self.query(&sql, &[])?;
        Ok(rows.iter().filter_map(|row| row.get("id").and_then(SqlValue::as_i64)).collect())
    }

    // ------------------------------------------------------------------------
    // Crate internals
    // ------------------------------------------------------------------------

    /// Locks the transaction depth counter.
    pub(crate) fn lock_depth(&self) -> Result<MutexGuard<'_, u32>, SqliteAdapterError> {
        self.depth
            .lock()
            .map_err(|_| SqliteAdapterError::Lock(format!("transaction depth mutex poisoned: {}", self.name)))
    }

    /// Runs raw `sql` only while the engine still has a transaction open.
    ///
    /// Returns `false` without touching the engine when the transaction was
    /// already ended by the engine itself (`ON CONFLICT ROLLBACK`,
    /// `RAISE(ROLLBACK)`).
    pub(crate) fn exec_if_transaction_active(&self, sql: &str) -> Result<bool, SqliteAdapterError> {
        self.with_connection(|connection| {
            if connection.is_autocommit() {
                return Ok(false);
            }
            self.record(HandleOp::Exec);
            connection.execute_batch(sql).map_err(|source| native_failure(sql, source))?;
            Ok(true)
        })
    }

    /// Records a statement or transaction outcome.
    pub(crate) fn record(&self, op: HandleOp) {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        let slot = match op {
            HandleOp::Query => &mut stats.queries,
            HandleOp::Execute => &mut stats.executes,
            HandleOp::Exec => &mut stats.execs,
            HandleOp::Commit => &mut stats.commits,
            HandleOp::Rollback => &mut stats.rollbacks,
        };
        *slot = slot.saturating_add(1);
    }

    /// Takes and closes the native connection.
    ///
    /// Returns `false` when the handle was already closed.
    pub(crate) fn release(&self) -> bool {
        let taken = self.connection.lock().unwrap_or_else(PoisonError::into_inner).take();
        let Some(connection) = taken else {
            return false;
        };
        if let Err((_, err)) = connection.close() {
            tracing::warn!(database = %self.name, error = %err, "sqlite close reported an error");
        }
        true
    }

    /// Runs `f` with the open connection.
    fn with_connection<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, SqliteAdapterError>,
    ) -> Result<T, SqliteAdapterError> {
        let guard = self
            .connection
            .lock()
            .map_err(|_| SqliteAdapterError::Lock(format!("connection mutex poisoned: {}", self.name)))?;
        let Some(connection) = guard.as_ref() else {
            return Err(SqliteAdapterError::Closed {
                name: self.name.clone(),
            });
        };
        f(connection)
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Prepares `sql` once and reads the cursor to completion.
fn materialize_rows(
    connection: &Connection,
    sql: &str,
    bound: &[NativeValue],
) -> Result<Vec<Row>, rusqlite::Error> {
    let mut statement = connection.prepare(sql)?;
    let columns: Arc<[String]> =
        statement.column_names().into_iter().map(str::to_string).collect();
    let column_count = columns.len();
    let mut cursor = statement.query(params_from_iter(bound.iter()))?;
    let mut rows = Vec::new();
    while let Some(row) = cursor.next()? {
        let mut values = Vec::with_capacity(column_count);
        for index in 0 .. column_count {
            values.push(SqlValue::from(row.get::<_, NativeValue>(index)?));
        }
        rows.push(Row::new(Arc::clone(&columns), values));
    }
    Ok(rows)
}

/// Steps `sql` until done and returns the rows it changed.
fn run_to_completion(
    connection: &Connection,
    sql: &str,
    bound: &[NativeValue],
) -> Result<Changes, rusqlite::Error> {
    let mut statement = connection.prepare(sql)?;
    let readonly = statement.readonly();
    let mut cursor = statement.query(params_from_iter(bound.iter()))?;
    while cursor.next()?.is_some() {}
    drop(cursor);
    let changes = if readonly { 0 } else { connection.changes() };
    Ok(Changes {
        changes,
    })
}

/// Logs a native failure with its statement and wraps it unchanged.
fn native_failure(sql: &str, source: rusqlite::Error) -> SqliteAdapterError {
    tracing::error!(sql = %sql, error = %source, "sqlite statement failed");
    SqliteAdapterError::native(sql, source)
}
