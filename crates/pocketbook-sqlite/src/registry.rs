// crates/pocketbook-sqlite/src/registry.rs
// ============================================================================
// Module: Database Handle Registry
// Description: Opens, caches, and closes native connections by name.
// Purpose: Guarantee one live handle per logical database name.
// Dependencies: rusqlite, tracing
// ============================================================================

//! ## Overview
//! [`DatabaseRegistry`] owns the name → handle map. Opening a name that is
//! already open returns the cached handle without touching the engine.
//! Opening a new name creates the native connection, applies the journal,
//! cache and busy-timeout pragmas, registers the SQL helper functions, and
//! bootstraps the migration ledger before the handle is published.
//!
//! Closing is forgiving: closing a handle the registry no longer holds logs a
//! warning and does nothing, so a stray close never kills a live handle.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;
use std::time::Duration;

use rusqlite::Connection;
use rusqlite::OpenFlags;

use crate::bootstrap::LedgerState;
use crate::bootstrap::ensure_migration_ledger;
use crate::config::SqliteAdapterConfig;
use crate::error::SqliteAdapterError;
use crate::export::export_database;
use crate::handle::DatabaseHandle;
use crate::pattern::PatternCache;
use crate::pattern::register_functions;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Name selecting a private in-memory database.
pub const MEMORY_DATABASE: &str = ":memory:";
/// Name used when the caller supplies none.
pub const DEFAULT_DATABASE_NAME: &str = "default.sqlite";
/// Maximum length of a database file name.
const MAX_NAME_LENGTH: usize = 255;

// ============================================================================
// SECTION: Targets
// ============================================================================

/// Resolved location of a logical database.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseTarget {
    /// Logical database name (registry key).
    pub name: String,
    /// Backing file, `None` for in-memory databases.
    pub path: Option<PathBuf>,
}

/// Resolves a caller-supplied path or name to a logical database name.
///
/// Only the final `/`-separated component is kept; `None` or a trailing
/// separator selects [`DEFAULT_DATABASE_NAME`].
///
/// # Errors
///
/// Returns [`SqliteAdapterError::InvalidName`] for `.`/`..`, overlong names,
/// or names containing a backslash or NUL.
pub fn resolve_database_name(path: Option<&str>) -> Result<String, SqliteAdapterError> {
    let Some(path) = path else {
        return Ok(DEFAULT_DATABASE_NAME.to_string());
    };
    if path == MEMORY_DATABASE {
        return Ok(MEMORY_DATABASE.to_string());
    }
    let name = path.rsplit('/').next().unwrap_or_default();
    if name.is_empty() {
        return Ok(DEFAULT_DATABASE_NAME.to_string());
    }
    if name == "." || name == ".." {
        return Err(SqliteAdapterError::InvalidName(format!("reserved name: {name}")));
    }
    if name.len() > MAX_NAME_LENGTH {
        return Err(SqliteAdapterError::InvalidName("name exceeds length limit".to_string()));
    }
    if name.contains(['\\', '\0']) {
        return Err(SqliteAdapterError::InvalidName(format!("name has invalid characters: {name}")));
    }
    Ok(name.to_string())
}

// ============================================================================
// SECTION: Connection Opener
// ============================================================================

/// Creates native connections for resolved targets.
pub trait ConnectionOpener: Send + Sync {
    /// Opens the native connection for `target`.
    ///
    /// # Errors
    ///
    /// Returns [`rusqlite::Error`] when the engine cannot open the database.
    fn open(&self, target: &DatabaseTarget) -> Result<Connection, rusqlite::Error>;
}

/// Default opener backed by the bundled `SQLite` engine.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeOpener;

impl ConnectionOpener for NativeOpener {
    fn open(&self, target: &DatabaseTarget) -> Result<Connection, rusqlite::Error> {
        match &target.path {
            None => Connection::open_in_memory(),
            Some(path) => {
                let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_FULL_MUTEX;
                Connection::open_with_flags(path, flags)
            }
        }
    }
}

// ============================================================================
// SECTION: Registry
// ============================================================================

/// Registry of open database handles.
///
/// # Invariants
/// - At most one live handle per name.
/// - Published handles have pragmas applied and a migration ledger.
pub struct DatabaseRegistry {
    /// Adapter configuration.
    config: SqliteAdapterConfig,
    /// Native connection factory.
    opener: Arc<dyn ConnectionOpener>,
    /// Compiled pattern cache shared with every connection's SQL functions.
    patterns: Arc<PatternCache>,
    /// Open handles keyed by logical name.
    handles: Mutex<HashMap<String, Arc<DatabaseHandle>>>,
}

impl DatabaseRegistry {
    /// Creates a registry using the bundled engine.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError::Config`] when `config` is invalid.
    pub fn new(config: SqliteAdapterConfig) -> Result<Self, SqliteAdapterError> {
        Self::with_opener(config, Arc::new(NativeOpener))
    }

    /// Creates a registry with a custom connection opener.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError::Config`] when `config` is invalid.
    pub fn with_opener(
        config: SqliteAdapterConfig,
        opener: Arc<dyn ConnectionOpener>,
    ) -> Result<Self, SqliteAdapterError> {
        config.validate()?;
        let patterns = Arc::new(PatternCache::new(config.pattern_cache_capacity));
        Ok(Self {
            config,
            opener,
            patterns,
            handles: Mutex::new(HashMap::new()),
        })
    }

    /// Returns the adapter configuration.
    #[must_use]
    pub const fn config(&self) -> &SqliteAdapterConfig {
        &self.config
    }

    /// Returns the pattern cache backing `UNICODE_LIKE` and `REGEXP`.
    #[must_use]
    pub const fn pattern_cache(&self) -> &Arc<PatternCache> {
        &self.patterns
    }

    /// Opens `path` (reduced to its file name), reusing an open handle.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError`] when the name is invalid, the engine
    /// cannot open or configure the connection, or the ledger cannot be
    /// created.
    pub fn open(&self, path: Option<&str>) -> Result<Arc<DatabaseHandle>, SqliteAdapterError> {
        let name = resolve_database_name(path)?;
        let mut handles = self.lock_handles()?;
        if let Some(handle) = handles.get(&name) {
            return Ok(Arc::clone(handle));
        }
        let target = self.target_for(&name)?;
        let connection = self.opener.open(&target).map_err(|source| open_failure(&name, source))?;
        apply_pragmas(&connection, &self.config).map_err(|source| open_failure(&name, source))?;
        register_functions(&connection, &self.patterns)
            .map_err(|source| open_failure(&name, source))?;
        let ledger = ensure_migration_ledger(&connection, &name)?;
        if ledger == LedgerState::Created {
            tracing::info!(database = %name, "fresh database detected, created migration ledger");
        }
        let handle = DatabaseHandle::new(target, connection, self.config.transaction_timeout());
        handles.insert(name.clone(), Arc::clone(&handle));
        tracing::info!(database = %name, "opened database");
        Ok(handle)
    }

    /// Closes `handle` and removes it from the registry.
    ///
    /// A handle this registry does not hold (already closed, replaced by a
    /// newer open, or owned by another registry) is ignored with a warning.
    pub fn close(&self, handle: &DatabaseHandle) {
        let held = {
            let mut handles = self.handles.lock().unwrap_or_else(PoisonError::into_inner);
            let held = handles
                .get(handle.name())
                .is_some_and(|current| std::ptr::eq(current.as_ref(), handle));
            if held {
                handles.remove(handle.name());
            }
            held
        };
        if !held {
            tracing::warn!(database = %handle.name(), "close called with unregistered handle, ignoring");
            return;
        }
        release_handle(handle);
    }

    /// Closes every open handle.
    pub fn close_all(&self) {
        let drained: Vec<Arc<DatabaseHandle>> = self
            .handles
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain()
            .map(|(_, handle)| handle)
            .collect();
        for handle in drained {
            release_handle(&handle);
        }
    }

    /// Exports the raw database image of `handle`.
    ///
    /// # Errors
    ///
    /// See [`export_database`].
    pub async fn export(&self, handle: &DatabaseHandle) -> Result<Vec<u8>, SqliteAdapterError> {
        export_database(handle).await
    }

    /// Returns true when a handle for `name` is open.
    #[must_use]
    pub fn is_open(&self, name: &str) -> bool {
        self.handles.lock().unwrap_or_else(PoisonError::into_inner).contains_key(name)
    }

    /// Returns the names of open databases, sorted.
    #[must_use]
    pub fn open_names(&self) -> Vec<String> {
        let mut names: Vec<String> =
            self.handles.lock().unwrap_or_else(PoisonError::into_inner).keys().cloned().collect();
        names.sort();
        names
    }

    /// Locks the handle map.
    fn lock_handles(
        &self,
    ) -> Result<MutexGuard<'_, HashMap<String, Arc<DatabaseHandle>>>, SqliteAdapterError> {
        self.handles.lock().map_err(|_| SqliteAdapterError::Lock("registry mutex poisoned".to_string()))
    }

    /// Resolves the on-disk location for `name`, creating the storage dir.
    fn target_for(&self, name: &str) -> Result<DatabaseTarget, SqliteAdapterError> {
        if name == MEMORY_DATABASE {
            return Ok(DatabaseTarget {
                name: name.to_string(),
                path: None,
            });
        }
        std::fs::create_dir_all(&self.config.storage_dir)
            .map_err(|err| SqliteAdapterError::Io(err.to_string()))?;
        Ok(DatabaseTarget {
            name: name.to_string(),
            path: Some(self.config.storage_dir.join(name)),
        })
    }
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Applies the journal, page-cache, and busy-timeout pragmas.
fn apply_pragmas(
    connection: &Connection,
    config: &SqliteAdapterConfig,
) -> Result<(), rusqlite::Error> {
    connection
        .execute_batch(&format!("PRAGMA journal_mode = {};", config.journal_mode.pragma_value()))?;
    connection.execute_batch(&format!("PRAGMA cache_size = -{};", config.cache_size_kib))?;
    connection.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
    Ok(())
}

/// Releases the native connection of a handle just removed from the map.
fn release_handle(handle: &DatabaseHandle) {
    if handle.release() {
        tracing::info!(database = %handle.name(), "closed database");
    } else {
        tracing::warn!(database = %handle.name(), "registered handle was already closed");
    }
}

/// Builds the open error for `name`.
fn open_failure(name: &str, source: rusqlite::Error) -> SqliteAdapterError {
    SqliteAdapterError::Open {
        name: name.to_string(),
        source,
    }
}
