// crates/pocketbook-sqlite/src/config.rs
// ============================================================================
// Module: SQLite Adapter Config
// Description: Connection pragmas, storage location, and runtime limits.
// Purpose: Describe how native connections are opened and configured.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! [`SqliteAdapterConfig`] captures everything applied to a native connection
//! at open time plus the adapter-wide limits (pattern cache size, default
//! transaction deadline). All fields carry defaults so partial config files
//! deserialize cleanly.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::SqliteAdapterError;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default page-cache budget in KiB (applied as a negative `cache_size`).
const DEFAULT_CACHE_SIZE_KIB: u32 = 10_000;
/// Default busy timeout (ms).
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;
/// Default maximum compiled patterns kept per cache.
pub const DEFAULT_PATTERN_CACHE_CAPACITY: usize = 500;
/// Default directory holding database files.
const DEFAULT_STORAGE_DIR: &str = "SQLite";

// ============================================================================
// SECTION: Config
// ============================================================================

/// `SQLite` journal mode configuration.
///
/// # Invariants
/// - Values map 1:1 to `SQLite` `journal_mode` pragma settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    /// WAL journal mode (recommended).
    #[default]
    Wal,
    /// Delete journal mode (legacy).
    Delete,
}

impl JournalMode {
    /// Returns the `SQLite` pragma value.
    #[must_use]
    pub const fn pragma_value(self) -> &'static str {
        match self {
            Self::Wal => "wal",
            Self::Delete => "delete",
        }
    }
}

/// Configuration for the `SQLite` adapter.
///
/// # Invariants
/// - `storage_dir` is a directory; database files live directly inside it.
/// - `cache_size_kib` and `pattern_cache_capacity` are greater than zero.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SqliteAdapterConfig {
    /// Directory holding one file per logical database name.
    #[serde(default = "default_storage_dir")]
    pub storage_dir: PathBuf,
    /// `SQLite` journal mode.
    #[serde(default)]
    pub journal_mode: JournalMode,
    /// Page-cache budget in KiB.
    #[serde(default = "default_cache_size_kib")]
    pub cache_size_kib: u32,
    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout_ms")]
    pub busy_timeout_ms: u64,
    /// Maximum compiled LIKE/REGEXP patterns retained.
    #[serde(default = "default_pattern_cache_capacity")]
    pub pattern_cache_capacity: usize,
    /// Optional default transaction deadline in milliseconds.
    #[serde(default)]
    pub transaction_timeout_ms: Option<u64>,
}

impl Default for SqliteAdapterConfig {
    fn default() -> Self {
        Self {
            storage_dir: default_storage_dir(),
            journal_mode: JournalMode::default(),
            cache_size_kib: DEFAULT_CACHE_SIZE_KIB,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
            pattern_cache_capacity: DEFAULT_PATTERN_CACHE_CAPACITY,
            transaction_timeout_ms: None,
        }
    }
}

impl SqliteAdapterConfig {
    /// Returns a default config rooted at `storage_dir`.
    #[must_use]
    pub fn with_storage_dir(storage_dir: impl Into<PathBuf>) -> Self {
        Self {
            storage_dir: storage_dir.into(),
            ..Self::default()
        }
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError::Config`] when a limit is out of range.
    pub fn validate(&self) -> Result<(), SqliteAdapterError> {
        if self.storage_dir.as_os_str().is_empty() {
            return Err(SqliteAdapterError::Config("storage_dir must not be empty".to_string()));
        }
        if self.cache_size_kib == 0 {
            return Err(SqliteAdapterError::Config(
                "cache_size_kib must be greater than zero".to_string(),
            ));
        }
        if self.pattern_cache_capacity == 0 {
            return Err(SqliteAdapterError::Config(
                "pattern_cache_capacity must be greater than zero".to_string(),
            ));
        }
        if self.transaction_timeout_ms == Some(0) {
            return Err(SqliteAdapterError::Config(
                "transaction_timeout_ms must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    /// Returns the configured default transaction deadline.
    #[must_use]
    pub fn transaction_timeout(&self) -> Option<Duration> {
        self.transaction_timeout_ms.map(Duration::from_millis)
    }
}

/// Returns the default storage directory.
fn default_storage_dir() -> PathBuf {
    PathBuf::from(DEFAULT_STORAGE_DIR)
}

/// Returns the default page-cache budget.
const fn default_cache_size_kib() -> u32 {
    DEFAULT_CACHE_SIZE_KIB
}

/// Returns the default busy timeout for `SQLite` connections.
const fn default_busy_timeout_ms() -> u64 {
    DEFAULT_BUSY_TIMEOUT_MS
}

/// Returns the default pattern cache capacity.
const fn default_pattern_cache_capacity() -> usize {
    DEFAULT_PATTERN_CACHE_CAPACITY
}
