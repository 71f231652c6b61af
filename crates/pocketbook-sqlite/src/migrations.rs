// crates/pocketbook-sqlite/src/migrations.rs
// ============================================================================
// Module: Migration Manifest
// Description: Bundled migration list and pending-migration planning.
// Purpose: Compare ledger rows with the known migrations without a fs listing.
// Dependencies: serde
// ============================================================================

//! ## Overview
//! Platforms without directory listing ship a manifest of migration file
//! names (`<id>_<description>.<sql|js>`). The manifest is compared with the
//! ids recorded in the migration ledger to compute what is still pending.
//! Applying migrations is left to the external runner.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde::Deserialize;
use serde::Serialize;

use crate::error::SqliteAdapterError;

// ============================================================================
// SECTION: Entries
// ============================================================================

/// Migration implementation language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationKind {
    /// Plain SQL script.
    Sql,
    /// Script migration run by the host runtime.
    Js,
}

/// One manifest entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationEntry {
    /// Migration id (also the ledger primary key).
    pub id: i64,
    /// Full migration file name.
    pub name: String,
    /// Implementation language.
    #[serde(rename = "type")]
    pub kind: MigrationKind,
}

impl MigrationEntry {
    /// Parses a migration file name such as `1550601598648_payees.sql`.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError::InvalidMigration`] when the id prefix,
    /// description, or extension is malformed.
    pub fn parse(file_name: &str) -> Result<Self, SqliteAdapterError> {
        let (id_text, rest) = file_name.split_once('_').ok_or_else(|| {
            SqliteAdapterError::InvalidMigration(format!("missing id separator: {file_name}"))
        })?;
        if id_text.is_empty() || !id_text.bytes().all(|byte| byte.is_ascii_digit()) {
            return Err(SqliteAdapterError::InvalidMigration(format!(
                "non-numeric migration id: {file_name}"
            )));
        }
        let id = id_text.parse::<i64>().map_err(|_| {
            SqliteAdapterError::InvalidMigration(format!("migration id out of range: {file_name}"))
        })?;
        let (description, kind) = if let Some(description) = rest.strip_suffix(".sql") {
            (description, MigrationKind::Sql)
        } else if let Some(description) = rest.strip_suffix(".js") {
            (description, MigrationKind::Js)
        } else {
            return Err(SqliteAdapterError::InvalidMigration(format!(
                "unsupported migration extension: {file_name}"
            )));
        };
        if description.is_empty() {
            return Err(SqliteAdapterError::InvalidMigration(format!(
                "empty migration description: {file_name}"
            )));
        }
        Ok(Self {
            id,
            name: file_name.to_string(),
            kind,
        })
    }
}

// ============================================================================
// SECTION: Manifest
// ============================================================================

/// Ordered migration manifest.
///
/// # Invariants
/// - Entry ids are strictly increasing.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationManifest {
    /// Entries in id order.
    entries: Vec<MigrationEntry>,
}

/// Pending work derived from a manifest and the ledger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationPlan {
    /// Ledger ids already applied, ascending.
    pub applied: Vec<i64>,
    /// Manifest entries not yet applied, in execution order.
    pub pending: Vec<MigrationEntry>,
}

impl MigrationPlan {
    /// Returns true when nothing is pending.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.pending.is_empty()
    }
}

impl MigrationManifest {
    /// Builds a manifest from entries already in id order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError::InvalidMigration`] when ids are not
    /// strictly increasing.
    pub fn new(entries: Vec<MigrationEntry>) -> Result<Self, SqliteAdapterError> {
        if let Some(pair) = entries.windows(2).find(|pair| pair[0].id >= pair[1].id) {
            return Err(SqliteAdapterError::InvalidMigration(format!(
                "migration ids out of order: {} before {}",
                pair[0].name, pair[1].name
            )));
        }
        Ok(Self {
            entries,
        })
    }

    /// Builds a manifest from migration file names in any order.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError::InvalidMigration`] for malformed names
    /// or duplicate ids.
    pub fn from_names<I, S>(names: I) -> Result<Self, SqliteAdapterError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut entries = names
            .into_iter()
            .map(|name| MigrationEntry::parse(name.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        entries.sort_by_key(|entry| entry.id);
        Self::new(entries)
    }

    /// Returns the entries in id order.
    #[must_use]
    pub fn entries(&self) -> &[MigrationEntry] {
        &self.entries
    }

    /// Returns the migration file names in id order.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        self.entries.iter().map(|entry| entry.name.as_str()).collect()
    }

    /// Computes pending migrations given the ids recorded in the ledger.
    ///
    /// # Errors
    ///
    /// Returns [`SqliteAdapterError::OutOfSyncMigrations`] when the applied
    /// ids are not a prefix of the manifest.
    pub fn plan(&self, applied: &[i64]) -> Result<MigrationPlan, SqliteAdapterError> {
        let mut applied = applied.to_vec();
        applied.sort_unstable();
        applied.dedup();
        for (position, id) in applied.iter().enumerate() {
            match self.entries.get(position) {
                Some(entry) if entry.id == *id => {}
                Some(entry) => {
                    return Err(SqliteAdapterError::OutOfSyncMigrations(format!(
                        "applied migration {id} does not match expected {}",
                        entry.name
                    )));
                }
                None => {
                    return Err(SqliteAdapterError::OutOfSyncMigrations(format!(
                        "applied migration {id} is not in the manifest"
                    )));
                }
            }
        }
        let pending = self.entries.iter().skip(applied.len()).cloned().collect();
        Ok(MigrationPlan {
            applied,
            pending,
        })
    }
}
