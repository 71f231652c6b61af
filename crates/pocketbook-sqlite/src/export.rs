// crates/pocketbook-sqlite/src/export.rs
// ============================================================================
// Module: Database Export
// Description: Produces a standalone SQLite image of an open database.
// Purpose: Back up or share a budget file without closing its handle.
// Dependencies: serde_json, tempfile, tokio
// ============================================================================

//! ## Overview
//! Export snapshots the database with `VACUUM INTO` a scratch file and reads
//! the bytes back. The snapshot is a complete single-file image: WAL content
//! is folded in and in-memory databases export the same way as file-backed
//! ones. Export is refused while a transaction is open on the handle.

// ============================================================================
// SECTION: Imports
// ============================================================================

use serde_json::Value;

use crate::error::SqliteAdapterError;
use crate::handle::DatabaseHandle;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// File name of the scratch snapshot.
const EXPORT_FILE_NAME: &str = "export.sqlite";

// ============================================================================
// SECTION: Export
// ============================================================================

/// Returns the raw `SQLite` image of `handle`.
///
/// # Errors
///
/// Returns [`SqliteAdapterError::InvalidState`] inside a transaction,
/// [`SqliteAdapterError::Native`] when the snapshot fails, and
/// [`SqliteAdapterError::Io`] when the scratch file cannot be used.
pub async fn export_database(handle: &DatabaseHandle) -> Result<Vec<u8>, SqliteAdapterError> {
    if handle.in_transaction()? {
        return Err(SqliteAdapterError::InvalidState(format!(
            "cannot export {} while a transaction is open",
            handle.name()
        )));
    }
    let scratch = tempfile::tempdir().map_err(|err| SqliteAdapterError::Io(err.to_string()))?;
    let target = scratch.path().join(EXPORT_FILE_NAME);
    let target_text = target
        .to_str()
        .ok_or_else(|| SqliteAdapterError::Io("export path is not valid utf-8".to_string()))?
        .to_string();
    handle.execute("VACUUM INTO ?1", &[Value::String(target_text)])?;
    let bytes =
        tokio::fs::read(&target).await.map_err(|err| SqliteAdapterError::Io(err.to_string()))?;
    tracing::info!(database = %handle.name(), bytes = bytes.len(), "exported database");
    Ok(bytes)
}
