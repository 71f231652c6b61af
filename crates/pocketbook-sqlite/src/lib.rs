// crates/pocketbook-sqlite/src/lib.rs
// ============================================================================
// Module: Pocketbook SQLite Adapter
// Description: Native SQLite adapter for the Pocketbook finance core.
// Purpose: Serve the core's database contract on top of bundled SQLite.
// Dependencies: rusqlite, lru, regex, serde, serde_json, tokio, tracing
// ============================================================================

//! ## Overview
//! This crate implements the database contract the Pocketbook core expects:
//! open a database by logical name, run queries and raw statements, wrap
//! work in (nested) transactions, close, and export the raw image.
//!
//! - [`DatabaseRegistry`] keeps one handle per name and bootstraps the
//!   `__migrations__` ledger on first open.
//! - [`DatabaseHandle`] executes statements and coordinates transactions,
//!   using savepoints for nested synchronous bodies.
//! - [`PatternCache`] backs the `UNICODE_LIKE` and `REGEXP` SQL functions.
//! - [`MigrationManifest`] compares the ledger with bundled migrations.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod bootstrap;
pub mod config;
pub mod error;
pub mod export;
pub mod handle;
pub mod migrations;
pub mod pattern;
pub mod registry;
pub mod transaction;
pub mod value;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use bootstrap::LedgerState;
pub use bootstrap::MIGRATION_LEDGER_TABLE;
pub use config::JournalMode;
pub use config::SqliteAdapterConfig;
pub use error::SqliteAdapterError;
pub use export::export_database;
pub use handle::DatabaseHandle;
pub use handle::HandleStats;
pub use migrations::MigrationEntry;
pub use migrations::MigrationKind;
pub use migrations::MigrationManifest;
pub use migrations::MigrationPlan;
pub use pattern::PatternCache;
pub use registry::ConnectionOpener;
pub use registry::DEFAULT_DATABASE_NAME;
pub use registry::DatabaseRegistry;
pub use registry::DatabaseTarget;
pub use registry::MEMORY_DATABASE;
pub use registry::NativeOpener;
pub use registry::resolve_database_name;
pub use transaction::TransactionOptions;
pub use value::Changes;
pub use value::QueryOutcome;
pub use value::Row;
pub use value::SqlValue;
