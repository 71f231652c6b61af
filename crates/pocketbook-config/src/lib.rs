// crates/pocketbook-config/src/lib.rs
// ============================================================================
// Module: Pocketbook Config Library
// Description: Config file model and loader for the Pocketbook adapter.
// Purpose: Single source of truth for pocketbook.toml semantics.
// Dependencies: pocketbook-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! `pocketbook-config` loads `pocketbook.toml`, applies strict size and path
//! limits, and validates the `[sqlite]` and `[migrations]` sections before
//! the adapter sees them.

// ============================================================================
// SECTION: Modules
// ============================================================================

pub mod config;

// ============================================================================
// SECTION: Re-Exports
// ============================================================================

pub use config::ConfigError;
pub use config::MigrationsConfig;
pub use config::PocketbookConfig;
