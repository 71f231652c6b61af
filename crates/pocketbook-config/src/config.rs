// crates/pocketbook-config/src/config.rs
// ============================================================================
// Module: Pocketbook Configuration
// Description: Configuration loading and validation for the SQLite adapter.
// Purpose: Provide strict, fail-closed config parsing with hard limits.
// Dependencies: pocketbook-sqlite, serde, toml
// ============================================================================

//! ## Overview
//! Configuration is loaded from a TOML file with strict size and path limits.
//! The path comes from the caller, then `POCKETBOOK_CONFIG`, then
//! `pocketbook.toml` in the working directory. Unknown keys and invalid
//! limits fail the load.

// ============================================================================
// SECTION: Imports
// ============================================================================

use std::env;
use std::fs;
use std::path::Path;
use std::path::PathBuf;

use pocketbook_sqlite::MigrationManifest;
use pocketbook_sqlite::SqliteAdapterConfig;
use serde::Deserialize;
use thiserror::Error;

// ============================================================================
// SECTION: Constants
// ============================================================================

/// Default configuration filename when no path is specified.
const DEFAULT_CONFIG_NAME: &str = "pocketbook.toml";
/// Environment variable used to override the config path.
pub const CONFIG_ENV_VAR: &str = "POCKETBOOK_CONFIG";
/// Maximum configuration file size in bytes.
const MAX_CONFIG_FILE_SIZE: usize = 1024 * 1024;
/// Maximum length of a single path component.
const MAX_PATH_COMPONENT_LENGTH: usize = 255;
/// Maximum total path length.
const MAX_TOTAL_PATH_LENGTH: usize = 4096;

// ============================================================================
// SECTION: Config
// ============================================================================

/// Top-level configuration file.
///
/// # Invariants
/// - A loaded config has passed [`PocketbookConfig::validate`].
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PocketbookConfig {
    /// `SQLite` adapter settings.
    #[serde(default)]
    pub sqlite: SqliteAdapterConfig,
    /// Bundled migration settings.
    #[serde(default)]
    pub migrations: MigrationsConfig,
}

/// Bundled migration settings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MigrationsConfig {
    /// Migration file names shipped with the application.
    #[serde(default)]
    pub manifest: Vec<String>,
}

impl PocketbookConfig {
    /// Loads configuration from disk using the default resolution rules.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when loading or validation fails.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let resolved = config_path(path);
        check_path_limits("config path", &resolved.to_string_lossy())?;
        Self::from_toml_str(&read_config_text(&resolved)?)
    }

    /// Parses and validates configuration from TOML text.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] for malformed TOML and
    /// [`ConfigError::Invalid`] when validation fails.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self =
            toml::from_str(content).map_err(|err| ConfigError::Parse(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration for internal consistency.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a section is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.sqlite.validate().map_err(|err| ConfigError::Invalid(err.to_string()))?;
        check_path_limits("sqlite.storage_dir", &self.sqlite.storage_dir.to_string_lossy())?;
        self.migrations.validate()?;
        Ok(())
    }

    /// Returns the bundled migration manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] when a manifest entry is malformed.
    pub fn manifest(&self) -> Result<MigrationManifest, ConfigError> {
        self.migrations.manifest()
    }
}

impl MigrationsConfig {
    /// Validates the manifest entries.
    fn validate(&self) -> Result<(), ConfigError> {
        self.manifest().map(|_| ())
    }

    /// Builds the manifest from the configured file names.
    fn manifest(&self) -> Result<MigrationManifest, ConfigError> {
        MigrationManifest::from_names(&self.manifest)
            .map_err(|err| ConfigError::Invalid(format!("migrations.manifest: {err}")))
    }
}

// ============================================================================
// SECTION: Errors
// ============================================================================

/// Configuration loading or validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// I/O failure while reading configuration.
    #[error("config io error: {0}")]
    Io(String),
    /// TOML parsing error.
    #[error("config parse error: {0}")]
    Parse(String),
    /// Invalid configuration data.
    #[error("invalid config: {0}")]
    Invalid(String),
}

// ============================================================================
// SECTION: Helpers
// ============================================================================

/// Picks the config path: caller, then `POCKETBOOK_CONFIG`, then the default name.
fn config_path(path: Option<&Path>) -> PathBuf {
    path.map(Path::to_path_buf)
        .or_else(|| env::var_os(CONFIG_ENV_VAR).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_NAME))
}

/// Reads the config file, enforcing the size limit and UTF-8.
fn read_config_text(path: &Path) -> Result<String, ConfigError> {
    let bytes = fs::read(path).map_err(|err| ConfigError::Io(err.to_string()))?;
    if bytes.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::Invalid("config file exceeds size limit".to_string()));
    }
    String::from_utf8(bytes)
        .map_err(|_| ConfigError::Invalid("config file must be utf-8".to_string()))
}

/// Rejects blank paths and paths over the length limits for `field`.
fn check_path_limits(field: &str, value: &str) -> Result<(), ConfigError> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ConfigError::Invalid(format!("{field} must be non-empty")));
    }
    if trimmed.len() > MAX_TOTAL_PATH_LENGTH {
        return Err(ConfigError::Invalid(format!("{field} exceeds max length")));
    }
    if Path::new(trimmed)
        .components()
        .any(|component| component.as_os_str().len() > MAX_PATH_COMPONENT_LENGTH)
    {
        return Err(ConfigError::Invalid(format!("{field} component too long")));
    }
    Ok(())
}
