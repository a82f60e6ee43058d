//! Configuration loading and path resolution
//!
//! Resolution priority for the config file itself:
//! 1. `FOLIO_CONFIG` environment variable
//! 2. `<os config dir>/folio/config.toml`
//! 3. Compiled defaults (no file present is not an error)

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::{debug, info};

use crate::params::TuningConfig;
use crate::{Error, Result};

/// Top-level TOML configuration.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// Image root to scan on startup. Can also be set at runtime through
    /// the coordinator.
    pub root_folder: Option<PathBuf>,

    /// SQLite database location. Defaults to the OS data directory.
    pub database_path: Option<PathBuf>,

    /// tracing-subscriber env-filter directive, e.g. "folio_rank=debug".
    pub log_filter: Option<String>,

    /// Engine tunables, all optional.
    pub tuning: TuningConfig,
}

impl TomlConfig {
    /// Load configuration from the resolved file path, falling back to
    /// defaults when no file exists.
    pub fn load() -> Result<Self> {
        match resolve_config_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            Some(path) => {
                debug!(path = %path.display(), "No config file present, using defaults");
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Load and validate a specific config file.
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("read {}: {e}", path.display())))?;
        let config: TomlConfig = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("parse {}: {e}", path.display())))?;
        config.tuning.validate()?;
        info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Database path to open: configured value or the OS default.
    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(default_database_path)
    }
}

/// Config file location, or None when the platform has no config dir.
fn resolve_config_path() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("FOLIO_CONFIG") {
        return Some(PathBuf::from(path));
    }
    dirs::config_dir().map(|d| d.join("folio").join("config.toml"))
}

/// OS-dependent default database location.
pub fn default_database_path() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("folio").join("folio.db"))
        .unwrap_or_else(|| PathBuf::from("./folio.db"))
}
