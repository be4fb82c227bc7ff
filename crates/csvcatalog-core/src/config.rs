use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{CatalogError, Result};

/// File name of the default store inside the data directory.
pub const DEFAULT_DB_FILE: &str = "catalog.db";

/// Persistent application settings.
///
/// Loaded from `settings.toml` in the platform config directory by default.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Settings {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub storage: StorageConfig,
    /// Saved regex filters, keyed by name.
    #[serde(default)]
    pub filters: BTreeMap<String, String>,
}

impl Settings {
    /// Load settings from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = toml::from_str(&content)?;
        info!("Settings loaded from {}", path.display());
        Ok(settings)
    }

    /// Load settings, falling back to defaults if the file does not exist
    /// or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                warn!(
                    "Failed to load settings from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the settings to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| CatalogError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Settings saved to {}", path.display());
        Ok(())
    }

    /// The store file to open: the configured path, or `catalog.db` in `data_dir`.
    pub fn resolve_db_path(&self, data_dir: &Path) -> PathBuf {
        match self.storage.db_path {
            Some(ref p) => p.clone(),
            None => data_dir.join(DEFAULT_DB_FILE),
        }
    }

    /// Look up a saved filter pattern by name.
    pub fn filter(&self, name: &str) -> Option<&str> {
        self.filters.get(name).map(String::as_str)
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "warn".to_string(),
        }
    }
}

/// Store location and encryption.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Explicit store file. `None` means the default file in the data dir.
    pub db_path: Option<PathBuf>,
    /// Whether the store file is kept encrypted at rest.
    pub encryption: bool,
}

fn project_dirs() -> Option<ProjectDirs> {
    ProjectDirs::from("", "", "csvcatalog")
}

/// Platform data directory for the default store.
pub fn default_data_dir() -> PathBuf {
    project_dirs()
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Platform default for the settings file.
pub fn default_settings_path() -> PathBuf {
    project_dirs()
        .map(|d| d.config_dir().join("settings.toml"))
        .unwrap_or_else(|| PathBuf::from("settings.toml"))
}
