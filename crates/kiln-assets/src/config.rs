//! Asset loading configuration
//!
//! Read from `~/.config/kiln/assets.toml` by default.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::AssetError;

/// Settings for the asset server and its loaders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AssetConfig {
    /// Directory relative asset paths resolve against (current dir if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub asset_root: Option<PathBuf>,
    /// Directory mesh caches are written under (next to each model if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache_root: Option<PathBuf>,
    /// Loader threads (hardware concurrency if unset)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub worker_count: Option<usize>,
    /// Write a binary mesh cache after parsing a source asset
    pub write_cache: bool,
    /// Re-parse when the source changed since the cache was written
    pub check_staleness: bool,
    /// Flip texture rows so the origin is bottom-left
    pub flip_textures: bool,
}

impl Default for AssetConfig {
    fn default() -> Self {
        Self {
            asset_root: None,
            cache_root: None,
            worker_count: None,
            write_cache: true,
            check_staleness: true,
            flip_textures: true,
        }
    }
}

impl AssetConfig {
    /// Get the default config file path
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("kiln").join("assets.toml"))
    }

    /// Load from the default path, or return defaults if missing or invalid
    pub fn load() -> Self {
        let Some(path) = Self::default_path() else {
            warn!("Could not determine config directory");
            return Self::default();
        };

        if !path.exists() {
            info!("No asset config found, using defaults");
            return Self::default();
        }

        match Self::load_from(&path) {
            Ok(config) => config,
            Err(e) => {
                warn!("{}, using defaults", e);
                Self::default()
            }
        }
    }

    /// Load from a specific file. Missing keys take their default values.
    pub fn load_from(path: &Path) -> Result<Self, AssetError> {
        let content = fs::read_to_string(path).map_err(|e| AssetError::io(path, e))?;
        let config = toml::from_str(&content)
            .map_err(|e| AssetError::Config(path.to_path_buf(), e.to_string()))?;
        info!("Loaded asset config from {:?}", path);
        Ok(config)
    }

    /// Save to a specific file, creating its directory if needed
    pub fn save_to(&self, path: &Path) -> Result<(), AssetError> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| AssetError::io(dir, e))?;
        }
        let content = toml::to_string_pretty(self)
            .map_err(|e| AssetError::Config(path.to_path_buf(), e.to_string()))?;
        fs::write(path, content).map_err(|e| AssetError::io(path, e))?;
        info!("Saved asset config to {:?}", path);
        Ok(())
    }

    /// Worker count to start the pool with.
    pub fn effective_worker_count(&self) -> usize {
        self.worker_count
            .unwrap_or_else(kiln_core::default_worker_count)
            .max(1)
    }
}
