//! Toolkit configuration.
//!
//! Holds everything that used to be baked into the site scripts: the cache
//! prefix and asset manifest of the offline worker, the files and marker of
//! the build-time injector, and the contact relay addresses.
//!
//! Configuration is read from `--config <file>` or
//! `~/.config/linkedcv/config.json`; missing files and fields fall back to
//! the defaults below.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::cache::manifest::DEFAULT_ASSETS;
use crate::cache::{AssetManifest, WorkerConfig};
use crate::contact::RelayConfig;
use crate::error::ConfigError;
use crate::version::injector::{DEFAULT_MARKER, DEFAULT_TARGETS};
use crate::version::{CacheName, Injector, VersionToken, DEFAULT_REVISION_VAR};

/// Application name used for config/cache directory paths
const APP_NAME: &str = "linkedcv";

/// Config file name
const CONFIG_FILE: &str = "config.json";

/// Prefix of every cache generation name
const DEFAULT_CACHE_PREFIX: &str = "linkedcv";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub cache_prefix: String,
    pub assets: Vec<String>,
    pub inject_targets: Vec<PathBuf>,
    pub version_marker: String,
    /// Environment variable holding the deployment's revision id
    pub revision_var: String,
    /// Site origin the worker fetches from, e.g. `https://linkedcv.example.dev`
    pub origin: Option<String>,
    /// Where generations are stored; defaults to the platform cache directory
    pub cache_dir: Option<PathBuf>,
    pub relay: RelayConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_prefix: DEFAULT_CACHE_PREFIX.to_string(),
            assets: DEFAULT_ASSETS.iter().map(|a| a.to_string()).collect(),
            inject_targets: DEFAULT_TARGETS.iter().map(PathBuf::from).collect(),
            version_marker: DEFAULT_MARKER.to_string(),
            revision_var: DEFAULT_REVISION_VAR.to_string(),
            origin: None,
            cache_dir: None,
            relay: RelayConfig::default(),
        }
    }
}

impl Config {
    /// Load from an explicit file, or from the default location if it exists
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::config_path() {
                Some(path) if path.exists() => path,
                _ => return Ok(Self::default()),
            },
        };
        let contents = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    fn config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(APP_NAME).join(CONFIG_FILE))
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        crate::cache::DiskStorage::default_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))
    }

    pub fn worker_config(&self, token: VersionToken) -> Result<WorkerConfig, ConfigError> {
        Ok(WorkerConfig {
            cache_name: CacheName::new(&self.cache_prefix, token)?,
            manifest: AssetManifest::new(self.assets.iter().cloned())?,
        })
    }

    pub fn injector(&self, root: impl Into<PathBuf>) -> Injector {
        Injector::new(root, self.inject_targets.clone(), self.version_marker.clone())
    }
}
