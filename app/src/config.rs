use std::path::{Path, PathBuf};

use cache::{load_config, CacheConfig};
use serde::{Deserialize, Serialize};

use crate::logging::LogConfig;
use crate::AppError;

/// Top-level settings file.
///
/// ```toml
/// storage_dir = "/var/tmp/canopy"
///
/// [log]
/// level = "debug"
/// format = "json"
///
/// [cache]
/// use_cached_tree = true
/// capture_delay_ms = 500
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub log: LogConfig,
    pub cache: CacheConfig,
    /// Where window values are persisted between runs.
    pub storage_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            cache: CacheConfig::default(),
            storage_dir: std::env::temp_dir().join("canopy"),
        }
    }
}

impl AppConfig {
    pub fn load(path: &Path) -> Result<Self, AppError> {
        Ok(load_config(path)?)
    }
}
