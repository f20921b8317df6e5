use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_CAPTURE_DELAY_MS: u64 = 500;

/// User-facing switches of the tree cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch for both capture and restore.
    pub use_cached_tree: bool,
    /// Quiescence delay between the last reservation and the capture.
    pub capture_delay_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            use_cached_tree: true,
            capture_delay_ms: DEFAULT_CAPTURE_DELAY_MS,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl CacheConfig {
    pub fn capture_delay(&self) -> Duration {
        Duration::from_millis(self.capture_delay_ms)
    }
}

/// Parses a TOML document into a settings struct. Missing sections fall
/// back to the struct's serde defaults.
pub fn parse_config<T: DeserializeOwned>(source: &str) -> Result<T, ConfigError> {
    Ok(toml::from_str(source)?)
}

/// Reads and parses a TOML settings file.
pub fn load_config<T: DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_config(&source)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_fields_take_defaults() {
        let config: CacheConfig = parse_config("capture_delay_ms = 120").unwrap();
        assert!(config.use_cached_tree);
        assert_eq!(config.capture_delay(), Duration::from_millis(120));
        assert_eq!(
            parse_config::<CacheConfig>("").unwrap(),
            CacheConfig::default()
        );
    }

    #[test]
    fn rejects_wrong_types() {
        let err = parse_config::<CacheConfig>("use_cached_tree = \"yes\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn load_reads_a_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "use_cached_tree = false").unwrap();
        let config: CacheConfig = load_config(file.path()).unwrap();
        assert!(!config.use_cached_tree);
        assert_eq!(config.capture_delay_ms, DEFAULT_CAPTURE_DELAY_MS);
    }

    #[test]
    fn load_reports_missing_file() {
        let err = load_config::<CacheConfig>(Path::new("/nonexistent/canopy.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
