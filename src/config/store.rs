//! Configuration persistence.
//!
//! # Responsibilities
//! - Load the JSON config file, falling back to a built-in default
//! - Save with whole-file atomicity (write-then-rename)
//! - Apply the defined normalizations (index clamp, non-empty servers)
//!
//! # Design Decisions
//! - A broken or missing file never fails a load; the caller gets the
//!   default configuration and a `was_defaulted` marker instead
//! - `was_defaulted` lives in the load result, not the schema, so it is
//!   never persisted back to disk

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::config::schema::Configuration;

/// Error type for configuration persistence.
#[derive(Debug)]
pub enum PersistenceError {
    Io(std::io::Error),
    Serialize(serde_json::Error),
}

impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Io(e) => write!(f, "IO error: {}", e),
            PersistenceError::Serialize(e) => write!(f, "Serialize error: {}", e),
        }
    }
}

impl std::error::Error for PersistenceError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            PersistenceError::Io(e) => Some(e),
            PersistenceError::Serialize(e) => Some(e),
        }
    }
}

/// Result of loading the configuration.
#[derive(Debug, Clone)]
pub struct LoadOutcome {
    /// The normalized configuration.
    pub config: Configuration,
    /// True when the file was absent or unreadable and the built-in
    /// default was substituted.
    pub was_defaulted: bool,
}

/// Loads and saves the persisted configuration file.
///
/// The store is a leaf: it is never started or stopped, and it hands out
/// pure values.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the configuration, substituting the default on any failure.
    pub fn load(&self) -> LoadOutcome {
        let parsed = fs::read_to_string(&self.path)
            .map_err(PersistenceError::Io)
            .and_then(|content| {
                serde_json::from_str::<Configuration>(&content).map_err(PersistenceError::Serialize)
            });

        match parsed {
            Ok(mut config) => {
                config.normalize();
                LoadOutcome {
                    config,
                    was_defaulted: false,
                }
            }
            Err(e) => {
                if self.path.exists() {
                    tracing::warn!(path = ?self.path, error = %e, "Failed to read config, using defaults");
                } else {
                    tracing::debug!(path = ?self.path, "No config file, using defaults");
                }
                LoadOutcome {
                    config: Configuration::default(),
                    was_defaulted: true,
                }
            }
        }
    }

    /// Save the configuration atomically.
    ///
    /// The document is written to a sibling temp file, flushed, and
    /// renamed over the target so a concurrent reader never observes a
    /// partial document.
    pub fn save(&self, config: &Configuration) -> Result<(), PersistenceError> {
        let mut normalized = config.clone();
        normalized.normalize();

        let json =
            serde_json::to_string_pretty(&normalized).map_err(PersistenceError::Serialize)?;

        write_atomic(&self.path, json.as_bytes()).map_err(PersistenceError::Io)
    }
}

/// Whole-file atomic write: temp file in the same directory, flush, rename.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(contents)?;
        file.flush()?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::schema::ServerProfile;

    fn temp_path(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("proxy-supervisor-store-{}", std::process::id()));
        fs::create_dir_all(&dir).unwrap();
        dir.join(name)
    }

    #[test]
    fn test_missing_file_defaults() {
        let store = ConfigStore::new(temp_path("absent.json"));
        let outcome = store.load();
        assert!(outcome.was_defaulted);
        assert_eq!(outcome.config, Configuration::default());
    }

    #[test]
    fn test_save_load_round_trip() {
        let store = ConfigStore::new(temp_path("round-trip.json"));
        let mut config = Configuration::default();
        config.enabled = true;
        config.servers.push(ServerProfile {
            host: "example.com".into(),
            password: "pw".into(),
            ..ServerProfile::default()
        });
        config.selected_index = 1;

        store.save(&config).unwrap();
        let outcome = store.load();
        assert!(!outcome.was_defaulted);
        assert_eq!(outcome.config, config);
    }

    #[test]
    fn test_save_clamps_index() {
        let store = ConfigStore::new(temp_path("clamped.json"));
        let config = Configuration {
            selected_index: 42,
            ..Configuration::default()
        };
        store.save(&config).unwrap();
        assert_eq!(store.load().config.selected_index, 0);
    }

    #[test]
    fn test_corrupt_file_defaults() {
        let path = temp_path("corrupt.json");
        fs::write(&path, "{not json").unwrap();
        let outcome = ConfigStore::new(path).load();
        assert!(outcome.was_defaulted);
    }
}
