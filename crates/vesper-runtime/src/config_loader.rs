//! Bootstrap convenience around [`ConfigStore`]: search current dir, then a
//! user config directory, then fall back to an empty store, over the
//! JSON/JSON5 tree `vesper-config` actually ingests.

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use vesper_config::{ConfigResult, ConfigStore};

const CONFIG_NAMES: &[&str] = &[
    "vesper.json",
    "vesper.json5",
    "config.json",
    "config.json5",
    ".vesper.json",
];

pub struct ConfigLoader {
    search_paths: Vec<PathBuf>,
}

impl ConfigLoader {
    pub fn new() -> Self {
        Self {
            search_paths: Vec::new(),
        }
    }

    pub fn add_search_path(mut self, path: impl AsRef<Path>) -> Self {
        self.search_paths.push(path.as_ref().to_path_buf());
        self
    }

    pub fn with_current_dir(self) -> Self {
        match std::env::current_dir() {
            Ok(cwd) => self.add_search_path(cwd),
            Err(_) => self,
        }
    }

    /// Adds the platform user config directory's `vesper` subdirectory to
    /// the search path (e.g. `$XDG_CONFIG_HOME` or `~/.config` on Linux).
    pub fn with_user_config_dir(self) -> Self {
        match dirs::config_dir() {
            Some(dir) => self.add_search_path(dir.join("vesper")),
            None => self,
        }
    }

    /// Loads the first configuration file found on the search path into a
    /// fresh [`ConfigStore`]; falls back to an empty store if none is found.
    pub fn load(&self) -> ConfigResult<ConfigStore> {
        let store = ConfigStore::new();
        match self.find_config_file() {
            Some(path) => {
                info!(path = %path.display(), "loading configuration file");
                store.load_from_file(&path)?;
            }
            None => info!("no configuration file found on search path, using defaults"),
        }
        Ok(store)
    }

    /// Loads a specific file into a fresh [`ConfigStore`].
    pub fn load_from_file(&self, path: impl AsRef<Path>) -> ConfigResult<ConfigStore> {
        let store = ConfigStore::new();
        store.load_from_file(path.as_ref())?;
        Ok(store)
    }

    fn find_config_file(&self) -> Option<PathBuf> {
        for search_path in &self.search_paths {
            for name in CONFIG_NAMES {
                let path = search_path.join(name);
                debug!(path = %path.display(), "checking for configuration file");
                if path.exists() {
                    return Some(path);
                }
            }
        }
        None
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new().with_current_dir().with_user_config_dir()
    }
}

/// Convenience function for the default search path.
pub fn load_config() -> ConfigResult<ConfigStore> {
    ConfigLoader::default().load()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_empty_store_when_nothing_found() {
        let dir = tempfile::tempdir().unwrap();
        let loader = ConfigLoader::new().add_search_path(dir.path());
        let store = loader.load().unwrap();
        assert!(store.get_keys().is_empty());
    }

    #[test]
    fn finds_and_loads_first_matching_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("vesper.json"), r#"{"mount": {"slew_rate": 4}}"#).unwrap();
        let loader = ConfigLoader::new().add_search_path(dir.path());
        let store = loader.load().unwrap();
        assert_eq!(store.get("vesper/mount/slew_rate").unwrap(), serde_json::json!(4));
    }
}
