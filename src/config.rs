//! Enabled/disabled extension state, one JSON file per scope.
//!
//! The file is created lazily: a missing file loads as an empty map, and
//! the first `set` writes it. Entries for packages that are no longer
//! installed are kept as they are.

use anyhow::Result;
use log::debug;
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::BpmError;
use crate::runtime::{Runtime, write_atomic};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigFile {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub extensions: BTreeMap<String, bool>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<BTreeMap<String, bool>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::deserialize(deserializer)?.unwrap_or_default())
}

/// Reads and writes one scope's config file.
pub struct ConfigStore<'a, R: Runtime> {
    runtime: &'a R,
    path: PathBuf,
}

impl<'a, R: Runtime> ConfigStore<'a, R> {
    pub fn new(runtime: &'a R, path: PathBuf) -> Self {
        Self { runtime, path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn load(&self) -> Result<ConfigFile> {
        if !self.runtime.exists(&self.path) {
            return Ok(ConfigFile::default());
        }

        let content = self.runtime.read_to_string(&self.path)?;
        serde_json::from_str(&content).map_err(|e| {
            BpmError::ConfigInvalid {
                path: self.path.display().to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    pub fn save(&self, config: &ConfigFile) -> Result<()> {
        let content = serde_json::to_string_pretty(config)?;
        write_atomic(self.runtime, &self.path, content.as_bytes())?;
        debug!("Saved config to {:?}", self.path);
        Ok(())
    }

    /// Whether `name` is enabled. An absent entry is
    /// [`BpmError::ExtensionUnknown`], distinct from an explicit `false`.
    pub fn is_enabled(&self, name: &str) -> Result<bool> {
        self.load()?
            .extensions
            .get(name)
            .copied()
            .ok_or_else(|| {
                BpmError::ExtensionUnknown {
                    name: name.to_string(),
                }
                .into()
            })
    }

    pub fn set(&self, name: &str, enabled: bool) -> Result<()> {
        let mut config = self.load()?;
        config.extensions.insert(name.to_string(), enabled);
        self.save(&config)
    }

    /// Drops the entry for `name`. Returns whether there was one; the file
    /// is only rewritten when something changed.
    pub fn remove(&self, name: &str) -> Result<bool> {
        let mut config = self.load()?;
        if config.extensions.remove(name).is_none() {
            return Ok(false);
        }
        self.save(&config)?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{MockRuntime, RealRuntime};
    use std::fs;
    use tempfile::tempdir;

    #[test]
    fn test_missing_file_loads_empty() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(&RealRuntime, dir.path().join(".bpmconfig"));

        assert_eq!(store.load().unwrap(), ConfigFile::default());
        // Loading never creates the file
        assert!(!store.path().exists());
    }

    #[test]
    fn test_null_extensions_loads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".bpmconfig");
        fs::write(&path, r#"{"extensions": null}"#).unwrap();

        let store = ConfigStore::new(&RealRuntime, path);
        assert!(store.load().unwrap().extensions.is_empty());
    }

    #[test]
    fn test_malformed_file_is_config_invalid() {
        let dir = tempdir().unwrap();
        let path = dir.path().join(".bpmconfig");
        fs::write(&path, "{ not json").unwrap();

        let store = ConfigStore::new(&RealRuntime, path);
        let err = store.load().unwrap_err();
        assert!(matches!(
            BpmError::find(&err),
            Some(BpmError::ConfigInvalid { .. })
        ));

        // Never auto-repaired
        assert_eq!(fs::read_to_string(store.path()).unwrap(), "{ not json");
    }

    #[test]
    fn test_set_and_is_enabled() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(&RealRuntime, dir.path().join(".bpmconfig"));

        store.set("fmt", true).unwrap();
        store.set("lint", false).unwrap();

        assert!(store.is_enabled("fmt").unwrap());
        assert!(!store.is_enabled("lint").unwrap());

        let err = store.is_enabled("ghost").unwrap_err();
        assert_eq!(
            BpmError::find(&err),
            Some(&BpmError::ExtensionUnknown {
                name: "ghost".into()
            })
        );
    }

    #[test]
    fn test_saved_format() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(&RealRuntime, dir.path().join(".bpmconfig"));
        store.set("fmt", true).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(store.path()).unwrap()).unwrap();
        assert_eq!(value, serde_json::json!({"extensions": {"fmt": true}}));
    }

    #[test]
    fn test_remove() {
        let dir = tempdir().unwrap();
        let store = ConfigStore::new(&RealRuntime, dir.path().join(".bpmconfig"));
        store.set("fmt", true).unwrap();

        assert!(store.remove("fmt").unwrap());
        assert!(!store.remove("fmt").unwrap());
        assert!(store.load().unwrap().extensions.is_empty());
    }

    #[test]
    fn test_remove_absent_does_not_write() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| false);
        runtime.expect_write().never();
        runtime.expect_rename().never();

        let store = ConfigStore::new(&runtime, PathBuf::from("/p/.bpmconfig"));
        assert!(!store.remove("fmt").unwrap());
    }
}
