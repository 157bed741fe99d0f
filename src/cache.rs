//! Local download cache for `.bpex` archives.
//!
//! Entries live under `<home>/.bpm/cache` and are reused only while younger
//! than the configured TTL. Nothing is evicted automatically; `clear` is an
//! explicit operator action.

use anyhow::{Context, Result};
use log::debug;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::archive::ARCHIVE_EXTENSION;
use crate::runtime::{Runtime, unique_sibling, write_atomic};

/// Default time an entry stays valid.
pub const DEFAULT_TTL: Duration = Duration::from_secs(24 * 60 * 60);

/// Cache key: package name plus a pinned version, or the latest one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub name: String,
    pub version: Option<String>,
}

impl CacheKey {
    pub fn latest(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: None,
        }
    }

    pub fn pinned(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: Some(version.into()),
        }
    }

    /// `<name>.bpex` for latest, `<name>-<version>.bpex` when pinned.
    pub fn file_name(&self) -> String {
        match &self.version {
            Some(v) => format!("{}-{}.{}", self.name, v, ARCHIVE_EXTENSION),
            None => format!("{}.{}", self.name, ARCHIVE_EXTENSION),
        }
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}@{}",
            self.name,
            self.version.as_deref().unwrap_or("latest")
        )
    }
}

pub struct CacheStore<'a, R: Runtime> {
    runtime: &'a R,
    root: PathBuf,
    ttl: Duration,
}

impl<'a, R: Runtime> CacheStore<'a, R> {
    pub fn new(runtime: &'a R, root: PathBuf, ttl: Duration) -> Self {
        Self { runtime, root, ttl }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the entry for `key` lives, whether or not it exists.
    pub fn path(&self, key: &CacheKey) -> PathBuf {
        self.root.join(key.file_name())
    }

    /// True when the entry exists and is younger than the TTL.
    pub fn has(&self, key: &CacheKey) -> bool {
        let path = self.path(key);
        if !self.runtime.exists(&path) {
            return false;
        }

        let modified = match self.runtime.modified(&path) {
            Ok(t) => t,
            Err(e) => {
                debug!("Cannot stat cache entry {:?}: {}", path, e);
                return false;
            }
        };

        // A modification time in the future counts as fresh.
        let age = self
            .runtime
            .now()
            .duration_since(modified)
            .unwrap_or(Duration::ZERO);
        age < self.ttl
    }

    /// Path of a valid entry.
    pub fn get(&self, key: &CacheKey) -> Option<PathBuf> {
        self.has(key).then(|| self.path(key))
    }

    /// Store `bytes` for `key` via temp-file-then-rename.
    #[tracing::instrument(skip(self, bytes))]
    pub fn put(&self, key: &CacheKey, bytes: &[u8]) -> Result<PathBuf> {
        let path = self.path(key);
        write_atomic(self.runtime, &path, bytes)?;
        debug!("Cached {} at {:?}", key, path);
        Ok(path)
    }

    /// A fresh temporary path inside the cache directory, for streaming a
    /// download before [`CacheStore::commit`] moves it into place.
    pub fn staging_path(&self, key: &CacheKey) -> Result<PathBuf> {
        self.ensure_root()?;
        Ok(unique_sibling(&self.path(key), "download"))
    }

    /// Atomically move a staged file into the entry for `key`.
    pub fn commit(&self, key: &CacheKey, staged: &Path) -> Result<PathBuf> {
        let path = self.path(key);
        self.runtime
            .rename(staged, &path)
            .with_context(|| format!("Failed to move download into cache at {:?}", path))?;
        debug!("Cached {} at {:?}", key, path);
        Ok(path)
    }

    /// Drop the entry for `key`. Missing entries are fine.
    pub fn invalidate(&self, key: &CacheKey) -> Result<()> {
        let path = self.path(key);
        if self.runtime.exists(&path) {
            debug!("Invalidating cache entry {}", key);
            self.runtime.remove_file(&path)?;
        }
        Ok(())
    }

    /// Remove every cached archive. Returns how many were removed.
    #[tracing::instrument(skip(self))]
    pub fn clear(&self) -> Result<usize> {
        if !self.runtime.exists(&self.root) {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in self.runtime.read_dir(&self.root)? {
            let is_archive = entry
                .extension()
                .is_some_and(|ext| ext == ARCHIVE_EXTENSION);
            if is_archive && !self.runtime.is_dir(&entry) {
                self.runtime.remove_file(&entry)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    fn ensure_root(&self) -> Result<()> {
        if !self.runtime.exists(&self.root) {
            self.runtime
                .create_dir_all(&self.root)
                .with_context(|| format!("Failed to create cache directory {:?}", self.root))?;
        }
        Ok(())
    }
}
