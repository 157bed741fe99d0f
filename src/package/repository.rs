//! Package repository for one scope's extensions directory.
//!
//! Each package occupies `<root>/<name>` and carries its `bplus.toml`.
//! Entries whose name starts with `.` are staging or backup directories of
//! an install in progress (or an interrupted one) and are never reported.

use anyhow::Result;
use log::warn;
use std::path::{Path, PathBuf};

use crate::manifest::{MANIFEST_FILE, Manifest};
use crate::runtime::{Runtime, unique_suffix};
use crate::settings::Scope;

/// Reported version of an install whose manifest is missing or unreadable.
pub const UNKNOWN_VERSION: &str = "unknown";

/// An installed package, derived from the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    pub name: String,
    pub version: String,
    pub path: PathBuf,
    pub scope: Scope,
}

pub struct PackageRepository<'a, R: Runtime> {
    runtime: &'a R,
    root: PathBuf,
    scope: Scope,
}

impl<'a, R: Runtime> PackageRepository<'a, R> {
    pub fn new(runtime: &'a R, root: PathBuf, scope: Scope) -> Self {
        Self {
            runtime,
            root,
            scope,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn scope(&self) -> Scope {
        self.scope
    }

    /// Returns: `<root>/<name>`
    pub fn package_dir(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    /// A fresh `<root>/.staging-<name>-<nonce>` path.
    pub fn staging_dir(&self, name: &str) -> PathBuf {
        self.root
            .join(format!(".staging-{}-{}", name, unique_suffix()))
    }

    /// A fresh `<root>/.backup-<name>-<nonce>` path.
    pub fn backup_dir(&self, name: &str) -> PathBuf {
        self.root
            .join(format!(".backup-{}-{}", name, unique_suffix()))
    }

    pub fn is_installed(&self, name: &str) -> bool {
        self.runtime.is_dir(&self.package_dir(name))
    }

    /// Manifest of an installed package. `None` when the package has no
    /// manifest file.
    pub fn load_manifest(&self, name: &str) -> Result<Option<Manifest>> {
        let path = self.package_dir(name).join(MANIFEST_FILE);
        if !self.runtime.exists(&path) {
            return Ok(None);
        }
        Manifest::load(self.runtime, &path).map(Some)
    }

    /// The record for `name`, or `None` if it is not installed.
    pub fn record(&self, name: &str) -> Option<PackageRecord> {
        if !self.is_installed(name) {
            return None;
        }
        let version = match self.load_manifest(name) {
            Ok(Some(manifest)) => manifest.version,
            Ok(None) => UNKNOWN_VERSION.to_string(),
            Err(e) => {
                warn!("Failed to read manifest of {}: {:#}", name, e);
                UNKNOWN_VERSION.to_string()
            }
        };
        Some(PackageRecord {
            name: name.to_string(),
            version,
            path: self.package_dir(name),
            scope: self.scope,
        })
    }

    /// Every installed package, sorted by name.
    pub fn find_all(&self) -> Result<Vec<PackageRecord>> {
        if !self.runtime.exists(&self.root) {
            return Ok(vec![]);
        }

        let mut records = Vec::new();
        for entry in self.runtime.read_dir(&self.root)? {
            let Some(name) = entry.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if name.starts_with('.') || !self.runtime.is_dir(&entry) {
                continue;
            }
            if let Some(record) = self.record(name) {
                records.push(record);
            }
        }

        records.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(records)
    }
}
