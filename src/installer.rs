//! Install, uninstall, update and enable/disable packages in one scope.
//!
//! A package directory `<root>/<name>` only ever appears complete: content
//! is assembled in a hidden staging directory next to it and renamed into
//! place. Replacing an install moves the old tree aside first and restores
//! it if the new one cannot be moved in.

use anyhow::{Context, Result};
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::archive;
use crate::cache::CacheKey;
use crate::cleanup::StagingGuard;
use crate::config::ConfigStore;
use crate::error::BpmError;
use crate::manifest::{MANIFEST_FILE, Manifest};
use crate::package::{
    PackageRecord, PackageRepository, Source, compare_versions, validate_name, versions_match,
};
use crate::resolver::Resolver;
use crate::runtime::Runtime;
use crate::update::{UpdateCoordinator, UpdateOutcome, UpdatePackage, UpdateReport};

/// Details of one installed package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageInfo {
    pub record: PackageRecord,
    pub manifest: Manifest,
    /// `None` when the package has no entry in the scope's config.
    pub enabled: Option<bool>,
}

pub struct Installer<'a, R: Runtime> {
    runtime: &'a R,
    repository: PackageRepository<'a, R>,
    config: ConfigStore<'a, R>,
    resolver: &'a Resolver<'a, R>,
}

impl<'a, R: Runtime> Installer<'a, R> {
    pub fn new(
        runtime: &'a R,
        repository: PackageRepository<'a, R>,
        config: ConfigStore<'a, R>,
        resolver: &'a Resolver<'a, R>,
    ) -> Self {
        Self {
            runtime,
            repository,
            config,
            resolver,
        }
    }

    pub fn repository(&self) -> &PackageRepository<'a, R> {
        &self.repository
    }

    #[tracing::instrument(skip(self))]
    pub async fn install(&self, source: &Source, overwrite: bool) -> Result<PackageRecord> {
        match source {
            Source::Local(path) => self.install_local(path, overwrite),
            Source::Remote { name, version } => {
                self.install_remote(name, version.as_deref(), overwrite)
                    .await
            }
        }
    }

    fn install_local(&self, path: &Path, overwrite: bool) -> Result<PackageRecord> {
        let src = if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.runtime.current_dir()?.join(path)
        };
        if !self.runtime.is_dir(&src) {
            return Err(BpmError::InputInvalid(format!(
                "local package directory does not exist: {}",
                path.display()
            ))
            .into());
        }
        let src = self.runtime.canonicalize(&src)?;

        let name = self.local_package_name(&src)?;
        self.ensure_installable(&name, overwrite)?;
        info!("Installing {} from {:?}", name, src);

        let staging = self.prepare_staging(&name)?;
        // Never copy the extensions directory, or the staging area being
        // filled, into itself.
        let excluded = [
            self.runtime.canonicalize(self.repository.root())?,
            self.runtime.canonicalize(staging.path())?,
        ];
        let files = copy_tree(self.runtime, &src, staging.path(), &excluded)
            .with_context(|| format!("Failed to copy {:?}", src))?;
        debug!("Staged {} file(s) for {}", files, name);

        self.commit(staging.path(), &name, overwrite)?;
        staging.success();
        self.installed_record(&name)
    }

    async fn install_remote(
        &self,
        name: &str,
        version: Option<&str>,
        overwrite: bool,
    ) -> Result<PackageRecord> {
        validate_name(name)?;
        self.ensure_installable(name, overwrite)?;

        let archive_path = self.resolver.resolve_remote(name, version).await?;

        let staging = self.prepare_staging(name)?;
        archive::unpack(self.runtime, &archive_path, staging.path())?;

        let package_root = self.locate_package_root(staging.path())?;
        let manifest = Manifest::load(self.runtime, &package_root.join(MANIFEST_FILE))?;
        if manifest.name != name {
            return Err(BpmError::ManifestInvalid(format!(
                "archive for '{}' contains package '{}'",
                name, manifest.name
            ))
            .into());
        }

        self.commit(&package_root, name, overwrite)?;
        // Anything left in staging (a wrapper directory) goes with the guard.
        drop(staging);
        self.installed_record(name)
    }

    /// Removes the package directory and its config entry.
    #[tracing::instrument(skip(self))]
    pub fn uninstall(&self, name: &str) -> Result<()> {
        if !self.repository.is_installed(name) {
            return Err(BpmError::NotInstalled {
                name: name.to_string(),
            }
            .into());
        }
        // A malformed config stops the uninstall before anything is removed.
        self.config.load()?;

        // Hide the tree first so a partially deleted package is never listed.
        let target = self.repository.package_dir(name);
        let doomed = self.repository.backup_dir(name);
        self.runtime
            .rename(&target, &doomed)
            .with_context(|| format!("Failed to remove {:?}", target))?;
        self.runtime.remove_dir_all(&doomed)?;

        if self.config.remove(name)? {
            debug!("Removed {} from {:?}", name, self.config.path());
        }
        info!("Uninstalled {}", name);
        Ok(())
    }

    /// Reinstall `name` from the registry when its latest version differs
    /// from the installed one.
    #[tracing::instrument(skip(self))]
    pub async fn update(&self, name: &str) -> Result<UpdateOutcome> {
        let record = self
            .repository
            .record(name)
            .ok_or_else(|| BpmError::NotInstalled {
                name: name.to_string(),
            })?;

        let latest = self
            .resolver
            .latest_version(name)
            .await?
            .ok_or_else(|| BpmError::PackageNotFound {
                name: name.to_string(),
            })?;

        if versions_match(&record.version, &latest) {
            debug!("{} is up to date ({})", name, record.version);
            return Ok(UpdateOutcome::Unchanged {
                version: record.version,
            });
        }
        if compare_versions(&latest, &record.version).is_lt() {
            warn!(
                "Registry reports {} {} which is older than installed {}",
                name, latest, record.version
            );
        }

        self.resolver.cache().invalidate(&CacheKey::latest(name))?;
        let updated = self.install_remote(name, None, true).await?;
        info!("Updated {} from {} to {}", name, record.version, updated.version);
        Ok(UpdateOutcome::Updated {
            from: record.version,
            to: updated.version,
        })
    }

    /// Update every installed package, `max_parallel` at a time.
    pub async fn update_all(&self, max_parallel: usize) -> Result<UpdateReport> {
        let names = self
            .repository
            .find_all()?
            .into_iter()
            .map(|r| r.name)
            .collect();
        Ok(UpdateCoordinator::new(max_parallel).run(self, names).await)
    }

    pub fn enable(&self, name: &str) -> Result<()> {
        if !self.repository.is_installed(name) {
            return Err(BpmError::NotInstalled {
                name: name.to_string(),
            }
            .into());
        }
        self.config.set(name, true)?;
        info!("Enabled {}", name);
        Ok(())
    }

    pub fn disable(&self, name: &str) -> Result<()> {
        // Fails with ExtensionUnknown when there is no entry at all.
        self.config.is_enabled(name)?;
        self.config.set(name, false)?;
        info!("Disabled {}", name);
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<PackageRecord>> {
        self.repository.find_all()
    }

    pub fn info(&self, name: &str) -> Result<PackageInfo> {
        let record = self
            .repository
            .record(name)
            .ok_or_else(|| BpmError::NotInstalled {
                name: name.to_string(),
            })?;
        let manifest = self.repository.load_manifest(name)?.ok_or_else(|| {
            BpmError::ManifestInvalid(format!("package manifest not found for {}", name))
        })?;
        let enabled = self.config.load()?.extensions.get(name).copied();

        Ok(PackageInfo {
            record,
            manifest,
            enabled,
        })
    }

    /// The manifest name when the source has a usable manifest, else the
    /// directory name.
    fn local_package_name(&self, src: &Path) -> Result<String> {
        let manifest_path = src.join(MANIFEST_FILE);
        if self.runtime.exists(&manifest_path) {
            match Manifest::load(self.runtime, &manifest_path) {
                Ok(manifest) if validate_name(&manifest.name).is_ok() => return Ok(manifest.name),
                Ok(manifest) => warn!(
                    "Ignoring unusable package name '{}' in {:?}",
                    manifest.name, manifest_path
                ),
                Err(e) => warn!("Ignoring manifest {:?}: {:#}", manifest_path, e),
            }
        }

        let name = src
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                BpmError::InputInvalid(format!(
                    "cannot derive a package name from {}",
                    src.display()
                ))
            })?;
        validate_name(name)?;
        Ok(name.to_string())
    }

    fn ensure_installable(&self, name: &str, overwrite: bool) -> Result<()> {
        if !overwrite && self.repository.is_installed(name) {
            return Err(BpmError::AlreadyInstalled {
                name: name.to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn prepare_staging(&self, name: &str) -> Result<StagingGuard<'a, R>> {
        let root = self.repository.root();
        if !self.runtime.exists(root) {
            self.runtime
                .create_dir_all(root)
                .with_context(|| format!("Failed to create extensions directory {:?}", root))?;
        }
        let staging = self.repository.staging_dir(name);
        self.runtime.create_dir_all(&staging)?;
        Ok(StagingGuard::new(self.runtime, staging))
    }

    /// The staging directory itself, or its single subdirectory, whichever
    /// holds the manifest.
    fn locate_package_root(&self, staging: &Path) -> Result<PathBuf> {
        if self.runtime.exists(&staging.join(MANIFEST_FILE)) {
            return Ok(staging.to_path_buf());
        }

        let entries = self.runtime.read_dir(staging)?;
        if let [only] = entries.as_slice()
            && self.runtime.is_dir(only)
            && self.runtime.exists(&only.join(MANIFEST_FILE))
        {
            return Ok(only.clone());
        }

        Err(BpmError::ManifestInvalid(format!("archive does not contain {}", MANIFEST_FILE)).into())
    }

    fn commit(&self, staged: &Path, name: &str, overwrite: bool) -> Result<()> {
        let target = self.repository.package_dir(name);
        let backup = self.repository.backup_dir(name);
        swap_into_place(self.runtime, staged, &target, &backup, overwrite)
    }

    fn installed_record(&self, name: &str) -> Result<PackageRecord> {
        let record = self
            .repository
            .record(name)
            .with_context(|| format!("{} vanished right after installation", name))?;
        info!("Installed {} {} into {:?}", record.name, record.version, record.path);
        Ok(record)
    }
}

impl<R: Runtime> UpdatePackage for Installer<'_, R> {
    async fn update_package(&self, name: &str) -> Result<UpdateOutcome> {
        self.update(name).await
    }
}

/// Rename `staged` to `target`. An existing `target` is an error unless
/// `overwrite` is set, in which case it is moved to `backup` first and
/// restored if the new tree cannot be moved in.
fn swap_into_place<R: Runtime + ?Sized>(
    runtime: &R,
    staged: &Path,
    target: &Path,
    backup: &Path,
    overwrite: bool,
) -> Result<()> {
    if !runtime.exists(target) {
        return runtime
            .rename(staged, target)
            .with_context(|| format!("Failed to move package into {:?}", target));
    }

    if !overwrite {
        let name = target
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        return Err(BpmError::AlreadyInstalled { name }.into());
    }

    runtime
        .rename(target, backup)
        .with_context(|| format!("Failed to move existing install {:?} aside", target))?;

    if let Err(e) = runtime.rename(staged, target) {
        warn!("Restoring previous install of {:?}", target);
        if let Err(restore) = runtime.rename(backup, target) {
            warn!(
                "Failed to restore {:?} from {:?}: {}",
                target, backup, restore
            );
        }
        return Err(e).with_context(|| format!("Failed to move package into {:?}", target));
    }

    if let Err(e) = runtime.remove_dir_all(backup) {
        warn!("Failed to remove old install at {:?}: {}", backup, e);
    }
    Ok(())
}

/// Recursively copy `src` into `dst`. Symbolic links are skipped, never
/// followed. Returns the number of files copied.
fn copy_tree<R: Runtime + ?Sized>(
    runtime: &R,
    src: &Path,
    dst: &Path,
    excluded: &[PathBuf],
) -> Result<usize> {
    runtime.create_dir_all(dst)?;

    let mut files = 0;
    for entry in runtime.read_dir(src)? {
        let Some(file_name) = entry.file_name() else {
            continue;
        };
        if runtime.is_symlink(&entry) {
            debug!("Skipping symbolic link {:?}", entry);
            continue;
        }
        if excluded.iter().any(|e| e == &entry) {
            continue;
        }

        let target = dst.join(file_name);
        if runtime.is_dir(&entry) {
            files += copy_tree(runtime, &entry, &target, excluded)?;
        } else {
            runtime.copy(&entry, &target)?;
            files += 1;
        }
    }
    Ok(files)
}
