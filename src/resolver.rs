//! Resolves registry packages to archives in the local cache.

use anyhow::Result;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};

use crate::cache::{CacheKey, CacheStore};
use crate::checksum;
use crate::registry::Registry;
use crate::runtime::Runtime;

pub struct Resolver<'a, R: Runtime> {
    runtime: &'a R,
    cache: CacheStore<'a, R>,
    registry: &'a Registry,
}

impl<'a, R: Runtime> Resolver<'a, R> {
    pub fn new(runtime: &'a R, cache: CacheStore<'a, R>, registry: &'a Registry) -> Self {
        Self {
            runtime,
            cache,
            registry,
        }
    }

    pub fn cache(&self) -> &CacheStore<'a, R> {
        &self.cache
    }

    pub fn registry(&self) -> &Registry {
        self.registry
    }

    /// Path of a verified archive for `name`, downloading it on a cache miss.
    ///
    /// A download is streamed to a temporary file in the cache directory and
    /// only renamed into place after its digest checks out, so the cache
    /// never holds a partial or mismatching archive.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_remote(&self, name: &str, version: Option<&str>) -> Result<PathBuf> {
        let key = match version {
            Some(v) => CacheKey::pinned(name, v),
            None => CacheKey::latest(name),
        };

        if let Some(path) = self.cache.get(&key) {
            info!("Using cached archive for {}", key);
            return Ok(path);
        }

        let staged = self.cache.staging_path(&key)?;
        match self.fetch(&key, &staged).await {
            Ok(path) => Ok(path),
            Err(e) => {
                if self.runtime.exists(&staged) {
                    debug!("Removing partial download {:?}", staged);
                    let _ = self.runtime.remove_file(&staged);
                }
                Err(e)
            }
        }
    }

    async fn fetch(&self, key: &CacheKey, staged: &Path) -> Result<PathBuf> {
        let runtime = self.runtime;
        let digest = self
            .registry
            .download(&key.name, key.version.as_deref(), || {
                runtime.create_file(staged)
            })
            .await?;

        match digest {
            Some(expected) => {
                if let Err(e) = checksum::ensure(runtime, staged, &expected) {
                    self.cache.invalidate(key)?;
                    return Err(e);
                }
            }
            None => warn!(
                "Registry sent no checksum for {}; archive integrity is not verified",
                key
            ),
        }

        self.cache.commit(key, staged)
    }

    /// Latest published version of `name`, from the exact-name search hit.
    #[tracing::instrument(skip(self))]
    pub async fn latest_version(&self, name: &str) -> Result<Option<String>> {
        let hits = self.registry.search(name).await?;
        Ok(hits.into_iter().find(|h| h.name == name).map(|h| h.version))
    }
}
