//! Publishing projects to the registry, and searching it.

use anyhow::Result;
use log::{debug, info};
use std::path::{Path, PathBuf};

use crate::archive::{self, ARCHIVE_EXTENSION};
use crate::checksum;
use crate::error::BpmError;
use crate::manifest::verify_project;
use crate::registry::{Registry, SearchHit};
use crate::runtime::Runtime;

/// Build output directory inside a project; never packed.
pub const TARGET_DIR: &str = "target";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub name: String,
    pub version: String,
    pub archive: PathBuf,
    pub digest: String,
    pub files: usize,
}

pub struct Publisher<'a, R: Runtime> {
    runtime: &'a R,
    registry: &'a Registry,
    extension_roots: Vec<PathBuf>,
}

impl<'a, R: Runtime> Publisher<'a, R> {
    /// `extension_roots` are install directories that never go into a
    /// published archive, even when they sit inside the project.
    pub fn new(runtime: &'a R, registry: &'a Registry, extension_roots: Vec<PathBuf>) -> Self {
        Self {
            runtime,
            registry,
            extension_roots,
        }
    }

    /// Pack the project at `project_dir` and announce it to the registry.
    ///
    /// The archive lands in `<project>/target/<name>-<version>.bpex`; only
    /// the manifest's registry form is uploaded.
    #[tracing::instrument(skip(self))]
    pub async fn publish(&self, project_dir: &Path) -> Result<PublishReceipt> {
        let project_dir = if project_dir.is_absolute() {
            project_dir.to_path_buf()
        } else {
            self.runtime.current_dir()?.join(project_dir)
        };
        let manifest = verify_project(self.runtime, &project_dir)?;
        let project_dir = self.runtime.canonicalize(&project_dir)?;

        let target = project_dir.join(TARGET_DIR);
        let archive_path = target.join(format!(
            "{}-{}.{}",
            manifest.name, manifest.version, ARCHIVE_EXTENSION
        ));
        let excluded = self.excluded_paths(target)?;
        let files = archive::pack(self.runtime, &project_dir, &archive_path, &excluded)?;
        let digest = checksum::digest(self.runtime, &archive_path)?;

        self.registry.publish(&manifest.to_registry_form()).await?;
        info!(
            "Published {} {} ({} file(s), sha256 {})",
            manifest.name, manifest.version, files, digest
        );

        Ok(PublishReceipt {
            name: manifest.name,
            version: manifest.version,
            archive: archive_path,
            digest,
            files,
        })
    }

    /// `target` plus every extension root that exists, resolved so they
    /// compare equal to the entries `pack` walks.
    fn excluded_paths(&self, target: PathBuf) -> Result<Vec<PathBuf>> {
        let mut excluded = vec![target];
        for root in &self.extension_roots {
            if self.runtime.exists(root) {
                excluded.push(self.runtime.canonicalize(root)?);
            }
        }
        debug!("Excluding {:?} from the archive", excluded);
        Ok(excluded)
    }

    pub async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let query = query.trim();
        if query.is_empty() {
            return Err(BpmError::InputInvalid("search query is empty".into()).into());
        }
        self.registry.search(query).await
    }
}
