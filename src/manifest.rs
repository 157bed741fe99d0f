//! `bplus.toml` project and package manifests.
//!
//! A manifest is parsed into a validated [`Manifest`] at the boundary: a
//! value of this type always has a non-blank name and version.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use log::debug;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

use crate::error::BpmError;
use crate::runtime::{Runtime, write_atomic};

/// File name of a project or package manifest.
pub const MANIFEST_FILE: &str = "bplus.toml";

/// Version written by `init`.
pub const INITIAL_VERSION: &str = "0.1.0";

/// Raw TOML shape, before validation.
mod raw {
    use serde::Deserialize;
    use std::collections::BTreeMap;

    #[derive(Deserialize, Debug)]
    pub struct Document {
        pub package: Option<Package>,
        #[serde(default)]
        pub dependencies: BTreeMap<String, String>,
    }

    #[derive(Deserialize, Debug)]
    pub struct Package {
        pub name: Option<String>,
        pub version: Option<String>,
        pub description: Option<String>,
        pub authors: Option<Vec<String>>,
        pub license: Option<String>,
        pub created: Option<String>,
    }
}

/// Validated project or package manifest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Manifest {
    pub name: String,
    pub version: String,
    pub description: Option<String>,
    pub authors: Vec<String>,
    pub license: Option<String>,
    pub created: Option<String>,
    /// Dependency name to version constraint. Not resolved transitively.
    pub dependencies: BTreeMap<String, String>,
}

/// Manifest as sent to the registry when publishing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteManifest {
    pub name: String,
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,
}

#[derive(Serialize)]
struct Document<'a> {
    package: PackageSection<'a>,
    dependencies: &'a BTreeMap<String, String>,
}

#[derive(Serialize)]
struct PackageSection<'a> {
    name: &'a str,
    version: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    description: Option<&'a str>,
    #[serde(skip_serializing_if = "no_authors")]
    authors: &'a [String],
    #[serde(skip_serializing_if = "Option::is_none")]
    license: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    created: Option<&'a str>,
}

fn no_authors(authors: &&[String]) -> bool {
    authors.is_empty()
}

impl Manifest {
    /// Create a manifest with the required fields only.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            description: None,
            authors: Vec::new(),
            license: None,
            created: None,
            dependencies: BTreeMap::new(),
        }
    }

    /// Load and validate a manifest file.
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime + ?Sized>(runtime: &R, path: &Path) -> Result<Self> {
        let content = runtime.read_to_string(path).map_err(|e| {
            BpmError::ManifestInvalid(format!("cannot read {}: {}", path.display(), e))
        })?;
        Self::parse_str(&content)
            .with_context(|| format!("Failed to load manifest {}", path.display()))
    }

    /// Parse and validate manifest text.
    pub fn parse_str(content: &str) -> Result<Self> {
        let doc: raw::Document = toml::from_str(content)
            .map_err(|e| BpmError::ManifestInvalid(format!("malformed TOML: {}", e.message())))?;

        let package = doc
            .package
            .ok_or_else(|| BpmError::ManifestInvalid("missing [package] section".into()))?;

        let name = required(package.name, "name")?;
        let version = required(package.version, "version")?;

        Ok(Self {
            name,
            version,
            description: package.description,
            authors: package.authors.unwrap_or_default(),
            license: package.license,
            created: package.created,
            dependencies: doc.dependencies,
        })
    }

    /// Render the manifest as `bplus.toml` text.
    pub fn to_toml(&self) -> Result<String> {
        let doc = Document {
            package: PackageSection {
                name: &self.name,
                version: &self.version,
                description: self.description.as_deref(),
                authors: &self.authors,
                license: self.license.as_deref(),
                created: self.created.as_deref(),
            },
            dependencies: &self.dependencies,
        };
        toml::to_string_pretty(&doc).context("Failed to serialize manifest")
    }

    /// Write the manifest to `path` atomically.
    pub fn save<R: Runtime + ?Sized>(&self, runtime: &R, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        write_atomic(runtime, path, content.as_bytes())
    }

    /// Project the manifest onto the registry's publish form.
    pub fn to_registry_form(&self) -> RemoteManifest {
        RemoteManifest {
            name: self.name.clone(),
            version: self.version.clone(),
            description: self.description.clone(),
            author: if self.authors.is_empty() {
                None
            } else {
                Some(self.authors.join(", "))
            },
            license: self.license.clone(),
        }
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, BpmError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v.trim().to_string()),
        Some(_) => Err(BpmError::ManifestInvalid(format!(
            "package {} is empty",
            field
        ))),
        None => Err(BpmError::ManifestInvalid(format!(
            "package {} is missing",
            field
        ))),
    }
}

/// Create `<dir>/bplus.toml` for a new project.
#[tracing::instrument(skip(runtime))]
pub fn init_project<R: Runtime + ?Sized>(runtime: &R, dir: &Path, name: &str) -> Result<Manifest> {
    if name.trim().is_empty() {
        return Err(BpmError::InputInvalid("project name is empty".into()).into());
    }

    let path = dir.join(MANIFEST_FILE);
    if runtime.exists(&path) {
        return Err(BpmError::InputInvalid(format!(
            "{} already exists in {}",
            MANIFEST_FILE,
            dir.display()
        ))
        .into());
    }

    let created: DateTime<Utc> = runtime.now().into();
    let mut manifest = Manifest::new(name.trim(), INITIAL_VERSION);
    manifest.created = Some(created.to_rfc3339_opts(SecondsFormat::Secs, true));

    debug!("Writing new manifest to {:?}", path);
    manifest.save(runtime, &path)?;
    Ok(manifest)
}

/// Check that `dir` is a project with a valid manifest.
#[tracing::instrument(skip(runtime))]
pub fn verify_project<R: Runtime + ?Sized>(runtime: &R, dir: &Path) -> Result<Manifest> {
    if !runtime.is_dir(dir) {
        return Err(BpmError::InputInvalid(format!(
            "project directory does not exist: {}",
            dir.display()
        ))
        .into());
    }

    let path = dir.join(MANIFEST_FILE);
    if !runtime.exists(&path) {
        return Err(BpmError::ManifestInvalid(format!(
            "missing {} in {}",
            MANIFEST_FILE,
            dir.display()
        ))
        .into());
    }

    Manifest::load(runtime, &path)
}
